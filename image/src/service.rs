use crate::error::ImageError;
use crate::reference::split_image_reference;
use chrono::Utc;
use procri_core::{
    AuthConfig, FilesystemIdentifier, FilesystemUsage, Image, ImageFsInfoRequest,
    ImageFsInfoResponse, ImageStatusRequest, ImageStatusResponse, Int64Value, ListImagesRequest,
    ListImagesResponse, PullImageRequest, PullImageResponse, RemoveImageRequest,
    RemoveImageResponse, UInt64Value,
};
use procri_store::DiskStore;
use serde::{Deserialize, Serialize};

/// Persisted image record, keyed by the hashed image name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRecord {
    image: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    auth: String,
    #[serde(default)]
    server_address: String,
    #[serde(default)]
    identity_token: String,
    #[serde(default)]
    registry_token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    digests: Vec<String>,
}

/// Records pulled-image metadata; no image bytes are ever fetched.
pub struct ImageRegistry {
    // Generated at startup, stands in for a storage UUID.
    #[allow(dead_code)]
    uuid: String,
    store: DiskStore,
}

impl ImageRegistry {
    pub fn new(store: DiskStore) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            store,
        }
    }

    async fn get_image(&self, key: &str) -> Option<ImageRecord> {
        let buf = match self.store.read(key).await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::debug!("looking up image {}: {}", key, e);
                return None;
            }
        };

        let mut record: ImageRecord = match serde_json::from_slice(&buf) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("deserializing image data for {}: {}", key, e);
                return None;
            }
        };

        // Older records encoded an empty list as a single empty string.
        if record.tags == [""] {
            record.tags.clear();
        }
        if record.digests == [""] {
            record.digests.clear();
        }

        Some(record)
    }

    async fn put_image(&self, key: &str, record: &ImageRecord) -> Result<(), ImageError> {
        let buf = serde_json::to_vec(record)?;
        self.store.write(key, &buf).await?;
        Ok(())
    }

    async fn delete_image(&self, key: &str) -> bool {
        if let Err(e) = self.store.erase(key).await {
            tracing::error!("deleting image {}: {}", key, e);
            return false;
        }
        true
    }

    async fn list_records(&self) -> Vec<ImageRecord> {
        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("listing image store: {}", e);
                return Vec::new();
            }
        };

        let mut images = Vec::new();
        for key in keys {
            if let Some(record) = self.get_image(&key).await {
                images.push(record);
            }
        }
        images
    }

    pub async fn list_images(
        &self,
        req: ListImagesRequest,
    ) -> Result<ListImagesResponse, ImageError> {
        let wanted = req
            .filter
            .as_ref()
            .and_then(|f| f.image.as_ref())
            .map(|spec| spec.image.clone());

        let mut images = Vec::new();
        for record in self.list_records().await {
            if let Some(name) = &wanted {
                if *name != record.image {
                    continue;
                }
            }
            images.push(Image {
                id: record.image.clone(),
                repo_tags: record.tags.clone(),
                repo_digests: record.digests.clone(),
                size: 0,
                uid: Some(Int64Value { value: 0 }),
                username: String::new(),
                spec: None,
            });
        }

        Ok(ListImagesResponse { images })
    }

    pub async fn image_status(
        &self,
        req: ImageStatusRequest,
    ) -> Result<ImageStatusResponse, ImageError> {
        let Some(spec) = req.image else {
            return Ok(ImageStatusResponse {
                image: None,
                info: Default::default(),
            });
        };

        let (key, _, _) = split_image_reference(&spec.image);

        let image = self.get_image(&key).await.map(|record| Image {
            id: spec.image.clone(),
            repo_tags: record.tags,
            repo_digests: record.digests,
            // Zero means "absent" to the caller.
            size: 1,
            uid: Some(Int64Value { value: 0 }),
            username: String::new(),
            spec: None,
        });

        Ok(ImageStatusResponse {
            image,
            info: Default::default(),
        })
    }

    pub async fn pull_image(
        &self,
        req: PullImageRequest,
    ) -> Result<PullImageResponse, ImageError> {
        let Some(spec) = req.image else {
            return Err(ImageError::InvalidParameter(
                "PullImageRequest.Image".to_string(),
            ));
        };

        let (key, tag, digest) = split_image_reference(&spec.image);

        if let Some(mut record) = self.get_image(&key).await {
            add_unique(&mut record.tags, &tag);
            add_unique(&mut record.digests, &digest);
            self.put_image(&key, &record).await?;
        } else {
            let mut record = ImageRecord {
                image: spec.image.clone(),
                ..Default::default()
            };
            add_unique(&mut record.tags, &tag);
            add_unique(&mut record.digests, &digest);
            if let Some(auth) = req.auth {
                tracing::debug!("storing pull credentials for image {}", key);
                apply_auth(&mut record, auth);
            }
            self.put_image(&key, &record).await?;
        }

        tracing::info!("pulled image {} ({})", spec.image, key);
        Ok(PullImageResponse { image_ref: key })
    }

    pub async fn remove_image(
        &self,
        req: RemoveImageRequest,
    ) -> Result<RemoveImageResponse, ImageError> {
        let Some(spec) = req.image else {
            return Err(ImageError::InvalidParameter(
                "RemoveImageRequest.Image".to_string(),
            ));
        };

        let (key, tag, digest) = split_image_reference(&spec.image);

        let Some(mut record) = self.get_image(&key).await else {
            tracing::warn!("RemoveImage: unknown image {} ({})", spec.image, key);
            return Ok(RemoveImageResponse {});
        };

        // The record goes away when its single digest matches, or when the
        // matching tag is the last reference of any kind.
        let single_digest = record.digests.len() == 1 && record.digests[0] == digest;
        let last_tag =
            record.tags.len() == 1 && record.tags[0] == tag && record.digests.is_empty();
        if single_digest || last_tag {
            self.delete_image(&key).await;
            return Ok(RemoveImageResponse {});
        }

        record.tags.retain(|t| *t != tag);
        record.digests.retain(|d| *d != digest);
        tracing::debug!(
            "image {} rewritten with tags {:?} digests {:?}",
            key,
            record.tags,
            record.digests
        );
        self.put_image(&key, &record).await?;

        Ok(RemoveImageResponse {})
    }

    pub async fn image_fs_info(
        &self,
        _req: ImageFsInfoRequest,
    ) -> Result<ImageFsInfoResponse, ImageError> {
        let usage = FilesystemUsage {
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            fs_id: Some(FilesystemIdentifier {
                mountpoint: "/".to_string(),
            }),
            used_bytes: Some(UInt64Value { value: 0 }),
            inodes_used: Some(UInt64Value { value: 0 }),
        };

        Ok(ImageFsInfoResponse {
            image_filesystems: vec![usage],
        })
    }
}

fn apply_auth(record: &mut ImageRecord, auth: AuthConfig) {
    record.username = auth.username;
    record.password = auth.password;
    record.auth = auth.auth;
    record.server_address = auth.server_address;
    record.identity_token = auth.identity_token;
    record.registry_token = auth.registry_token;
}

fn add_unique(list: &mut Vec<String>, item: &str) {
    if item.is_empty() {
        return;
    }
    if list.iter().any(|i| i == item) {
        return;
    }
    list.push(item.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::make_image_key;
    use procri_core::ImageSpec;
    use tempfile::TempDir;

    async fn create_test_registry() -> (ImageRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path()).await.unwrap();
        (ImageRegistry::new(store), dir)
    }

    fn pull_req(image: &str) -> PullImageRequest {
        PullImageRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
            auth: None,
            sandbox_config: None,
        }
    }

    fn remove_req(image: &str) -> RemoveImageRequest {
        RemoveImageRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
        }
    }

    fn status_req(image: &str) -> ImageStatusRequest {
        ImageStatusRequest {
            image: Some(ImageSpec {
                image: image.to_string(),
                ..Default::default()
            }),
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_pull_stores_under_hashed_key() {
        let (registry, _dir) = create_test_registry().await;

        let resp = registry.pull_image(pull_req("nginx")).await.unwrap();
        assert_eq!(resp.image_ref, make_image_key("nginx"));

        let status = registry.image_status(status_req("nginx")).await.unwrap();
        let image = status.image.unwrap();
        assert_eq!(image.size, 1);
        assert_eq!(image.repo_tags, vec!["nginx:latest"]);
        assert!(image.repo_digests.is_empty());
    }

    #[tokio::test]
    async fn test_pull_deduplicates_tags_and_digests() {
        let (registry, _dir) = create_test_registry().await;

        registry.pull_image(pull_req("nginx")).await.unwrap();
        registry.pull_image(pull_req("nginx")).await.unwrap();
        registry
            .pull_image(pull_req("nginx@sha256:abc"))
            .await
            .unwrap();
        registry
            .pull_image(pull_req("nginx@sha256:abc"))
            .await
            .unwrap();

        let resp = registry
            .list_images(ListImagesRequest { filter: None })
            .await
            .unwrap();
        assert_eq!(resp.images.len(), 1);
        assert_eq!(resp.images[0].repo_tags, vec!["nginx:latest"]);
        assert_eq!(resp.images[0].repo_digests, vec!["nginx@sha256:abc"]);
    }

    #[tokio::test]
    async fn test_image_lifecycle() {
        let (registry, _dir) = create_test_registry().await;

        registry.pull_image(pull_req("nginx")).await.unwrap();
        registry
            .pull_image(pull_req("nginx@sha256:abc"))
            .await
            .unwrap();

        // Removing the tag rewrites the record; the digest keeps it alive.
        registry.remove_image(remove_req("nginx")).await.unwrap();
        let status = registry.image_status(status_req("nginx")).await.unwrap();
        let image = status.image.unwrap();
        assert!(image.repo_tags.is_empty());
        assert_eq!(image.repo_digests, vec!["nginx@sha256:abc"]);

        // Removing the single matching digest erases the record.
        registry
            .remove_image(remove_req("nginx@sha256:abc"))
            .await
            .unwrap();
        let status = registry.image_status(status_req("nginx")).await.unwrap();
        assert!(status.image.is_none());
    }

    #[tokio::test]
    async fn test_single_digest_removal_discards_surviving_tag() {
        let (registry, _dir) = create_test_registry().await;

        registry.pull_image(pull_req("busybox")).await.unwrap();
        registry
            .pull_image(pull_req("busybox@sha256:fff"))
            .await
            .unwrap();

        registry
            .remove_image(remove_req("busybox@sha256:fff"))
            .await
            .unwrap();
        let status = registry.image_status(status_req("busybox")).await.unwrap();
        assert!(status.image.is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_image_succeeds() {
        let (registry, _dir) = create_test_registry().await;
        registry.remove_image(remove_req("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_images_filter() {
        let (registry, _dir) = create_test_registry().await;

        registry.pull_image(pull_req("nginx")).await.unwrap();
        registry.pull_image(pull_req("busybox")).await.unwrap();

        let all = registry
            .list_images(ListImagesRequest { filter: None })
            .await
            .unwrap();
        assert_eq!(all.images.len(), 2);

        let filtered = registry
            .list_images(ListImagesRequest {
                filter: Some(procri_core::ImageFilter {
                    image: Some(ImageSpec {
                        image: "nginx".to_string(),
                        ..Default::default()
                    }),
                }),
            })
            .await
            .unwrap();
        assert_eq!(filtered.images.len(), 1);
        assert_eq!(filtered.images[0].id, "nginx");
    }

    #[tokio::test]
    async fn test_status_of_missing_image_is_empty() {
        let (registry, _dir) = create_test_registry().await;
        let status = registry.image_status(status_req("ghost")).await.unwrap();
        assert!(status.image.is_none());
    }

    #[tokio::test]
    async fn test_fs_info_reports_single_zero_entry() {
        let (registry, _dir) = create_test_registry().await;
        let resp = registry.image_fs_info(ImageFsInfoRequest {}).await.unwrap();
        assert_eq!(resp.image_filesystems.len(), 1);
        let fs = &resp.image_filesystems[0];
        assert!(fs.timestamp > 0);
        assert_eq!(fs.fs_id.as_ref().unwrap().mountpoint, "/");
        assert_eq!(fs.used_bytes.as_ref().unwrap().value, 0);
    }
}
