use sha2::{Digest, Sha256};

/// Split an image reference into `(storage key, tag, digest)`.
///
/// `nginx@sha256:abc` keeps the whole reference as the digest and carries no
/// tag; `nginx:1.25` keeps the whole reference as the tag; a bare `nginx`
/// synthesizes `nginx:latest`.
pub fn split_image_reference(image: &str) -> (String, String, String) {
    if image.contains("@sha256") {
        let name = image.split('@').next().unwrap_or(image);
        return (make_image_key(name), String::new(), image.to_string());
    }

    let parts: Vec<&str> = image.split(':').collect();
    if parts.len() > 1 {
        return (make_image_key(parts[0]), image.to_string(), String::new());
    }

    (
        make_image_key(parts[0]),
        format!("{}:latest", parts[0]),
        String::new(),
    )
}

/// Hash the image name into a flat storage key. Names of the form
/// `<host>/<path>/<name>` would otherwise force nested directories in the
/// store.
pub fn make_image_key(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bare_name() {
        let (key, tag, digest) = split_image_reference("nginx");
        assert_eq!(key, make_image_key("nginx"));
        assert_eq!(tag, "nginx:latest");
        assert_eq!(digest, "");
    }

    #[test]
    fn test_split_with_tag() {
        let (key, tag, digest) = split_image_reference("nginx:1.25");
        assert_eq!(key, make_image_key("nginx"));
        assert_eq!(tag, "nginx:1.25");
        assert_eq!(digest, "");
    }

    #[test]
    fn test_split_with_digest() {
        let (key, tag, digest) = split_image_reference("nginx@sha256:abc123");
        assert_eq!(key, make_image_key("nginx"));
        assert_eq!(tag, "");
        assert_eq!(digest, "nginx@sha256:abc123");
    }

    #[test]
    fn test_tag_and_digest_share_a_key() {
        let (tagged, _, _) = split_image_reference("ghcr.io/owner/repo:v1");
        let (digested, _, _) = split_image_reference("ghcr.io/owner/repo@sha256:deadbeef");
        assert_eq!(tagged, digested);
    }

    #[test]
    fn test_key_is_lowercase_hex() {
        let key = make_image_key("nginx");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
