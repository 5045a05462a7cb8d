use std::io;
use std::path::Path;
use tokio::fs;

// Mounts into these trees are refused outright.
const PATH_DISALLOW_LIST: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/Library"];
// When non-empty, only paths inside one of these entries are permitted.
const PATH_ALLOW_LIST: &[&str] = &[];

/// Non-empty components of a path; leading, trailing, and repeated
/// separators collapse away.
pub(crate) fn split_path(p: &str) -> Vec<&str> {
    p.split('/').filter(|part| !part.is_empty()).collect()
}

/// `p1` is inside `p2` iff `p2`'s component sequence is a prefix of `p1`'s.
pub(crate) fn is_inside_path(p1: &str, p2: &str) -> bool {
    let p1_parts = split_path(p1);
    let p2_parts = split_path(p2);
    if p2_parts.len() > p1_parts.len() {
        return false;
    }
    p1_parts[..p2_parts.len()] == p2_parts[..]
}

pub(crate) fn is_path_allowed(container_path: &str) -> bool {
    for allowed in PATH_ALLOW_LIST {
        if is_inside_path(container_path, allowed) {
            return true;
        }
    }

    for disallowed in PATH_DISALLOW_LIST {
        if is_inside_path(container_path, disallowed) {
            return false;
        }
    }

    true
}

/// Emulate a bind-mount without privileges: replace whatever sits at the
/// container path with a symlink to the host path. A populated directory at
/// the container path fails the removal and surfaces as an error.
pub(crate) async fn symlink_to_container_path(
    host_path: &str,
    container_path: &str,
) -> io::Result<()> {
    if !is_path_allowed(container_path) {
        tracing::warn!("mount {}->{} is not allowed", host_path, container_path);
        return Ok(());
    }

    match fs::symlink_metadata(container_path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir(container_path).await?,
        Ok(_) => fs::remove_file(container_path).await?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = Path::new(container_path).parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::symlink(host_path, container_path).await?;

    tracing::debug!("symlinked volume mount {}->{}", host_path, container_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/usr/bin/ls"), vec!["usr", "bin", "ls"]);
        assert!(split_path("/").is_empty());
        assert_eq!(split_path("//usr/bin"), vec!["usr", "bin"]);
        assert_eq!(
            split_path("//usr///local/bin//foo//"),
            vec!["usr", "local", "bin", "foo"]
        );
    }

    #[test]
    fn test_is_inside_path() {
        let cases = [
            ("/usr/bin", "/usr", true),
            ("//usr/bin", "/usr", true),
            ("/usr/bin", "//usr", true),
            ("/usr", "/usr/bin", false),
            ("/usrx/bin", "/usr", false),
            ("/etc/hosts", "/etc", true),
            ("/etc/hosts//", "/etc", true),
            ("/private/etc/hosts", "/etc/", false),
            ("/", "/usr", false),
            ("/usr/local/bin/foo", "/usr", true),
            ("/usr/local/bin/foo", "/usr//", true),
            ("/usr", "/", true),
            ("//usr", "/", true),
        ];

        for (p1, p2, expected) in cases {
            assert_eq!(
                is_inside_path(p1, p2),
                expected,
                "is_inside_path({:?}, {:?})",
                p1,
                p2
            );
        }
    }

    #[test]
    fn test_is_path_allowed() {
        assert!(!is_path_allowed("/etc/hosts"));
        assert!(!is_path_allowed("/usr/local/bin/foo"));
        assert!(is_path_allowed("/var/kubernetes/secrets/token"));
        assert!(is_path_allowed("/foobar"));
    }

    #[tokio::test]
    async fn test_symlink_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let host = dir.path().join("host-data");
        let target = dir.path().join("mounts").join("data");
        tokio::fs::write(&host, b"payload").await.unwrap();
        tokio::fs::create_dir_all(target.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&target, b"stale").await.unwrap();

        symlink_to_container_path(host.to_str().unwrap(), target.to_str().unwrap())
            .await
            .unwrap();

        let meta = tokio::fs::symlink_metadata(&target).await.unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_symlink_creates_missing_parents() {
        let dir = TempDir::new().unwrap();
        let host = dir.path().join("host-data");
        let target = dir.path().join("a").join("b").join("data");
        tokio::fs::write(&host, b"payload").await.unwrap();

        symlink_to_container_path(host.to_str().unwrap(), target.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");
    }
}
