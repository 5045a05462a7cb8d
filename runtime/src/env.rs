use procri_core::KeyValue;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Compose the child's environment: caller-supplied entries first, then the
/// defaults the caller did not shadow.
pub(crate) fn make_env_list(envs: &[KeyValue]) -> Vec<String> {
    let hostname = match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!("gethostname(): {}", e);
            String::new()
        }
    };

    let mut defaults: Vec<(&str, String)> = vec![
        ("HOSTNAME", hostname),
        ("TERM", "xterm".to_string()),
        ("HOME", "/".to_string()),
        ("PATH", DEFAULT_PATH.to_string()),
    ];

    let mut ret = Vec::with_capacity(envs.len() + defaults.len());
    for kv in envs {
        defaults.retain(|(key, _)| *key != kv.key);
        ret.push(format!("{}={}", kv.key, kv.value));
    }
    for (key, value) in defaults {
        ret.push(format!("{}={}", key, value));
    }

    tracing::trace!("created env {:?}", ret);
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_make_env_list() {
        let mut envs = make_env_list(&[kv("MY_ENV", "dummy")]);
        assert_eq!(envs.len(), 5);
        envs.sort();
        assert!(envs[0].starts_with("HOME="));
        assert!(envs[1].starts_with("HOSTNAME="));
        assert_eq!(envs[2], "MY_ENV=dummy");
        assert!(envs[3].starts_with("PATH="));
        assert!(envs[4].starts_with("TERM="));
    }

    #[test]
    fn test_caller_shadows_defaults() {
        let envs = make_env_list(&[kv("PATH", "/opt/bin"), kv("TERM", "dumb")]);
        assert_eq!(envs.len(), 4);
        assert_eq!(envs[0], "PATH=/opt/bin");
        assert_eq!(envs[1], "TERM=dumb");
        assert_eq!(envs.iter().filter(|e| e.starts_with("PATH=")).count(), 1);
        assert_eq!(envs.iter().filter(|e| e.starts_with("TERM=")).count(), 1);
    }

    #[test]
    fn test_empty_input_yields_defaults() {
        let envs = make_env_list(&[]);
        assert_eq!(envs.len(), 4);
        assert!(envs.iter().any(|e| e.starts_with("HOSTNAME=")));
        assert!(
            envs.iter()
                .any(|e| e == &format!("PATH={}", DEFAULT_PATH))
        );
    }
}
