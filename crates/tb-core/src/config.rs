use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Name of the relay store file inside the data directory.
pub const STORE_FILE: &str = "relays.json";

/// Name of the transport's accounts directory inside the data directory.
pub const ACCOUNTS_DIR: &str = "accounts";

/// Typed runtime configuration.
///
/// Command-line flags select the data directory; everything else comes from
/// `TEAMS_*` environment variables (optionally via a `.env` file).
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub accounts_dir: PathBuf,
    pub store_path: PathBuf,

    // Transport
    pub rpc_server_path: PathBuf,

    // Delivery supervision
    pub delivery: DeliveryPolicy,
}

/// Timing of outbound delivery supervision.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryPolicy {
    /// How often a pending message's state is polled.
    pub poll_interval: Duration,
    /// How long a failed message may still turn into a delivered one.
    pub grace: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            grace: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let data_dir = data_dir.into();
        if data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data directory must not be empty".to_string()));
        }
        fs::create_dir_all(&data_dir)?;

        let rpc_server_path = env_path("TEAMS_RPC_SERVER")
            .or_else(|| which_in_path("deltachat-rpc-server"))
            .unwrap_or_else(|| PathBuf::from("deltachat-rpc-server"));

        let defaults = DeliveryPolicy::default();
        let delivery = DeliveryPolicy {
            poll_interval: env_u64("TEAMS_DELIVERY_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            grace: env_u64("TEAMS_DELIVERY_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.grace),
        };
        if delivery.poll_interval.is_zero() {
            return Err(Error::Config(
                "TEAMS_DELIVERY_POLL_MS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            accounts_dir: data_dir.join(ACCOUNTS_DIR),
            store_path: data_dir.join(STORE_FILE),
            data_dir,
            rpc_server_path,
            delivery,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_quotes_only() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("\"abc'"), "\"abc'");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn load_derives_paths_from_data_dir() {
        let root = PathBuf::from(format!("/tmp/tb-config-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);

        let cfg = Config::load(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(cfg.store_path, root.join(STORE_FILE));
        assert_eq!(cfg.accounts_dir, root.join(ACCOUNTS_DIR));
        assert!(!cfg.delivery.poll_interval.is_zero());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn empty_data_dir_is_rejected() {
        assert!(matches!(Config::load(""), Err(Error::Config(_))));
    }
}
