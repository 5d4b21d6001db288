use serde::Deserialize;
use std::path::PathBuf;
use vm_orchestrator::DEFAULT_BOX;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base directory for relative Vagrant paths.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Hostname given to machines created without one.
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_box")]
    pub default_box: String,
}

fn default_bind_addr() -> String {
    std::env::var("VM_API_BIND").unwrap_or_else(|_| "0.0.0.0:3121".to_string())
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_home() -> PathBuf {
    std::env::var("VM_API_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir())
}

fn default_username() -> String {
    std::env::var("VM_API_USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "vagrant".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("VM_API_DB_PATH") {
        return PathBuf::from(path);
    }

    home_dir().join(".vm").join("api").join("status.db")
}

fn default_box() -> String {
    std::env::var("VM_API_DEFAULT_BOX")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_BOX.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            home: default_home(),
            username: default_username(),
            db_path: default_db_path(),
            default_box: default_box(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{ "home": "/srv/vagrant", "username": "devbox" }"#).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/vagrant"));
        assert_eq!(config.username, "devbox");
        assert!(!config.bind_addr.is_empty());
        assert!(!config.default_box.is_empty());
    }
}
