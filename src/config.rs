use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::duration::parse_duration;
use crate::error::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/cpuburn.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BurnConfig {
    pub burn: String,
    /// Run duration; `"0"` runs until interrupted.
    pub duration: String,
    pub lock_os_thread: bool,
    /// Report interval; `"0"` disables reporting.
    pub log_every: String,
    pub quiet: bool,
    pub work_unit_us: u64,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            burn: "1".into(),
            duration: "0".into(),
            lock_os_thread: true,
            log_every: "10s".into(),
            quiet: false,
            work_unit_us: 500,
        }
    }
}

impl BurnConfig {
    /// Clamp fields to valid ranges.
    pub fn validate(&mut self) {
        self.work_unit_us = self.work_unit_us.clamp(50, 100_000);
    }

    pub fn duration(&self) -> Result<Duration, Error> {
        parse_duration(&self.duration)
    }

    pub fn log_every(&self) -> Result<Duration, Error> {
        parse_duration(&self.log_every)
    }

    pub fn work_unit(&self) -> Duration {
        Duration::from_micros(self.work_unit_us)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub burn: BurnConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/cpuburn.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let cfg = BurnConfig::default();
        assert_eq!(cfg.burn, "1");
        assert_eq!(cfg.duration().unwrap(), Duration::ZERO);
        assert!(cfg.lock_os_thread);
        assert_eq!(cfg.log_every().unwrap(), Duration::from_secs(10));
        assert!(!cfg.quiet);
        assert_eq!(cfg.work_unit(), Duration::from_micros(500));
    }

    #[test]
    fn test_validate_clamps_work_unit() {
        let mut cfg = BurnConfig {
            work_unit_us: 1,
            ..Default::default()
        };
        cfg.validate();
        assert_eq!(cfg.work_unit_us, 50);

        cfg.work_unit_us = 10_000_000;
        cfg.validate();
        assert_eq!(cfg.work_unit_us, 100_000);
    }

    #[test]
    fn test_invalid_duration_string() {
        let cfg = BurnConfig {
            duration: "forever".into(),
            ..Default::default()
        };
        assert!(cfg.duration().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let path = std::env::temp_dir().join("cpuburn_test_config.toml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(
                f,
                r#"
[burn]
burn = "50%"
duration = "1m30s"
lock_os_thread = false
"#
            )
            .unwrap();
        }
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.burn.burn, "50%");
        assert_eq!(config.burn.duration().unwrap(), Duration::from_secs(90));
        assert!(!config.burn.lock_os_thread);
        // Unset fields should get defaults
        assert_eq!(config.burn.log_every, "10s");
        assert_eq!(config.burn.work_unit_us, 500);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_toml_errors() {
        let path = std::env::temp_dir().join("cpuburn_test_bad_config.toml");
        std::fs::write(&path, "[burn]\nquiet = \"maybe\"\n").unwrap();
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(Error::InvalidArgs(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let path = Path::new("/tmp/cpuburn_nonexistent_config.toml");
        let result = load_config(Some(path));
        assert!(result.is_err());
    }
}
