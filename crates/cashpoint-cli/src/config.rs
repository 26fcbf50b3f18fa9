use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cashpoint_device::{AcceptorSettings, DispenserSettings};

/// Contents of `cashpoint.toml`.
///
/// ```toml
/// [acceptor.serial]
/// path = "/dev/ttyUSB0"
///
/// [dispenser]
/// dialect = "new"
///
/// [dispenser.serial]
/// path = "/dev/ttyUSB1"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub acceptor: AcceptorSettings,
    pub dispenser: DispenserSettings,
}

impl Config {
    /// Load the config file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashpoint_core::Dialect;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("cashpoint.toml")).unwrap();
        assert_eq!(config.acceptor, AcceptorSettings::default());
        assert_eq!(config.dispenser.dialect, Dialect::Old);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[acceptor]
init_delay = 250

[acceptor.serial]
path = "/dev/ttyS3"

[dispenser]
dialect = "new"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.acceptor.serial.path, "/dev/ttyS3");
        assert_eq!(config.acceptor.serial.baud_rate, 9_600);
        assert_eq!(config.acceptor.init_delay, Duration::from_millis(250));
        assert_eq!(config.dispenser.dialect, Dialect::New);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispenser]\ndialect = 3").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
