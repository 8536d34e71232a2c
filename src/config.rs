//! Provider configuration.
//!
//! The configuration is read once during `C_Initialize` from the TOML file
//! named by the `P11SESSION_CONFIG` environment variable. Without that
//! variable the defaults below apply: a single slot holding a software token
//! whose PINs have not been set yet.

use std::{env, fs, io, path::Path};

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "P11SESSION_CONFIG";

const DEFAULT_MAX_SESSIONS: usize = 256;
const DEFAULT_MIN_PIN_LEN: usize = 4;
const DEFAULT_MAX_PIN_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "Config::default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "Config::default_min_pin_len")]
    pub min_pin_len: usize,
    #[serde(default = "Config::default_max_pin_len")]
    pub max_pin_len: usize,
    #[serde(default = "Config::default_slots")]
    pub slots: Vec<SlotConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    pub label: String,
    #[serde(default)]
    pub token: Option<TokenConfig>,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    pub label: String,
    #[serde(default)]
    pub so_pin: Option<String>,
    #[serde(default)]
    pub user_pin: Option<String>,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("label", &self.label)
            .field("so_pin", &self.so_pin.as_ref().map(|_| "<redacted>"))
            .field("user_pin", &self.user_pin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: Self::default_max_sessions(),
            min_pin_len: Self::default_min_pin_len(),
            max_pin_len: Self::default_max_pin_len(),
            slots: Self::default_slots(),
        }
    }
}

impl Config {
    fn default_max_sessions() -> usize {
        DEFAULT_MAX_SESSIONS
    }

    fn default_min_pin_len() -> usize {
        DEFAULT_MIN_PIN_LEN
    }

    fn default_max_pin_len() -> usize {
        DEFAULT_MAX_PIN_LEN
    }

    fn default_slots() -> Vec<SlotConfig> {
        vec![SlotConfig {
            label: "p11session slot 0".to_string(),
            token: Some(TokenConfig {
                label: "p11session token".to_string(),
                so_pin: None,
                user_pin: None,
            }),
        }]
    }

    /// Loads the configuration named by `P11SESSION_CONFIG`, falling back to
    /// the defaults when the variable is not set.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::read(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be greater than zero".to_string()));
        }
        if self.min_pin_len > self.max_pin_len {
            return Err(ConfigError::Invalid(format!(
                "min_pin_len ({}) exceeds max_pin_len ({})",
                self.min_pin_len, self.max_pin_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.min_pin_len, DEFAULT_MIN_PIN_LEN);
        assert_eq!(config.max_pin_len, DEFAULT_MAX_PIN_LEN);
        assert_eq!(config.slots.len(), 1);
        assert!(config.slots[0].token.is_some());
    }

    #[test]
    fn slots_without_token_are_kept() {
        let config = Config::parse(
            r#"
            max_sessions = 2

            [[slots]]
            label = "reader"

            [[slots]]
            label = "enclave"
            token = { label = "enclave token", so_pin = "12345678", user_pin = "1234" }
            "#,
        )
        .unwrap();

        assert_eq!(config.max_sessions, 2);
        assert!(config.slots[0].token.is_none());
        assert_eq!(config.slots[1].token.as_ref().unwrap().user_pin.as_deref(), Some("1234"));
    }

    #[test]
    fn inverted_pin_bounds_are_rejected() {
        let err = Config::parse("min_pin_len = 10\nmax_pin_len = 4").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_sessions_are_rejected() {
        assert!(matches!(Config::parse("max_sessions = 0"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(Config::parse("max_session = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_pin_len = 6").unwrap();

        let config = Config::read(file.path()).unwrap();
        assert_eq!(config.min_pin_len, 6);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::read(Path::new("/nonexistent/p11session.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/p11session.toml"));
    }

    #[test]
    fn debug_output_hides_pins() {
        let token = TokenConfig {
            label: "t".to_string(),
            so_pin: Some("supersecret".to_string()),
            user_pin: None,
        };
        assert!(!format!("{token:?}").contains("supersecret"));
    }
}
