use crate::constants::{
    DEFAULT_DB_MAX_CONNECTIONS, DEFAULT_MAX_INVALID_CHANGE_PASSWORD_ATTEMPTS,
    DEFAULT_MAX_INVALID_LOGIN_ATTEMPTS, DEFAULT_PASSWORD_HASH_COST, DEFAULT_TOKEN_ALGORITHM,
    DEFAULT_TOKEN_LIFETIME_SECS, TOKEN_ENCRYPTION_KEY_LENGTH,
};
use crate::validate::validate_field_path;
use jsonwebtoken::Algorithm;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration for {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Localized error messages: language → error code → message.
    pub messages: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service_address: String,
    pub cors_allowed_origins: String,
    pub debug_mode: bool,
    pub log_to_syslog: bool,
    pub languages: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_address: "0.0.0.0:8080".to_string(),
            cors_allowed_origins: "*".to_string(),
            debug_mode: false,
            log_to_syslog: true,
            languages: vec!["en".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "memory://".to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_algorithm: String,
    pub token_lifetime_secs: u64,
    pub encryption_key: String,
    pub encryption_iv: String,
    pub max_invalid_login_attempts: u32,
    pub max_invalid_change_password_attempts: u32,
    pub activation_required: bool,
    pub identifier_field: String,
    pub password_field: String,
    pub password_hash_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_algorithm: DEFAULT_TOKEN_ALGORITHM.to_string(),
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            encryption_key: String::new(),
            encryption_iv: String::new(),
            max_invalid_login_attempts: DEFAULT_MAX_INVALID_LOGIN_ATTEMPTS,
            max_invalid_change_password_attempts: DEFAULT_MAX_INVALID_CHANGE_PASSWORD_ATTEMPTS,
            activation_required: false,
            identifier_field: "email".to_string(),
            password_field: "password".to_string(),
            password_hash_cost: DEFAULT_PASSWORD_HASH_COST,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_secret", &"<redacted>")
            .field("token_algorithm", &self.token_algorithm)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("encryption_key", &"<redacted>")
            .field("encryption_iv", &"<redacted>")
            .field("max_invalid_login_attempts", &self.max_invalid_login_attempts)
            .field(
                "max_invalid_change_password_attempts",
                &self.max_invalid_change_password_attempts,
            )
            .field("activation_required", &self.activation_required)
            .field("identifier_field", &self.identifier_field)
            .field("password_field", &self.password_field)
            .field("password_hash_cost", &self.password_hash_cost)
            .finish()
    }
}

impl AuthConfig {
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        let algorithm = Algorithm::from_str(&self.token_algorithm).map_err(|_| {
            ConfigError::new(
                "auth.token_algorithm",
                format!("unknown algorithm '{}'", self.token_algorithm),
            )
        })?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            _ => Err(ConfigError::new(
                "auth.token_algorithm",
                "only HS256, HS384 and HS512 are supported",
            )),
        }
    }
}

impl Config {
    /// Structural checks run once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .service_address
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::new("server.service_address", e.to_string()))?;
        if self.server.languages.is_empty() {
            return Err(ConfigError::new(
                "server.languages",
                "at least one language is required",
            ));
        }

        let uri = url::Url::parse(&self.database.uri)
            .map_err(|e| ConfigError::new("database.uri", e.to_string()))?;
        if !matches!(uri.scheme(), "postgres" | "postgresql" | "memory") {
            return Err(ConfigError::new(
                "database.uri",
                format!("unsupported scheme '{}'", uri.scheme()),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::new("database.max_connections", "must be positive"));
        }

        let auth = &self.auth;
        if auth.token_secret.is_empty() {
            return Err(ConfigError::new("auth.token_secret", "must be set"));
        }
        auth.algorithm()?;
        if auth.token_lifetime_secs == 0 {
            return Err(ConfigError::new("auth.token_lifetime_secs", "must be positive"));
        }
        if auth.encryption_key.len() != TOKEN_ENCRYPTION_KEY_LENGTH {
            return Err(ConfigError::new(
                "auth.encryption_key",
                format!("must be exactly {} bytes", TOKEN_ENCRYPTION_KEY_LENGTH),
            ));
        }
        if auth.encryption_iv.is_empty() {
            return Err(ConfigError::new("auth.encryption_iv", "must be set"));
        }
        if auth.max_invalid_login_attempts == 0 {
            return Err(ConfigError::new(
                "auth.max_invalid_login_attempts",
                "must be positive",
            ));
        }
        if auth.max_invalid_change_password_attempts == 0 {
            return Err(ConfigError::new(
                "auth.max_invalid_change_password_attempts",
                "must be positive",
            ));
        }
        if !(4..=31).contains(&auth.password_hash_cost) {
            return Err(ConfigError::new(
                "auth.password_hash_cost",
                "must be between 4 and 31",
            ));
        }
        validate_field_path(&auth.identifier_field)
            .map_err(|e| ConfigError::new("auth.identifier_field", e.to_string()))?;
        validate_field_path(&auth.password_field)
            .map_err(|e| ConfigError::new("auth.password_field", e.to_string()))?;
        if auth.identifier_field == auth.password_field {
            return Err(ConfigError::new(
                "auth.password_field",
                "must differ from the identifier field",
            ));
        }
        Ok(())
    }
}

/// Load configuration from a JSON config file (if present) and environment variables.
/// Environment variables take precedence over config file values.
///
/// Config file path is read from `CONFIG_FILE` env var (default: `config.json`).
pub fn load_config() -> Config {
    let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.json".to_string());
    let file_values: Value = fs::read_to_string(&config_path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or(Value::Null);
    config_from_sources(&file_values, |key| env::var(key).ok())
}

/// Build a configuration from parsed file contents and an environment lookup.
pub fn config_from_sources<E>(file_values: &Value, env_lookup: E) -> Config
where
    E: Fn(&str) -> Option<String>,
{
    let setting = |env_key: &str, file_path: &str| -> Option<String> {
        env_lookup(env_key).or_else(|| {
            file_path
                .split('.')
                .try_fold(file_values, |value, key| value.get(key))
                .and_then(|value| match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
        })
    };
    let flag = |value: String| value == "true" || value == "1";

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        service_address: setting("SERVICE_ADDRESS", "server.service_address")
            .unwrap_or(server_defaults.service_address),
        cors_allowed_origins: setting("CORS_ALLOWED_ORIGINS", "server.cors_allowed_origins")
            .unwrap_or(server_defaults.cors_allowed_origins),
        debug_mode: setting("DEBUG_MODE", "server.debug_mode")
            .map(flag)
            .unwrap_or(server_defaults.debug_mode),
        log_to_syslog: setting("LOG_TO_SYSLOG", "server.log_to_syslog")
            .map(flag)
            .unwrap_or(server_defaults.log_to_syslog),
        languages: env_lookup("LANGUAGES")
            .map(|list| {
                list.split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .or_else(|| {
                file_values
                    .pointer("/server/languages")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
            })
            .unwrap_or(server_defaults.languages),
    };

    let database_defaults = DatabaseConfig::default();
    let database = DatabaseConfig {
        uri: setting("DATABASE_URL", "database.uri").unwrap_or(database_defaults.uri),
        max_connections: setting("DB_MAX_CONNECTIONS", "database.max_connections")
            .and_then(|v| v.parse().ok())
            .unwrap_or(database_defaults.max_connections),
    };

    let auth_defaults = AuthConfig::default();
    let auth = AuthConfig {
        token_secret: setting("TOKEN_SECRET", "auth.token_secret")
            .unwrap_or(auth_defaults.token_secret),
        token_algorithm: setting("TOKEN_ALGORITHM", "auth.token_algorithm")
            .unwrap_or(auth_defaults.token_algorithm),
        token_lifetime_secs: setting("TOKEN_LIFETIME_SECS", "auth.token_lifetime_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(auth_defaults.token_lifetime_secs),
        encryption_key: setting("TOKEN_ENCRYPTION_KEY", "auth.encryption_key")
            .unwrap_or(auth_defaults.encryption_key),
        encryption_iv: setting("TOKEN_ENCRYPTION_IV", "auth.encryption_iv")
            .unwrap_or(auth_defaults.encryption_iv),
        max_invalid_login_attempts: setting(
            "MAX_INVALID_LOGIN_ATTEMPTS",
            "auth.max_invalid_login_attempts",
        )
        .and_then(|v| v.parse().ok())
        .unwrap_or(auth_defaults.max_invalid_login_attempts),
        max_invalid_change_password_attempts: setting(
            "MAX_INVALID_CHANGE_PASSWORD_ATTEMPTS",
            "auth.max_invalid_change_password_attempts",
        )
        .and_then(|v| v.parse().ok())
        .unwrap_or(auth_defaults.max_invalid_change_password_attempts),
        activation_required: setting("ACTIVATION_REQUIRED", "auth.activation_required")
            .map(flag)
            .unwrap_or(auth_defaults.activation_required),
        identifier_field: setting("IDENTIFIER_FIELD", "auth.identifier_field")
            .unwrap_or(auth_defaults.identifier_field),
        password_field: setting("PASSWORD_FIELD", "auth.password_field")
            .unwrap_or(auth_defaults.password_field),
        password_hash_cost: setting("PASSWORD_HASH_COST", "auth.password_hash_cost")
            .and_then(|v| v.parse().ok())
            .unwrap_or(auth_defaults.password_hash_cost),
    };

    let messages = file_values
        .get("messages")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    Config {
        server,
        database,
        auth,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Config {
        Config {
            auth: AuthConfig {
                token_secret: "secret".to_string(),
                encryption_key: "k".repeat(32),
                encryption_iv: "iv".to_string(),
                ..AuthConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_need_secrets() {
        let err = Config::default().validate().unwrap_err();
        assert_eq!(err.field, "auth.token_secret");
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = json!({
            "server": {"service_address": "127.0.0.1:9000", "debug_mode": true},
            "auth": {"token_secret": "from-file", "max_invalid_login_attempts": 3}
        });
        let config = config_from_sources(&file, |key| match key {
            "TOKEN_SECRET" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(config.auth.token_secret, "from-env");
        assert_eq!(config.auth.max_invalid_login_attempts, 3);
        assert_eq!(config.server.service_address, "127.0.0.1:9000");
        assert!(config.server.debug_mode);
    }

    #[test]
    fn test_languages_and_messages_from_file() {
        let file = json!({
            "server": {"languages": ["de", "en"]},
            "messages": {"de": {"account_blocked": "Konto gesperrt"}}
        });
        let config = config_from_sources(&file, |_| None);
        assert_eq!(config.server.languages, vec!["de", "en"]);
        assert_eq!(config.messages["de"]["account_blocked"], "Konto gesperrt");
    }

    #[test]
    fn test_languages_from_env_list() {
        let config = config_from_sources(&Value::Null, |key| {
            (key == "LANGUAGES").then(|| "en, fr".to_string())
        });
        assert_eq!(config.server.languages, vec!["en", "fr"]);
    }

    #[test]
    fn test_rejects_short_encryption_key() {
        let mut config = valid();
        config.auth.encryption_key = "short".to_string();
        assert_eq!(config.validate().unwrap_err().field, "auth.encryption_key");
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let mut config = valid();
        config.auth.token_algorithm = "RS256".to_string();
        assert_eq!(config.validate().unwrap_err().field, "auth.token_algorithm");
        config.auth.token_algorithm = "HS999".to_string();
        assert_eq!(config.validate().unwrap_err().field, "auth.token_algorithm");
    }

    #[test]
    fn test_rejects_unsupported_database_scheme() {
        let mut config = valid();
        config.database.uri = "mysql://localhost/db".to_string();
        assert_eq!(config.validate().unwrap_err().field, "database.uri");
    }

    #[test]
    fn test_rejects_bad_address_and_cost() {
        let mut config = valid();
        config.server.service_address = "not an address".to_string();
        assert_eq!(config.validate().unwrap_err().field, "server.service_address");
        let mut config = valid();
        config.auth.password_hash_cost = 3;
        assert_eq!(config.validate().unwrap_err().field, "auth.password_hash_cost");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("kkkk"));
        assert!(rendered.contains("<redacted>"));
    }
}
