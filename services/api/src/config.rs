//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where dialogues, messages and the change feed live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// In-process tables; everything is lost on restart.
    Memory,
}

/// Who produces assistant replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionBackend {
    /// An external HTTP function endpoint.
    Function,
    OpenAi,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub store_backend: StoreBackend,
    pub seed_topics: bool,
    pub completion_backend: CompletionBackend,
    pub completion_function_url: Option<String>,
    pub completion_function_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub completion_model: String,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Store Settings ---
        let database_url = lookup("DATABASE_URL");
        let store_backend = match lookup("STORE_BACKEND").as_deref() {
            Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
            None if database_url.is_some() => StoreBackend::Postgres,
            None => StoreBackend::Memory,
        };
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let seed_topics = match lookup("SEED_TOPICS").as_deref() {
            None => store_backend == StoreBackend::Memory,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "SEED_TOPICS".to_string(),
                    format!("'{}' is not a boolean", other),
                ))
            }
        };

        // --- Completion Settings ---
        let completion_function_url = lookup("COMPLETION_FUNCTION_URL");
        let completion_function_key = lookup("COMPLETION_FUNCTION_KEY");
        let openai_api_key = lookup("OPENAI_API_KEY");
        let completion_model =
            lookup("COMPLETION_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        let completion_backend = match lookup("COMPLETION_BACKEND").as_deref() {
            Some("function") => CompletionBackend::Function,
            Some("openai") => CompletionBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "COMPLETION_BACKEND".to_string(),
                    format!("'{}' is not one of function, openai", other),
                ))
            }
            None if completion_function_url.is_some() => CompletionBackend::Function,
            None => CompletionBackend::OpenAi,
        };
        match completion_backend {
            CompletionBackend::Function if completion_function_url.is_none() => {
                return Err(ConfigError::MissingVar("COMPLETION_FUNCTION_URL".to_string()))
            }
            CompletionBackend::OpenAi if openai_api_key.is_none() => {
                return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
            }
            _ => {}
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            store_backend,
            seed_topics,
            completion_backend,
            completion_function_url,
            completion_function_key,
            openai_api_key,
            completion_model,
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_memory_store_with_seeded_topics() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.seed_topics);
        assert_eq!(config.completion_backend, CompletionBackend::OpenAi);
        assert_eq!(config.completion_model, "gpt-4o-mini");
        assert_eq!(config.bind_address.port(), 3000);
    }

    #[test]
    fn database_url_selects_postgres() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/socratic"),
            ("COMPLETION_FUNCTION_URL", "https://functions.example.com/socratic-dialogue"),
        ])
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert!(!config.seed_topics);
        assert_eq!(config.completion_backend, CompletionBackend::Function);
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err =
            load(&[("STORE_BACKEND", "postgres"), ("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "DATABASE_URL"));
    }

    #[test]
    fn function_backend_requires_a_url() {
        let err = load(&[("COMPLETION_BACKEND", "function")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "COMPLETION_FUNCTION_URL"));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let err = load(&[("RUST_LOG", "chatty"), ("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "RUST_LOG"));
    }
}
