use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAI,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Smaller model used for the synthesis retry.
    #[serde(default = "default_fallback_chat_model")]
    pub fallback_chat_model: String,
    /// Upper bound applied to every outbound call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_response_cache_capacity")]
    pub response_cache_capacity: usize,
    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max_keys")]
    pub rate_limit_max_keys: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_surrealdb_address() -> String {
    "ws://127.0.0.1:8000".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "care".to_string()
}

fn default_surrealdb_database() -> String {
    "faq".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    768
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_fallback_chat_model() -> String {
    "gpt-4.1-nano".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_response_cache_capacity() -> usize {
    100
}

const fn default_response_cache_ttl_secs() -> u64 {
    30 * 60
}

const fn default_rate_limit_max_requests() -> u32 {
    10
}

const fn default_rate_limit_window_secs() -> u64 {
    60
}

const fn default_rate_limit_max_keys() -> usize {
    1000
}

/// Raw settings from the optional `config` file and the environment.
///
/// Nested tables such as `retrieval` are set from the environment with a
/// double underscore, e.g. `RETRIEVAL__FINAL_LIMIT=6`.
pub fn load_settings() -> Result<Config, ConfigError> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .and_then(Config::try_deserialize)
            .expect("defaults should deserialize");

        assert_eq!(config.embedding_backend, EmbeddingBackend::OpenAI);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.response_cache_capacity, 100);
        assert_eq!(config.response_cache_ttl_secs, 1800);
        assert_eq!(config.rate_limit_max_requests, 10);
    }

    #[test]
    fn overrides_are_applied() {
        let config: AppConfig = Config::builder()
            .set_override("embedding_backend", "hashed")
            .and_then(|b| b.set_override("chat_model", "local-model"))
            .and_then(|b| b.set_override("response_cache_capacity", 5))
            .and_then(|b| b.build())
            .and_then(Config::try_deserialize)
            .expect("overrides should deserialize");

        assert_eq!(config.embedding_backend, EmbeddingBackend::Hashed);
        assert_eq!(config.chat_model, "local-model");
        assert_eq!(config.response_cache_capacity, 5);
    }
}
