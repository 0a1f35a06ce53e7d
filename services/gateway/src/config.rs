use std::env;

#[derive(Debug, Clone)]
pub enum KvBackend {
    Redis,
    InMemory,
}

impl KvBackend {
    pub fn from_env() -> Self {
        match env::var("KV_BACKEND")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => KvBackend::Redis,
            "inmemory" => KvBackend::InMemory,
            _ => {
                tracing::warn!("Unknown KV_BACKEND, defaulting to inmemory");
                KvBackend::InMemory
            }
        }
    }
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub kv_backend: KvBackend,
    pub redis_url: String,
    pub api_key: String,
    pub orchestrator_url: String,
    pub rate_limit_per_minute: u32,
    pub idempotency_ttl_seconds: u64,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "gateway".to_string());

        let kv_backend = KvBackend::from_env();
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let api_key = env::var("API_KEY").map_err(|_| "API_KEY must be set".to_string())?;

        let orchestrator_url = env::var("ORCHESTRATOR_URL")
            .unwrap_or_else(|_| "http://orchestrator:8001".to_string());

        let rate_limit_per_minute: u32 = env::var("RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| "RATE_LIMIT_PER_MINUTE must be an integer".to_string())?;

        let idempotency_ttl_seconds: u64 = env::var("IDEMPOTENCY_TTL_SECONDS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .map_err(|_| "IDEMPOTENCY_TTL_SECONDS must be an integer".to_string())?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Config {
            service_name,
            kv_backend,
            redis_url,
            api_key,
            orchestrator_url,
            rate_limit_per_minute,
            idempotency_ttl_seconds,
            host,
            port,
        })
    }
}
