use std::env;

#[derive(Debug, Clone)]
pub enum BusType {
    Nats,
    InMemory,
}

impl BusType {
    pub fn from_env() -> Self {
        match env::var("BUS_TYPE")
            .unwrap_or_else(|_| "inmemory".to_string())
            .to_lowercase()
            .as_str()
        {
            "nats" => BusType::Nats,
            "inmemory" => BusType::InMemory,
            _ => {
                tracing::warn!("Unknown BUS_TYPE, defaulting to inmemory");
                BusType::InMemory
            }
        }
    }
}

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
    pub database_url: String,
    pub bus_type: BusType,
    pub nats_url: String,
    pub kv_backend: KvBackend,
    pub redis_url: String,
    pub api_key: String,
    pub orchestrator_url: String,
    pub velocity_per_hour: i64,
    pub review_amount_cents: i64,
    pub deny_frequency_threshold: i64,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "risk".to_string());

        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = BusType::from_env();
        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let kv_backend = KvBackend::from_env();
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        let api_key = env::var("API_KEY").map_err(|_| "API_KEY must be set".to_string())?;

        let orchestrator_url = env::var("ORCHESTRATOR_URL")
            .unwrap_or_else(|_| "http://orchestrator:8001".to_string());

        let velocity_per_hour = parse_i64("RISK_VELOCITY_PER_HOUR", 20)?;
        let review_amount_cents = parse_i64("RISK_REVIEW_AMOUNT_CENTS", 100_000)?;
        let deny_frequency_threshold = parse_i64("RISK_DENY_FREQUENCY_THRESHOLD", 50)?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8002".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Config {
            service_name,
            database_url,
            bus_type,
            nats_url,
            kv_backend,
            redis_url,
            api_key,
            orchestrator_url,
            velocity_per_hour,
            review_amount_cents,
            deny_frequency_threshold,
            host,
            port,
        })
    }
}

fn parse_i64(name: &str, default: i64) -> Result<i64, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}
