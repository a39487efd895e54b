use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_bind: String,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_prefix: String,

    pub database_url: String,
    pub db_pool_size: u32,

    pub max_batch: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let http_bind = env_string("GATEWAY_HTTP_BIND", Some("127.0.0.1:8080".to_string()))?;

        let mqtt_url = env_string("GATEWAY_MQTT_URL", Some("mqtt://127.0.0.1:1883".to_string()))?;
        let url = Url::parse(&mqtt_url).context("invalid GATEWAY_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("GATEWAY_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);
        let mqtt_username = env_optional("GATEWAY_MQTT_USERNAME");
        let mqtt_password = env_optional("GATEWAY_MQTT_PASSWORD");
        let mqtt_client_id = env_string(
            "GATEWAY_MQTT_CLIENT_ID",
            Some("telemetry-gateway".to_string()),
        )?;
        let mqtt_topic_prefix = env_string("GATEWAY_MQTT_TOPIC_PREFIX", Some("fleet".to_string()))?;

        let database_url = env::var("GATEWAY_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("GATEWAY_DATABASE_URL or DATABASE_URL is required")?;
        let db_pool_size = env_u64("GATEWAY_DB_POOL_SIZE", Some(5))? as u32;

        let max_batch = env_u64("GATEWAY_MAX_BATCH", Some(1000))? as usize;

        Ok(Self {
            http_bind,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic_prefix,
            database_url,
            db_pool_size,
            max_batch,
        })
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
