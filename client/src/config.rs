use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    /// Requests that take longer than this fail and roll back.
    pub timeout: Duration,
    /// How long a fetched entry stays fresh.
    pub fresh_for: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(15),
            fresh_for: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let base_url = std::env::var("MOVIECRITIC_API_URL").unwrap_or(defaults.base_url);

        let timeout = std::env::var("MOVIECRITIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let fresh_for = std::env::var("MOVIECRITIC_FRESH_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.fresh_for);

        Self { base_url, timeout, fresh_for }
    }
}
