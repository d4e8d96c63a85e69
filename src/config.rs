use std::time::Duration;

const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Quiet period before a progress mutation is flushed to the repository.
    pub save_debounce: Duration,
    pub log_level: String,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let save_debounce_ms = std::env::var("PROGRESS_SAVE_DEBOUNCE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SAVE_DEBOUNCE_MS);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            save_debounce: Duration::from_millis(save_debounce_ms),
            log_level,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            log_level: "info".to_string(),
        }
    }
}
