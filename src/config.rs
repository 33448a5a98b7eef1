use crate::Result;

/// Runtime configuration, read once at startup from the environment
/// (a `.env` file is loaded by `main` before this runs).
#[derive(Debug, Clone)]
pub struct Settings {
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub telegram_token: String,
    pub telegram_chat_id: i64,
    pub database_url: String,
    /// Grace period of the alert window before an Entry may fire
    pub alert_timeout_minutes: i64,
    /// Concurrent open-position ceiling
    pub max_trades: usize,
    /// Confirmation tickets auto-cancel after this long without a reply
    pub ticket_ttl_hours: i64,
    pub price_poll_secs: u64,
    pub engine_poll_secs: u64,
    pub trade_poll_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bybit_api_key: require("BYBIT_API_KEY")?,
            bybit_api_secret: require("BYBIT_API_SECRET")?,
            telegram_token: require("TELEGRAM_TOKEN")?,
            telegram_chat_id: require("CHAT_ID")?
                .parse()
                .map_err(|_| "CHAT_ID must be a numeric Telegram chat id")?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/levelbot".to_string()),
            alert_timeout_minutes: env_or("ALERT_TIMEOUT_MINUTES", 60),
            max_trades: env_or("MAX_TRADES", 5),
            ticket_ttl_hours: env_or("TICKET_TTL_HOURS", 12),
            price_poll_secs: env_or("PRICE_POLL_SECS", 10),
            engine_poll_secs: env_or("ENGINE_POLL_SECS", 5),
            trade_poll_secs: env_or("TRADE_POLL_SECS", 60),
        })
    }
}

fn require(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| format!("{} not found in environment", key).into())
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
