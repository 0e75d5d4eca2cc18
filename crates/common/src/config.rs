use rust_decimal::Decimal;

use crate::{Error, Result, TradingMode};

/// Process configuration loaded from environment variables at startup.
/// Read once; immutable for the run.
#[derive(Debug, Clone)]
pub struct Config {
    // Trading
    pub trading_mode: TradingMode,

    // Exchange credentials (live mode only)
    pub binance_api_key: String,
    pub binance_secret: String,

    // Telegram (optional; console notifications otherwise)
    pub telegram: Option<TelegramConfig>,

    // Paper trading
    pub paper_slippage_bps: Decimal,
    pub paper_base_balance: Decimal,
    pub paper_quote_balance: Decimal,

    // Strategy config file path
    pub strategy_config_path: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub allowed_user_ids: Vec<i64>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
                Error::Config(format!(
                    "Required environment variable '{key}' is not set. Check your .env file."
                ))
            })
        };

        let trading_mode = match required("TRADING_MODE")?.to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
                )))
            }
        };

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (required("BINANCE_API_KEY")?, required("BINANCE_SECRET")?),
            TradingMode::Paper => (
                lookup("BINANCE_API_KEY").unwrap_or_default(),
                lookup("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        let telegram = match lookup("TELEGRAM_TOKEN").filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                let allowed_user_ids = required("TELEGRAM_ALLOWED_USER_IDS")?
                    .split(',')
                    .map(|s| {
                        s.trim().parse::<i64>().map_err(|_| {
                            Error::Config(format!(
                                "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                                s.trim()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(TelegramConfig {
                    token,
                    allowed_user_ids,
                })
            }
            None => None,
        };

        let decimal_or = |key: &str, default: Decimal| -> Result<Decimal> {
            match lookup(key) {
                Some(v) => v.trim().parse::<Decimal>().map_err(|e| {
                    Error::Config(format!("{key} must be a decimal number, got '{v}': {e}"))
                }),
                None => Ok(default),
            }
        };

        Ok(Config {
            trading_mode,
            binance_api_key,
            binance_secret,
            telegram,
            paper_slippage_bps: decimal_or("PAPER_SLIPPAGE_BPS", Decimal::TEN)?,
            paper_base_balance: decimal_or("PAPER_BASE_BALANCE", Decimal::ZERO)?,
            paper_quote_balance: decimal_or("PAPER_QUOTE_BALANCE", Decimal::from(1000))?,
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/trailing.toml".to_string()),
        })
    }
}
