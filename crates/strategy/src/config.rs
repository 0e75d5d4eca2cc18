use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::{Error, Instrument, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/trailing.toml`:
/// ```toml
/// [strategy]
/// base = "ETH"
/// quote = "EUR"
/// max_drawdown = "0.10"
/// sell_sizing = "armed"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    pub strategy: TrailingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrailingConfig {
    /// Base asset, e.g. "ETH".
    pub base: String,
    /// Quote asset, e.g. "EUR".
    pub quote: String,
    /// Fractional drawdown from the high that sells, e.g. 0.10 = 10%.
    pub max_drawdown: Decimal,
    #[serde(default)]
    pub sell_sizing: SellSizing,
}

/// Which base balance a stop-loss sell uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SellSizing {
    /// The balance captured when the stop was armed. Stale if the holding
    /// changed in between (e.g. a manual withdrawal).
    #[default]
    Armed,
    /// Re-fetch balances when the stop fires.
    Fresh,
}

impl StrategyFileConfig {
    /// Load and validate from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("Invalid strategy config at '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.strategy.validate()?;
        Ok(cfg)
    }
}

impl TrailingConfig {
    pub fn instrument(&self) -> Instrument {
        Instrument::new(self.base.trim(), self.quote.trim())
    }

    fn validate(&self) -> Result<()> {
        let inst = self.instrument();
        if inst.base.is_empty() || inst.quote.is_empty() {
            return Err(Error::Config("base and quote must be set".into()));
        }
        if inst.base == inst.quote {
            return Err(Error::Config(format!("base and quote are both {}", inst.base)));
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown >= Decimal::ONE {
            return Err(Error::Config(format!(
                "max_drawdown must be strictly between 0 and 1, got {}",
                self.max_drawdown
            )));
        }
        Ok(())
    }
}
