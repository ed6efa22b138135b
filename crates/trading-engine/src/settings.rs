//! Agent configuration.
//!
//! `AgentSettings` is the single file-and-environment loaded aggregate:
//! engine loop parameters plus one section per risk component. Values come
//! from an optional TOML file layered under `SWING_`-prefixed environment
//! variables (`SWING_MAX_POSITIONS=3`, `SWING_KELLY__KELLY_FRACTION=0.25`).
//! Validation runs at load time; a bad configuration is fatal at startup,
//! never discovered mid-session.

use chrono::NaiveTime;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use broker_core::{Error, Result};
use risk_manager::{
    BreakerConfig, DrawdownConfig, KellyConfig, ReducerConfig, SizerConfig, StopConfig,
};

use crate::engine::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum simultaneous open positions.
    pub max_positions: usize,
    /// Maximum new entries per trading day.
    pub max_trades_per_day: u32,
    /// Seconds between ticks.
    pub tick_seconds: u64,
    /// Seconds to back off after a failed tick.
    pub error_backoff_seconds: u64,
    /// Session open, UTC wall clock, "HH:MM".
    pub market_start: String,
    /// Session close, UTC wall clock, "HH:MM".
    pub market_end: String,
    /// Close out remaining positions this many minutes before `market_end`.
    pub time_exit_minutes: i64,
    /// Candidates below this volume ratio are skipped.
    pub min_volume_ratio: Decimal,
    /// Candidates that already moved more than this fraction are skipped.
    pub max_change_pct: Decimal,
    /// Gain at which the first profit tranche fires.
    pub partial_first_pct: Decimal,
    /// Fraction of the position sold by the first tranche.
    pub partial_first_ratio: Decimal,
    /// Gain at which the remainder is sold.
    pub partial_second_pct: Decimal,
    /// Derive stops and targets from ATR instead of fixed percentages.
    pub use_dynamic_stops: bool,
    /// Trail stops behind the high-water mark.
    pub use_trailing_stop: bool,
    /// Stop distance used when dynamic stops are disabled.
    pub stop_loss_pct: Decimal,
    /// Target distance used when dynamic stops are disabled.
    pub take_profit_pct: Decimal,
    /// Daily returns pulled from the journal to seed Kelly sizing.
    pub kelly_history_days: u32,
    /// OHLCV days fetched for ATR and volatility estimates.
    pub atr_history_days: u32,
    /// Route orders to a live brokerage instead of the paper gateway.
    pub live_trading: bool,
    /// Explicit acknowledgement that live order routing is intended.
    /// `live_trading` without this is rejected at startup.
    pub live_trading_ack: bool,
    pub kelly: KellyConfig,
    pub sizer: SizerConfig,
    pub stops: StopConfig,
    pub drawdown: DrawdownConfig,
    pub breaker: BreakerConfig,
    pub reducer: ReducerConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_trades_per_day: 10,
            tick_seconds: 30,
            error_backoff_seconds: 10,
            market_start: "13:30".to_string(), // 09:30 New York in UTC, standard time
            market_end: "20:00".to_string(),
            time_exit_minutes: 15,
            min_volume_ratio: Decimal::new(15, 1),  // 1.5x average volume
            max_change_pct: Decimal::new(8, 2),     // skip if already moved 8%
            partial_first_pct: Decimal::new(5, 2),  // +5%
            partial_first_ratio: Decimal::new(5, 1), // sell half
            partial_second_pct: Decimal::new(10, 2), // +10%
            use_dynamic_stops: true,
            use_trailing_stop: true,
            stop_loss_pct: Decimal::new(3, 2),   // 3%
            take_profit_pct: Decimal::new(8, 2), // 8%
            kelly_history_days: 60,
            atr_history_days: 30,
            live_trading: false,
            live_trading_ack: false,
            kelly: KellyConfig::default(),
            sizer: SizerConfig::default(),
            stops: StopConfig::default(),
            drawdown: DrawdownConfig::default(),
            breaker: BreakerConfig::default(),
            reducer: ReducerConfig::default(),
        }
    }
}

impl AgentSettings {
    /// Load settings from an optional TOML file plus `SWING_`-prefixed
    /// environment variables. Environment wins over file; both win over
    /// defaults. Nested sections use `__` in the variable name.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("swing-bot").required(false)),
        };
        let settings: AgentSettings = builder
            .add_source(Environment::with_prefix("SWING").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the engine must not start with.
    pub fn validate(&self) -> Result<()> {
        let (start, end) = self.market_hours()?;
        if start >= end {
            return Err(Error::Config {
                message: format!("market_start {start} must be before market_end {end}"),
            });
        }
        if self.live_trading && !self.live_trading_ack {
            return Err(Error::Config {
                message: "live_trading requires live_trading_ack = true".to_string(),
            });
        }
        if self.max_positions == 0 {
            return Err(Error::Config {
                message: "max_positions must be at least 1".to_string(),
            });
        }
        if self.partial_first_ratio <= Decimal::ZERO || self.partial_first_ratio >= Decimal::ONE {
            return Err(Error::Config {
                message: format!(
                    "partial_first_ratio must be in (0, 1), got {}",
                    self.partial_first_ratio
                ),
            });
        }
        if self.partial_second_pct <= self.partial_first_pct {
            return Err(Error::Config {
                message: "partial_second_pct must exceed partial_first_pct".to_string(),
            });
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE {
            return Err(Error::Config {
                message: format!("stop_loss_pct must be in (0, 1), got {}", self.stop_loss_pct),
            });
        }
        Ok(())
    }

    /// Parsed session bounds.
    pub fn market_hours(&self) -> Result<(NaiveTime, NaiveTime)> {
        let parse = |value: &str, key: &str| {
            NaiveTime::parse_from_str(value, "%H:%M").map_err(|err| Error::Config {
                message: format!("{key} must be HH:MM, got {value:?}: {err}"),
            })
        };
        Ok((
            parse(&self.market_start, "market_start")?,
            parse(&self.market_end, "market_end")?,
        ))
    }

    /// Engine loop parameters derived from these settings.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let (market_start, market_end) = self.market_hours()?;
        Ok(EngineConfig {
            max_positions: self.max_positions,
            max_trades_per_day: self.max_trades_per_day,
            tick_interval: std::time::Duration::from_secs(self.tick_seconds),
            error_backoff: std::time::Duration::from_secs(self.error_backoff_seconds),
            market_start,
            market_end,
            time_exit_minutes: self.time_exit_minutes,
            min_volume_ratio: self.min_volume_ratio,
            max_change_pct: self.max_change_pct,
            partial_first_pct: self.partial_first_pct,
            partial_first_ratio: self.partial_first_ratio,
            partial_second_pct: self.partial_second_pct,
            use_dynamic_stops: self.use_dynamic_stops,
            use_trailing_stop: self.use_trailing_stop,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            kelly_history_days: self.kelly_history_days,
            atr_history_days: self.atr_history_days,
        })
    }
}
