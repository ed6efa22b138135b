//! ATR-derived stop and target levels plus a per-symbol trailing-stop
//! state machine.

use broker_core::types::Candle;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Average true range over the last `period` bars. Needs `period + 1`
/// candles because each true range spans a consecutive pair. Returns
/// `None` when history is too short.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];
        let tr = bar
            .range()
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        true_ranges.push(tr);
    }

    let recent = &true_ranges[true_ranges.len() - period..];
    let sum: Decimal = recent.iter().sum();
    Some(sum / Decimal::from(period))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    pub atr_period: usize,
    /// Stop distance in ATR units below entry.
    pub stop_multiplier: Decimal,
    /// Target distance in ATR units above entry.
    pub profit_multiplier: Decimal,
    /// Trailing buffer in ATR units below the highest price.
    pub trailing_multiplier: Decimal,
    /// Unrealized gain that arms the trailing ratchet.
    pub trailing_activation_pct: Decimal,
    /// Fixed stop distance used when no usable ATR exists.
    pub fallback_stop_pct: Decimal,
    /// Fixed target distance used when no usable ATR exists.
    pub fallback_target_pct: Decimal,
    /// Narrowest allowed stop distance as a fraction of entry.
    pub min_stop_pct: Decimal,
    /// Widest allowed stop distance as a fraction of entry.
    pub max_stop_pct: Decimal,
    /// Pick multipliers from the volatility-bucket table instead of the
    /// fixed ones above.
    pub use_volatility_buckets: bool,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            stop_multiplier: Decimal::TWO,
            profit_multiplier: Decimal::new(3, 0),
            trailing_multiplier: Decimal::new(15, 1), // 1.5 ATR
            trailing_activation_pct: Decimal::new(2, 2), // 2% gain
            fallback_stop_pct: Decimal::new(3, 2),    // 3%
            fallback_target_pct: Decimal::new(8, 2),  // 8%
            min_stop_pct: Decimal::new(2, 2),         // 2%
            max_stop_pct: Decimal::new(10, 2),        // 10%
            use_volatility_buckets: false,
        }
    }
}

/// Entry-time stop and target prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLevels {
    pub stop: Decimal,
    pub target: Decimal,
    /// ATR the levels were derived from, absent on the fixed fallback.
    pub atr: Option<Decimal>,
    /// True when history was too short or flat for a usable ATR.
    pub fallback: bool,
}

/// Named volatility band derived from normalized ATR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityBucket {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

/// Multiplier preset for one volatility bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopMultipliers {
    pub stop: Decimal,
    pub profit: Decimal,
    pub trailing: Decimal,
}

impl VolatilityBucket {
    /// Classify a normalized ATR (ATR / price).
    pub fn from_atr_pct(atr_pct: Decimal) -> Self {
        if atr_pct < Decimal::new(1, 2) {
            VolatilityBucket::VeryLow
        } else if atr_pct < Decimal::new(2, 2) {
            VolatilityBucket::Low
        } else if atr_pct < Decimal::new(4, 2) {
            VolatilityBucket::Normal
        } else if atr_pct < Decimal::new(6, 2) {
            VolatilityBucket::High
        } else {
            VolatilityBucket::VeryHigh
        }
    }

    /// Wider stops and targets as volatility climbs, so noise does not
    /// shake out positions the thesis still supports.
    pub fn multipliers(&self) -> StopMultipliers {
        match self {
            VolatilityBucket::VeryLow => StopMultipliers {
                stop: Decimal::new(15, 1),
                profit: Decimal::new(25, 1),
                trailing: Decimal::ONE,
            },
            VolatilityBucket::Low => StopMultipliers {
                stop: Decimal::new(18, 1),
                profit: Decimal::new(28, 1),
                trailing: Decimal::new(12, 1),
            },
            VolatilityBucket::Normal => StopMultipliers {
                stop: Decimal::TWO,
                profit: Decimal::new(3, 0),
                trailing: Decimal::new(15, 1),
            },
            VolatilityBucket::High => StopMultipliers {
                stop: Decimal::new(25, 1),
                profit: Decimal::new(35, 1),
                trailing: Decimal::TWO,
            },
            VolatilityBucket::VeryHigh => StopMultipliers {
                stop: Decimal::new(3, 0),
                profit: Decimal::new(4, 0),
                trailing: Decimal::new(25, 1),
            },
        }
    }
}

/// Per-symbol trailing state. The current stop only ever rises and a
/// trigger is terminal until the state is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStop {
    pub symbol: String,
    pub entry_price: Decimal,
    pub highest_price: Decimal,
    pub current_stop: Decimal,
    pub initial_stop: Decimal,
    /// ATR backing the trailing buffer; refreshed once per trading day.
    pub atr: Decimal,
    pub activated: bool,
    pub triggered: bool,
}

/// Outcome of feeding one price into a trailing stop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingUpdate {
    pub activated: bool,
    pub stop: Decimal,
    pub triggered: bool,
}

/// Computes entry stops and owns all trailing-stop state, keyed by symbol.
#[derive(Debug)]
pub struct DynamicStopCalculator {
    config: StopConfig,
    trailing: DashMap<String, TrailingStop>,
}

impl DynamicStopCalculator {
    pub fn new(config: StopConfig) -> Self {
        Self {
            config,
            trailing: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StopConfig {
        &self.config
    }

    /// Stop and target for a prospective entry at `entry`, derived from
    /// OHLCV history. Falls back to fixed percentages when the history is
    /// too short or flat, and clamps the stop distance into the
    /// configured band either way.
    pub fn compute_levels(&self, entry: Decimal, candles: &[Candle]) -> StopLevels {
        let atr = average_true_range(candles, self.config.atr_period)
            .filter(|a| *a > Decimal::ZERO);

        let mut levels = match atr {
            Some(atr) => {
                let (stop_mult, profit_mult) = self.level_multipliers(atr, entry);
                StopLevels {
                    stop: entry - atr * stop_mult,
                    target: entry + atr * profit_mult,
                    atr: Some(atr),
                    fallback: false,
                }
            }
            None => StopLevels {
                stop: entry * (Decimal::ONE - self.config.fallback_stop_pct),
                target: entry * (Decimal::ONE + self.config.fallback_target_pct),
                atr: None,
                fallback: true,
            },
        };

        let distance = entry - levels.stop;
        let min_distance = entry * self.config.min_stop_pct;
        let max_distance = entry * self.config.max_stop_pct;
        if distance < min_distance {
            levels.stop = entry - min_distance;
        } else if distance > max_distance {
            levels.stop = entry - max_distance;
        }

        levels
    }

    /// Begin trailing a position. `atr` of `None` (fallback stops)
    /// substitutes the fallback stop distance so the ratchet still has a
    /// buffer to work with.
    pub fn arm_trailing(
        &self,
        symbol: &str,
        entry_price: Decimal,
        initial_stop: Decimal,
        atr: Option<Decimal>,
    ) {
        let atr = atr.unwrap_or(entry_price * self.config.fallback_stop_pct);
        self.trailing.insert(
            symbol.to_string(),
            TrailingStop {
                symbol: symbol.to_string(),
                entry_price,
                highest_price: entry_price,
                current_stop: initial_stop,
                initial_stop,
                atr,
                activated: false,
                triggered: false,
            },
        );
    }

    /// Feed one price into a symbol's trailing state. Returns `None` when
    /// the symbol is not being trailed.
    pub fn update_trailing(&self, symbol: &str, price: Decimal) -> Option<TrailingUpdate> {
        let mut entry = self.trailing.get_mut(symbol)?;
        let state = entry.value_mut();

        if state.triggered {
            return Some(TrailingUpdate {
                activated: state.activated,
                stop: state.current_stop,
                triggered: true,
            });
        }

        if price > state.highest_price {
            state.highest_price = price;
        }

        if !state.activated && state.entry_price > Decimal::ZERO {
            let gain = (price - state.entry_price) / state.entry_price;
            if gain >= self.config.trailing_activation_pct {
                state.activated = true;
            }
        }

        if state.activated {
            let multiplier = self.trailing_multiplier(state.atr, state.entry_price);
            let candidate = state.highest_price - state.atr * multiplier;
            // Ratchet: the stop never moves down.
            if candidate > state.current_stop {
                state.current_stop = candidate;
            }
        }

        if price <= state.current_stop {
            state.triggered = true;
        }

        Some(TrailingUpdate {
            activated: state.activated,
            stop: state.current_stop,
            triggered: state.triggered,
        })
    }

    /// Swap in a fresh ATR for a trailed symbol without touching the
    /// ratchet state.
    pub fn refresh_atr(&self, symbol: &str, atr: Decimal) {
        if atr <= Decimal::ZERO {
            return;
        }
        if let Some(mut entry) = self.trailing.get_mut(symbol) {
            entry.value_mut().atr = atr;
        }
    }

    pub fn remove_trailing(&self, symbol: &str) {
        self.trailing.remove(symbol);
    }

    pub fn trailing_state(&self, symbol: &str) -> Option<TrailingStop> {
        self.trailing.get(symbol).map(|entry| entry.value().clone())
    }

    fn level_multipliers(&self, atr: Decimal, entry: Decimal) -> (Decimal, Decimal) {
        if self.config.use_volatility_buckets && entry > Decimal::ZERO {
            let preset = VolatilityBucket::from_atr_pct(atr / entry).multipliers();
            (preset.stop, preset.profit)
        } else {
            (self.config.stop_multiplier, self.config.profit_multiplier)
        }
    }

    fn trailing_multiplier(&self, atr: Decimal, entry: Decimal) -> Decimal {
        if self.config.use_volatility_buckets && entry > Decimal::ZERO {
            VolatilityBucket::from_atr_pct(atr / entry)
                .multipliers()
                .trailing
        } else {
            self.config.trailing_multiplier
        }
    }
}
