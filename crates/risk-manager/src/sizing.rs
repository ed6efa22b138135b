//! Position sizing pipeline combining risk, volatility, Kelly, regime and
//! signal factors into one target allocation fraction.

use broker_core::types::MarketRegime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::kelly::KellyResult;

/// How the base allocation is derived. Selected once from configuration;
/// the engine never switches methods at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SizeMethod {
    /// Fixed notional per trade, converted to an equity fraction.
    Fixed { amount: Decimal },
    /// Flat fraction of account equity.
    AccountPct { pct: Decimal },
    /// Account risk per trade divided by stop distance.
    RiskBased,
    /// Risk-based baseline scaled by the Kelly factor pipeline.
    Kelly,
}

impl Default for SizeMethod {
    fn default() -> Self {
        Self::Kelly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    pub method: SizeMethod,
    /// Fraction of equity risked per trade for the risk-based baseline.
    pub account_risk_per_trade: Decimal,
    /// Hard cap on any single position as a fraction of equity.
    pub max_single_position: Decimal,
    /// Total open risk budget across the portfolio.
    pub max_portfolio_risk: Decimal,
    pub use_atr_scaling: bool,
    pub use_vol_scaling: bool,
    /// Daily volatility the vol factor normalizes toward.
    pub target_volatility: Decimal,
    pub use_signal_scaling: bool,
    /// Scale the Kelly factor by the detected market regime.
    pub use_regime_adjustment: bool,
    /// Fractions below this round down to zero rather than placing dust.
    pub min_size: Decimal,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            method: SizeMethod::default(),
            account_risk_per_trade: Decimal::new(1, 2), // 1% per trade
            max_single_position: Decimal::new(20, 2),   // 20% cap
            max_portfolio_risk: Decimal::new(5, 2),     // 5% total open risk
            use_atr_scaling: true,
            use_vol_scaling: true,
            target_volatility: Decimal::new(2, 2), // 2% daily
            use_signal_scaling: true,
            use_regime_adjustment: false,
            min_size: Decimal::new(1, 2), // 1% minimum
        }
    }
}

/// Everything the sizer needs to know about one prospective entry.
/// Optional fields degrade their factor to neutral when absent.
#[derive(Debug, Clone)]
pub struct SizeContext {
    pub equity: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub atr: Option<Decimal>,
    pub realized_volatility: Option<Decimal>,
    pub signal_strength: Option<Decimal>,
    pub kelly: Option<KellyResult>,
    pub regime: Option<MarketRegime>,
    /// Sum of stop-distance risk already committed to open positions.
    pub open_risk: Decimal,
}

impl SizeContext {
    pub fn new(equity: Decimal, entry_price: Decimal, stop_price: Decimal) -> Self {
        Self {
            equity,
            entry_price,
            stop_price,
            atr: None,
            realized_volatility: None,
            signal_strength: None,
            kelly: None,
            regime: None,
            open_risk: Decimal::ZERO,
        }
    }

    /// Distance from entry to stop as a fraction of entry, floored at zero.
    pub fn stop_distance_pct(&self) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.entry_price - self.stop_price) / self.entry_price).max(Decimal::ZERO)
    }
}

/// Which adjustments contributed to a sizing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum SizeFactor {
    /// Risk-based baseline before scaling.
    RiskBase { fraction: Decimal },
    /// Fixed-notional base converted to an equity fraction.
    FixedNotional { fraction: Decimal },
    /// Flat equity-percentage base.
    EquityPct { fraction: Decimal },
    AtrBand { multiplier: Decimal },
    Volatility { multiplier: Decimal },
    Kelly { multiplier: Decimal },
    Regime { multiplier: Decimal },
    Signal { multiplier: Decimal },
    MaxPositionCap,
    RiskBudgetCap { remaining: Decimal },
    BelowMinimum,
}

/// Final sizing output. `fraction` is of total equity; `factors` records
/// each adjustment that fired, in application order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeDecision {
    pub fraction: Decimal,
    pub notional: Decimal,
    pub factors: Vec<SizeFactor>,
}

impl SizeDecision {
    fn zero(factors: Vec<SizeFactor>) -> Self {
        Self {
            fraction: Decimal::ZERO,
            notional: Decimal::ZERO,
            factors,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.fraction <= Decimal::ZERO
    }

    /// Whole shares purchasable at `price` with the decided notional.
    pub fn shares(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.notional / price).floor()
    }
}

/// Stateless sizing pipeline. Every call is a pure function of the
/// context and configuration.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    pub fn size(&self, ctx: &SizeContext) -> SizeDecision {
        if ctx.equity <= Decimal::ZERO {
            return SizeDecision::zero(vec![SizeFactor::BelowMinimum]);
        }

        let mut factors = Vec::new();
        let mut fraction = match &self.config.method {
            SizeMethod::Fixed { amount } => {
                let base = (*amount / ctx.equity).max(Decimal::ZERO);
                factors.push(SizeFactor::FixedNotional { fraction: base });
                base
            }
            SizeMethod::AccountPct { pct } => {
                let base = (*pct).max(Decimal::ZERO);
                factors.push(SizeFactor::EquityPct { fraction: base });
                base
            }
            SizeMethod::RiskBased | SizeMethod::Kelly => {
                let distance = ctx.stop_distance_pct();
                if distance <= Decimal::ZERO {
                    // Without a stop below entry the per-trade risk is
                    // unbounded; refuse to size.
                    factors.push(SizeFactor::BelowMinimum);
                    return SizeDecision::zero(factors);
                }
                let base = (self.config.account_risk_per_trade / distance)
                    .clamp(Decimal::ZERO, self.config.max_single_position);
                factors.push(SizeFactor::RiskBase { fraction: base });
                base
            }
        };

        let pipeline = matches!(
            self.config.method,
            SizeMethod::RiskBased | SizeMethod::Kelly
        );
        if pipeline {
            if self.config.use_atr_scaling {
                if let Some(atr) = ctx.atr {
                    if ctx.entry_price > Decimal::ZERO {
                        let multiplier = atr_band_multiplier(atr / ctx.entry_price);
                        factors.push(SizeFactor::AtrBand { multiplier });
                        fraction *= multiplier;
                    }
                }
            }

            if self.config.use_vol_scaling {
                if let Some(realized) = ctx.realized_volatility {
                    if realized > Decimal::ZERO {
                        let multiplier = (self.config.target_volatility / realized)
                            .clamp(Decimal::new(5, 1), Decimal::TWO);
                        factors.push(SizeFactor::Volatility { multiplier });
                        fraction *= multiplier;
                    }
                }
            }

            if self.config.method == SizeMethod::Kelly {
                if let Some(kelly) = &ctx.kelly {
                    // Below 30 trades the Kelly estimate is noise; stay neutral.
                    if kelly.sample_size >= 30 {
                        let multiplier = kelly.final_position / Decimal::new(10, 2);
                        factors.push(SizeFactor::Kelly { multiplier });
                        fraction *= multiplier;
                    }
                }
                if self.config.use_regime_adjustment {
                    if let Some(regime) = &ctx.regime {
                        let multiplier = regime.position_multiplier();
                        factors.push(SizeFactor::Regime { multiplier });
                        fraction *= multiplier;
                    }
                }
            }

            if self.config.use_signal_scaling {
                if let Some(signal) = ctx.signal_strength {
                    let multiplier = signal.clamp(Decimal::new(5, 1), Decimal::TWO);
                    factors.push(SizeFactor::Signal { multiplier });
                    fraction *= multiplier;
                }
            }
        }

        if fraction > self.config.max_single_position {
            fraction = self.config.max_single_position;
            factors.push(SizeFactor::MaxPositionCap);
        }

        // Remaining portfolio risk budget, expressed back into an equity
        // fraction through the stop distance.
        let distance = ctx.stop_distance_pct();
        if distance > Decimal::ZERO {
            let remaining = (self.config.max_portfolio_risk - ctx.open_risk).max(Decimal::ZERO);
            let budget_cap = remaining / distance;
            if fraction > budget_cap {
                fraction = budget_cap;
                factors.push(SizeFactor::RiskBudgetCap { remaining });
            }
        }

        if fraction < self.config.min_size {
            factors.push(SizeFactor::BelowMinimum);
            return SizeDecision::zero(factors);
        }

        SizeDecision {
            fraction,
            notional: fraction * ctx.equity,
            factors,
        }
    }
}

/// Normalized-ATR band multiplier: calm names full size, elevated
/// volatility scales down in two steps.
fn atr_band_multiplier(atr_pct: Decimal) -> Decimal {
    if atr_pct < Decimal::new(3, 2) {
        Decimal::ONE
    } else if atr_pct < Decimal::new(5, 2) {
        Decimal::new(75, 2)
    } else {
        Decimal::new(5, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_context() -> SizeContext {
        // 5% stop distance: base = 0.01 / 0.05 = 0.20
        SizeContext::new(
            Decimal::new(100_000, 0),
            Decimal::new(100, 0),
            Decimal::new(95, 0),
        )
    }

    fn risk_based_sizer() -> PositionSizer {
        PositionSizer::new(SizerConfig {
            method: SizeMethod::RiskBased,
            ..Default::default()
        })
    }

    #[test]
    fn test_risk_based_baseline() {
        let sizer = risk_based_sizer();
        let decision = sizer.size(&create_test_context());

        assert_eq!(decision.fraction, Decimal::new(20, 2));
        assert_eq!(decision.notional, Decimal::new(20_000, 0));
        assert_eq!(decision.shares(Decimal::new(100, 0)), Decimal::new(200, 0));
        assert!(decision
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::RiskBase { .. })));
    }

    #[test]
    fn test_atr_band_multipliers() {
        let sizer = risk_based_sizer();

        // 2% ATR: calm band, full size
        let mut ctx = create_test_context();
        ctx.atr = Some(Decimal::new(2, 0));
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(20, 2));

        // 4% ATR: 0.75 band → 0.20 * 0.75 = 0.15
        ctx.atr = Some(Decimal::new(4, 0));
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(15, 2));

        // 6% ATR: 0.5 band → 0.10
        ctx.atr = Some(Decimal::new(6, 0));
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(10, 2));
    }

    #[test]
    fn test_volatility_factor_clamps() {
        let sizer = PositionSizer::new(SizerConfig {
            method: SizeMethod::RiskBased,
            account_risk_per_trade: Decimal::new(5, 3), // base 0.10
            ..Default::default()
        });

        // Very calm market: 0.02 / 0.005 = 4, clamped to 2.0 → 0.20
        let mut ctx = create_test_context();
        ctx.realized_volatility = Some(Decimal::new(5, 3));
        let calm = sizer.size(&ctx);
        assert_eq!(calm.fraction, Decimal::new(20, 2));

        // Wild market: 0.02 / 0.08 = 0.25, clamped to 0.5 → 0.05
        ctx.realized_volatility = Some(Decimal::new(8, 2));
        let wild = sizer.size(&ctx);
        assert_eq!(wild.fraction, Decimal::new(5, 2));
        assert!(wild
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::Volatility { .. })));
    }

    #[test]
    fn test_kelly_factor_scales_base() {
        let sizer = PositionSizer::new(SizerConfig::default());

        // Kelly final 0.05 with enough history → factor 0.5 → 0.10
        let mut ctx = create_test_context();
        ctx.kelly = Some(KellyResult {
            final_position: Decimal::new(5, 2),
            sample_size: 40,
            ..Default::default()
        });
        let scaled = sizer.size(&ctx);
        assert_eq!(scaled.fraction, Decimal::new(10, 2));
        assert!(scaled
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::Kelly { .. })));

        // Too little history: factor stays neutral
        ctx.kelly = Some(KellyResult {
            final_position: Decimal::new(5, 2),
            sample_size: 20,
            ..Default::default()
        });
        let neutral = sizer.size(&ctx);
        assert_eq!(neutral.fraction, Decimal::new(20, 2));
        assert!(!neutral
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::Kelly { .. })));
    }

    #[test]
    fn test_regime_multiplier_applies() {
        let sizer = PositionSizer::new(SizerConfig {
            use_regime_adjustment: true,
            ..Default::default()
        });

        // Bear regime halves the allocation: 0.20 * 0.5 = 0.10
        let mut ctx = create_test_context();
        ctx.regime = Some(MarketRegime::Bear);
        let decision = sizer.size(&ctx);
        assert_eq!(decision.fraction, Decimal::new(10, 2));

        // High volatility regime: 0.20 * 0.3 = 0.06
        ctx.regime = Some(MarketRegime::HighVolatility);
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(6, 2));
    }

    #[test]
    fn test_signal_strength_clamps() {
        let sizer = PositionSizer::new(SizerConfig {
            method: SizeMethod::RiskBased,
            account_risk_per_trade: Decimal::new(5, 3), // base 0.10
            ..Default::default()
        });

        // Strong signal clamped to 2.0 → 0.20
        let mut ctx = create_test_context();
        ctx.signal_strength = Some(Decimal::new(3, 0));
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(20, 2));

        // Weak signal clamped to 0.5 → 0.05
        ctx.signal_strength = Some(Decimal::new(2, 1));
        assert_eq!(sizer.size(&ctx).fraction, Decimal::new(5, 2));
    }

    #[test]
    fn test_max_single_position_cap() {
        let sizer = PositionSizer::new(SizerConfig {
            method: SizeMethod::RiskBased,
            account_risk_per_trade: Decimal::new(2, 2), // base would be 0.40
            ..Default::default()
        });

        let decision = sizer.size(&create_test_context());
        assert_eq!(decision.fraction, Decimal::new(20, 2));
        // Base clamp already bounds it; the explicit cap tag only fires
        // when scaling pushes the product back above the cap.
        let mut ctx = create_test_context();
        ctx.signal_strength = Some(Decimal::new(2, 0));
        let capped = sizer.size(&ctx);
        assert_eq!(capped.fraction, Decimal::new(20, 2));
        assert!(capped
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::MaxPositionCap)));
    }

    #[test]
    fn test_portfolio_risk_budget_cap() {
        let sizer = risk_based_sizer();

        // 0.045 of the 0.05 budget already committed: remaining 0.005
        // translates through the 5% stop to a 0.10 fraction cap.
        let mut ctx = create_test_context();
        ctx.open_risk = Decimal::new(45, 3);
        let capped = sizer.size(&ctx);
        assert_eq!(capped.fraction, Decimal::new(10, 2));
        assert!(capped
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::RiskBudgetCap { .. })));

        // Budget exhausted: no new risk at all
        ctx.open_risk = Decimal::new(5, 2);
        let spent = sizer.size(&ctx);
        assert!(spent.is_zero());
        assert!(spent
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::BelowMinimum)));
    }

    #[test]
    fn test_dust_rounds_to_zero() {
        let sizer = PositionSizer::new(SizerConfig {
            method: SizeMethod::RiskBased,
            account_risk_per_trade: Decimal::new(5, 4), // base 0.005 < 1%
            ..Default::default()
        });

        let decision = sizer.size(&create_test_context());
        assert!(decision.is_zero());
        assert_eq!(decision.notional, Decimal::ZERO);
        assert!(decision
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::BelowMinimum)));
    }

    #[test]
    fn test_fixed_and_account_pct_methods() {
        let fixed = PositionSizer::new(SizerConfig {
            method: SizeMethod::Fixed {
                amount: Decimal::new(5_000, 0),
            },
            ..Default::default()
        });
        let decision = fixed.size(&create_test_context());
        assert_eq!(decision.fraction, Decimal::new(5, 2));
        assert_eq!(decision.notional, Decimal::new(5_000, 0));

        let pct = PositionSizer::new(SizerConfig {
            method: SizeMethod::AccountPct {
                pct: Decimal::new(8, 2),
            },
            ..Default::default()
        });
        assert_eq!(
            pct.size(&create_test_context()).fraction,
            Decimal::new(8, 2)
        );

        // Oversized fixed notional still honors the single-position cap
        let oversized = PositionSizer::new(SizerConfig {
            method: SizeMethod::Fixed {
                amount: Decimal::new(50_000, 0),
            },
            ..Default::default()
        });
        assert_eq!(
            oversized.size(&create_test_context()).fraction,
            Decimal::new(20, 2)
        );
    }

    #[test]
    fn test_stop_at_or_above_entry_refuses_to_size() {
        let sizer = risk_based_sizer();
        let ctx = SizeContext::new(
            Decimal::new(100_000, 0),
            Decimal::new(100, 0),
            Decimal::new(100, 0),
        );

        let decision = sizer.size(&ctx);
        assert!(decision.is_zero());
    }

    #[test]
    fn test_factor_product_composes() {
        // 4% ATR band (0.75) and strong signal (2.0) together:
        // 0.20 * 0.75 * 2.0 = 0.30 → capped at 0.20
        let sizer = risk_based_sizer();
        let mut ctx = create_test_context();
        ctx.atr = Some(Decimal::new(4, 0));
        ctx.signal_strength = Some(Decimal::new(2, 0));

        let decision = sizer.size(&ctx);
        assert_eq!(decision.fraction, Decimal::new(20, 2));
        assert!(decision
            .factors
            .iter()
            .any(|f| matches!(f, SizeFactor::MaxPositionCap)));
    }
}
