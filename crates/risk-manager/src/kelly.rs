//! Kelly-criterion sizing from historical trade returns.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for Kelly sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Fraction of full Kelly actually deployed (0.5 = half Kelly).
    pub kelly_fraction: Decimal,
    /// Floor on the final position fraction.
    pub min_position: Decimal,
    /// Cap on the final position fraction.
    pub max_position: Decimal,
    /// Below this many historical trades the calculator returns a zero
    /// result rather than sizing off noise.
    pub min_trades: usize,
    /// Replace the observed win rate with its lower 95% confidence bound
    /// before computing Kelly.
    pub conservative: bool,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: Decimal::new(5, 1), // half Kelly
            min_position: Decimal::ZERO,
            max_position: Decimal::new(25, 2), // 25% cap
            min_trades: 30,
            conservative: false,
        }
    }
}

/// Output of one Kelly computation. Never persisted; recomputed per request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KellyResult {
    /// Unscaled Kelly fraction, floored at zero.
    pub full_kelly: Decimal,
    /// full_kelly × kelly_fraction × signal confidence.
    pub adjusted_kelly: Decimal,
    /// adjusted_kelly clamped into [min_position, max_position];
    /// zero when the edge is zero or the sample is too small.
    pub final_position: Decimal,
    pub win_rate: Decimal,
    /// Average win over average loss magnitude. Zero when the history has
    /// no losing trades (full_kelly degenerates to the win rate).
    pub win_loss_ratio: Decimal,
    pub sample_size: usize,
}

impl KellyResult {
    /// Zero-valued result recording how much history was available.
    fn insufficient(sample_size: usize) -> Self {
        Self {
            sample_size,
            ..Default::default()
        }
    }
}

/// Computes Kelly fractions from a return history. Pure: no internal state
/// beyond configuration, no side effects.
#[derive(Debug, Clone)]
pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Derive a position fraction from fractional trade returns, oldest
    /// first. `signal_confidence` scales the adjusted Kelly and is clamped
    /// into [0, 1]; `None` means full confidence.
    pub fn calculate(&self, returns: &[Decimal], signal_confidence: Option<f64>) -> KellyResult {
        let sample_size = returns.len();
        if sample_size < self.config.min_trades {
            return KellyResult::insufficient(sample_size);
        }

        let wins: Vec<Decimal> = returns
            .iter()
            .copied()
            .filter(|r| *r > Decimal::ZERO)
            .collect();
        let losses: Vec<Decimal> = returns
            .iter()
            .copied()
            .filter(|r| *r < Decimal::ZERO)
            .collect();

        if wins.is_empty() {
            // No edge at all; flat and losing histories size to zero.
            return KellyResult::insufficient(sample_size);
        }

        let win_rate = Decimal::from(wins.len()) / Decimal::from(sample_size);
        let p = if self.config.conservative {
            lower_confidence_bound(win_rate, sample_size)
        } else {
            win_rate
        };

        let (full_kelly, win_loss_ratio) = if losses.is_empty() {
            // b is unbounded without losses and (p·b − (1−p))/b → p.
            (p, Decimal::ZERO)
        } else {
            let avg_win = wins.iter().sum::<Decimal>() / Decimal::from(wins.len());
            let avg_loss =
                (losses.iter().sum::<Decimal>() / Decimal::from(losses.len())).abs();
            let b = avg_win / avg_loss;
            (full_kelly(p, b), b)
        };

        let confidence = signal_confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        let confidence =
            Decimal::from_f64_retain(confidence).unwrap_or(Decimal::ONE);
        let adjusted_kelly = full_kelly * self.config.kelly_fraction * confidence;

        let final_position = if full_kelly <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            adjusted_kelly.clamp(self.config.min_position, self.config.max_position)
        };

        KellyResult {
            full_kelly,
            adjusted_kelly,
            final_position,
            win_rate,
            win_loss_ratio,
            sample_size,
        }
    }
}

/// Kelly fraction for win probability `p` and win/loss ratio `b`, floored
/// at zero. A non-positive `b` carries no usable edge.
fn full_kelly(p: Decimal, b: Decimal) -> Decimal {
    if b <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let q = Decimal::ONE - p;
    ((p * b - q) / b).max(Decimal::ZERO)
}

/// Lower bound of the 95% normal-approximation confidence interval for a
/// win rate observed over `n` trades. Square root forces a brief trip
/// through f64.
fn lower_confidence_bound(p: Decimal, n: usize) -> Decimal {
    let p_f = p.to_f64().unwrap_or(0.0);
    let std_err = (p_f * (1.0 - p_f) / n as f64).sqrt();
    let bound = (p_f - 1.96 * std_err).max(0.0);
    Decimal::from_f64_retain(bound).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 18 wins of +3% and 12 losses of -2%: p = 0.6, b = 1.5.
    fn create_test_returns() -> Vec<Decimal> {
        let mut returns = vec![Decimal::new(3, 2); 18];
        returns.extend(vec![Decimal::new(-2, 2); 12]);
        returns
    }

    #[test]
    fn test_full_kelly_formula() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let result = calc.calculate(&create_test_returns(), None);

        assert_eq!(result.sample_size, 30);
        assert_eq!(result.win_rate, Decimal::new(6, 1));
        assert_eq!(result.win_loss_ratio, Decimal::new(15, 1));
        // (0.6 * 1.5 - 0.4) / 1.5 = 0.5 / 1.5 = 0.3333
        assert_eq!(result.full_kelly.round_dp(4), Decimal::new(3333, 4));
        // Half Kelly: 0.3333 * 0.5 = 0.1667
        assert_eq!(result.adjusted_kelly.round_dp(4), Decimal::new(1667, 4));
        // Within [0, 0.25], so unchanged
        assert_eq!(result.final_position.round_dp(4), Decimal::new(1667, 4));
    }

    #[test]
    fn test_confidence_scales_adjusted_kelly() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let result = calc.calculate(&create_test_returns(), Some(0.6));

        // 0.3333 * 0.5 * 0.6 = 0.1
        assert_eq!(result.adjusted_kelly.round_dp(4), Decimal::new(1000, 4));
        assert_eq!(result.final_position.round_dp(4), Decimal::new(1000, 4));

        // Out-of-range confidence is clamped to 1.0, not propagated
        let wild = calc.calculate(&create_test_returns(), Some(3.5));
        let base = calc.calculate(&create_test_returns(), None);
        assert_eq!(wild.adjusted_kelly, base.adjusted_kelly);
    }

    #[test]
    fn test_max_position_cap() {
        let config = KellyConfig {
            max_position: Decimal::new(10, 2), // 10%
            ..Default::default()
        };
        let calc = KellyCalculator::new(config);
        let result = calc.calculate(&create_test_returns(), None);

        // 0.1667 adjusted, capped at 0.10
        assert_eq!(result.final_position, Decimal::new(10, 2));
    }

    #[test]
    fn test_insufficient_history_fails_soft() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let few: Vec<Decimal> = vec![Decimal::new(5, 2); 29];
        let result = calc.calculate(&few, None);

        assert_eq!(result.sample_size, 29);
        assert_eq!(result.full_kelly, Decimal::ZERO);
        assert_eq!(result.final_position, Decimal::ZERO);
    }

    #[test]
    fn test_negative_edge_sizes_to_zero() {
        // 12 wins of +2%, 18 losses of -3%: p = 0.4, b = 0.6667
        // (0.4 * 0.6667 - 0.6) / 0.6667 < 0 → full Kelly floors at zero
        let mut returns = vec![Decimal::new(2, 2); 12];
        returns.extend(vec![Decimal::new(-3, 2); 18]);

        let calc = KellyCalculator::new(KellyConfig::default());
        let result = calc.calculate(&returns, None);

        assert_eq!(result.full_kelly, Decimal::ZERO);
        assert_eq!(result.final_position, Decimal::ZERO);
    }

    #[test]
    fn test_all_wins_degenerates_to_win_rate() {
        let returns = vec![Decimal::new(1, 2); 40];
        let calc = KellyCalculator::new(KellyConfig::default());
        let result = calc.calculate(&returns, None);

        assert_eq!(result.full_kelly, Decimal::ONE);
        assert_eq!(result.win_loss_ratio, Decimal::ZERO);
        // 1.0 * 0.5 = 0.5, capped at 0.25
        assert_eq!(result.final_position, Decimal::new(25, 2));
    }

    #[test]
    fn test_all_losses_size_to_zero() {
        let returns = vec![Decimal::new(-1, 2); 40];
        let calc = KellyCalculator::new(KellyConfig::default());
        let result = calc.calculate(&returns, None);

        assert_eq!(result.final_position, Decimal::ZERO);
        assert_eq!(result.sample_size, 40);
    }

    #[test]
    fn test_conservative_bound_shrinks_position() {
        let plain = KellyCalculator::new(KellyConfig::default());
        let conservative = KellyCalculator::new(KellyConfig {
            conservative: true,
            ..Default::default()
        });

        let returns = create_test_returns();
        let base = plain.calculate(&returns, None);
        let tight = conservative.calculate(&returns, None);

        // p' = 0.6 - 1.96 * sqrt(0.6 * 0.4 / 30) ≈ 0.4247, so the
        // conservative Kelly must be strictly smaller.
        assert!(tight.full_kelly < base.full_kelly);
        assert!(tight.final_position < base.final_position);
        assert!(tight.full_kelly > Decimal::ZERO);
    }

    #[test]
    fn test_result_is_deterministic() {
        let calc = KellyCalculator::new(KellyConfig::default());
        let returns = create_test_returns();
        let a = calc.calculate(&returns, Some(0.8));
        let b = calc.calculate(&returns, Some(0.8));
        assert_eq!(a.final_position, b.final_position);
        assert_eq!(a.full_kelly, b.full_kelly);
    }

    #[test]
    fn test_min_position_floor_applies() {
        let config = KellyConfig {
            min_position: Decimal::new(5, 2), // 5%
            ..Default::default()
        };
        let calc = KellyCalculator::new(config);

        // Tiny but positive edge: 16 wins +1%, 14 losses -1%
        // p = 0.5333, b = 1.0 → full = (0.5333 - 0.4667) = 0.0667
        // adjusted = 0.0333 → floored up to 0.05
        let mut returns = vec![Decimal::new(1, 2); 16];
        returns.extend(vec![Decimal::new(-1, 2); 14]);

        let result = calc.calculate(&returns, None);
        assert!(result.full_kelly > Decimal::ZERO);
        assert_eq!(result.final_position, Decimal::new(5, 2));
    }
}
