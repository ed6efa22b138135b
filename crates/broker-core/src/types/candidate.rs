//! Entry candidates supplied by the external screener.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A screened symbol proposed for entry. Candidates arrive ranked
/// best-first; the engine consumes them in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub symbol: String,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    /// Screener-suggested protective stop, if it produced one.
    pub stop_loss: Option<Decimal>,
    /// Signal confidence in [0, 1].
    pub confidence: f64,
    /// Expected fractional return of the setup.
    pub expected_return: Decimal,
    /// Today's volume relative to its recent average, e.g. 2.0 = double.
    pub volume_ratio: Decimal,
    /// Today's fractional price change, signed.
    pub change_pct: Decimal,
    /// Composite screener score used for the ranking.
    pub score: f64,
    pub as_of: DateTime<Utc>,
}

impl TradeCandidate {
    /// Signal strength for the sizer, derived from confidence and the
    /// screener score. Stays within the sizer's accepted [0.5, 2.0] band
    /// for typical inputs.
    pub fn signal_strength(&self) -> Decimal {
        Decimal::try_from(self.confidence).unwrap_or(Decimal::ONE) * Decimal::TWO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_strength_scales_confidence() {
        let candidate = TradeCandidate {
            symbol: "NVDA".to_string(),
            entry_price: Decimal::new(500, 0),
            target_price: Decimal::new(550, 0),
            stop_loss: Some(Decimal::new(480, 0)),
            confidence: 0.75,
            expected_return: Decimal::new(10, 2),
            volume_ratio: Decimal::new(2, 0),
            change_pct: Decimal::new(1, 2),
            score: 0.8,
            as_of: Utc::now(),
        };
        // 0.75 * 2 = 1.5
        assert_eq!(candidate.signal_strength(), Decimal::new(15, 1));
    }
}
