//! Market regime classification supplied by an external detector.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broad market regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bull,
    Sideways,
    Bear,
    HighVolatility,
}

impl MarketRegime {
    /// Allocation multiplier applied to Kelly-based sizing in this regime.
    pub fn position_multiplier(&self) -> Decimal {
        match self {
            MarketRegime::Bull => Decimal::ONE,
            MarketRegime::Sideways => Decimal::new(7, 1), // 0.7
            MarketRegime::Bear => Decimal::new(5, 1),     // 0.5
            MarketRegime::HighVolatility => Decimal::new(3, 1), // 0.3
        }
    }
}

/// One regime reading from the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    pub as_of: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipliers_shrink_with_risk() {
        assert_eq!(MarketRegime::Bull.position_multiplier(), Decimal::ONE);
        assert!(
            MarketRegime::Sideways.position_multiplier()
                > MarketRegime::Bear.position_multiplier()
        );
        assert!(
            MarketRegime::Bear.position_multiplier()
                > MarketRegime::HighVolatility.position_multiplier()
        );
    }
}
