//! Risk Manager
//!
//! Kelly sizing, multi-factor position sizing, dynamic stops, drawdown
//! tracking, circuit breaking, and risk-reduction planning.

pub mod circuit_breaker;
pub mod drawdown;
pub mod dynamic_stops;
pub mod kelly;
pub mod position_reducer;
pub mod sizing;

pub use circuit_breaker::{
    BreakerConfig, BreakerState, BreakerStatus, BreakerTrip, CircuitBreaker, TripCause,
};
pub use drawdown::{AlertLevel, DrawdownConfig, DrawdownMonitor, DrawdownStatus};
pub use dynamic_stops::{
    average_true_range, DynamicStopCalculator, StopConfig, StopLevels, StopMultipliers,
    TrailingStop, TrailingUpdate, VolatilityBucket,
};
pub use kelly::{KellyCalculator, KellyConfig, KellyResult};
pub use position_reducer::{
    PositionReducer, PositionSnapshot, ReducerConfig, ReductionOrder, ReductionPlan,
    ReductionStrategy,
};
pub use sizing::{PositionSizer, SizeContext, SizeDecision, SizeFactor, SizeMethod, SizerConfig};
