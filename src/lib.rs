//! Swing-Bot: Unattended Equity Swing Trading Agent
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `broker-core`: Gateway traits, market/order/position types, shared errors
//! - `risk-manager`: Kelly sizing, dynamic stops, drawdown tracking, circuit breaker
//! - `trading-engine`: Tick loop, position book, settings, paper-trading kit
//! - `trade-runner`: The `swing-agent` binary

// Re-export for benchmarks
pub use broker_core as broker;
pub use risk_manager as risk;
pub use trading_engine as trading;
