//! Trading Engine
//!
//! The decision-and-execution core of the swing trading agent: a tick-driven
//! control loop that refreshes quotes, takes profits in tranches, enforces
//! stops, consults the drawdown monitor and circuit breaker, and opens new
//! positions sized through the risk manager. All broker and data access goes
//! through the `broker-core` gateway traits, so the same loop runs against a
//! live brokerage or the in-memory paper implementations in [`paper`].

pub mod book;
pub mod engine;
pub mod paper;
pub mod settings;

pub use book::{BookStats, PositionBook};
pub use engine::{EngineConfig, EngineStats, Phase, TradingEngine};
pub use paper::{FixedRegime, LogNotifier, MemoryJournal, PaperGateway, StaticCandidates};
pub use settings::AgentSettings;
