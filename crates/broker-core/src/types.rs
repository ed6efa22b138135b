//! Core domain types for the swing trading agent.

pub mod candidate;
pub mod market;
pub mod order;
pub mod position;
pub mod regime;
pub mod trade;

pub use candidate::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use regime::*;
pub use trade::*;
