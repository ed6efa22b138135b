//! Broker Core Library
//!
//! Shared domain types, error taxonomy, and abstract collaborator contracts
//! for the swing trading agent.

pub mod error;
pub mod gateway;
pub mod types;

pub use error::{Error, Result};
