//! Core engine — discovery, risk-gated execution and the main loop.

pub mod accountant;
pub mod executor;
pub mod runner;
pub mod scanner;

pub use executor::ExecutionRiskManager;
pub use runner::{EngineLoop, SharedSnapshot, TickOutcome};
pub use scanner::VenueScanner;
