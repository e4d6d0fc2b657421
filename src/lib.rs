//! RATCHET — always-on prediction venue trading engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod feeds;
pub mod platforms;
pub mod strategy;
pub mod engine;
pub mod dashboard;
