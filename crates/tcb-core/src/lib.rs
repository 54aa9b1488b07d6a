//! Core session + onboarding logic for the Twitch chatbot boilerplate.
//!
//! This crate is intentionally transport-agnostic. The Twitch chat connection and
//! the OAuth token endpoint live behind ports (traits) implemented in adapter crates.

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod onboarding;
pub mod ports;
pub mod session;
pub mod storage;

pub use errors::{Error, Result};
