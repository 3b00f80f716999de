//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the songbook core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It fixes the logging
//! conventions, validates the host capabilities handed in at startup and
//! carries the broadcast channel through which state changes reach the
//! presentation layer.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
