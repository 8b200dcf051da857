//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other engine crate depends
//! on. It establishes the logging conventions, the validated configuration
//! shape and the event broadcasting mechanism used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
