//! # bcpframe Library
//!
//! This library exposes the bcpframe modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod loader;
pub mod runner;
pub mod sqlcmd;

pub use error::{AppError, Result};

// Re-export bcpframe_core for convenience
pub use bcpframe_core;
