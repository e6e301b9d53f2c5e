//! pex - build executable Python environments
//!
//! Selects interpreters and platforms, resolves distributions for them and
//! assembles sources plus distributions into a runnable PEX directory, or
//! seeds a shared, content-addressed cache with it.

pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod interpreter;
pub mod platform;
pub mod resolve;
pub mod seed;
pub mod ui;

pub use error::{PexError, PexResult};
