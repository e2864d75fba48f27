//! Token Lifecycle Types
//!
//! Core type definitions for token records and configuration.

pub mod config;
pub mod token;

pub use config::*;
pub use token::*;
