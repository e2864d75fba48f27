//! Builders
//!
//! Fluent builder patterns for token lifecycle configuration.

pub mod config;

pub use config::{
    authenticator_config, token_manager_config, AuthenticatorConfigBuilder,
    TokenManagerConfigBuilder,
};
