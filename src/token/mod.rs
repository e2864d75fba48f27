//! Token Management
//!
//! Token lifecycle management: storage, the change feed and the coordinating
//! manager.
//!
//! This module provides:
//!
//! - **Token Storage**: key/value persistence of token records
//! - **Token Feed**: latest-value broadcast of the current record
//! - **Token Manager**: single-flight refresh, update, clear and revoke

pub mod feed;
pub mod manager;
pub mod storage;

// Token Storage
pub use storage::{
    create_in_memory_token_storage, create_mock_token_storage, FileTokenStorage,
    InMemoryTokenStorage, MockTokenStorage, TokenStorage,
};

// Token Feed
pub use feed::{TokenFeed, TokenSubscription};

// Token Manager
pub use manager::{
    create_mock_token_manager, DefaultTokenManager, MockTokenManager, RequestBuilder,
    TokenManager, TokenRequestBuilders,
};
