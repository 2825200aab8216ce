//! pharos-ai: Chat provider abstraction for the pharos gateway
//!
//! This crate provides a uniform chat operation over interchangeable model
//! backends (cloud-hosted and on-device), routed by `"provider/model"` path.

pub mod error;
pub mod providers;
pub mod registry;
pub mod types;

pub use error::{Error, Result};
pub use providers::ChatProvider;
pub use registry::{ModelPath, ProviderConfig, ProviderKind, ProviderRegistry};
pub use types::*;
