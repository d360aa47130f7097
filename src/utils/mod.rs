//! Shared helpers for preprocessing and provider selection

pub mod preprocessing;
pub mod providers;

pub use preprocessing::ImagePreprocessor;
pub use providers::{ExecutionProviderManager, ProviderInfo};
