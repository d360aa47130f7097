//! Backend and execution provider selection

use crate::{
    config::ExecutionProvider,
    error::{BgRemovalError, Result},
    processor::BackendType,
};

/// Availability of one `backend:provider` combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Parses `--execution-provider` values and reports provider availability
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a `backend:provider` string such as `onnx:auto` or `tract:cpu`
    ///
    /// A bare backend name selects its default provider.
    ///
    /// ```rust
    /// use bgstrip::utils::ExecutionProviderManager;
    /// use bgstrip::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let normalized = provider_str.trim().to_lowercase();
        let (backend, provider) = match normalized.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (normalized.as_str(), None),
        };

        let backend_type = match backend {
            "onnx" => BackendType::Onnx,
            "tract" => BackendType::Tract,
            other => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown backend '{other}'. Use backend:provider (e.g. onnx:auto, tract:cpu)"
                )))
            },
        };

        let Some(provider) = provider else {
            return Ok((backend_type, Self::default_provider_for_backend(backend_type)));
        };

        let execution_provider = match (backend_type, provider) {
            (BackendType::Onnx, "auto") => ExecutionProvider::Auto,
            (_, "cpu") => ExecutionProvider::Cpu,
            (BackendType::Onnx, "cuda") => ExecutionProvider::Cuda,
            (BackendType::Onnx, "coreml") => ExecutionProvider::CoreMl,
            (BackendType::Onnx, other) => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown ONNX provider '{other}'. Supported: auto, cpu, cuda, coreml"
                )))
            },
            (BackendType::Tract, other) => {
                return Err(BgRemovalError::invalid_config(format!(
                    "Unknown Tract provider '{other}'. Tract only supports 'cpu'"
                )))
            },
        };

        Ok((backend_type, execution_provider))
    }

    #[must_use]
    pub fn default_provider_for_backend(backend_type: BackendType) -> ExecutionProvider {
        match backend_type {
            BackendType::Onnx => ExecutionProvider::Auto,
            BackendType::Tract => ExecutionProvider::Cpu,
        }
    }

    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }

    /// Every provider combination with its availability on this machine
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        {
            let onnx = crate::backends::OnnxBackend::list_providers();
            let available = |name: &str| {
                onnx.iter()
                    .any(|(provider, available, _)| provider.eq_ignore_ascii_case(name) && *available)
            };
            providers.extend([
                onnx_info(ExecutionProvider::Auto, true, "ONNX Runtime with auto-selected provider"),
                onnx_info(ExecutionProvider::Cpu, available("cpu"), "ONNX Runtime CPU execution"),
                onnx_info(
                    ExecutionProvider::Cuda,
                    available("cuda"),
                    "ONNX Runtime CUDA GPU acceleration",
                ),
                onnx_info(
                    ExecutionProvider::CoreMl,
                    available("coreml"),
                    "ONNX Runtime CoreML (Apple Silicon) acceleration",
                ),
            ]);
        }

        #[cfg(not(feature = "onnx"))]
        for provider in [
            ExecutionProvider::Auto,
            ExecutionProvider::Cpu,
            ExecutionProvider::Cuda,
            ExecutionProvider::CoreMl,
        ] {
            providers.push(onnx_info(provider, false, "ONNX Runtime (feature disabled)"));
        }

        #[cfg(feature = "tract")]
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            providers.push(ProviderInfo {
                name: format!("tract:{}", name.to_lowercase()),
                backend_type: BackendType::Tract,
                execution_provider: ExecutionProvider::Cpu,
                available,
                description,
            });
        }

        #[cfg(not(feature = "tract"))]
        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: false,
            description: "Pure Rust CPU inference via Tract (feature disabled)".to_string(),
        });

        providers
    }
}

fn onnx_info(provider: ExecutionProvider, available: bool, description: &str) -> ProviderInfo {
    ProviderInfo {
        name: ExecutionProviderManager::provider_to_string(BackendType::Onnx, provider),
        backend_type: BackendType::Onnx,
        execution_provider: provider,
        available,
        description: description.to_string(),
    }
}
