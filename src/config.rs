//! Configuration types for background removal operations

use crate::error::BgRemovalError;
use crate::models::ModelSpec;
use crate::processor::BackendType;
use serde::{Deserialize, Serialize};

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl Default for ExecutionProvider {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// PNG compression effort for the written cutouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PngCompression {
    /// Fastest encoding, largest files
    Fast,
    /// Encoder default
    Default,
    /// Smallest files, slowest encoding
    Best,
}

impl Default for PngCompression {
    fn default() -> Self {
        Self::Best
    }
}

impl PngCompression {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Best => "best",
        }
    }

    /// Parse a `--compression` value
    ///
    /// # Errors
    /// - Value is not one of `fast`, `default`, `best`
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "default" => Ok(Self::Default),
            "best" | "optimize" => Ok(Self::Best),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown PNG compression '{other}'. Use one of: fast, default, best"
            ))),
        }
    }
}

impl std::fmt::Display for PngCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alpha matting parameters
///
/// Mask values above `foreground_threshold` are definite foreground, values
/// below `background_threshold` definite background. Both regions shrink by
/// `erode_size` before the unknown band in between is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MattingConfig {
    pub enabled: bool,
    pub foreground_threshold: u8,
    pub background_threshold: u8,
    pub erode_size: u32,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            foreground_threshold: 240,
            background_threshold: 10,
            erode_size: 10,
        }
    }
}

impl MattingConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Segmentation model to run
    pub model_spec: ModelSpec,

    /// Inference backend
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime (ignored by Tract)
    pub execution_provider: ExecutionProvider,

    /// Alpha matting of the mask edges
    pub matting: MattingConfig,

    /// Smooth the raw mask (opening, blur, threshold) before cutting out
    pub post_process_mask: bool,

    /// Downsample results so the longest side does not exceed this value
    pub max_dimension: Option<u32>,

    /// PNG compression effort
    pub png_compression: PngCompression,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            matting: MattingConfig::default(),
            post_process_mask: false,
            max_dimension: None,
            png_compression: PngCompression::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use bgstrip::{PngCompression, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .alpha_matting(false)
    ///     .max_dimension(Some(2048))
    ///     .png_compression(PngCompression::Fast)
    ///     .build()
    ///     .unwrap();
    /// assert!(!config.matting.enabled);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Background threshold not below the foreground threshold
    /// - Erode size above 255
    /// - Maximum dimension of zero
    pub fn validate(&self) -> crate::Result<()> {
        if self.matting.background_threshold >= self.matting.foreground_threshold {
            return Err(BgRemovalError::invalid_config(format!(
                "Background threshold ({}) must be lower than foreground threshold ({})",
                self.matting.background_threshold, self.matting.foreground_threshold
            )));
        }

        if self.matting.erode_size > 255 {
            return Err(BgRemovalError::config_value_error(
                "erode size",
                self.matting.erode_size,
                "0-255",
                Some(10),
            ));
        }

        if self.max_dimension == Some(0) {
            return Err(BgRemovalError::config_value_error(
                "maximum dimension",
                0,
                "1 or greater",
                None,
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn matting(mut self, matting: MattingConfig) -> Self {
        self.config.matting = matting;
        self
    }

    /// Enable or disable alpha matting, keeping the thresholds
    #[must_use]
    pub fn alpha_matting(mut self, enabled: bool) -> Self {
        self.config.matting.enabled = enabled;
        self
    }

    #[must_use]
    pub fn post_process_mask(mut self, enabled: bool) -> Self {
        self.config.post_process_mask = enabled;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn png_compression(mut self, compression: PngCompression) -> Self {
        self.config.png_compression = compression;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set intra-op threads to `threads` and inter-op threads to half of it
    /// (minimum 1); 0 leaves both on auto
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`RemovalConfig::validate`]
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelKind;

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.model_spec, ModelSpec::builtin(ModelKind::U2net));
        assert_eq!(config.png_compression, PngCompression::Best);
        assert!(config.matting.enabled);
        assert_eq!(config.matting.foreground_threshold, 240);
        assert_eq!(config.matting.background_threshold, 10);
        assert_eq!(config.matting.erode_size, 10);
        assert!(!config.post_process_mask);
        assert_eq!(config.max_dimension, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RemovalConfig::builder()
            .model_spec(ModelSpec::builtin(ModelKind::U2netp))
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .alpha_matting(false)
            .post_process_mask(true)
            .max_dimension(Some(1024))
            .png_compression(PngCompression::Fast)
            .build()
            .unwrap();

        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert!(!config.matting.enabled);
        assert_eq!(config.matting.erode_size, 10);
        assert!(config.post_process_mask);
        assert_eq!(config.max_dimension, Some(1024));
        assert_eq!(config.png_compression, PngCompression::Fast);
    }

    #[test]
    fn test_num_threads() {
        let config = RemovalConfig::builder().num_threads(8).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (8, 4));

        let config = RemovalConfig::builder().num_threads(1).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (1, 1));

        let config = RemovalConfig::builder().num_threads(0).build().unwrap();
        assert_eq!((config.intra_threads, config.inter_threads), (0, 0));
    }

    #[test]
    fn test_threshold_validation() {
        let matting = MattingConfig {
            foreground_threshold: 10,
            background_threshold: 10,
            ..MattingConfig::default()
        };
        let result = RemovalConfig::builder().matting(matting).build();
        assert!(matches!(result, Err(BgRemovalError::InvalidConfig(_))));

        let matting = MattingConfig {
            foreground_threshold: 200,
            background_threshold: 50,
            ..MattingConfig::default()
        };
        assert!(RemovalConfig::builder().matting(matting).build().is_ok());
    }

    #[test]
    fn test_erode_and_dimension_validation() {
        let matting = MattingConfig {
            erode_size: 300,
            ..MattingConfig::default()
        };
        let err = RemovalConfig::builder().matting(matting).build().unwrap_err();
        assert!(err.to_string().contains("erode size"));

        let err = RemovalConfig::builder()
            .max_dimension(Some(0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("maximum dimension"));
    }

    #[test]
    fn test_png_compression_parse() {
        assert_eq!(PngCompression::parse("fast").unwrap(), PngCompression::Fast);
        assert_eq!(PngCompression::parse("BEST").unwrap(), PngCompression::Best);
        assert_eq!(
            PngCompression::parse("optimize").unwrap(),
            PngCompression::Best
        );
        assert!(PngCompression::parse("ultra").is_err());
        assert_eq!(PngCompression::Default.to_string(), "default");
    }

    #[test]
    fn test_execution_provider_display() {
        assert_eq!(ExecutionProvider::default(), ExecutionProvider::Auto);
        assert_eq!(ExecutionProvider::Cuda.to_string(), "cuda");
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
    }

    #[test]
    fn test_config_serde() {
        let config = RemovalConfig::builder()
            .max_dimension(Some(800))
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("png_compression"));
        assert!(!json.contains("\"debug\""));

        let deserialized: RemovalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, config);
    }
}
