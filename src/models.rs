//! Segmentation model registry and model resolution
//!
//! Built-in models are the U2-Net family and `ISNet` published as ONNX files.
//! Each model is a single `.onnx` file fetched into the model cache on first use;
//! custom ONNX files can be used directly from disk.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const RELEASE_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Built-in segmentation models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// General purpose U2-Net (176 MB)
    U2net,
    /// Lightweight U2-Net (4.7 MB)
    U2netp,
    /// U2-Net trained for human segmentation
    U2netHumanSeg,
    /// Reduced-size U2-Net (43 MB)
    Silueta,
    /// `ISNet` general use, 1024x1024 input
    IsnetGeneralUse,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::U2net,
        ModelKind::U2netp,
        ModelKind::U2netHumanSeg,
        ModelKind::Silueta,
        ModelKind::IsnetGeneralUse,
    ];

    /// Short name used on the command line and in the cache
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::U2net => "u2net",
            Self::U2netp => "u2netp",
            Self::U2netHumanSeg => "u2net_human_seg",
            Self::Silueta => "silueta",
            Self::IsnetGeneralUse => "isnet-general-use",
        }
    }

    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.onnx", self.name())
    }

    /// MD5 of the published model file, lowercase hex
    #[must_use]
    pub fn md5(self) -> &'static str {
        match self {
            Self::U2net => "60024c5c889badc19c04ad937298a77b",
            Self::U2netp => "8e83ca70e441ab06c318d82300c84806",
            Self::U2netHumanSeg => "c09ddc2e0104f800e3e1bb4652583d1f",
            Self::Silueta => "55e59e0d8062d2f5d013f4725ee84782",
            Self::IsnetGeneralUse => "fc16ebd8b0c10d971d3513d564d01e29",
        }
    }

    #[must_use]
    pub fn download_url(self) -> String {
        format!("{RELEASE_BASE_URL}/{}", self.file_name())
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::U2net => "General purpose segmentation (default)",
            Self::U2netp => "Lightweight general purpose segmentation",
            Self::U2netHumanSeg => "Human segmentation",
            Self::Silueta => "Reduced size general purpose segmentation",
            Self::IsnetGeneralUse => "High resolution general purpose segmentation",
        }
    }

    /// Preprocessing parameters the model was trained with
    #[must_use]
    pub fn preprocessing_config(self) -> PreprocessingConfig {
        match self {
            Self::IsnetGeneralUse => PreprocessingConfig {
                target_size: [1024, 1024],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
            Self::U2net | Self::U2netp | Self::U2netHumanSeg | Self::Silueta => {
                PreprocessingConfig::u2net(320)
            },
        }
    }

    /// Parse a model name as accepted on the command line
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().replace('-', "_") == normalized)
    }
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::U2net
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the model bytes come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Built-in model resolved through the model cache
    Builtin(ModelKind),
    /// ONNX file on disk
    File(PathBuf),
}

impl ModelSource {
    /// Display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::Builtin(kind) => kind.name().to_string(),
            ModelSource::File(path) => format!(
                "file:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
        }
    }
}

/// Model source plus an optional input size override for custom files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub input_size: Option<u32>,
}

impl ModelSpec {
    #[must_use]
    pub fn builtin(kind: ModelKind) -> Self {
        Self {
            source: ModelSource::Builtin(kind),
            input_size: None,
        }
    }

    #[must_use]
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: ModelSource::File(path.into()),
            input_size: None,
        }
    }

    /// Parse a `--model` argument: a built-in model name or a path to an ONNX file
    ///
    /// # Errors
    /// - Argument is neither a known model name nor a path ending in `.onnx`
    pub fn parse(arg: &str) -> Result<Self> {
        if let Some(kind) = ModelKind::from_name(arg) {
            return Ok(Self::builtin(kind));
        }

        let path = PathBuf::from(arg);
        let is_onnx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if is_onnx {
            return Ok(Self::file(path));
        }

        let known: Vec<&str> = ModelKind::ALL.iter().map(|kind| kind.name()).collect();
        Err(BgRemovalError::invalid_config(format!(
            "Unknown model '{arg}'. Use one of: {} or a path to an .onnx file",
            known.join(", ")
        )))
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::builtin(ModelKind::default())
    }
}

/// Preprocessing parameters for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input size [height, width]
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// ImageNet normalization at the given square input size
    #[must_use]
    pub fn u2net(size: u32) -> Self {
        Self {
            target_size: [size, size],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW
    pub output_shape: (usize, usize, usize, usize),
}

/// Resolves a model spec to model bytes and metadata
#[derive(Debug)]
pub struct ModelManager {
    spec: ModelSpec,
    model_path: PathBuf,
}

impl ModelManager {
    /// Resolve the model file for `spec`, looking built-in models up in `cache`
    ///
    /// # Errors
    /// - Built-in model is not present in the cache
    /// - Custom model file does not exist
    pub fn from_spec(spec: &ModelSpec, cache: &ModelCache) -> Result<Self> {
        let model_path = match &spec.source {
            ModelSource::Builtin(kind) => {
                if !cache.is_model_cached(*kind) {
                    return Err(BgRemovalError::model(format!(
                        "Model '{}' is not cached in {}. Run with --only-download --model {} first",
                        kind,
                        cache.get_current_cache_dir().display(),
                        kind
                    )));
                }
                cache.get_model_path(*kind)
            },
            ModelSource::File(path) => {
                if !path.is_file() {
                    return Err(BgRemovalError::model(format!(
                        "Model file not found: {}",
                        path.display()
                    )));
                }
                path.clone()
            },
        };

        Ok(Self {
            spec: spec.clone(),
            model_path,
        })
    }

    /// Create a manager for an ONNX file without consulting the cache
    ///
    /// # Errors
    /// - File does not exist
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let spec = ModelSpec::file(path.as_ref());
        let model_path = path.as_ref().to_path_buf();
        if !model_path.is_file() {
            return Err(BgRemovalError::model(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }
        Ok(Self { spec, model_path })
    }

    /// Read the model file into memory
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("read model file", &self.model_path, &e))
    }

    #[must_use]
    pub fn get_preprocessing_config(&self) -> PreprocessingConfig {
        match &self.spec.source {
            ModelSource::Builtin(kind) => {
                let mut config = kind.preprocessing_config();
                if let Some(size) = self.spec.input_size {
                    config.target_size = [size, size];
                }
                config
            },
            ModelSource::File(_) => PreprocessingConfig::u2net(self.spec.input_size.unwrap_or(320)),
        }
    }

    /// # Errors
    /// - Model file metadata cannot be read
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("stat model file", &self.model_path, &e))?
            .len() as usize;
        let size = self.get_preprocessing_config().target_size[0] as usize;

        Ok(ModelInfo {
            name: self.spec.source.display_name(),
            size_bytes,
            input_shape: (1, 3, size, size),
            output_shape: (1, 1, size, size),
        })
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }
}
