//! Model cache management for downloaded models
//!
//! Built-in models live as single `<name>.onnx` files inside an XDG-compliant
//! cache directory. This module handles cache directory resolution, listing
//! for `--list-models`, and removal for `--clear-cache`.

use crate::error::{BgRemovalError, Result};
use crate::models::ModelKind;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "BGSTRIP_CACHE_DIR";

/// Information about a cached model file
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Built-in model this file belongs to, `None` for unrecognised files
    pub kind: Option<ModelKind>,
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager rooted at the default location
    ///
    /// - `$BGSTRIP_CACHE_DIR/models/` when the variable is set
    /// - Linux: `~/.cache/bgstrip/models/`
    /// - macOS: `~/Library/Caches/bgstrip/models/`
    /// - Windows: `%LOCALAPPDATA%/bgstrip/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }

        Ok(Self { cache_dir })
    }

    /// Create a cache manager rooted at `cache_dir` (models go to `cache_dir/models`)
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");

        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                BgRemovalError::file_io_error("create custom cache directory", &models_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Cache manager honouring an optional `--cache-dir` override
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn from_override(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("bgstrip")
            .join("models"))
    }

    /// Path of the cached file for `kind` (may not exist)
    #[must_use]
    pub fn get_model_path(&self, kind: ModelKind) -> PathBuf {
        self.cache_dir.join(kind.file_name())
    }

    /// `true` when the model file exists and is non-empty
    #[must_use]
    pub fn is_model_cached(&self, kind: ModelKind) -> bool {
        fs::metadata(self.get_model_path(kind)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// List every `.onnx` file in the cache, sorted by file name
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            let is_onnx = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
            if !path.is_file() || !is_onnx {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            let kind = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(ModelKind::from_name);
            let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);

            models.push(CachedModelInfo {
                kind,
                file_name,
                path,
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(models)
    }

    /// Remove every cached model file, returning the removed file names
    ///
    /// # Errors
    /// - Failed to read the cache directory or remove a file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for model in self.scan_cached_models()? {
            log::info!("Removing cached model: {}", model.file_name);
            fs::remove_file(&model.path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model", &model.path, &e)
            })?;
            removed.push(model.file_name);
        }
        Ok(removed)
    }

    /// Remove the cached file for `kind`; `false` when it was not cached
    ///
    /// # Errors
    /// - Failed to remove the file
    pub fn clear_specific_model(&self, kind: ModelKind) -> Result<bool> {
        let model_path = self.get_model_path(kind);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", kind);
        fs::remove_file(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove cached model", &model_path, &e)
        })?;
        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
