//! Error types for background removal operations

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Errors raised while locating models, decoding images, running inference
/// and writing results
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File extension or content type is not one we process
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File has a supported extension but is not a decodable image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Mask or cutout computation errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an I/O error with the operation and path that produced it
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Wrap any displayable transport error with a short context message
    pub fn network_error<E: std::fmt::Display>(context: &str, error: E) -> Self {
        Self::Network(format!("{context}: {error}"))
    }

    /// Configuration error naming the parameter, the rejected value and the
    /// accepted range
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {rec}"),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range}).{recommendation}"
        ))
    }

    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {info})"),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{stage}'{input_context}: {details}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = BgRemovalError::invalid_config("test config error");
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

        let err = BgRemovalError::unsupported_format("gif");
        assert!(matches!(err, BgRemovalError::UnsupportedFormat(_)));

        let err = BgRemovalError::invalid_image("truncated");
        assert!(matches!(err, BgRemovalError::InvalidImage(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BgRemovalError::invalid_config("Invalid model path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model path");
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = BgRemovalError::file_io_error("write output", Path::new("/tmp/out.png"), &io_error);
        let message = err.to_string();
        assert!(message.contains("write output"));
        assert!(message.contains("/tmp/out.png"));

        let err = BgRemovalError::config_value_error("erode size", 300, "0-255", Some(10));
        let message = err.to_string();
        assert!(message.contains("erode size"));
        assert!(message.contains("300"));
        assert!(message.contains("Recommended: 10"));

        let err = BgRemovalError::network_error("Download failed", "HTTP 404");
        assert_eq!(err.to_string(), "Network error: Download failed: HTTP 404");

        let err = BgRemovalError::processing_stage_error("matting", "empty trimap", Some("10x10"));
        let message = err.to_string();
        assert!(message.contains("matting"));
        assert!(message.contains("10x10"));
    }
}
