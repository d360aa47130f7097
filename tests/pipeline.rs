//! End-to-end pipeline tests through the public API
//!
//! A saliency backend that marks a centred rectangle as foreground stands in
//! for the ONNX models, so these run without model files.

use bgstrip::{
    BackendFactory, BackendType, BackgroundRemovalProcessor, BgRemovalError, ImageIOService,
    InferenceBackend, MattingConfig, ModelInfo, ModelManager, ModelSpec, PngCompression,
    PreprocessingConfig, RemovalConfig, Result,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use instant::Duration;
use ndarray::Array4;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Foreground is the middle half of the frame in both directions
struct RectangleBackend {
    initialized: bool,
}

impl InferenceBackend for RectangleBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, _, height, width) = input.dim();
        Ok(Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
            let inside_x = x >= width / 4 && x < width * 3 / 4;
            let inside_y = y >= height / 4 && y < height * 3 / 4;
            if inside_x && inside_y {
                0.95
            } else {
                0.02
            }
        }))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig::u2net(64))
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "rectangle".to_string(),
            size_bytes: 0,
            input_shape: (1, 3, 64, 64),
            output_shape: (1, 1, 64, 64),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

struct RectangleFactory;

impl BackendFactory for RectangleFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(RectangleBackend { initialized: false }))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx]
    }
}

struct Workspace {
    dir: TempDir,
    model: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("rectangle.onnx");
        std::fs::write(&model, b"placeholder model").unwrap();
        Self { dir, model }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn processor(&self, config: RemovalConfig) -> BackgroundRemovalProcessor {
        let config = RemovalConfig {
            model_spec: ModelSpec::file(&self.model),
            ..config
        };
        BackgroundRemovalProcessor::with_factory(config, Box::new(RectangleFactory)).unwrap()
    }
}

fn write_photo(path: &Path, width: u32, height: u32, format: ImageFormat) {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(image)
        .save_with_format(path, format)
        .unwrap();
}

#[tokio::test]
async fn test_each_input_format_produces_rgba_png() {
    let workspace = Workspace::new();
    let mut processor = workspace.processor(RemovalConfig::builder().alpha_matting(false).build().unwrap());

    #[cfg_attr(not(feature = "webp-support"), allow(unused_mut))]
    let mut inputs = vec![
        ("photo.jpg", ImageFormat::Jpeg),
        ("photo.png", ImageFormat::Png),
        ("photo.bmp", ImageFormat::Bmp),
        ("photo.tiff", ImageFormat::Tiff),
    ];
    #[cfg(feature = "webp-support")]
    inputs.push(("photo.webp", ImageFormat::WebP));

    for (name, format) in inputs {
        let input = workspace.path(name);
        write_photo(&input, 120, 80, format);
        let output = workspace.path(&format!("out/{name}.png"));

        processor.process_file_to(&input, &output).await.unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(ImageIOService::detect_format(&bytes), Some(ImageFormat::Png), "{name}");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (120, 80), "{name}");
        assert_eq!(decoded.get_pixel(2, 2).0[3], 0, "{name}: corner should be transparent");
        assert_eq!(decoded.get_pixel(60, 40).0[3], 255, "{name}: centre should be opaque");
    }
}

#[tokio::test]
async fn test_alpha_matting_keeps_definite_regions() {
    let workspace = Workspace::new();
    let config = RemovalConfig::builder()
        .matting(MattingConfig {
            erode_size: 3,
            ..MattingConfig::default()
        })
        .build()
        .unwrap();
    let mut processor = workspace.processor(config);

    let input = workspace.path("matte.png");
    write_photo(&input, 128, 128, ImageFormat::Png);
    let result = processor.process_file(&input).await.unwrap();

    assert_eq!(result.image.get_pixel(0, 0).0[3], 0);
    assert_eq!(result.image.get_pixel(64, 64).0[3], 255);
    assert!(result.timings.model_load_ms.is_some());
}

#[tokio::test]
async fn test_max_size_and_compression() {
    let workspace = Workspace::new();
    let input = workspace.path("large.png");
    write_photo(&input, 400, 300, ImageFormat::Png);

    let mut processor = workspace.processor(
        RemovalConfig::builder()
            .alpha_matting(false)
            .max_dimension(Some(200))
            .png_compression(PngCompression::Fast)
            .build()
            .unwrap(),
    );
    let output = workspace.path("large_nobg.png");
    let result = processor.process_file_to(&input, &output).await.unwrap();

    assert_eq!(result.dimensions(), (200, 150));
    assert_eq!(image::open(&output).unwrap().width(), 200);
}

#[tokio::test]
async fn test_invalid_files_are_errors_and_processor_recovers() {
    let workspace = Workspace::new();
    let mut processor = workspace.processor(RemovalConfig::builder().alpha_matting(false).build().unwrap());

    let truncated = workspace.path("truncated.jpg");
    std::fs::write(&truncated, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    assert!(matches!(
        processor.process_file(&truncated).await,
        Err(BgRemovalError::InvalidImage(_))
    ));

    let corrupt = workspace.path("corrupt.png");
    std::fs::write(&corrupt, vec![0x17u8; 4096]).unwrap();
    assert!(processor.process_file(&corrupt).await.is_err());

    let good = workspace.path("good.png");
    write_photo(&good, 50, 50, ImageFormat::Png);
    assert!(processor.process_file(&good).await.is_ok());
}

#[test]
fn test_process_bytes_matches_file_dimensions() {
    let workspace = Workspace::new();
    let input = workspace.path("bytes.png");
    write_photo(&input, 90, 45, ImageFormat::Png);

    let mut processor = workspace.processor(RemovalConfig::builder().alpha_matting(false).build().unwrap());
    let result = processor.process_bytes(&std::fs::read(&input).unwrap()).unwrap();

    assert_eq!(result.original_dimensions, (90, 45));
    let png = result.to_png_bytes(PngCompression::Default).unwrap();
    assert_eq!(image::load_from_memory(&png).unwrap().color(), image::ColorType::Rgba8);
}
