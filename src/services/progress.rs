//! Progress reporting service
//!
//! Per-image stage updates go through [`ProgressReporter`] so the processor
//! never talks to a terminal directly. Batch outcomes are collected in
//! [`BatchStats`].

use crate::types::ProcessingTimings;
use instant::Instant;
use std::path::{Path, PathBuf};

/// Stages of processing a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Resolving the model and creating the backend session
    Initialization,
    /// Reading and decoding the input image
    ImageLoading,
    /// Resizing and normalizing into the model tensor
    Preprocessing,
    /// Running the segmentation model
    Inference,
    /// Converting the model output into a mask
    MaskGeneration,
    /// Cutting the foreground out, with or without matting
    BackgroundRemoval,
    /// Encoding and writing the PNG
    FileSaving,
    Completed,
}

impl ProcessingStage {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ProcessingStage::Initialization => "Initializing model and backend",
            ProcessingStage::ImageLoading => "Loading input image",
            ProcessingStage::Preprocessing => "Preprocessing image",
            ProcessingStage::Inference => "Running segmentation model",
            ProcessingStage::MaskGeneration => "Generating segmentation mask",
            ProcessingStage::BackgroundRemoval => "Removing background",
            ProcessingStage::FileSaving => "Saving result",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Typical progress percentage once this stage starts
    #[must_use]
    pub fn progress_percentage(self) -> u8 {
        match self {
            ProcessingStage::Initialization => 5,
            ProcessingStage::ImageLoading => 10,
            ProcessingStage::Preprocessing => 20,
            ProcessingStage::Inference => 40,
            ProcessingStage::MaskGeneration => 70,
            ProcessingStage::BackgroundRemoval => 80,
            ProcessingStage::FileSaving => 95,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Receives stage updates while an image is processed
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    fn report_completion(&self, timings: &ProcessingTimings);

    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Discards all updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Logs stage updates at debug level
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::debug!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::debug!("Background removal completed in {}ms", timings.total_ms);
        if self.verbose {
            log::debug!("  {}", timings.summary());
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("Error during {}: {}", stage.description().to_lowercase(), error);
    }
}

/// Outcome counters of a batch run
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub succeeded: usize,
    pub failed: usize,
    /// Inputs that were not attempted (unsupported extension)
    pub skipped: usize,
    pub failures: Vec<(PathBuf, String)>,
    started: Option<Instant>,
}

impl BatchStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Some(Instant::now()),
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure<P: AsRef<Path>>(&mut self, path: P, error: impl ToString) {
        self.failed += 1;
        self.failures.push((path.as_ref().to_path_buf(), error.to_string()));
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Images per second over the attempted inputs
    #[must_use]
    pub fn processing_rate(&self) -> f64 {
        let elapsed = self.started.map_or(0.0, |start| start.elapsed().as_secs_f64());
        if elapsed > 0.0 {
            self.attempted() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Human-readable summary line
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} succeeded, {} failed",
            self.succeeded, self.failed
        );
        if self.skipped > 0 {
            summary.push_str(&format!(", {} skipped", self.skipped));
        }
        summary
    }
}
