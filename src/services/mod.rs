//! Services that keep file handling and progress reporting out of the
//! processing pipeline

#[cfg(feature = "cli")]
pub mod discovery;
pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    BatchStats, ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressReporter,
    ProgressUpdate,
};
