//! Services shared across the tools

pub mod format;
pub mod progress;

pub use format::{EncodeOptions, OutputFormatHandler};
pub use progress::{
    percent, ConsoleProgressReporter, NoOpProgressReporter, ProcessingStage, ProgressCallback,
    ProgressReporter, ProgressUpdate,
};
