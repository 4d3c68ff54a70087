//! Progress reporting service
//!
//! Engines report raw `(key, current, total)` ticks; the orchestrator turns
//! them into whole percentages and forwards stage updates to a reporter.

use crate::types::ProcessingTimings;
use instant::Instant;
use std::sync::Arc;

/// Engine progress callback: resource key, current step, total steps
pub type ProgressCallback = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

/// Whole percentage for `current / total`, rounded and clamped to 0-100
///
/// ```
/// use studio_tools::services::progress::percent;
///
/// assert_eq!(percent(1, 3), 33);
/// assert_eq!(percent(2, 3), 67);
/// assert_eq!(percent(5, 0), 0);
/// ```
#[must_use]
pub fn percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = (current as f64 / total as f64 * 100.0).round();
    ratio.clamp(0.0, 100.0) as u8
}

/// Stages of one background removal job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Validation,
    /// Engine call with the configured options
    Inference,
    /// Engine call retried without options
    FallbackInference,
    PostProcessing,
    Completed,
}

impl ProcessingStage {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Validation => "Validating input",
            Self::Inference => "Removing background",
            Self::FallbackInference => "Retrying with default engine settings",
            Self::PostProcessing => "Encoding result",
            Self::Completed => "Processing completed",
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
    pub fn new(stage: ProcessingStage, progress: u8, start_time: Instant) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Trait for reporting progress during background removal
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    fn report_completion(&self, timings: ProcessingTimings);

    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Discards all updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Logs updates through the `log` facade
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
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!("✅ Background removal completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Engine: {}ms", timings.engine_ms);
            if timings.used_fallback {
                log::info!("    • (engine retried without options)");
            }
            log::info!("    • Postprocessing: {}ms", timings.postprocessing_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(1, 200), 1);
        assert_eq!(percent(1, 201), 0);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(15, 10), 100);
    }

    struct Recording(Mutex<Vec<(ProcessingStage, u8)>>);

    impl ProgressReporter for Recording {
        fn report_progress(&self, update: ProgressUpdate) {
            self.0.lock().unwrap().push((update.stage, update.progress));
        }
        fn report_completion(&self, _timings: ProcessingTimings) {}
        fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
    }

    #[test]
    fn test_reporter_receives_clamped_updates() {
        let reporter = Recording(Mutex::new(Vec::new()));
        let start = Instant::now();
        reporter.report_progress(ProgressUpdate::new(ProcessingStage::Inference, 40, start));
        reporter.report_progress(ProgressUpdate::new(ProcessingStage::Completed, 250, start));

        let updates = reporter.0.lock().unwrap();
        assert_eq!(
            *updates,
            vec![
                (ProcessingStage::Inference, 40),
                (ProcessingStage::Completed, 100)
            ]
        );
    }

    #[test]
    fn test_console_reporter_does_not_panic() {
        let reporter = ConsoleProgressReporter::new(true);
        reporter.report_progress(ProgressUpdate::new(
            ProcessingStage::Validation,
            0,
            Instant::now(),
        ));
        reporter.report_completion(ProcessingTimings::default());
        reporter.report_error(ProcessingStage::Inference, "boom");
    }
}
