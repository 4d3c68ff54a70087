//! Background removal orchestrator
//!
//! Validates the upload, calls the engine (retrying once without options when
//! the engine rejects them), checks the result and post-processes it.
//!
//! One `BackgroundRemover` runs one job at a time. A second submission while a
//! job is running fails with [`ToolError::Busy`]; it is never queued.

use crate::config::OutputFormat;
use crate::engine::{EngineOptions, RemovalEngine};
use crate::error::{InferenceFailure, Result, ToolError, FALLBACK_FAILED_MESSAGE};
use crate::postprocess::process_output_image;
use crate::services::progress::percent;
use crate::services::{
    NoOpProgressReporter, ProcessingStage, ProgressCallback, ProgressReporter, ProgressUpdate,
};
use crate::types::{ImageBlob, ProcessingTimings, RemovalJob, RemovalResult};
use crate::utils::UploadValidator;
use instant::Instant;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Clears the busy flag when the job ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ToolError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs background removal jobs against a [`RemovalEngine`]
pub struct BackgroundRemover {
    engine: Arc<dyn RemovalEngine>,
    options: EngineOptions,
    busy: AtomicBool,
    progress: Arc<AtomicU8>,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("engine", &self.engine.name())
            .field("options", &self.options)
            .field("busy", &self.is_busy())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemover {
    #[must_use]
    pub fn new(engine: Arc<dyn RemovalEngine>) -> Self {
        Self {
            engine,
            options: EngineOptions::default(),
            busy: AtomicBool::new(false),
            progress: Arc::new(AtomicU8::new(0)),
            reporter: Arc::new(NoOpProgressReporter),
        }
    }

    /// Options used for the primary engine call
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn RemovalEngine> {
        &self.engine
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Progress of the running job in percent
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Engine stage only: validate, call the engine with fallback, check the result
    ///
    /// `options` overrides the remover's configured options for this call.
    pub async fn remove_background(
        &self,
        input: &ImageBlob,
        options: Option<&EngineOptions>,
    ) -> Result<ImageBlob> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let start = Instant::now();
        let (blob, _) = self.run_engine(input, options, start).await?;
        Ok(blob)
    }

    /// Full job: validate, engine with fallback, post-process, name the download
    #[tracing::instrument(skip_all, fields(engine = self.engine.name(), bytes = job.input.len()))]
    pub async fn process(&self, job: &RemovalJob) -> Result<RemovalResult> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let start = Instant::now();

        // Lossless engine output; post-processing owns the target format
        let options = self.options.clone().output_format(OutputFormat::Png);
        let (engine_output, mut timings) =
            self.run_engine(&job.input, Some(&options), start).await?;

        self.report(ProcessingStage::PostProcessing, 100, start);
        let post_start = Instant::now();
        let bytes = engine_output.bytes;
        let max_width = job.max_width;
        let format = job.output_format;
        let result = tokio::task::spawn_blocking(move || {
            process_output_image(&bytes, max_width, format)
        })
        .await
        .map_err(|e| ToolError::internal(format!("Post-processing task failed: {e}")))?
        .inspect_err(|e| {
            self.reporter
                .report_error(ProcessingStage::PostProcessing, &e.to_string());
        })?;
        timings.postprocessing_ms = post_start.elapsed().as_millis() as u64;
        timings.total_ms = start.elapsed().as_millis() as u64;

        self.report(ProcessingStage::Completed, 100, start);
        self.reporter.report_completion(timings);

        Ok(RemovalResult {
            original_size: job.input.len(),
            result_size: result.len(),
            download_name: job.download_name(),
            result,
        })
    }

    async fn run_engine(
        &self,
        input: &ImageBlob,
        options: Option<&EngineOptions>,
        start: Instant,
    ) -> Result<(ImageBlob, ProcessingTimings)> {
        self.progress.store(0, Ordering::Release);
        self.report(ProcessingStage::Validation, 0, start);
        UploadValidator::validate_removal_input(input).inspect_err(|e| {
            self.reporter
                .report_error(ProcessingStage::Validation, &e.to_string());
        })?;

        let engine_start = Instant::now();
        let options = options.unwrap_or(&self.options);
        let result = self.call_with_fallback(input, options, start).await;
        let timings = ProcessingTimings {
            engine_ms: engine_start.elapsed().as_millis() as u64,
            ..ProcessingTimings::default()
        };

        let (blob, used_fallback) = result
            .and_then(|(blob, used_fallback)| {
                validate_engine_output(&blob)?;
                Ok((blob, used_fallback))
            })
            .map_err(|e| {
                let e = e.classify_for_user();
                self.reporter
                    .report_error(ProcessingStage::Inference, &e.to_string());
                e
            })?;

        Ok((
            blob,
            ProcessingTimings {
                used_fallback,
                ..timings
            },
        ))
    }

    /// Primary call with options, then at most one call without them
    async fn call_with_fallback(
        &self,
        input: &ImageBlob,
        options: &EngineOptions,
        start: Instant,
    ) -> Result<(ImageBlob, bool)> {
        self.report(ProcessingStage::Inference, 0, start);
        let primary = self
            .engine
            .remove_background(input, Some(options), Some(self.progress_callback(start)))
            .await;

        match primary {
            Ok(blob) => Ok((blob, false)),
            Err(e) if e.is_config_incompatibility() => {
                log::warn!(
                    "Engine rejected its options ({}), retrying with defaults",
                    e
                );
                self.report(ProcessingStage::FallbackInference, self.progress(), start);
                match self.engine.remove_background(input, None, None).await {
                    Ok(blob) => Ok((blob, true)),
                    Err(fallback_error) => {
                        log::error!("Fallback engine call failed: {}", fallback_error);
                        Err(ToolError::inference(
                            InferenceFailure::Other,
                            FALLBACK_FAILED_MESSAGE,
                        ))
                    },
                }
            },
            Err(e) => Err(e),
        }
    }

    fn progress_callback(&self, start: Instant) -> ProgressCallback {
        let progress = Arc::clone(&self.progress);
        let reporter = Arc::clone(&self.reporter);
        Arc::new(move |key: &str, current: u64, total: u64| {
            let value = percent(current, total);
            progress.store(value, Ordering::Release);
            log::trace!("{}: {}/{} ({}%)", key, current, total, value);
            reporter.report_progress(ProgressUpdate::new(ProcessingStage::Inference, value, start));
        })
    }

    fn report(&self, stage: ProcessingStage, progress: u8, start: Instant) {
        self.reporter
            .report_progress(ProgressUpdate::new(stage, progress, start));
    }
}

/// The engine must hand back a non-empty image blob
fn validate_engine_output(blob: &ImageBlob) -> Result<()> {
    if blob.is_empty() {
        return Err(ToolError::invalid_result("the engine returned no data"));
    }
    if !blob.is_image() {
        return Err(ToolError::invalid_result(format!(
            "unexpected content type '{}'",
            blob.mime_type
        )));
    }
    Ok(())
}
