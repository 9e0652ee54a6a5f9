//! Describe stage: one vision-model description per optimized image.
//!
//! Images are processed one at a time. Each result, good or a sentinel, is
//! persisted before the next request goes out, so a crash loses at most the
//! request in flight.
//!
//! ## Retry Strategy
//!
//! Within one run, a failed request is retried up to `max_retries` times with
//! exponential backoff (`retry_backoff_ms * 2^attempt`). Once every attempt
//! has failed the error sentinel is recorded and the image counts as done;
//! only the retry entry point, driven by a [`RetryPolicy`], sends it again.

use crate::config::PipelineConfig;
use crate::describer::ImageDescriber;
use crate::error::{DescribeError, ItemError, PipelineError};
use crate::pipeline::postprocess::clean_description;
use crate::pipeline::StageReport;
use crate::prompts::{error_sentinel, is_refusal, ERROR_MARKER, REFUSAL_SENTINEL};
use crate::store::{ArtifactStore, ImageArtifact, ImageField};
use crate::workspace::WorkPaths;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Which recorded descriptions the retry entry point sends again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Descriptions containing the error marker (`"Error"`): transport
    /// failures and timeouts. Refusals stay as recorded.
    #[default]
    TransportErrors,
    /// Transport failures plus the refusal sentinel.
    AnySentinel,
}

impl RetryPolicy {
    /// True if `image` has a recorded description this policy retries.
    pub fn needs_retry(&self, image: &ImageArtifact) -> bool {
        let Some(text) = image.description.as_deref() else {
            return false;
        };
        let transport = text.contains(ERROR_MARKER);
        match self {
            RetryPolicy::TransportErrors => transport,
            RetryPolicy::AnySentinel => transport || text == REFUSAL_SENTINEL,
        }
    }
}

/// Run the Describe stage for one work.
///
/// # Errors
/// Only state-document failures. Request failures become sentinels.
pub async fn describe(
    paths: &WorkPaths,
    describer: &dyn ImageDescriber,
    config: &PipelineConfig,
) -> Result<StageReport, PipelineError> {
    let store = ArtifactStore::new(&paths.metadata);
    let record = store.load()?;
    let pending: Vec<&ImageArtifact> = record
        .images
        .iter()
        .filter(|i| i.needs_description())
        .collect();

    let mut report = StageReport {
        attempted: pending.len(),
        ..Default::default()
    };
    if pending.is_empty() {
        debug!(work = %paths.work, "Nothing to describe");
        return Ok(report);
    }
    info!(
        work = %paths.work,
        "Describing {} images with {}",
        pending.len(),
        describer.model_name()
    );

    for (n, image) in pending.iter().enumerate() {
        let start = Instant::now();
        let (description, ok) = match describe_one(paths, image, describer, config).await {
            Ok(text) if is_refusal(&text, &config.refusal_phrases) || text.is_empty() => {
                warn!(image = %image.id, "Model gave no usable description");
                (REFUSAL_SENTINEL.to_string(), false)
            }
            Ok(text) => (text, true),
            Err(e) => {
                warn!(work = %paths.work, "{e}");
                let sentinel = error_sentinel(&e.to_string());
                report.failures.push(e);
                (sentinel, false)
            }
        };

        store.patch_image_field(&image.id, ImageField::Description, Some(description))?;
        if ok {
            report.succeeded += 1;
        }
        if let Some(cb) = &config.progress_callback {
            cb.on_image_described(&paths.work, &image.id, ok);
        }
        debug!(
            image = %image.id,
            "{}/{} done in {}ms",
            n + 1,
            pending.len(),
            start.elapsed().as_millis()
        );
    }

    Ok(report)
}

/// Read the optimized image and ask the model, retrying failed requests.
async fn describe_one(
    paths: &WorkPaths,
    image: &ImageArtifact,
    describer: &dyn ImageDescriber,
    config: &PipelineConfig,
) -> Result<String, ItemError> {
    let relative = image
        .optimized_path
        .as_deref()
        .ok_or_else(|| ItemError::ImageIo {
            id: image.id.clone(),
            detail: "image has not been optimized".to_string(),
        })?;
    let path = paths.resolve(relative);
    let png = std::fs::read(&path).map_err(|e| ItemError::ImageIo {
        id: image.id.clone(),
        detail: format!("{}: {e}", path.display()),
    })?;

    let limit = Duration::from_secs(config.request_timeout_secs);
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                image.id, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(limit, describer.describe(&png, &config.prompt)).await {
            Ok(Ok(raw)) => return Ok(clean_description(&raw)),
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", image.id, attempt + 1, e);
                last_err = Some(api_error(&image.id, e));
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    image.id,
                    attempt + 1,
                    config.request_timeout_secs
                );
                last_err = Some(ItemError::Timeout {
                    id: image.id.clone(),
                    secs: config.request_timeout_secs,
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ItemError::DescriptionApi {
        id: image.id.clone(),
        detail: "no attempt was made".to_string(),
    }))
}

fn api_error(id: &str, e: DescribeError) -> ItemError {
    ItemError::DescriptionApi {
        id: id.to_string(),
        detail: e.to_string(),
    }
}
