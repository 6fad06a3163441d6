//! Bulk batch execution
//!
//! Splits a list of items into consecutive batches and runs each item
//! through the caller-supplied pipeline call, with up to
//! `max_concurrent_batches` batches in flight at once and an optional pause
//! between waves. Per-item results keep the original input order. When
//! auto-adjustment is enabled, the batch size observed for a
//! (provider, operation) pair is tuned from the run's success rate and
//! latency and persists for subsequent runs.

use crate::models::{ApiCallResult, BulkItemError, BulkOperationResult, ProviderId};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument};

/// At most this many per-item failures carry detail in the result.
const MAX_RECORDED_ERRORS: usize = 10;

/// Bulk execution configuration. Static after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Initial number of items per batch.
    pub batch_size: usize,
    /// Batches allowed in flight simultaneously.
    pub max_concurrent_batches: usize,
    /// Pause between batch waves, in seconds.
    pub delay_between_batches: f64,
    /// Whether observed success rate and latency tune the batch size.
    pub auto_adjust_batch_size: bool,
    /// Lower clamp for the tuned batch size.
    pub min_batch_size: usize,
    /// Upper clamp for the tuned batch size.
    pub max_batch_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrent_batches: 3,
            delay_between_batches: 0.5,
            auto_adjust_batch_size: true,
            min_batch_size: 5,
            max_batch_size: 200,
        }
    }
}

impl BulkConfig {
    /// Check the configuration for mistakes at registration time.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size < 1 {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.max_concurrent_batches < 1 {
            return Err("max_concurrent_batches must be at least 1".to_string());
        }
        if !self.delay_between_batches.is_finite() || self.delay_between_batches < 0.0 {
            return Err("delay_between_batches must be non-negative".to_string());
        }
        if self.min_batch_size < 1 || self.min_batch_size > self.max_batch_size {
            return Err("min_batch_size must be within 1..=max_batch_size".to_string());
        }
        if !(self.min_batch_size..=self.max_batch_size).contains(&self.batch_size) {
            return Err("batch_size must be within min_batch_size..=max_batch_size".to_string());
        }
        Ok(())
    }
}

/// Persisted per-(provider, operation) batch sizes, tuned after every run.
#[derive(Default)]
pub struct BatchTuner {
    sizes: DashMap<(ProviderId, String), usize>,
}

impl BatchTuner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch size currently in effect for an operation.
    pub fn current(&self, provider: ProviderId, operation: &str, config: &BulkConfig) -> usize {
        self.sizes
            .get(&(provider, operation.to_string()))
            .map(|entry| *entry)
            .unwrap_or(config.batch_size)
    }

    /// Feed one completed run back into the tuner. Grows the batch size by a
    /// quarter when the run was fast and nearly clean, shrinks it by almost a
    /// third when it was slow or failure-heavy, and clamps to the configured
    /// bounds. Returns the size persisted for the next run.
    pub fn observe(
        &self,
        provider: ProviderId,
        operation: &str,
        config: &BulkConfig,
        success_rate: f64,
        avg_response_time: f64,
    ) -> usize {
        let current = self.current(provider, operation, config);
        if !config.auto_adjust_batch_size {
            return current;
        }

        let adjusted = if success_rate >= 0.95 && avg_response_time < 1.0 {
            ((current as f64 * 1.25) as usize).max(current + 1)
        } else if success_rate < 0.90 || avg_response_time > 3.0 {
            ((current as f64 * 0.70) as usize).min(current.saturating_sub(1))
        } else {
            current
        };
        let clamped = adjusted.clamp(config.min_batch_size, config.max_batch_size);

        if clamped != current {
            debug!(
                provider = %provider,
                operation,
                previous = current,
                adjusted = clamped,
                success_rate,
                avg_response_time,
                "Adjusted batch size"
            );
        }
        self.sizes.insert((provider, operation.to_string()), clamped);
        clamped
    }
}

/// Runs bulk operations and owns the batch-size tuner.
#[derive(Default)]
pub struct BulkExecutor {
    tuner: BatchTuner,
}

impl BulkExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `run_item` for every item, batched. An empty input returns an
    /// all-zero result immediately without invoking the pipeline at all.
    #[instrument(level = "debug", skip_all, fields(provider = %provider, operation = operation, items = items.len()))]
    pub async fn run<T, F, Fut>(
        &self,
        provider: ProviderId,
        operation: &str,
        items: Vec<T>,
        config: &BulkConfig,
        run_item: F,
    ) -> BulkOperationResult
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ApiCallResult>,
    {
        let batch_size = self.tuner.current(provider, operation, config);
        if items.is_empty() {
            return BulkOperationResult::empty(batch_size);
        }

        let started = Instant::now();
        let total_items = items.len();
        let mut slots: Vec<Option<ApiCallResult>> = Vec::new();
        slots.resize_with(total_items, || None);

        let mut indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
        let mut batches: Vec<Vec<(usize, T)>> = Vec::new();
        while !indexed.is_empty() {
            let take = indexed.len().min(batch_size);
            batches.push(indexed.drain(..take).collect());
        }

        let delay = Duration::from_secs_f64(config.delay_between_batches.max(0.0));
        let mut remaining = batches.into_iter();
        let mut first_wave = true;
        loop {
            let wave: Vec<Vec<(usize, T)>> = remaining
                .by_ref()
                .take(config.max_concurrent_batches)
                .collect();
            if wave.is_empty() {
                break;
            }
            if !first_wave && !delay.is_zero() {
                sleep(delay).await;
            }
            first_wave = false;

            let batch_futures = wave.into_iter().map(|batch| {
                let item_futures = batch
                    .into_iter()
                    .map(|(index, item)| {
                        let fut = run_item(item);
                        async move { (index, fut.await) }
                    })
                    .collect::<Vec<_>>();
                join_all(item_futures)
            });
            for batch_results in join_all(batch_futures).await {
                for (index, result) in batch_results {
                    slots[index] = Some(result);
                }
            }
        }

        let results: Vec<ApiCallResult> = slots.into_iter().flatten().collect();
        let successful_items = results.iter().filter(|r| r.success).count();
        let failed_items = total_items - successful_items;
        let errors: Vec<BulkItemError> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.success)
            .take(MAX_RECORDED_ERRORS)
            .map(|(item_index, r)| BulkItemError {
                item_index,
                error: r
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect();

        let success_rate = successful_items as f64 / total_items as f64;
        let average_response_time =
            results.iter().map(|r| r.response_time).sum::<f64>() / total_items as f64;
        // The adjusted size is persisted for the next run; the result reports
        // the size this run was partitioned with.
        let next_batch_size = self.tuner.observe(
            provider,
            operation,
            config,
            success_rate,
            average_response_time,
        );

        debug!(
            total = total_items,
            successful = successful_items,
            failed = failed_items,
            batch_size,
            next_batch_size,
            "Bulk run finished"
        );

        BulkOperationResult {
            total_items,
            successful_items,
            failed_items,
            success_rate,
            total_time: started.elapsed().as_secs_f64(),
            average_response_time,
            errors,
            batch_size_used: batch_size,
            results,
        }
    }
}
