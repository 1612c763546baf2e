use std::collections::HashSet;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info};

use crate::core::cache::{CacheEntryResolver, Resolution, ResolveOptions};
use crate::core::error::{SyncError, SyncResult};
use crate::core::version::{BaseChain, Version};

/// Resolves in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Progress notification. `next` is the file about to start, `None` once
/// every file has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress<'a> {
    pub next: Option<&'a str>,
    pub index: usize,
    pub total: usize,
}

/// How the files of one batch are resolved.
#[derive(Debug, Clone, Default)]
pub struct FetchPolicy {
    pub force_hash_check: bool,
    /// Files whose absence fails the batch.
    pub required: HashSet<String>,
}

/// Outcome of a batch, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub resolved: Vec<(String, Version)>,
    pub not_needed: Vec<String>,
    pub failed: Vec<String>,
}

impl FetchReport {
    pub fn completed(&self) -> usize {
        self.resolved.len() + self.not_needed.len() + self.failed.len()
    }
}

/// Bounded pool driving the cache resolver over a file list.
///
/// Every resolve runs on the caller's task; concurrency is overlapping I/O,
/// not parallel execution.
pub struct FetchScheduler<'a> {
    resolver: &'a CacheEntryResolver,
    concurrency: usize,
}

impl<'a> FetchScheduler<'a> {
    pub fn new(resolver: &'a CacheEntryResolver) -> Self {
        Self {
            resolver,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Resolve every file in `files` against `chain`.
    ///
    /// A new file starts each time one completes, keeping at most
    /// `concurrency` in flight. After the first hard failure nothing new is
    /// started, in-flight work drains and that failure is returned; `on_done`
    /// only runs when the whole batch succeeded.
    pub async fn run<P, D>(
        &self,
        files: &[String],
        chain: &BaseChain,
        policy: &FetchPolicy,
        mut on_progress: P,
        on_done: D,
    ) -> SyncResult<FetchReport>
    where
        P: FnMut(FetchProgress<'_>),
        D: FnOnce(&FetchReport),
    {
        let total = files.len();
        info!(
            "Checking {} files against {} (concurrency={})",
            total,
            chain.head(),
            self.concurrency
        );

        let mut cursor = 0;
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<SyncError> = None;
        let mut report = FetchReport::default();

        on_progress(FetchProgress {
            next: files.first().map(String::as_str),
            index: 0,
            total,
        });

        loop {
            while first_error.is_none() && in_flight.len() < self.concurrency && cursor < total {
                let name = files[cursor].as_str();
                let options = ResolveOptions {
                    force_hash_check: policy.force_hash_check,
                    required: policy.required.contains(name),
                };
                let resolver = self.resolver;
                in_flight.push(async move {
                    let result = resolver
                        .resolve(name, chain.versions(), chain, options)
                        .await;
                    (name, result)
                });
                cursor += 1;
            }

            let Some((name, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(Resolution::Resolved(file)) => report.resolved.push((file.name, file.version)),
                Ok(Resolution::NotNeeded) => report.not_needed.push(name.to_string()),
                Err(e) => {
                    error!("Failed to resolve {}: {}", name, e);
                    report.failed.push(name.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }

            on_progress(FetchProgress {
                next: files.get(cursor).map(String::as_str),
                index: cursor,
                total,
            });
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Checked {} files ({} resolved, {} not needed)",
            total,
            report.resolved.len(),
            report.not_needed.len()
        );
        on_done(&report);
        Ok(report)
    }
}
