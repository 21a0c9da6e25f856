use std::sync::Arc;

use config::shared::TransformConfig;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::transform::Transform;
use crate::types::Entry;

/// Number of queued entries per worker.
const QUEUE_SIZE_PER_WORKER: usize = 100;

/// Longest entry rendering written to the log when a transform fails.
const MAX_LOGGED_ENTRY_LEN: usize = 200;

/// Applies a [`Transform`] to a stream of entries.
///
/// With zero workers entries are transformed in order on the consuming task. With `N`
/// workers they are fanned out through a queue of `N * 100` entries and results come back in
/// completion order.
///
/// A failing entry is logged and skipped unless the stage is configured to throw, in which
/// case the error is yielded downstream. Extract errors are always yielded.
#[derive(Debug)]
pub struct TransformStage<T> {
    transform: Arc<T>,
    workers: usize,
    throw: bool,
}

impl<T: Transform> TransformStage<T> {
    pub fn new(transform: T) -> Self {
        Self {
            transform: Arc::new(transform),
            workers: 0,
            throw: false,
        }
    }

    pub fn from_config(transform: T, config: &TransformConfig) -> Self {
        Self::new(transform)
            .with_workers(config.workers)
            .with_throw(config.throw)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_throw(mut self, throw: bool) -> Self {
        self.throw = throw;
        self
    }

    /// Returns the transformed stream. Workers, if any, are spawned on the current runtime.
    pub fn apply(
        self,
        input: BoxStream<'static, EtlResult<Entry>>,
    ) -> BoxStream<'static, EtlResult<Entry>> {
        if self.workers == 0 {
            let Self {
                transform, throw, ..
            } = self;
            return input
                .filter_map(move |item| {
                    future::ready(match item {
                        Ok(entry) => transform_entry(transform.as_ref(), &entry, throw),
                        Err(err) => Some(Err(err)),
                    })
                })
                .boxed();
        }

        self.spawn_workers(input)
    }

    fn spawn_workers(
        self,
        mut input: BoxStream<'static, EtlResult<Entry>>,
    ) -> BoxStream<'static, EtlResult<Entry>> {
        let capacity = self.workers * QUEUE_SIZE_PER_WORKER;
        let (entries_tx, entries_rx) = mpsc::channel::<Entry>(capacity);
        let (results_tx, results_rx) = mpsc::channel::<EtlResult<Entry>>(capacity);
        let entries_rx = Arc::new(Mutex::new(entries_rx));

        let feeder_results_tx = results_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = input.next().await {
                match item {
                    Ok(entry) => {
                        if entries_tx.send(entry).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = feeder_results_tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let entries_rx = entries_rx.clone();
            let results_tx = results_tx.clone();
            let transform = self.transform.clone();
            let throw = self.throw;

            workers.spawn(async move {
                loop {
                    let entry = entries_rx.lock().await.recv().await;
                    let Some(entry) = entry else {
                        break;
                    };

                    if let Some(result) = transform_entry(transform.as_ref(), &entry, throw) {
                        if results_tx.send(result).await.is_err() {
                            break;
                        }
                    }
                }

                debug!(worker_id, "transform worker finished");
            });
        }

        // The supervisor owns the last result sender, so the output ends once every worker
        // and the feeder are done.
        tokio::spawn(async move {
            while let Some(result) = workers.join_next().await {
                if let Err(err) = result {
                    error!(error = %err, "transform worker failed");
                    let _ = results_tx
                        .send(Err(etl_error!(
                            ErrorKind::TransformWorkerPanic,
                            "Transform worker terminated abnormally",
                            err
                        )))
                        .await;
                }
            }
        });

        stream::unfold(results_rx, |mut results_rx| async move {
            let result = results_rx.recv().await?;
            Some((result, results_rx))
        })
        .boxed()
    }
}

fn transform_entry<T: Transform>(
    transform: &T,
    entry: &Entry,
    throw: bool,
) -> Option<EtlResult<Entry>> {
    match transform.transform(entry) {
        Ok(transformed) => Some(Ok(transformed)),
        Err(err) if throw => Some(Err(err)),
        Err(err) => {
            error!(entry = %preview(entry), error = %err, "entry transform failed, skipping");
            None
        }
    }
}

fn preview(entry: &Entry) -> String {
    let rendered = serde_json::Value::Object(entry.clone()).to_string();
    if rendered.len() <= MAX_LOGGED_ENTRY_LEN {
        return rendered;
    }

    let mut end = MAX_LOGGED_ENTRY_LEN;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &rendered[..end])
}
