use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::feed::{ChangeEvent, ChangeFeed, Subscription, TransportError};
use crate::{metrics::Metrics, shutdown::Shutdown, trigger::Operation};

/// Callback invoked once per decoded change event.
pub type Callback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open change stream for {operation} operation: {source}")]
    Open {
        operation: Operation,
        #[source]
        source: TransportError,
    },
    #[error("error in change stream for {operation} operation: {source}")]
    Stream {
        operation: Operation,
        #[source]
        source: TransportError,
    },
    #[error("watcher for {operation} operation panicked: {message}")]
    Panicked { operation: Operation, message: String },
}

impl Error {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Open { .. } => "open_failed",
            Error::Stream { .. } => "stream_failed",
            Error::Panicked { .. } => "task_panic",
        }
    }
}

/// Why a watcher stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The server closed the change stream, e.g. the collection was dropped.
    Ended,
    /// Shutdown was requested.
    Stopped,
}

/// Delivers every change of one operation type to a callback.
///
/// A watcher owns exactly one subscription. It never retries: the first
/// stream error ends it, while records that fail to decode are skipped.
pub struct Watcher {
    operation: Operation,
    callback: Callback,
    metrics: Metrics,
}

impl Watcher {
    pub fn new(operation: Operation, callback: Callback, metrics: Metrics) -> Self {
        Self {
            operation,
            callback,
            metrics,
        }
    }

    /// Subscribe to `feed` and dispatch until the subscription ends, fails,
    /// or `shutdown` fires.
    pub async fn watch<F>(&self, feed: &F, mut shutdown: Shutdown) -> Result<Termination, Error>
    where
        F: ChangeFeed + ?Sized,
    {
        // Opening waits for server selection, which can take a long time.
        let opened = tokio::select! {
            biased;
            _ = shutdown.requested() => {
                info!(operation = %self.operation, "Shutdown requested, not opening change stream");
                return Ok(Termination::Stopped);
            }
            opened = feed.subscribe(self.operation) => opened,
        };
        let mut subscription = opened.map_err(|source| {
            error!(operation = %self.operation, error = %source, "Failed to create change stream");
            Error::Open {
                operation: self.operation,
                source,
            }
        })?;

        info!(operation = %self.operation, "Watching for document {} events", self.operation);

        let res = self.pump(subscription.as_mut(), shutdown).await;
        subscription.close().await;
        debug!(operation = %self.operation, "Closed change stream");
        res
    }

    async fn pump(
        &self,
        subscription: &mut dyn Subscription,
        mut shutdown: Shutdown,
    ) -> Result<Termination, Error> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.requested() => {
                    info!(operation = %self.operation, "Shutdown requested, stopping watcher");
                    return Ok(Termination::Stopped);
                }
                next = subscription.next() => next,
            };

            match next {
                Some(Ok(raw)) => match raw.decode() {
                    Ok(event) => {
                        debug!(operation = %self.operation, %event, "Document event");
                        (self.callback)(event);
                        self.metrics.record_event_delivered(self.operation.as_str());
                    }
                    Err(e) => {
                        error!(operation = %self.operation, error = %e, "Skipping change event");
                        self.metrics.record_decode_failure(self.operation.as_str());
                    }
                },
                Some(Err(source)) => {
                    error!(operation = %self.operation, error = %source, "Change stream error");
                    return Err(Error::Stream {
                        operation: self.operation,
                        source,
                    });
                }
                None => {
                    warn!(operation = %self.operation, "Change stream ended");
                    return Ok(Termination::Ended);
                }
            }
        }
    }
}
