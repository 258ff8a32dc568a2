//! Server module for running one watcher per selected operation type

use std::{any::Any, collections::HashMap, sync::Arc};

use bson::{doc, Document};
use mongodb::{
    options::{ReadPreference, SelectionCriteria},
    Client,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::{
    config::Settings,
    metrics::Metrics,
    mongo::{
        watcher::{self, Callback, Termination, Watcher},
        ChangeEvent, ChangeFeed, MongoFeed,
    },
    shutdown::Shutdown,
    trigger::{self, Operation},
};

/// Failures that prevent any watcher from starting.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to connect to the database: {0}")]
    Connect(#[source] mongodb::error::Error),
    #[error("unable to ping the database: {0}")]
    Ping(#[source] mongodb::error::Error),
}

/// How a single watcher ended.
#[derive(Debug)]
pub struct WatchReport {
    pub operation: Operation,
    pub result: Result<Termination, watcher::Error>,
}

/// Entry point for running the trigger against a MongoDB deployment.
///
/// The `Server` connects once, starts a watcher for every operation type
/// selected by the configured trigger and waits for all of them. Watchers that
/// fail are reported, never restarted.
///
/// Fields:
/// - `settings`: Connection, watched collection and trigger selector.
/// - `metrics`: Prometheus metrics collector shared with every watcher.
pub struct Server {
    settings: Settings,
    metrics: Metrics,
}

impl Server {
    /// Create a new `Server` with the given settings.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            metrics: Metrics::new(),
        }
    }

    /// Create a new `Server` with the given settings and metrics collector.
    pub fn with_metrics(settings: Settings, metrics: Metrics) -> Self {
        Self { settings, metrics }
    }

    /// Get a reference to the metrics collector.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn connect_to_mongo(settings: &Settings) -> Result<Client, Error> {
        let client = Client::with_uri_str(settings.mongo_uri())
            .await
            .map_err(Error::Connect)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
            .map_err(Error::Ping)?;

        info!(cluster = %settings.connection().cluster, "Connected to MongoDB");
        Ok(client)
    }

    /// Run until every watcher has terminated.
    ///
    /// With a live change stream this normally never returns.
    ///
    /// # Errors
    /// Returns an error if the connection or the initial ping fails.
    pub async fn serve<C>(&self, callback: C) -> Result<Vec<WatchReport>, Error>
    where
        C: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        self.serve_until(callback, Shutdown::never()).await
    }

    /// Like [`Server::serve`], but stops every watcher once `shutdown` fires.
    pub async fn serve_until<C>(
        &self,
        callback: C,
        shutdown: Shutdown,
    ) -> Result<Vec<WatchReport>, Error>
    where
        C: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let client = Self::connect_to_mongo(&self.settings).await?;

        let watched = self.settings.watched();
        let collection = client
            .database(&watched.db_name)
            .collection::<Document>(&watched.coll_name);

        let operations = trigger::select(self.settings.trigger());
        info!(
            db = %watched.db_name,
            coll = %watched.coll_name,
            trigger = self.settings.trigger(),
            ?operations,
            "Starting watchers"
        );

        let callback: Callback = Arc::new(callback);
        let reports = dispatch(
            Arc::new(MongoFeed::new(collection)),
            operations,
            callback,
            &self.metrics,
            shutdown,
        )
        .await;

        client.shutdown().await;
        info!("Watchers are finished");
        Ok(reports)
    }
}

/// Connect with `settings` and deliver change events to `callback` until all
/// watchers have terminated.
pub async fn listen<C>(settings: Settings, callback: C) -> Result<Vec<WatchReport>, Error>
where
    C: Fn(ChangeEvent) + Send + Sync + 'static,
{
    Server::new(settings).serve(callback).await
}

/// Run one watcher per operation against `feed` and wait for all of them.
///
/// Watchers are independent: one ending, failing or panicking does not affect
/// the others. Reports come back in completion order, one per operation.
pub async fn dispatch<F>(
    feed: Arc<F>,
    operations: &[Operation],
    callback: Callback,
    metrics: &Metrics,
    shutdown: Shutdown,
) -> Vec<WatchReport>
where
    F: ChangeFeed + ?Sized + 'static,
{
    let mut join_set = JoinSet::new();
    let mut running = HashMap::new();

    for &operation in operations {
        info!(%operation, "Starting watcher");
        let watcher = Watcher::new(operation, callback.clone(), metrics.clone());
        let feed = feed.clone();
        let shutdown = shutdown.clone();
        let handle = join_set.spawn(async move { watcher.watch(&*feed, shutdown).await });
        running.insert(handle.id(), operation);
        metrics.record_watcher_start();
    }

    metrics.set_running_watchers(join_set.len());

    let mut reports = Vec::with_capacity(operations.len());
    while let Some(res) = join_set.join_next_with_id().await {
        metrics.set_running_watchers(join_set.len());

        let (id, result) = match res {
            Ok((id, result)) => (id, result),
            Err(e) => {
                let id = e.id();
                let Some(&operation) = running.get(&id) else {
                    error!(error = ?e, "Unknown watcher task failed");
                    continue;
                };
                error!(%operation, error = ?e, "Watcher task panicked, not restarting");
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                (id, Err(watcher::Error::Panicked { operation, message }))
            }
        };
        let Some(operation) = running.remove(&id) else {
            continue;
        };

        match &result {
            Ok(Termination::Ended) => {
                warn!(%operation, "Watcher finished, change stream was closed")
            }
            Ok(Termination::Stopped) => info!(%operation, "Watcher stopped"),
            Err(e) => {
                error!(%operation, error = %e, "Watcher failed, not restarting");
                metrics.record_watcher_failure(operation.as_str(), e.kind());
            }
        }
        reports.push(WatchReport { operation, result });
    }

    reports
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
