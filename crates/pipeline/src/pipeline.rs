use logcount_analysis::LogParser;
use logcount_counts::CountStore;
use logcount_source::LineSource;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Error;
use crate::metrics::PipelineMetrics;
use crate::stages::{ingest_lines, persist_windows, reduce_windows};

/// Windowed map-reduce over a line source, merging results into a count store.
///
/// Three tasks run once started: ingestion (parse and map), reduction (one
/// batch per window) and persistence (one store call per window). They are
/// connected by bounded queues, so a slow store eventually stalls ingestion
/// instead of growing memory.
#[derive(Debug)]
pub struct Pipeline<S>
where
    S: CountStore,
{
    config: PipelineConfig,
    store: S,
    metrics: PipelineMetrics,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<S> Pipeline<S>
where
    S: CountStore,
{
    /// Creates a new instance of `Pipeline`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or metrics cannot be registered.
    pub fn new(config: PipelineConfig, store: S) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            metrics: PipelineMetrics::new()?,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Spawns the three stages reading from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline was already started.
    pub fn start<L>(&self, source: L) -> Result<(), Error>
    where
        L: LineSource,
    {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let capacity = self.config.queue_capacity;
        let window = self.config.window;
        let (map_tx, map_rx) = mpsc::channel(capacity);
        let (reduce_tx, reduce_rx) = mpsc::channel(capacity);

        self.task_tracker.spawn(ingest_lines(
            source,
            LogParser::new(self.config.default_server_id.clone()),
            map_tx,
            self.shutdown_token.clone(),
            self.metrics.clone(),
        ));

        self.task_tracker.spawn(reduce_windows(
            map_rx,
            reduce_tx,
            window,
            self.shutdown_token.clone(),
            self.metrics.clone(),
        ));

        self.task_tracker.spawn(persist_windows(
            reduce_rx,
            self.store.clone(),
            window,
            self.shutdown_token.clone(),
            self.metrics.clone(),
        ));

        self.task_tracker.close();

        info!(
            window_ms = window.as_millis(),
            queue_capacity = capacity,
            "pipeline started"
        );

        Ok(())
    }

    /// Waits until every stage has returned.
    ///
    /// Stages return on their own once the source ends and the last windows
    /// are flushed. Never resolves if the pipeline was not started.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }

    /// Cancels every stage and waits for them to return.
    ///
    /// Map outputs not yet reduced are dropped. Reduce outputs already
    /// accumulated by the persistence stage get one final store call.
    pub async fn shutdown(&self) {
        info!("pipeline shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("pipeline shutdown");
    }

    /// Counters for this pipeline.
    pub const fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// The store aggregates are merged into.
    pub const fn store(&self) -> &S {
        &self.store
    }
}
