//! The three concurrently running stages of the pipeline.
//!
//! Stages only share the queues between them. Each windowed stage owns its
//! batch and flushes it on a fixed tick. Cancellation is checked first in
//! every wait, so it always wins against pending work.

use std::time::Duration;

use logcount_analysis::{LogParser, MapOutput, ReduceOutput, map_entry, reduce_batch};
use logcount_counts::CountStore;
use logcount_source::LineSource;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::PipelineMetrics;

/// Hands `item` to `tx`, or abandons it once `token` is cancelled.
///
/// Returns false when the item was not delivered, either because of
/// cancellation or because the receiver is gone.
pub async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, item: T, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        result = tx.send(item) => result.is_ok(),
    }
}

fn window_ticker(window: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Reads lines, parses and maps them, and queues the map outputs.
///
/// Unparseable lines are logged and dropped. Returns on cancellation, end of
/// stream, or a source error; dropping `map_tx` then lets the downstream
/// stages drain.
pub async fn ingest_lines<L>(
    mut source: L,
    parser: LogParser,
    map_tx: mpsc::Sender<MapOutput>,
    token: CancellationToken,
    metrics: PipelineMetrics,
) where
    L: LineSource,
{
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("ingestion cancelled");
                return;
            }
            next = source.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("line source reached end of stream");
                return;
            }
            Err(e) => {
                error!(error = %e, "line source failed");
                return;
            }
        };

        metrics.lines_received.inc();
        trace!(line = %line, "received line");

        let entry = match parser.parse(&line) {
            Ok(entry) => entry,
            Err(e) => {
                metrics.parse_failures.inc();
                warn!(error = %e, "discarding unparseable line");
                continue;
            }
        };

        for output in map_entry(&entry) {
            if !send_or_cancel(&map_tx, output, &token).await {
                debug!("map output abandoned, ingestion stopping");
                return;
            }
            metrics.map_outputs.inc();
        }
    }
}

/// Accumulates map outputs and reduces them once per window.
///
/// On cancellation the unflushed batch is dropped without reduction. When
/// the input queue closes, the batch is flushed before returning.
pub async fn reduce_windows(
    mut map_rx: mpsc::Receiver<MapOutput>,
    reduce_tx: mpsc::Sender<ReduceOutput>,
    window: Duration,
    token: CancellationToken,
    metrics: PipelineMetrics,
) {
    let mut batch: Vec<MapOutput> = Vec::with_capacity(map_rx.max_capacity());
    let mut ticker = window_ticker(window);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                if !batch.is_empty() {
                    metrics.dropped_on_cancel.inc_by(batch.len() as u64);
                    warn!(dropped = batch.len(), "reduce window cancelled before flush");
                }
                return;
            }
            _ = ticker.tick() => {
                if !flush_map_batch(&mut batch, &reduce_tx, &token, &metrics).await {
                    return;
                }
            }
            output = map_rx.recv() => {
                let Some(output) = output else {
                    debug!(pending = batch.len(), "map queue closed, flushing last window");
                    flush_map_batch(&mut batch, &reduce_tx, &token, &metrics).await;
                    return;
                };
                batch.push(output);
            }
        }
    }
}

// The batch is drained, not replaced, so its allocation is reused.
async fn flush_map_batch(
    batch: &mut Vec<MapOutput>,
    reduce_tx: &mpsc::Sender<ReduceOutput>,
    token: &CancellationToken,
    metrics: &PipelineMetrics,
) -> bool {
    if batch.is_empty() {
        return true;
    }

    let inputs = batch.len();
    let outputs = reduce_batch(batch.drain(..));
    debug!(inputs, keys = outputs.len(), "reduced window");

    let total = outputs.len();
    for (sent, output) in outputs.into_iter().enumerate() {
        if !send_or_cancel(reduce_tx, output, token).await {
            let abandoned = total - sent;
            metrics.reduce_outputs_abandoned.inc_by(abandoned as u64);
            warn!(abandoned, "reduce outputs abandoned before handoff");
            return false;
        }
        metrics.reduce_outputs.inc();
    }

    true
}

/// Accumulates reduce outputs and merges them into `store` once per window.
///
/// A failed store call discards that window. On cancellation, whatever has
/// already been accumulated is flushed once more before returning; outputs
/// still queued are not read.
pub async fn persist_windows<S>(
    mut reduce_rx: mpsc::Receiver<ReduceOutput>,
    store: S,
    window: Duration,
    token: CancellationToken,
    metrics: PipelineMetrics,
) where
    S: CountStore,
{
    let mut batch: Vec<ReduceOutput> = Vec::with_capacity(reduce_rx.max_capacity());
    let mut ticker = window_ticker(window);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                if !batch.is_empty() {
                    info!(records = batch.len(), "flushing reduce outputs before shutdown");
                    flush_reduce_batch(&mut batch, &store, &metrics).await;
                }
                return;
            }
            _ = ticker.tick() => {
                flush_reduce_batch(&mut batch, &store, &metrics).await;
            }
            output = reduce_rx.recv() => {
                let Some(output) = output else {
                    debug!(pending = batch.len(), "reduce queue closed, flushing last window");
                    flush_reduce_batch(&mut batch, &store, &metrics).await;
                    return;
                };
                batch.push(output);
            }
        }
    }
}

async fn flush_reduce_batch<S>(batch: &mut Vec<ReduceOutput>, store: &S, metrics: &PipelineMetrics)
where
    S: CountStore,
{
    if batch.is_empty() {
        return;
    }

    match store.upsert_counts(batch).await {
        Ok(report) => {
            metrics.records_persisted.inc_by(report.applied() as u64);
            metrics.records_rejected.inc_by(report.rejected.len() as u64);

            for rejected in &report.rejected {
                warn!(key = %rejected.key, reason = ?rejected.reason, "store rejected aggregate");
            }

            info!(
                inserted = report.inserted,
                updated = report.updated,
                "stored reduce outputs"
            );
        }
        Err(e) => {
            metrics.flush_failures.inc();
            error!(error = %e, records = batch.len(), "failed to store reduce outputs, window discarded");
        }
    }

    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use logcount_analysis::{AggregationDimension, GroupKey};
    use logcount_counts::{CountFilter, CountRecord, CountStoreError, UpsertReport};
    use logcount_source::ChannelSource;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    #[derive(Debug, thiserror::Error)]
    #[error("store unavailable")]
    struct Unavailable;

    impl CountStoreError for Unavailable {}

    /// Records every batch it is asked to merge.
    #[derive(Clone, Default)]
    struct RecordingStore {
        batches: Arc<Mutex<Vec<Vec<ReduceOutput>>>>,
        fail: bool,
    }

    impl RecordingStore {
        fn batches(&self) -> Vec<Vec<ReduceOutput>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CountStore for RecordingStore {
        type Error = Unavailable;

        async fn upsert_counts(
            &self,
            outputs: &[ReduceOutput],
        ) -> Result<UpsertReport, Self::Error> {
            self.batches.lock().unwrap().push(outputs.to_vec());
            if self.fail {
                return Err(Unavailable);
            }
            Ok(UpsertReport {
                inserted: outputs.len(),
                ..UpsertReport::default()
            })
        }

        async fn get(&self, _key: &GroupKey) -> Result<Option<CountRecord>, Self::Error> {
            Ok(None)
        }

        async fn query(&self, _filter: &CountFilter) -> Result<Vec<CountRecord>, Self::Error> {
            Ok(Vec::new())
        }

        async fn top(
            &self,
            _dimension: AggregationDimension,
            _limit: usize,
        ) -> Result<Vec<CountRecord>, Self::Error> {
            Ok(Vec::new())
        }
    }

    const WINDOW: Duration = Duration::from_secs(1);

    fn map_output(value: &str) -> MapOutput {
        MapOutput {
            server_id: "s1".to_string(),
            dimension: AggregationDimension::Endpoint,
            value: value.to_string(),
            count: 1,
        }
    }

    fn reduce_output(value: &str, count: u64) -> ReduceOutput {
        let now = Utc::now();
        ReduceOutput {
            server_id: "s1".to_string(),
            dimension: AggregationDimension::Endpoint,
            value: value.to_string(),
            count,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_or_cancel_abandons_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        assert!(send_or_cancel(&tx, 1, &token).await);

        // The queue is full, so only cancellation can end the handoff.
        token.cancel();
        assert!(!send_or_cancel(&tx, 2, &token).await);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_ingest_maps_lines_and_skips_bad_ones() {
        let metrics = PipelineMetrics::new().unwrap();
        let (line_tx, source) = ChannelSource::new(8);
        let (map_tx, mut map_rx) = mpsc::channel(8);

        line_tx
            .send(r#"s1: 10.0.0.1 - - [22/Apr/2025:13:37:42 +0000] "GET /home HTTP/1.1" 200 532 "-" "Mozilla/5.0""#.to_string())
            .await
            .unwrap();
        line_tx.send("garbage".to_string()).await.unwrap();
        drop(line_tx);

        ingest_lines(
            source,
            LogParser::default(),
            map_tx,
            CancellationToken::new(),
            metrics.clone(),
        )
        .await;

        let mut outputs = Vec::new();
        while let Some(output) = map_rx.recv().await {
            outputs.push(output);
        }

        assert_eq!(outputs.len(), 2);
        assert_eq!(metrics.lines_received.get(), 2);
        assert_eq!(metrics.parse_failures.get(), 1);
        assert_eq!(metrics.map_outputs.get(), 2);
        assert!(logs_contain("discarding unparseable line"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_stops_on_cancel() {
        let metrics = PipelineMetrics::new().unwrap();
        let (_line_tx, source) = ChannelSource::new(8);
        let (map_tx, _map_rx) = mpsc::channel(8);
        let token = CancellationToken::new();

        let handle = tokio::spawn(ingest_lines(
            source,
            LogParser::default(),
            map_tx,
            token.clone(),
            metrics,
        ));

        sleep(Duration::from_millis(10)).await;
        token.cancel();

        timeout(WINDOW, handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_flushes_each_window() {
        let metrics = PipelineMetrics::new().unwrap();
        let (map_tx, map_rx) = mpsc::channel(16);
        let (reduce_tx, mut reduce_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let handle = tokio::spawn(reduce_windows(
            map_rx,
            reduce_tx,
            WINDOW,
            token.clone(),
            metrics.clone(),
        ));

        map_tx.send(map_output("/home")).await.unwrap();
        map_tx.send(map_output("/home")).await.unwrap();
        map_tx.send(map_output("/login")).await.unwrap();

        let mut first_window = vec![
            reduce_rx.recv().await.unwrap(),
            reduce_rx.recv().await.unwrap(),
        ];
        first_window.sort_by(|a, b| a.value.cmp(&b.value));

        assert_eq!(first_window[0].value, "/home");
        assert_eq!(first_window[0].count, 2);
        assert_eq!(first_window[1].value, "/login");
        assert_eq!(first_window[1].count, 1);

        map_tx.send(map_output("/home")).await.unwrap();
        let second_window = reduce_rx.recv().await.unwrap();
        assert_eq!(second_window.count, 1);

        token.cancel();
        handle.await.unwrap();

        assert_eq!(metrics.reduce_outputs.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_drops_unflushed_batch_on_cancel() {
        let metrics = PipelineMetrics::new().unwrap();
        let (map_tx, map_rx) = mpsc::channel(16);
        let (reduce_tx, mut reduce_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let handle = tokio::spawn(reduce_windows(
            map_rx,
            reduce_tx,
            WINDOW,
            token.clone(),
            metrics.clone(),
        ));

        map_tx.send(map_output("/home")).await.unwrap();
        assert_eq!(reduce_rx.recv().await.unwrap().value, "/home");

        // Arrives after the last tick and before cancellation.
        map_tx.send(map_output("/late")).await.unwrap();
        map_tx.send(map_output("/late")).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        token.cancel();
        handle.await.unwrap();

        assert!(reduce_rx.recv().await.is_none());
        assert_eq!(metrics.dropped_on_cancel.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_counts_outputs_abandoned_mid_handoff() {
        let metrics = PipelineMetrics::new().unwrap();
        let (map_tx, map_rx) = mpsc::channel(16);
        // Room for one output; nothing reads it, so the second send blocks.
        let (reduce_tx, _reduce_rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let handle = tokio::spawn(reduce_windows(
            map_rx,
            reduce_tx,
            WINDOW,
            token.clone(),
            metrics.clone(),
        ));

        map_tx.send(map_output("/a")).await.unwrap();
        map_tx.send(map_output("/b")).await.unwrap();
        map_tx.send(map_output("/c")).await.unwrap();
        sleep(Duration::from_millis(1500)).await;

        token.cancel();
        handle.await.unwrap();

        assert_eq!(metrics.reduce_outputs.get(), 1);
        assert_eq!(metrics.reduce_outputs_abandoned.get(), 2);
        assert_eq!(metrics.dropped_on_cancel.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_flushes_when_input_closes() {
        let metrics = PipelineMetrics::new().unwrap();
        let (map_tx, map_rx) = mpsc::channel(16);
        let (reduce_tx, mut reduce_rx) = mpsc::channel(16);

        map_tx.send(map_output("/home")).await.unwrap();
        drop(map_tx);

        reduce_windows(
            map_rx,
            reduce_tx,
            WINDOW,
            CancellationToken::new(),
            metrics,
        )
        .await;

        assert_eq!(reduce_rx.recv().await.unwrap().value, "/home");
        assert!(reduce_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_flushes_accumulated_once_on_cancel() {
        let metrics = PipelineMetrics::new().unwrap();
        let store = RecordingStore::default();
        let (reduce_tx, reduce_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let handle = tokio::spawn(persist_windows(
            reduce_rx,
            store.clone(),
            WINDOW,
            token.clone(),
            metrics.clone(),
        ));

        reduce_tx.send(reduce_output("/a", 1)).await.unwrap();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.batches().len(), 1);

        reduce_tx.send(reduce_output("/b", 2)).await.unwrap();
        reduce_tx.send(reduce_output("/c", 3)).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        token.cancel();
        handle.await.unwrap();

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[1].iter().map(|o| o.value.as_str()).collect::<Vec<_>>(),
            vec!["/b", "/c"]
        );
        assert_eq!(metrics.records_persisted.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_skips_final_flush_when_nothing_pending() {
        let store = RecordingStore::default();
        let (reduce_tx, reduce_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let handle = tokio::spawn(persist_windows(
            reduce_rx,
            store.clone(),
            WINDOW,
            token.clone(),
            PipelineMetrics::new().unwrap(),
        ));

        reduce_tx.send(reduce_output("/a", 1)).await.unwrap();
        sleep(Duration::from_millis(1500)).await;

        token.cancel();
        handle.await.unwrap();

        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_persist_discards_window_on_store_failure() {
        let metrics = PipelineMetrics::new().unwrap();
        let store = RecordingStore {
            fail: true,
            ..RecordingStore::default()
        };
        let (reduce_tx, reduce_rx) = mpsc::channel(16);

        let handle = tokio::spawn(persist_windows(
            reduce_rx,
            store.clone(),
            WINDOW,
            CancellationToken::new(),
            metrics.clone(),
        ));

        reduce_tx.send(reduce_output("/a", 1)).await.unwrap();
        sleep(Duration::from_millis(1500)).await;

        reduce_tx.send(reduce_output("/b", 1)).await.unwrap();
        drop(reduce_tx);
        handle.await.unwrap();

        // Each window is tried exactly once and never retried.
        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].value, "/b");
        assert_eq!(metrics.flush_failures.get(), 2);
        assert_eq!(metrics.records_persisted.get(), 0);
        assert!(logs_contain("window discarded"));
    }
}
