//! Trigger loop: read once, project per sink, commit per sink.
//!
//! Each trigger reads a single shared batch starting at the lowest offset of
//! any sink due for work. Every sink then takes the view of that batch after
//! its own offset, projects it and commits it, followed by its offset. Sink
//! work runs on spawned tasks bounded by the worker pool; a failing sink
//! never blocks the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{BackoffGate, RetryPolicy};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use tierforge_core::{
    ArcDynSink, Batch, CommitResult, EngineError, EngineResult, Offset,
    OffsetTracker, Row, SinkError,
};
use tokio::sync::{Semaphore, watch};
use tokio::time::{MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reader::BatchReader;
use crate::status::{EngineState, EngineStatus, SinkHealth, SinkStatus};

/// Pause between empty triggers when the interval is zero.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// One registered sink and its progress.
pub struct SinkSlot {
    sink: ArcDynSink,
    tracker: OffsetTracker,
    offset: Offset,
    opened: bool,
    gate: BackoffGate,
    failed: bool,
    last_error: Option<String>,
    rows_written: u64,
}

impl SinkSlot {
    pub fn new(sink: ArcDynSink, tracker: OffsetTracker, policy: RetryPolicy) -> Self {
        Self {
            sink,
            tracker,
            offset: Offset::ZERO,
            opened: false,
            gate: BackoffGate::new(policy),
            failed: false,
            last_error: None,
            rows_written: 0,
        }
    }

    fn id(&self) -> &str {
        self.sink.id()
    }

    fn due(&self, now: Instant) -> bool {
        !self.failed && self.gate.ready(now)
    }

    fn status(&self) -> SinkStatus {
        let health = if self.failed {
            SinkHealth::Failed
        } else if self.gate.failures() > 0 {
            SinkHealth::Backoff
        } else {
            SinkHealth::Active
        };
        SinkStatus {
            id: self.id().to_string(),
            target: self.sink.target().to_string(),
            offset: self.offset,
            health,
            consecutive_failures: self.gate.failures(),
            last_error: self.last_error.clone(),
            rows_written: self.rows_written,
        }
    }
}

enum SinkOutcome {
    Committed(CommitResult),
    /// The sink committed its output but its offset could not be recorded.
    OffsetLost(EngineError),
    Failed(SinkError),
    Panicked(String),
}

pub struct Coordinator {
    name: Arc<str>,
    reader: BatchReader,
    slots: Vec<SinkSlot>,
    trigger_interval: Duration,
    pool: Arc<Semaphore>,
    source_gate: BackoffGate,
    status: watch::Sender<EngineStatus>,
}

impl Coordinator {
    pub fn new(
        name: impl Into<Arc<str>>,
        reader: BatchReader,
        slots: Vec<SinkSlot>,
        trigger_interval: Duration,
        worker_pool_size: usize,
        source_policy: RetryPolicy,
    ) -> Self {
        let name: Arc<str> = name.into();
        let status = EngineStatus::new(&*name, reader.source());
        let (status, _) = watch::channel(status);
        let coordinator = Self {
            name,
            reader,
            slots,
            trigger_interval,
            pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            source_gate: BackoffGate::new(source_policy),
            status,
        };
        coordinator.publish(EngineState::Idle);
        coordinator
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    fn publish(&self, state: EngineState) {
        let sinks = self.slots.iter().map(SinkSlot::status).collect();
        self.status.send_modify(|s| {
            s.state = state;
            s.sinks = sinks;
        });
    }

    fn active_sinks(&self) -> usize {
        self.slots.iter().filter(|s| !s.failed).count()
    }

    /// When the source or every active sink is in backoff, the earliest
    /// instant at which a trigger could do work again.
    fn blocked_until(&self, now: Instant) -> Option<Instant> {
        let pending = |gate: &BackoffGate| gate.retry_at().filter(|&at| at > now);
        if let Some(at) = pending(&self.source_gate) {
            return Some(at);
        }
        let mut earliest: Option<Instant> = None;
        for slot in self.slots.iter().filter(|s| !s.failed) {
            let at = pending(&slot.gate)?;
            earliest = Some(earliest.map_or(at, |e| e.min(at)));
        }
        earliest
    }

    /// Run triggers until `cancel` fires or a fatal error occurs.
    ///
    /// Commits already in flight when `cancel` fires run to completion.
    pub async fn run(mut self, cancel: CancellationToken) -> EngineResult<()> {
        let res = self.run_inner(&cancel).await;

        let error = res.as_ref().err().map(ToString::to_string);
        let sinks = self.slots.iter().map(SinkSlot::status).collect();
        self.status.send_modify(|s| {
            s.state = EngineState::Stopped;
            s.sinks = sinks;
            s.error = error;
        });

        match &res {
            Ok(()) => info!(engine = %self.name, "engine stopped"),
            Err(e) => error!(engine = %self.name, error = %e, kind = e.kind(), "engine stopped on error"),
        }
        res
    }

    async fn run_inner(&mut self, cancel: &CancellationToken) -> EngineResult<()> {
        self.load_offsets().await?;

        let mut ticker = (!self.trigger_interval.is_zero()).then(|| {
            let mut t = interval(self.trigger_interval);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        let mut progressed = true;
        loop {
            match ticker.as_mut() {
                Some(t) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = t.tick() => {}
                    }
                }
                None if progressed => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    tokio::task::yield_now().await;
                }
                None => {
                    let now = Instant::now();
                    let wake = self.blocked_until(now).unwrap_or(now + IDLE_POLL);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = sleep_until(wake.into()) => {}
                    }
                }
            }

            progressed = self.trigger(cancel).await?;

            if self.active_sinks() == 0 {
                return Err(EngineError::NoActiveSinks);
            }
            self.publish(EngineState::AwaitingInterval);
        }
    }

    async fn load_offsets(&mut self) -> EngineResult<()> {
        let source = self.reader.source().to_string();
        for slot in &mut self.slots {
            slot.offset = slot.tracker.get(&source, slot.sink.id()).await?;
            info!(engine = %self.name, sink = slot.sink.id(), offset = %slot.offset, "resuming sink");
            gauge!("tierforge_sink_offset", "engine" => self.name.to_string(), "sink" => slot.sink.id().to_string())
                .set(slot.offset.0 as f64);
        }
        Ok(())
    }

    async fn open_due(&mut self, due: &[usize]) -> Vec<usize> {
        let mut ready = Vec::with_capacity(due.len());
        for &i in due {
            if !self.slots[i].opened {
                let sink = self.slots[i].sink.clone();
                match sink.open().await {
                    Ok(()) => self.slots[i].opened = true,
                    Err(e) => {
                        self.sink_failure(i, e);
                        continue;
                    }
                }
            }
            ready.push(i);
        }
        ready
    }

    /// One trigger cycle. Only offset persistence failures are returned;
    /// every other failure is absorbed into the reader or sink state.
    ///
    /// `Ok(false)` means no sink had new rows to work on.
    async fn trigger(&mut self, cancel: &CancellationToken) -> EngineResult<bool> {
        let engine = self.name.to_string();
        let now = Instant::now();
        self.status.send_modify(|s| s.triggers += 1);
        self.publish(EngineState::Triggered);

        if !self.source_gate.ready(now) {
            debug!(engine = %engine, "source in backoff, skipping trigger");
            return Ok(false);
        }
        let due: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].due(now))
            .collect();
        let due = self.open_due(&due).await;
        let Some(since) = due.iter().map(|&i| self.slots[i].offset).min() else {
            return Ok(false);
        };

        // read
        self.publish(EngineState::Reading);
        let started = Instant::now();
        let batch = match self.reader.read(since, cancel).await {
            Ok(Some(batch)) => {
                self.source_gate.record_success();
                batch
            }
            Ok(None) => return Ok(false),
            Err(e) => {
                let wait = self.source_gate.record_failure();
                warn!(
                    engine = %engine,
                    error = %e,
                    failures = self.source_gate.failures(),
                    backoff_ms = wait.as_millis() as u64,
                    "source read failed"
                );
                counter!("tierforge_triggers_total", "engine" => engine.clone(), "outcome" => "source_unavailable")
                    .increment(1);
                return Ok(false);
            }
        };
        histogram!("tierforge_stage_latency_seconds", "engine" => engine.clone(), "stage" => "read")
            .record(started.elapsed().as_secs_f64());
        counter!("tierforge_source_rows_total", "engine" => engine.clone())
            .increment(batch.row_count() as u64);

        let work: Vec<(usize, Batch)> = due
            .into_iter()
            .filter(|&i| self.slots[i].offset < batch.end())
            .map(|i| (i, batch.after(self.slots[i].offset)))
            .collect();
        if work.is_empty() {
            counter!("tierforge_triggers_total", "engine" => engine, "outcome" => "idle").increment(1);
            return Ok(false);
        }

        // project
        self.publish(EngineState::Projecting);
        let started = Instant::now();
        let projected = self.project(work).await;
        histogram!("tierforge_stage_latency_seconds", "engine" => engine.clone(), "stage" => "project")
            .record(started.elapsed().as_secs_f64());

        let mut ready = Vec::with_capacity(projected.len());
        for (i, res) in projected {
            match res {
                Ok((view, rows)) => ready.push((i, view, rows)),
                Err(e) => self.sink_failure(i, e),
            }
        }

        if cancel.is_cancelled() {
            info!(engine = %engine, "stop requested, skipping commit phase");
            return Ok(true);
        }

        // commit
        self.publish(EngineState::Committing);
        let started = Instant::now();
        let outcomes = self.commit(ready).await;
        histogram!("tierforge_stage_latency_seconds", "engine" => engine.clone(), "stage" => "commit")
            .record(started.elapsed().as_secs_f64());

        let mut fatal = None;
        for (i, outcome) in outcomes {
            match outcome {
                SinkOutcome::Committed(result) => self.sink_committed(i, result),
                SinkOutcome::Failed(e) => self.sink_failure(i, e),
                SinkOutcome::OffsetLost(e) => {
                    error!(engine = %engine, sink = self.slots[i].id(), error = %e, "offset persistence failed");
                    self.slots[i].last_error = Some(e.to_string());
                    fatal.get_or_insert(e);
                }
                SinkOutcome::Panicked(msg) => {
                    error!(engine = %engine, sink = self.slots[i].id(), panic = %msg, "sink task panicked");
                    self.mark_failed(i, format!("sink task panicked: {msg}"));
                }
            }
        }

        let outcome = if fatal.is_some() { "fatal" } else { "ok" };
        counter!("tierforge_triggers_total", "engine" => engine, "outcome" => outcome).increment(1);
        match fatal {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Reconcile and project every view concurrently.
    async fn project(
        &self,
        work: Vec<(usize, Batch)>,
    ) -> Vec<(usize, Result<(Batch, Vec<Row>), SinkError>)> {
        let handles: Vec<_> = work
            .into_iter()
            .map(|(i, view)| {
                let sink = self.slots[i].sink.clone();
                let pool = self.pool.clone();
                let handle = tokio::spawn(async move {
                    let _permit = pool.acquire_owned().await;
                    let view = sink.reconcile(view).await?;
                    let rows = sink.apply(&view)?;
                    Ok::<_, SinkError>((view, rows))
                });
                (i, handle)
            })
            .collect();

        let (idx, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        idx.into_iter()
            .zip(join_all(handles).await)
            .map(|(i, joined)| {
                let res = joined.unwrap_or_else(|e| {
                    Err(SinkError::Store(tierforge_core::StoreError::Other(
                        anyhow::anyhow!("projection task failed: {e}"),
                    )))
                });
                (i, res)
            })
            .collect()
    }

    /// Commit each sink's output and then its offset. Always waits for
    /// every spawned commit.
    async fn commit(
        &self,
        ready: Vec<(usize, Batch, Vec<Row>)>,
    ) -> Vec<(usize, SinkOutcome)> {
        let source = self.reader.source().to_string();
        let handles: Vec<_> = ready
            .into_iter()
            .map(|(i, view, rows)| {
                let sink = self.slots[i].sink.clone();
                let tracker = self.slots[i].tracker.clone();
                let pool = self.pool.clone();
                let source = source.clone();
                let engine = self.name.to_string();
                let handle = tokio::spawn(async move {
                    let _permit = pool.acquire_owned().await;
                    let result = match sink.commit(&view, rows).await {
                        Ok(r) => r,
                        Err(e) => return SinkOutcome::Failed(e),
                    };
                    let started = Instant::now();
                    if let Err(e) = tracker.commit(&source, sink.id(), result.end).await {
                        return SinkOutcome::OffsetLost(e);
                    }
                    histogram!("tierforge_stage_latency_seconds", "engine" => engine, "stage" => "checkpoint")
                        .record(started.elapsed().as_secs_f64());
                    SinkOutcome::Committed(result)
                });
                (i, handle)
            })
            .collect();

        let (idx, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        idx.into_iter()
            .zip(join_all(handles).await)
            .map(|(i, joined)| {
                (i, joined.unwrap_or_else(|e| SinkOutcome::Panicked(e.to_string())))
            })
            .collect()
    }

    fn sink_committed(&mut self, i: usize, result: CommitResult) {
        let engine = self.name.to_string();
        let slot = &mut self.slots[i];
        let sink = slot.id().to_string();

        debug_assert!(result.end >= slot.offset);
        slot.offset = result.end;
        slot.gate.record_success();
        slot.last_error = None;
        if !result.deduplicated {
            slot.rows_written += result.rows as u64;
            counter!("tierforge_sink_rows_total", "engine" => engine.clone(), "sink" => sink.clone())
                .increment(result.rows as u64);
        }
        counter!("tierforge_offset_commits_total", "engine" => engine.clone(), "sink" => sink.clone())
            .increment(1);
        gauge!("tierforge_sink_offset", "engine" => engine, "sink" => sink.clone())
            .set(result.end.0 as f64);

        debug!(
            sink = %sink,
            offset = %result.end,
            rows = result.rows,
            deduplicated = result.deduplicated,
            "sink committed"
        );
    }

    fn sink_failure(&mut self, i: usize, err: SinkError) {
        if matches!(err, SinkError::Cancelled) {
            debug!(sink = self.slots[i].id(), "commit abandoned on stop");
            return;
        }
        let engine = self.name.to_string();
        let sink = self.slots[i].id().to_string();
        counter!("tierforge_sink_errors_total", "engine" => engine.clone(), "sink" => sink.clone(), "kind" => err.kind())
            .increment(1);

        let e = EngineError::from_sink(&sink, err);
        if e.is_transient() {
            let slot = &mut self.slots[i];
            let wait = slot.gate.record_failure();
            slot.last_error = Some(e.to_string());
            warn!(
                engine = %engine,
                sink = %sink,
                error = %e,
                failures = slot.gate.failures(),
                backoff_ms = wait.as_millis() as u64,
                "sink failed, will retry"
            );
        } else {
            error!(engine = %engine, sink = %sink, error = %e, "sink failed permanently");
            self.mark_failed(i, e.to_string());
        }
    }

    fn mark_failed(&mut self, i: usize, reason: String) {
        let slot = &mut self.slots[i];
        slot.failed = true;
        slot.last_error = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use checkpoints::MemCheckpointStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tables::MemTableStore;
    use tierforge_core::{
        ArcDynTableStore, Field, FieldType, PartitionSpec, Schema, SinkResult,
        TableStore,
    };

    /// Sink that fails its first `fail_first` commits with a transient error.
    struct FlakySink {
        id: String,
        store: ArcDynTableStore,
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl tierforge_core::Sink for FlakySink {
        fn id(&self) -> &str {
            &self.id
        }

        fn target(&self) -> &str {
            "silver"
        }

        async fn open(&self) -> SinkResult<()> {
            Ok(())
        }

        async fn reconcile(&self, batch: Batch) -> SinkResult<Batch> {
            Ok(batch)
        }

        fn apply(&self, batch: &Batch) -> SinkResult<Vec<Row>> {
            Ok(batch.rows().cloned().collect())
        }

        async fn commit(
            &self,
            batch: &Batch,
            rows: Vec<Row>,
        ) -> SinkResult<CommitResult> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(SinkError::Store(
                    tierforge_core::StoreError::unavailable("flaky"),
                ));
            }
            let out = self.store.append_rows("silver", rows, None).await?;
            Ok(CommitResult {
                commit: out.commit,
                rows: out.rows,
                deduplicated: false,
                end: batch.end(),
            })
        }
    }

    async fn store() -> ArcDynTableStore {
        let store = MemTableStore::new();
        let schema =
            Schema::new(vec![Field::required(1, "id", FieldType::Integer)])
                .unwrap();
        for t in ["bronze", "silver"] {
            store
                .create_table(t, schema.clone(), PartitionSpec::unpartitioned())
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), Duration::from_millis(1), None)
    }

    #[tokio::test]
    async fn transient_sink_failure_retries_on_later_trigger() {
        let store = store().await;
        store
            .append_rows("bronze", vec![Row::new().with("id", 1)], None)
            .await
            .unwrap();

        let sink = Arc::new(FlakySink {
            id: "flaky".into(),
            store: store.clone(),
            fail_first: 2,
            calls: AtomicU32::new(0),
        });
        let tracker =
            OffsetTracker::new(Arc::new(MemCheckpointStore::new().unwrap()));
        let coordinator = Coordinator::new(
            "test",
            BatchReader::new(store.clone(), "bronze", None, Duration::from_secs(1)),
            vec![SinkSlot::new(sink.clone(), tracker.clone(), quick())],
            Duration::from_millis(5),
            2,
            quick(),
        );
        let mut status = coordinator.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        status
            .wait_for(|s| s.sink("flaky").is_some_and(|s| s.offset == Offset(1)))
            .await
            .unwrap();
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.get("bronze", "flaky").await.unwrap(), Offset(1));
        assert_eq!(store.scan("silver").await.unwrap().len(), 1);

        let last = status.borrow().clone();
        assert_eq!(last.state, EngineState::Stopped);
        assert_eq!(last.sinks[0].consecutive_failures, 0);
        assert_eq!(last.sinks[0].health, SinkHealth::Active);
    }

    fn slot(store: &ArcDynTableStore, id: &str) -> (Arc<FlakySink>, OffsetTracker) {
        let sink = Arc::new(FlakySink {
            id: id.into(),
            store: store.clone(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let tracker =
            OffsetTracker::new(Arc::new(MemCheckpointStore::new().unwrap()));
        (sink, tracker)
    }

    #[tokio::test]
    async fn zero_interval_sleeps_through_source_backoff() {
        let store = store().await;
        let (sink, tracker) = slot(&store, "s");
        let backoff = RetryPolicy::fixed(
            Duration::from_millis(200),
            Duration::from_millis(200),
            None,
        );
        let coordinator = Coordinator::new(
            "test",
            BatchReader::new(store, "missing", None, Duration::from_secs(1)),
            vec![SinkSlot::new(sink, tracker, quick())],
            Duration::ZERO,
            1,
            backoff,
        );
        let status = coordinator.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let triggers = status.borrow().triggers;
        assert!((1..=3).contains(&triggers), "{triggers} triggers in 300ms");
    }

    #[tokio::test]
    async fn zero_interval_keeps_draining_new_rows() {
        let store = store().await;
        let (sink, tracker) = slot(&store, "s");
        let coordinator = Coordinator::new(
            "test",
            BatchReader::new(store.clone(), "bronze", None, Duration::from_secs(1)),
            vec![SinkSlot::new(sink, tracker.clone(), quick())],
            Duration::ZERO,
            1,
            quick(),
        );
        let mut status = coordinator.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));

        for id in 1i64..=3 {
            store
                .append_rows("bronze", vec![Row::new().with("id", id)], None)
                .await
                .unwrap();
            let want = Offset(id as u64);
            tokio::time::timeout(
                Duration::from_secs(5),
                status.wait_for(|s| s.sink("s").is_some_and(|s| s.offset == want)),
            )
            .await
            .unwrap()
            .unwrap();
        }
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(tracker.get("bronze", "s").await.unwrap(), Offset(3));
        assert_eq!(store.scan("silver").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stop_before_first_trigger_is_clean() {
        let store = store().await;
        let tracker =
            OffsetTracker::new(Arc::new(MemCheckpointStore::new().unwrap()));
        let sink = Arc::new(FlakySink {
            id: "s".into(),
            store: store.clone(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let coordinator = Coordinator::new(
            "test",
            BatchReader::new(store, "bronze", None, Duration::from_secs(1)),
            vec![SinkSlot::new(sink, tracker, quick())],
            Duration::from_secs(60),
            1,
            quick(),
        );
        let status = coordinator.subscribe();
        let cancel = CancellationToken::new();
        cancel.cancel();
        coordinator.run(cancel).await.unwrap();
        assert_eq!(status.borrow().state, EngineState::Stopped);
        assert_eq!(status.borrow().error, None);
    }
}
