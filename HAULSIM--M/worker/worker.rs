use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use haulsim_planning::{
    ErrorKind, EventType, LogisticsDetail, LogisticsEvent, LogisticsOrchestrator, LogisticsStatus,
    PlanningError, SweepReport, Transition,
};
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::{LogLevel, Telemetry};
use shared_queue::{QueueError, QueueService, ReceiveOptions, ReceivedMessage};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout},
};

use crate::notifier::{notification_payload, NotificationKind, Notifier};

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Handled and deleted.
    Processed,
    /// Body could not be parsed; deleted without processing.
    Poisoned,
    /// Handling failed; the detail status was classified and the message deleted.
    Failed,
    /// Handling hit a transient error below the receive cap; left for redelivery.
    Retained,
    /// Not yet due; sent again with the remaining delay and deleted.
    Deferred,
}

/// Running counters, readable while the worker runs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retained: AtomicU64,
    deferred: AtomicU64,
    poisoned: AtomicU64,
    notifications_failed: AtomicU64,
    receive_errors: AtomicU64,
    sweeps: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages handled successfully.
    pub processed: u64,
    /// Messages whose handling failed permanently.
    pub failed: u64,
    /// Messages left for redelivery after a transient error.
    pub retained: u64,
    /// Messages that arrived early and were queued again.
    pub deferred: u64,
    /// Unparseable messages dropped.
    pub poisoned: u64,
    /// Notifications that gave up.
    pub notifications_failed: u64,
    /// Failed receive calls.
    pub receive_errors: u64,
    /// Completed re-planning sweeps.
    pub sweeps: u64,
}

impl WorkerStats {
    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            poisoned: self.poisoned.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Processed => &self.processed,
            MessageOutcome::Poisoned => &self.poisoned,
            MessageOutcome::Failed => &self.failed,
            MessageOutcome::Retained => &self.retained,
            MessageOutcome::Deferred => &self.deferred,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Poll loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Receive parameters per poll.
    pub receive: ReceiveOptions,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
    /// Deliveries after which a transiently failing message is given up.
    pub max_receive_count: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            receive: ReceiveOptions::default(),
            error_backoff: Duration::from_secs(1),
            max_receive_count: 5,
        }
    }
}

/// Consumes collection and delivery events and drives the orchestrator.
pub struct QueueWorker {
    orchestrator: Arc<LogisticsOrchestrator>,
    queue: Arc<dyn QueueService>,
    notifier: Arc<dyn Notifier>,
    options: WorkerOptions,
    stats: WorkerStats,
    telemetry: Telemetry,
}

impl QueueWorker {
    /// Creates a worker bound to the orchestrator's queue names.
    #[must_use]
    pub fn new(
        orchestrator: Arc<LogisticsOrchestrator>,
        queue: Arc<dyn QueueService>,
        notifier: Arc<dyn Notifier>,
        options: WorkerOptions,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            notifier,
            options,
            stats: WorkerStats::default(),
            telemetry,
        }
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Orchestrator in use.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<LogisticsOrchestrator> {
        &self.orchestrator
    }

    /// Receives one batch from `queue_name` and handles it.
    pub async fn poll_once(
        self: &Arc<Self>,
        queue_name: &str,
    ) -> Result<Vec<MessageOutcome>, QueueError> {
        let messages = self.queue.receive(queue_name, self.options.receive).await?;
        Ok(self.process_batch(queue_name, messages).await)
    }

    /// Handles messages concurrently; a panic in one handler only loses that message.
    pub async fn process_batch(
        self: &Arc<Self>,
        queue_name: &str,
        messages: Vec<ReceivedMessage>,
    ) -> Vec<MessageOutcome> {
        if messages.is_empty() {
            return Vec::new();
        }
        let mut set = JoinSet::new();
        for message in messages {
            let worker = Arc::clone(self);
            let queue_name = queue_name.to_string();
            set.spawn(async move { worker.handle_message(&queue_name, &message).await });
        }
        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    self.stats.record(MessageOutcome::Retained);
                    self.log(
                        LogLevel::Error,
                        "worker.message.panicked",
                        json!({ "queue": queue_name, "error": err.to_string() }),
                    );
                    outcomes.push(MessageOutcome::Retained);
                }
            }
        }
        outcomes
    }

    /// Parses, dispatches and acknowledges one message.
    pub async fn handle_message(
        &self,
        queue_name: &str,
        message: &ReceivedMessage,
    ) -> MessageOutcome {
        let event = match LogisticsEvent::parse(&message.body) {
            Ok(event) => event,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    "worker.message.poison",
                    json!({
                        "queue": queue_name,
                        "message_id": message.message_id,
                        "error": err.to_string(),
                    }),
                );
                self.acknowledge(queue_name, message).await;
                self.stats.record(MessageOutcome::Poisoned);
                return MessageOutcome::Poisoned;
            }
        };

        let outcome = match self.dispatch(event).await {
            Ok(outcome) => {
                self.acknowledge(queue_name, message).await;
                outcome
            }
            Err(err)
                if err.kind() == ErrorKind::Transient
                    && message.receive_count < self.options.max_receive_count =>
            {
                self.log(
                    LogLevel::Warn,
                    "worker.message.retained",
                    json!({
                        "queue": queue_name,
                        "message_id": message.message_id,
                        "logistics_id": event.logistics_details_id,
                        "receive_count": message.receive_count,
                        "error": err.to_string(),
                    }),
                );
                MessageOutcome::Retained
            }
            Err(err) => {
                let status = self.classify_failure(event, &err).await;
                self.log(
                    LogLevel::Error,
                    "worker.message.failed",
                    json!({
                        "queue": queue_name,
                        "message_id": message.message_id,
                        "logistics_id": event.logistics_details_id,
                        "event_type": event.event_type,
                        "receive_count": message.receive_count,
                        "error": err.to_string(),
                        "status": status,
                    }),
                );
                self.acknowledge(queue_name, message).await;
                MessageOutcome::Failed
            }
        };
        self.stats.record(outcome);
        outcome
    }

    /// Runs the re-planning sweep once.
    pub async fn run_sweep(&self) -> Result<SweepReport, PlanningError> {
        let report = self.orchestrator.reattempt_recoverable().await?;
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        self.log(
            LogLevel::Info,
            "worker.sweep.finished",
            json!({
                "attempted": report.attempted,
                "recovered": report.recovered,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    /// Spawns both poll loops and the sweep loop on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (sweep_tx, sweep_rx) = mpsc::channel(1);
        let queues = self.orchestrator.queues().clone();
        let tasks = vec![
            tokio::spawn(Arc::clone(self).poll_loop(queues.pickup, stop_rx.clone())),
            tokio::spawn(Arc::clone(self).poll_loop(queues.delivery, stop_rx.clone())),
            tokio::spawn(Arc::clone(self).sweep_loop(sweep_rx, stop_rx)),
        ];
        self.log(LogLevel::Info, "worker.started", json!({ "tasks": tasks.len() }));
        WorkerHandle {
            stop: stop_tx,
            sweep: SweepTrigger { tx: sweep_tx },
            tasks,
            telemetry: self.telemetry.clone(),
        }
    }

    async fn dispatch(&self, event: LogisticsEvent) -> Result<MessageOutcome, PlanningError> {
        let id = event.logistics_details_id;
        if let Some(delay) = self.orchestrator.defer_until_due(event).await? {
            self.log(
                LogLevel::Debug,
                "worker.message.deferred",
                json!({ "logistics_id": id, "delay_secs": delay.as_secs() }),
            );
            return Ok(MessageOutcome::Deferred);
        }
        match event.event_type {
            EventType::CollectionScheduled => {
                let transition = self.orchestrator.mark_collected(id).await?;
                if transition.detail().status != LogisticsStatus::Collected {
                    return Ok(MessageOutcome::Processed);
                }
                let queued = self.orchestrator.schedule_delivery(id).await?;
                if matches!(transition, Transition::Applied(_)) {
                    self.notify(NotificationKind::Collection, &queued).await;
                }
            }
            EventType::DeliveryScheduled => {
                if let Transition::Applied(detail) = self.orchestrator.mark_delivered(id).await? {
                    self.notify(NotificationKind::Delivery, &detail).await;
                }
            }
        }
        Ok(MessageOutcome::Processed)
    }

    async fn classify_failure(&self, event: LogisticsEvent, err: &PlanningError) -> Value {
        if matches!(err, PlanningError::LogisticsNotFound(_)) {
            return Value::Null;
        }
        match self
            .orchestrator
            .fail_unless_recoverable(event.logistics_details_id)
            .await
        {
            Ok(status) => json!(status),
            Err(classify_err) => {
                self.log(
                    LogLevel::Warn,
                    "worker.message.classify_failed",
                    json!({
                        "logistics_id": event.logistics_details_id,
                        "error": classify_err.to_string(),
                    }),
                );
                Value::Null
            }
        }
    }

    async fn notify(&self, kind: NotificationKind, detail: &LogisticsDetail) {
        if let Err(err) = self.notifier.notify(kind, notification_payload(detail)).await {
            self.stats.notifications_failed.fetch_add(1, Ordering::Relaxed);
            self.log(
                LogLevel::Error,
                "worker.notify.failed",
                json!({ "kind": kind, "logistics_id": detail.id, "error": err.to_string() }),
            );
        }
    }

    async fn acknowledge(&self, queue_name: &str, message: &ReceivedMessage) {
        if let Err(err) = self.queue.delete(queue_name, &message.receipt_handle).await {
            self.log(
                LogLevel::Warn,
                "worker.message.delete_failed",
                json!({
                    "queue": queue_name,
                    "message_id": message.message_id,
                    "error": err.to_string(),
                }),
            );
        }
    }

    async fn poll_loop(self: Arc<Self>, queue_name: String, mut stop: watch::Receiver<bool>) {
        self.log(LogLevel::Debug, "worker.poll.started", json!({ "queue": queue_name }));
        while !*stop.borrow() {
            let received = tokio::select! {
                _ = stop.changed() => break,
                received = self.queue.receive(&queue_name, self.options.receive) => received,
            };
            match received {
                Ok(messages) => {
                    self.process_batch(&queue_name, messages).await;
                }
                Err(err) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    self.log(
                        LogLevel::Warn,
                        "worker.poll.receive_failed",
                        json!({ "queue": queue_name, "error": err.to_string() }),
                    );
                    tokio::select! {
                        _ = stop.changed() => break,
                        () = sleep(self.options.error_backoff) => {}
                    }
                }
            }
        }
        self.log(LogLevel::Debug, "worker.poll.stopped", json!({ "queue": queue_name }));
    }

    async fn sweep_loop(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<()>,
        mut stop: watch::Receiver<bool>,
    ) {
        while !*stop.borrow() {
            tokio::select! {
                _ = stop.changed() => break,
                trigger = triggers.recv() => {
                    if trigger.is_none() {
                        break;
                    }
                    if let Err(err) = self.run_sweep().await {
                        self.log(
                            LogLevel::Error,
                            "worker.sweep.failed",
                            json!({ "error": err.to_string() }),
                        );
                    }
                }
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        let _ = self.telemetry.log(level, message, metadata);
    }
}

/// Requests a sweep without blocking; concurrent requests coalesce.
#[derive(Debug, Clone)]
pub struct SweepTrigger {
    tx: mpsc::Sender<()>,
}

impl SweepTrigger {
    /// Returns `false` when a sweep is already pending or the worker stopped.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Running worker tasks.
pub struct WorkerHandle {
    stop: watch::Sender<bool>,
    sweep: SweepTrigger,
    tasks: Vec<JoinHandle<()>>,
    telemetry: Telemetry,
}

impl WorkerHandle {
    /// Trigger feeding the sweep loop.
    #[must_use]
    pub fn sweep_trigger(&self) -> SweepTrigger {
        self.sweep.clone()
    }

    /// Stops polling and waits up to `grace` for in-flight batches.
    ///
    /// Returns `false` when tasks had to be aborted.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.stop.send(true);
        let drained = timeout(grace, async {
            for task in &mut self.tasks {
                let _ = task.await;
            }
        })
        .await
        .is_ok();
        if !drained {
            for task in &self.tasks {
                task.abort();
            }
        }
        let level = if drained { LogLevel::Info } else { LogLevel::Warn };
        let _ = self.telemetry.log(
            level,
            "worker.stopped",
            json!({
                "drained": drained,
                "grace_ms": u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            }),
        );
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_each_outcome() {
        let stats = WorkerStats::default();
        stats.record(MessageOutcome::Processed);
        stats.record(MessageOutcome::Processed);
        stats.record(MessageOutcome::Poisoned);
        stats.record(MessageOutcome::Retained);
        stats.record(MessageOutcome::Deferred);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.poisoned, 1);
        assert_eq!(snapshot.retained, 1);
        assert_eq!(snapshot.deferred, 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn trigger_coalesces_pending_requests() {
        let (tx, mut rx) = mpsc::channel(1);
        let trigger = SweepTrigger { tx };
        assert!(trigger.trigger());
        assert!(!trigger.trigger());
        rx.recv().await.unwrap();
        assert!(trigger.trigger());
        drop(rx);
        assert!(!trigger.trigger());
    }
}
