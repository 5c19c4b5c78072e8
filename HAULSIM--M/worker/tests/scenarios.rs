use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use haulsim_clock::ManualTimeSource;
use haulsim_planning::{
    LogisticsEvent, LogisticsOrchestrator, LogisticsStatus, MemoryStore, Pickup, PickupStatus,
    PlanningError, PlanningSettings, QueueNames, Repositories, ServiceKind, Truck, TruckId,
    TruckRepository,
};
use haulsim_worker::{
    Haulsim, HaulsimConfig, LoopbackNotifier, MessageOutcome, NotificationKind, QueueWorker,
    WorkerOptions,
};
use shared_logging::Telemetry;
use shared_queue::{MemoryQueue, QueueService, ReceiveOptions};

const PICKUPS: &str = "pickup-ready";
const DELIVERIES: &str = "delivery-ready";

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

struct Rig {
    haulsim: Haulsim,
    source: Arc<ManualTimeSource>,
    queue: MemoryQueue,
    notifier: LoopbackNotifier,
}

fn rig_with(trucks: Vec<Truck>, notifier: LoopbackNotifier) -> Rig {
    let mut config = HaulsimConfig {
        fleet: trucks,
        ..HaulsimConfig::default()
    };
    config.planning.horizon_days = 3;
    let source = Arc::new(ManualTimeSource::new(at("2030-01-01T12:00:00Z")));
    let queue = MemoryQueue::new();
    let haulsim = Haulsim::assemble(
        config,
        source.clone(),
        Arc::new(queue.clone()),
        Arc::new(notifier.clone()),
        Telemetry::disabled(),
    );
    haulsim.clock().set_time(at("2025-01-01T00:00:00Z"));
    for id in 1..=4 {
        haulsim.store().upsert_pickup(Pickup {
            id,
            quantity: 5,
            status: PickupStatus::PaidToLogisticsCo,
        });
    }
    Rig {
        haulsim,
        source,
        queue,
        notifier,
    }
}

fn rig(trucks: Vec<Truck>) -> Rig {
    rig_with(trucks, LoopbackNotifier::new())
}

async fn plan(rig: &Rig, pickup: i64) -> i64 {
    rig.haulsim
        .orchestrator()
        .plan_after_payment(pickup, 5, at("2025-01-01T00:00:00Z"))
        .await
        .unwrap()
        .id
}

fn status(rig: &Rig, id: i64) -> LogisticsStatus {
    rig.haulsim.store().logistics(id).unwrap().status
}

async fn elapse(rig: &Rig, secs: u64) {
    rig.source.advance_ms(i64::try_from(secs * 1_000).unwrap());
    tokio::time::advance(Duration::from_secs(secs)).await;
}

struct FleetDown(Arc<MemoryStore>);

#[async_trait]
impl TruckRepository for FleetDown {
    async fn find_all(&self) -> anyhow::Result<Vec<Truck>> {
        TruckRepository::find_all(self.0.as_ref()).await
    }

    async fn find_by_id(&self, _id: TruckId) -> anyhow::Result<Option<Truck>> {
        Err(anyhow!("fleet store down"))
    }

    async fn active_allocations_for_truck_on_day(
        &self,
        truck_id: TruckId,
        day: NaiveDate,
        kind: ServiceKind,
    ) -> anyhow::Result<u32> {
        self.0
            .active_allocations_for_truck_on_day(truck_id, day, kind)
            .await
    }
}

#[tokio::test(start_paused = true)]
async fn paid_pickup_is_collected_then_delivered() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = plan(&rig, 1).await;
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForCollection);
    let worker = rig.haulsim.worker();

    let outcomes = worker.poll_once(PICKUPS).await.unwrap();
    assert_eq!(outcomes, vec![MessageOutcome::Processed]);
    assert_eq!(rig.queue.depth(PICKUPS), 0);
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForDelivery);
    assert_eq!(
        rig.haulsim.store().pickup(1).unwrap().status,
        PickupStatus::Collected
    );
    let delivery = rig.queue.snapshot(DELIVERIES);
    assert_eq!(delivery.len(), 1);
    assert!(delivery[0].delay > Duration::from_secs(100));
    assert!(delivery[0].delay <= Duration::from_secs(120));

    elapse(&rig, 121).await;
    let outcomes = worker.poll_once(DELIVERIES).await.unwrap();
    assert_eq!(outcomes, vec![MessageOutcome::Processed]);
    assert_eq!(status(&rig, id), LogisticsStatus::Delivered);
    assert_eq!(
        rig.haulsim.store().pickup(1).unwrap().status,
        PickupStatus::Delivered
    );
    assert_eq!(rig.queue.depth(DELIVERIES), 0);
    assert_eq!(rig.notifier.count(NotificationKind::Collection), 1);
    assert_eq!(rig.notifier.count(NotificationKind::Delivery), 1);
    let (_, payload) = rig.notifier.sent().pop().unwrap();
    assert_eq!(payload["logisticsDetailsId"], id);
    assert_eq!(payload["status"], "DELIVERED");
    assert_eq!(worker.stats().snapshot().processed, 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_dropped_without_domain_calls() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = plan(&rig, 1).await;
    rig.queue.send(PICKUPS, "not json", Duration::ZERO).await.unwrap();
    rig.queue
        .send(PICKUPS, r#"{"eventType":"COLLECTION_SCHEDULED"}"#, Duration::ZERO)
        .await
        .unwrap();
    let worker = rig.haulsim.worker();

    let messages = rig
        .queue
        .receive(PICKUPS, ReceiveOptions::default())
        .await
        .unwrap();
    let poison: Vec<_> = messages
        .into_iter()
        .filter(|message| LogisticsEvent::parse(&message.body).is_err())
        .collect();
    assert_eq!(poison.len(), 2);
    let outcomes = worker.process_batch(PICKUPS, poison).await;
    assert_eq!(
        outcomes,
        vec![MessageOutcome::Poisoned, MessageOutcome::Poisoned]
    );
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForCollection);
    assert_eq!(rig.queue.depth(PICKUPS), 1);
    assert_eq!(worker.stats().snapshot().poisoned, 2);
    assert_eq!(worker.stats().snapshot().processed, 0);
}

#[tokio::test(start_paused = true)]
async fn redelivered_collection_is_idempotent() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = plan(&rig, 1).await;
    let body = rig.queue.snapshot(PICKUPS)[0].body.clone();
    let worker = rig.haulsim.worker();
    assert_eq!(
        worker.poll_once(PICKUPS).await.unwrap(),
        vec![MessageOutcome::Processed]
    );

    rig.queue.send(PICKUPS, &body, Duration::ZERO).await.unwrap();
    assert_eq!(
        worker.poll_once(PICKUPS).await.unwrap(),
        vec![MessageOutcome::Processed]
    );
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForDelivery);
    assert_eq!(rig.queue.depth(DELIVERIES), 1);
    assert_eq!(rig.notifier.count(NotificationKind::Collection), 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_truck_at_collection_moves_to_another_truck() {
    let rig = rig(vec![
        Truck::new(1, 1_000, 25, 25),
        Truck::new(2, 1_000, 25, 25),
    ]);
    let id = plan(&rig, 1).await;
    let first = rig.haulsim.store().allocation_history(id);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].truck_id, 1);
    rig.haulsim.store().set_truck_available(1, false);

    let outcomes = rig.haulsim.worker().poll_once(PICKUPS).await.unwrap();
    assert_eq!(outcomes, vec![MessageOutcome::Processed]);
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForCollection);
    let history = rig.haulsim.store().allocation_history(id);
    let active: Vec<_> = history.iter().filter(|a| a.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].truck_id, 2);
    assert_eq!(rig.queue.depth(PICKUPS), 1);
    assert_eq!(rig.queue.depth(DELIVERIES), 0);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_event_forces_failure() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = plan(&rig, 1).await;
    let body = LogisticsEvent::delivery(id).to_body().unwrap();
    rig.queue.send(DELIVERIES, &body, Duration::ZERO).await.unwrap();

    let outcomes = rig.haulsim.worker().poll_once(DELIVERIES).await.unwrap();
    assert_eq!(outcomes, vec![MessageOutcome::Failed]);
    assert_eq!(status(&rig, id), LogisticsStatus::Failed);
    assert_eq!(
        rig.haulsim.store().pickup(1).unwrap().status,
        PickupStatus::Failed
    );
    assert_eq!(rig.queue.depth(DELIVERIES), 0);
    assert_eq!(rig.haulsim.worker().stats().snapshot().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn recoverable_status_survives_processing_failure() {
    let rig = rig(vec![Truck::new(1, 1_000, 1, 1)]);
    for pickup in 1..=3 {
        plan(&rig, pickup).await;
    }
    let err = rig
        .haulsim
        .orchestrator()
        .plan_after_payment(4, 5, at("2025-01-01T00:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::CapacityExhausted { .. }));
    let stuck = rig
        .haulsim
        .orchestrator()
        .logistics_for_pickup(4)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stuck.status, LogisticsStatus::PendingReplanning);

    let body = LogisticsEvent::collection(stuck.id).to_body().unwrap();
    rig.queue.send(PICKUPS, &body, Duration::ZERO).await.unwrap();
    let messages = rig
        .queue
        .receive(PICKUPS, ReceiveOptions::default())
        .await
        .unwrap();
    let ours: Vec<_> = messages
        .into_iter()
        .filter(|message| message.body == body)
        .collect();
    let outcomes = rig.haulsim.worker().process_batch(PICKUPS, ours).await;
    assert_eq!(outcomes, vec![MessageOutcome::Failed]);
    assert_eq!(status(&rig, stuck.id), LogisticsStatus::PendingReplanning);
}

#[tokio::test(start_paused = true)]
async fn failed_notification_does_not_fail_delivery() {
    let rig = rig_with(
        vec![Truck::new(1, 1_000, 25, 25)],
        LoopbackNotifier::failing(503),
    );
    let id = plan(&rig, 1).await;
    let worker = rig.haulsim.worker();
    worker.poll_once(PICKUPS).await.unwrap();
    elapse(&rig, 121).await;
    let outcomes = worker.poll_once(DELIVERIES).await.unwrap();
    assert_eq!(outcomes, vec![MessageOutcome::Processed]);
    assert_eq!(status(&rig, id), LogisticsStatus::Delivered);
    let stats = worker.stats().snapshot();
    assert_eq!(stats.notifications_failed, 2);
    assert_eq!(stats.processed, 2);
}

#[tokio::test(start_paused = true)]
async fn simulated_midnight_triggers_replanning_sweep() {
    let mut parked = Truck::new(1, 1_000, 25, 25);
    parked.is_available = false;
    let rig = rig(vec![parked]);
    let err = rig
        .haulsim
        .orchestrator()
        .plan_after_payment(1, 5, at("2025-01-01T00:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::NoTrucksAvailable { .. }));
    let id = rig
        .haulsim
        .orchestrator()
        .logistics_for_pickup(1)
        .await
        .unwrap()
        .unwrap()
        .id;
    assert_eq!(status(&rig, id), LogisticsStatus::NoTrucksAvailable);
    rig.haulsim.store().set_truck_available(1, true);

    let handle = rig.haulsim.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    rig.source.advance_ms(121_000);
    for _ in 0..50 {
        if status(&rig, id).is_planned_forward() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(status(&rig, id).is_planned_forward());
    assert!(rig.haulsim.worker().stats().snapshot().sweeps >= 1);
    assert!(rig.haulsim.shutdown(handle).await);
    assert!(!rig.haulsim.clock().is_running());
}

#[tokio::test(start_paused = true)]
async fn idle_worker_shuts_down_within_grace() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let handle = rig.haulsim.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.haulsim.shutdown(handle).await);
}

#[tokio::test(start_paused = true)]
async fn early_collection_is_deferred_until_its_day() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = rig
        .haulsim
        .orchestrator()
        .plan_after_payment(1, 5, at("2025-01-10T00:00:00Z"))
        .await
        .unwrap()
        .id;
    assert_eq!(rig.queue.snapshot(PICKUPS)[0].delay, Duration::from_secs(900));
    let worker = rig.haulsim.worker();

    elapse(&rig, 900).await;
    assert!(rig.haulsim.clock().current_time() < at("2025-01-10T00:00:00Z"));
    assert_eq!(
        worker.poll_once(PICKUPS).await.unwrap(),
        vec![MessageOutcome::Deferred]
    );
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForCollection);
    let requeued = rig.queue.snapshot(PICKUPS);
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].delay, Duration::from_secs(180));

    elapse(&rig, 180).await;
    assert!(rig.haulsim.clock().current_time() >= at("2025-01-10T00:00:00Z"));
    assert_eq!(
        worker.poll_once(PICKUPS).await.unwrap(),
        vec![MessageOutcome::Processed]
    );
    assert_eq!(status(&rig, id), LogisticsStatus::QueuedForDelivery);
    assert_eq!(rig.queue.depth(PICKUPS), 0);
    let stats = worker.stats().snapshot();
    assert_eq!((stats.deferred, stats.processed), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn persistent_storage_errors_give_up_after_receive_cap() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let id = plan(&rig, 1).await;
    let store = Arc::clone(rig.haulsim.store());
    let mut repos = Repositories::from_store(Arc::clone(&store));
    repos.trucks = Arc::new(FleetDown(store));
    let orchestrator = Arc::new(LogisticsOrchestrator::new(
        repos,
        Arc::clone(rig.haulsim.clock()),
        Arc::new(rig.queue.clone()),
        QueueNames::default(),
        PlanningSettings::default(),
        Telemetry::disabled(),
    ));
    let receive = ReceiveOptions {
        wait: Duration::ZERO,
        visibility_timeout: Duration::from_secs(1),
        ..ReceiveOptions::default()
    };
    let worker = Arc::new(QueueWorker::new(
        orchestrator,
        Arc::new(rig.queue.clone()),
        Arc::new(rig.notifier.clone()),
        WorkerOptions {
            receive,
            max_receive_count: 3,
            ..WorkerOptions::default()
        },
        Telemetry::disabled(),
    ));

    for _ in 0..2 {
        assert_eq!(
            worker.poll_once(PICKUPS).await.unwrap(),
            vec![MessageOutcome::Retained]
        );
        assert_eq!(status(&rig, id), LogisticsStatus::QueuedForCollection);
        tokio::time::advance(Duration::from_secs(2)).await;
    }
    assert_eq!(
        worker.poll_once(PICKUPS).await.unwrap(),
        vec![MessageOutcome::Failed]
    );
    assert_eq!(rig.queue.depth(PICKUPS), 0);
    assert_eq!(status(&rig, id), LogisticsStatus::Failed);
    let stats = worker.stats().snapshot();
    assert_eq!((stats.retained, stats.failed), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn run_until_drains_when_stop_resolves() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let (tx, rx) = tokio::sync::oneshot::channel::<&'static str>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = tx.send("SIGTERM");
    });
    let (signal, drained) = rig
        .haulsim
        .run_until(async { rx.await.map_err(anyhow::Error::from) })
        .await
        .unwrap();
    assert_eq!(signal, "SIGTERM");
    assert!(drained);
    assert!(!rig.haulsim.clock().is_running());
}

#[tokio::test(start_paused = true)]
async fn run_until_still_drains_when_stop_fails() {
    let rig = rig(vec![Truck::new(1, 1_000, 25, 25)]);
    let result = rig
        .haulsim
        .run_until(async { Err::<(), _>(anyhow!("no signal handler")) })
        .await;
    assert!(result.is_err());
    assert!(!rig.haulsim.clock().is_running());
}
