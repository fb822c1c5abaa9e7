use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use roomclock::cache::{DEFAULT_CACHE_TTL, InMemoryCache};
use roomclock::clock::{Clock, MonotonicClock, SystemClock};
use roomclock::model::{HOUR_MS, Ms, ReservationRequest, ReservationStatus, Span};
use roomclock::scheduler::Scheduler;
use roomclock::service::{ReservationService, ServiceError, ValidationError};
use roomclock::store::{ReservationStore, WalStore};

// 2025-01-01T00:00:00Z
const BASE: Ms = 1_735_689_600_000;
const H: Ms = HOUR_MS;

// ── Test infrastructure ──────────────────────────────────────

struct Node {
    service: Arc<ReservationService>,
    scheduler: Arc<Scheduler>,
    store: Arc<WalStore>,
}

/// Wire a service over the log at `path`, with a clock reading `now`.
fn start_node(path: &PathBuf, now: Ms) -> Node {
    let clock = Arc::new(MonotonicClock::starting_at(now));
    let store = Arc::new(WalStore::open(path).unwrap());
    let cache = Arc::new(InMemoryCache::new(clock.clone()));
    let scheduler = Scheduler::new(store.clone(), cache.clone(), clock.clone(), DEFAULT_CACHE_TTL);
    let service = Arc::new(ReservationService::new(
        scheduler.clone(),
        store.clone(),
        cache,
        clock,
        DEFAULT_CACHE_TTL,
    ));
    Node {
        service,
        scheduler,
        store,
    }
}

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roomclock_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("reservations.wal")
}

fn booking(room: &str, start: Ms, end: Ms) -> ReservationRequest {
    ReservationRequest {
        id: None,
        room_id: room.into(),
        user_id: "bob".into(),
        start,
        end,
        status: ReservationStatus::Pending,
        comments: None,
        ip: None,
    }
}

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: Ms) {
    tokio::time::advance(Duration::from_millis(ms as u64 + 1)).await;
    settle().await;
}

async fn stored_status(store: &WalStore, id: &str) -> Option<ReservationStatus> {
    store.get_by_id(id).await.unwrap().map(|r| r.status)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transitions_are_durable() {
    let path = wal_path();
    let node = start_node(&path, BASE);
    assert_eq!(node.service.initialize().await.unwrap(), 0);

    let short = node.service.reserve(booking("R", BASE + H, BASE + 2 * H)).await.unwrap();
    let long = node.service.reserve(booking("S", BASE + H, BASE + 3 * H)).await.unwrap();
    let dropped = node.service.reserve(booking("R", BASE + 3 * H, BASE + 4 * H)).await.unwrap();
    node.service.cancel(&dropped.id).await.unwrap();

    // Load the day so later transitions land in its bucket.
    let day = node.service.reservations_for_day(short.start).await.unwrap();
    assert!(day.iter().any(|r| r.id == short.id));
    assert_eq!(node.scheduler.len(), 2);

    advance(H).await;
    assert_eq!(stored_status(&node.store, &short.id).await, Some(ReservationStatus::Active));
    assert_eq!(stored_status(&node.store, &long.id).await, Some(ReservationStatus::Active));

    advance(H).await;
    assert_eq!(stored_status(&node.store, &short.id).await, Some(ReservationStatus::Ended));
    assert_eq!(stored_status(&node.store, &long.id).await, Some(ReservationStatus::Active));
    let day = node.service.reservations_for_day(short.start).await.unwrap();
    let cached = day.iter().find(|r| r.id == short.id).unwrap();
    assert_eq!(cached.status, ReservationStatus::Ended);

    advance(H).await;
    assert_eq!(stored_status(&node.store, &long.id).await, Some(ReservationStatus::Ended));
    assert!(node.scheduler.is_empty());
    assert_eq!(node.scheduler.pending_timers(), 0);
    drop(node);

    let reopened = WalStore::open(&path).unwrap();
    assert_eq!(stored_status(&reopened, &short.id).await, Some(ReservationStatus::Ended));
    assert_eq!(stored_status(&reopened, &long.id).await, Some(ReservationStatus::Ended));
    assert_eq!(stored_status(&reopened, &dropped.id).await, Some(ReservationStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_live_reservations() {
    let path = wal_path();
    let node = start_node(&path, BASE);
    let running = node.service.reserve(booking("R", BASE + H, BASE + 3 * H)).await.unwrap();
    let upcoming = node.service.reserve(booking("R", BASE + 4 * H, BASE + 5 * H)).await.unwrap();
    let over = node.service.reserve(booking("S", BASE + H, BASE + 2 * H)).await.unwrap();
    node.service.cancel(&over.id).await.unwrap();

    advance(H).await;
    assert_eq!(stored_status(&node.store, &running.id).await, Some(ReservationStatus::Active));
    node.scheduler.shutdown();
    drop(node);

    // Come back an hour and a half later, mid-way through `running`.
    let restarted = start_node(&path, BASE + 5 * H / 2);
    assert_eq!(restarted.service.initialize().await.unwrap(), 2);
    settle().await;

    let resumed = restarted.scheduler.get(&running.id).unwrap();
    assert_eq!(resumed.status, ReservationStatus::Active);
    assert_eq!(restarted.scheduler.next_wake(&running.id), Some(BASE + 3 * H));
    assert_eq!(restarted.scheduler.next_wake(&upcoming.id), Some(BASE + 4 * H));
    assert!(restarted.scheduler.get(&over.id).is_none());

    advance(H).await;
    assert_eq!(stored_status(&restarted.store, &running.id).await, Some(ReservationStatus::Ended));
    assert_eq!(stored_status(&restarted.store, &upcoming.id).await, Some(ReservationStatus::Pending));

    advance(H).await;
    assert_eq!(stored_status(&restarted.store, &upcoming.id).await, Some(ReservationStatus::Active));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_bookings_of_one_slot_admit_exactly_one() {
    let path = wal_path();
    let now = SystemClock.now_ms();
    let node = start_node(&path, now);
    let (start, end) = (now + H, now + 2 * H);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = node.service.clone();
        handles.push(tokio::spawn(async move { service.reserve(booking("R", start, end)).await }));
    }
    let mut booked = Vec::new();
    let mut occupied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => booked.push(record),
            Err(ServiceError::Validation(ValidationError::RoomOccupied { .. })) => occupied += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked.len(), 1);
    assert_eq!(occupied, 7);

    let in_room = node
        .store
        .get_by_room_in_range("R", Span::new(start, end))
        .await
        .unwrap();
    assert_eq!(in_room, booked);
    assert_eq!(node.scheduler.len(), 1);
    node.scheduler.shutdown();
}
