//! Execution scheduler
//!
//! Accepted orders wait in a min-heap keyed by fire time. One timer task pops
//! due items and pushes them onto a bounded work queue drained by a fixed pool
//! of executor workers. Cancelling a pending item removes it from the pending
//! table; the stale heap entry is skipped when it surfaces.
//!
//! Capacity counts pending plus in-flight items. Orders arriving at capacity
//! are dropped, never queued.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{ExecutionResult, Order};
use crate::filter::FilterResult;

/// Anything that can turn an order into a terminal result
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, order: Order) -> ExecutionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Cancelled,
    Executed,
}

/// An order waiting for its fire time
#[derive(Debug, Clone, Serialize)]
pub struct PendingExecution {
    pub id: String,
    pub order: Order,
    pub filter: Option<FilterResult>,
    pub scheduled_for: DateTime<Utc>,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { id: String, delay: Duration },
    Dropped { reason: String },
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub executed: u64,
    pub pending: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    by_seq: HashMap<u64, String>,
    pending: HashMap<String, PendingExecution>,
    next_seq: u64,
}

impl Queue {
    /// Drop a pending item together with its timer entry
    fn remove(&mut self, id: &str) -> Option<PendingExecution> {
        let item = self.pending.remove(id)?;
        let seq = self
            .by_seq
            .iter()
            .find(|(_, pending_id)| pending_id.as_str() == id)
            .map(|(seq, _)| *seq);
        if let Some(seq) = seq {
            self.by_seq.remove(&seq);
            self.heap.retain(|Reverse((_, queued))| *queued != seq);
        }
        Some(item)
    }
}

struct Shared {
    max_concurrent: usize,
    queue: Mutex<Queue>,
    wake: Notify,
    stopped: AtomicBool,
    in_flight: AtomicUsize,
    scheduled: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
    executed: AtomicU64,
}

/// Cloneable handle to the running scheduler
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Spawn the timer loop and `max_concurrent` workers.
    ///
    /// Every result is forwarded on `results`; the loop also exits on `shutdown`.
    pub fn start(
        max_concurrent: usize,
        executor: Arc<dyn OrderExecutor>,
        results: mpsc::Sender<ExecutionResult>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let shared = Arc::new(Shared {
            max_concurrent,
            queue: Mutex::new(Queue::default()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            scheduled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        });

        let (work_tx, work_rx) = async_channel::bounded::<PendingExecution>(max_concurrent);
        let mut tasks = Vec::with_capacity(max_concurrent + 1);
        tasks.push(tokio::spawn(timer_loop(shared.clone(), work_tx, shutdown)));
        for worker in 0..max_concurrent {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                shared.clone(),
                executor.clone(),
                work_rx.clone(),
                results.clone(),
            )));
        }
        info!("Scheduler started with {} workers", max_concurrent);

        Self {
            shared,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Queue `order` to fire after `delay`. Never blocks on execution.
    pub async fn schedule(
        &self,
        order: Order,
        delay: Duration,
        filter: Option<FilterResult>,
    ) -> ScheduleOutcome {
        if self.shared.stopped.load(Ordering::SeqCst) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return ScheduleOutcome::Dropped {
                reason: "scheduler stopped".to_string(),
            };
        }

        let mut queue = self.shared.queue.lock().await;
        let busy = queue.pending.len() + self.shared.in_flight.load(Ordering::SeqCst);
        if busy >= self.shared.max_concurrent {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            info!(
                "Dropping {} order {}: {} of {} execution slots busy",
                order.side, order.id, busy, self.shared.max_concurrent
            );
            return ScheduleOutcome::Dropped {
                reason: format!("concurrency cap {} reached", self.shared.max_concurrent),
            };
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Reverse((Instant::now() + delay, seq)));
        queue.by_seq.insert(seq, id.clone());
        queue.pending.insert(
            id.clone(),
            PendingExecution {
                id: id.clone(),
                order,
                filter,
                scheduled_for: now
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
                status: PendingStatus::Pending,
                created_at: now,
            },
        );
        drop(queue);

        self.shared.scheduled.fetch_add(1, Ordering::Relaxed);
        self.shared.wake.notify_one();
        debug!("Scheduled {} in {:?}", id, delay);
        ScheduleOutcome::Scheduled { id, delay }
    }

    /// Cancel one pending item. In-flight items cannot be cancelled.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut queue = self.shared.queue.lock().await;
        match queue.remove(id) {
            Some(_) => {
                drop(queue);
                self.shared.cancelled.fetch_add(1, Ordering::Relaxed);
                self.shared.wake.notify_one();
                debug!("Cancelled pending execution {}", id);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending item booked against `ledger_id`
    pub async fn cancel_for(&self, ledger_id: &str) -> usize {
        let mut queue = self.shared.queue.lock().await;
        let ids: Vec<String> = queue
            .pending
            .values()
            .filter(|p| p.order.ledger_id == ledger_id)
            .map(|p| p.id.clone())
            .collect();
        for id in &ids {
            queue.remove(id);
        }
        drop(queue);
        self.shared.wake.notify_one();
        self.shared
            .cancelled
            .fetch_add(ids.len() as u64, Ordering::Relaxed);
        if !ids.is_empty() {
            info!("Cancelled {} pending executions for {}", ids.len(), ledger_id);
        }
        ids.len()
    }

    pub async fn pending(&self) -> Vec<PendingExecution> {
        let queue = self.shared.queue.lock().await;
        let mut items: Vec<PendingExecution> = queue.pending.values().cloned().collect();
        items.sort_by_key(|p| p.scheduled_for);
        items
    }

    pub async fn stats(&self) -> SchedulerStats {
        let pending = self.shared.queue.lock().await.pending.len();
        SchedulerStats {
            scheduled: self.shared.scheduled.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled.load(Ordering::Relaxed),
            executed: self.shared.executed.load(Ordering::Relaxed),
            pending,
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Cancel everything pending, then wait for in-flight executions to finish
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock().await;
            let n = queue.pending.len();
            queue.pending.clear();
            queue.heap.clear();
            queue.by_seq.clear();
            self.shared.cancelled.fetch_add(n as u64, Ordering::Relaxed);
            if n > 0 {
                info!("Scheduler stop cancelled {} pending executions", n);
            }
        }
        self.shared.wake.notify_one();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

enum Next {
    Due(Option<PendingExecution>),
    At(Instant),
    Idle,
}

async fn next_item(shared: &Shared) -> Next {
    let mut queue = shared.queue.lock().await;
    let Some(Reverse((at, seq))) = queue.heap.peek().copied() else {
        return Next::Idle;
    };
    if at > Instant::now() {
        return Next::At(at);
    }
    queue.heap.pop();
    let item = queue
        .by_seq
        .remove(&seq)
        .and_then(|id| queue.pending.remove(&id));
    if item.is_some() {
        // Claim the slot before the queue lock is released
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
    }
    Next::Due(item)
}

async fn timer_loop(
    shared: Arc<Shared>,
    work: async_channel::Sender<PendingExecution>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        match next_item(&shared).await {
            Next::Due(Some(mut item)) => {
                item.status = PendingStatus::Executed;
                if work.send(item).await.is_err() {
                    shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            }
            // Cancelled while waiting
            Next::Due(None) => continue,
            Next::At(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = shared.wake.notified() => {}
                    _ = shutdown.recv() => {
                        shared.stopped.store(true, Ordering::SeqCst);
                    }
                }
            }
            Next::Idle => {
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = shutdown.recv() => {
                        shared.stopped.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
    }
    work.close();
    debug!("Scheduler timer loop stopped");
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    executor: Arc<dyn OrderExecutor>,
    work: async_channel::Receiver<PendingExecution>,
    results: mpsc::Sender<ExecutionResult>,
) {
    while let Ok(item) = work.recv().await {
        debug!("Worker {} executing {} (order {})", worker, item.id, item.order.id);
        let result = executor.execute(item.order).await;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.executed.fetch_add(1, Ordering::Relaxed);
        if results.send(result).await.is_err() {
            warn!("Result channel closed; dropping execution result");
        }
    }
    debug!("Worker {} stopped", worker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Network, OrderSide, OrderSource, TokenInfo};

    struct CountingExecutor {
        calls: AtomicUsize,
        hold: Duration,
    }

    #[async_trait]
    impl OrderExecutor for CountingExecutor {
        async fn execute(&self, order: Order) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            ExecutionResult::failure(
                &order,
                &crate::error::Error::NetworkTimeout(1),
                true,
                Utc::now(),
            )
        }
    }

    fn order(ledger: &str) -> Order {
        Order::new(
            OrderSource::Manual,
            ledger,
            OrderSide::Buy,
            Network::Ethereum,
            TokenInfo::new("0x01", "TKN", 18),
            TokenInfo::new("0x02", "USDC", 6),
            10.0,
        )
    }

    fn start(
        cap: usize,
        hold: Duration,
    ) -> (
        Scheduler,
        Arc<CountingExecutor>,
        mpsc::Receiver<ExecutionResult>,
        broadcast::Sender<()>,
    ) {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
            hold,
        });
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = Scheduler::start(cap, executor.clone(), tx, shutdown_rx);
        (scheduler, executor, rx, shutdown_tx)
    }

    #[tokio::test]
    async fn test_fires_in_delay_order() {
        let (scheduler, _, mut rx, _shutdown) = start(3, Duration::ZERO);
        let late = order("late");
        let early = order("early");
        scheduler.schedule(late, Duration::from_millis(80), None).await;
        scheduler.schedule(early, Duration::from_millis(10), None).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.ledger_id, "early");
        assert_eq!(second.ledger_id, "late");
        assert_eq!(scheduler.stats().await.executed, 2);
    }

    #[tokio::test]
    async fn test_drops_at_capacity() {
        let (scheduler, _, _rx, _shutdown) = start(2, Duration::ZERO);
        assert!(scheduler.schedule(order("a"), Duration::from_secs(60), None).await.is_scheduled());
        assert!(scheduler.schedule(order("b"), Duration::from_secs(60), None).await.is_scheduled());
        let third = scheduler.schedule(order("c"), Duration::from_secs(60), None).await;
        assert!(matches!(third, ScheduleOutcome::Dropped { .. }));

        let stats = scheduler.stats().await;
        assert_eq!(stats.scheduled, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn test_cancelled_items_never_execute() {
        let (scheduler, executor, mut rx, _shutdown) = start(3, Duration::ZERO);
        let ScheduleOutcome::Scheduled { id, .. } =
            scheduler.schedule(order("x"), Duration::from_millis(30), None).await
        else {
            panic!("expected scheduled");
        };
        scheduler.schedule(order("y"), Duration::from_millis(60), None).await;
        assert!(scheduler.cancel(&id).await);
        assert!(!scheduler.cancel(&id).await);

        let only = rx.recv().await.unwrap();
        assert_eq!(only.ledger_id, "y");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats().await.cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_for_ledger() {
        let (scheduler, _, _rx, _shutdown) = start(5, Duration::ZERO);
        scheduler.schedule(order("s1"), Duration::from_secs(60), None).await;
        scheduler.schedule(order("s1"), Duration::from_secs(60), None).await;
        scheduler.schedule(order("s2"), Duration::from_secs(60), None).await;
        assert_eq!(scheduler.cancel_for("s1").await, 2);
        let pending = scheduler.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order.ledger_id, "s2");
    }

    #[tokio::test]
    async fn test_cancel_clears_timer_entries() {
        let (scheduler, _, _rx, _shutdown) = start(5, Duration::ZERO);
        let ScheduleOutcome::Scheduled { id, .. } =
            scheduler.schedule(order("s1"), Duration::from_secs(3600), None).await
        else {
            panic!("expected scheduled");
        };
        scheduler.schedule(order("s2"), Duration::from_secs(3600), None).await;
        scheduler.schedule(order("s2"), Duration::from_secs(3600), None).await;

        assert!(scheduler.cancel(&id).await);
        {
            let queue = scheduler.shared.queue.lock().await;
            assert_eq!(queue.heap.len(), 2);
            assert_eq!(queue.by_seq.len(), 2);
            assert!(!queue.by_seq.values().any(|v| v == &id));
        }

        assert_eq!(scheduler.cancel_for("s2").await, 2);
        let queue = scheduler.shared.queue.lock().await;
        assert!(queue.heap.is_empty());
        assert!(queue.by_seq.is_empty());
        assert!(queue.pending.is_empty());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_and_cancels_pending() {
        let (scheduler, executor, mut rx, _shutdown) = start(2, Duration::from_millis(50));
        scheduler.schedule(order("now"), Duration::ZERO, None).await;
        scheduler.schedule(order("later"), Duration::from_secs(60), None).await;

        // Let the first item reach a worker
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop().await;

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().ledger_id, "now");
        let stats = scheduler.stats().await;
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.in_flight, 0);
        assert!(!scheduler.schedule(order("z"), Duration::ZERO, None).await.is_scheduled());
    }
}
