use crate::inventory::ServerInventory;
use crate::probe::ErrorKind;
use crate::server::ServerRecord;
use futures::future::join_all;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One record together with what its unit of work produced
pub type Probed<T> = (ServerRecord, Result<T, ErrorKind>);

/// Runs one unit of work per server on a fixed pool of workers
///
/// The same engine serves lookups and health checks; only the closure
/// differs. No matter how large the inventory, at most `concurrency` units
/// of work are in flight, and when a rate is set the whole pool shares one
/// ticker so the aggregate dispatch rate stays under it.
///
/// # Example
///
/// ```rust,no_run
/// use resolver_sweep::{probe, ProbeEngine, Question, RecordType, ServerInventory, UdpExchanger};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let inventory = ServerInventory::from_file("config/resolver-list.yml")?;
///     let exchanger = Arc::new(UdpExchanger::new(Duration::from_secs(2)));
///     let question = Arc::new(Question::new("example.com", RecordType::A));
///
///     let engine = ProbeEngine::new(50).with_rate(200);
///     let results = engine
///         .run(&inventory, move |server| {
///             let exchanger = Arc::clone(&exchanger);
///             let question = Arc::clone(&question);
///             async move { probe::lookup(&*exchanger, server.address(), &question).await }
///         })
///         .await;
///
///     assert_eq!(results.len(), inventory.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    concurrency: usize,
    rate: Option<u32>,
}

impl ProbeEngine {
    /// Create an engine with `concurrency` workers. Zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            rate: None,
        }
    }

    /// Cap the aggregate dispatch rate at `per_second` units of work per
    /// second. Zero removes the cap.
    pub fn with_rate(mut self, per_second: u32) -> Self {
        self.rate = if per_second == 0 { None } else { Some(per_second) };
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn rate(&self) -> Option<u32> {
        self.rate
    }

    /// Run `work` for every record and collect one result per record.
    ///
    /// Returns only once every record has produced its result. Results come
    /// back in completion order, not inventory order.
    pub async fn run<T, F, Fut>(&self, inventory: &ServerInventory, work: F) -> Vec<Probed<T>>
    where
        T: Send + 'static,
        F: Fn(ServerRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ErrorKind>> + Send + 'static,
    {
        self.run_until_cancelled(inventory, work, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops handing out new work once `cancel`
    /// fires. Work already in flight finishes and is reported; records that
    /// were never dispatched are left out.
    pub async fn run_until_cancelled<T, F, Fut>(
        &self,
        inventory: &ServerInventory,
        work: F,
        cancel: CancellationToken,
    ) -> Vec<Probed<T>>
    where
        T: Send + 'static,
        F: Fn(ServerRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ErrorKind>> + Send + 'static,
    {
        let mut rx = self.dispatch(inventory, work, cancel);
        let mut results = Vec::with_capacity(inventory.len());
        while let Some(probed) = rx.recv().await {
            results.push(probed);
        }
        results
    }

    /// Start a run and hand back the stream of results.
    ///
    /// The channel closes once every worker has exited, which for an
    /// uncancelled run means every record has been reported exactly once.
    /// Dropping the receiver early stops the workers after their current
    /// unit of work. Must be called from within a Tokio runtime.
    pub fn dispatch<T, F, Fut>(
        &self,
        inventory: &ServerInventory,
        work: F,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Probed<T>>
    where
        T: Send + 'static,
        F: Fn(ServerRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ErrorKind>> + Send + 'static,
    {
        let total = inventory.len();
        let workers = self.concurrency.min(total);
        let (tx, rx) = mpsc::channel(self.concurrency);

        info!(
            servers = total,
            workers,
            rate = ?self.rate,
            "starting probe run"
        );

        let queue: Arc<Mutex<VecDeque<ServerRecord>>> =
            Arc::new(Mutex::new(inventory.iter().cloned().collect()));
        let limiter = self.rate.map(|rate| Arc::new(RateLimiter::per_second(rate)));
        let work = Arc::new(work);
        let start = Instant::now();

        let handles: Vec<JoinHandle<usize>> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    limiter: limiter.clone(),
                    work: Arc::clone(&work),
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        // The workers hold the only senders from here on, so the receiver
        // sees the end of the stream exactly when the last worker exits.
        drop(tx);

        tokio::spawn(async move {
            let mut completed = 0;
            for joined in join_all(handles).await {
                match joined {
                    Ok(count) => completed += count,
                    Err(e) => warn!(error = %e, "probe worker failed"),
                }
            }
            info!(
                completed,
                servers = total,
                elapsed = ?start.elapsed(),
                cancelled = cancel.is_cancelled(),
                "probe run finished"
            );
        });

        rx
    }
}

struct Worker<F, T> {
    id: usize,
    queue: Arc<Mutex<VecDeque<ServerRecord>>>,
    limiter: Option<Arc<RateLimiter>>,
    work: Arc<F>,
    tx: mpsc::Sender<Probed<T>>,
    cancel: CancellationToken,
}

impl<F, Fut, T> Worker<F, T>
where
    T: Send + 'static,
    F: Fn(ServerRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ErrorKind>> + Send + 'static,
{
    /// Pull records until the queue is empty or the run is cancelled.
    /// Returns the number of results delivered.
    async fn run(self) -> usize {
        let mut delivered = 0;

        loop {
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = limiter.acquire() => {}
                }
            } else if self.cancel.is_cancelled() {
                break;
            }

            let next = self.queue.lock().await.pop_front();
            let Some(record) = next else { break };

            // Run the unit of work on its own task so a panic only costs
            // this record its result.
            let outcome = match tokio::spawn((*self.work)(record.clone())).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(server = %record, error = %e, "unit of work panicked");
                    Err(ErrorKind::Other(format!("probe task failed: {}", e)))
                }
            };

            if let Err(e) = &outcome {
                debug!(worker = self.id, server = %record, error = %e, "probe failed");
            }

            if self.tx.send((record, outcome)).await.is_err() {
                debug!(worker = self.id, "result receiver dropped, stopping");
                break;
            }
            delivered += 1;
        }

        delivered
    }
}

/// A single ticker shared by the whole pool
///
/// Waiting workers sleep on the ticker rather than spin. Missed ticks are
/// not made up in a burst after an idle spell.
struct RateLimiter {
    ticker: Mutex<Interval>,
}

impl RateLimiter {
    fn per_second(rate: u32) -> Self {
        // Rates above one per nanosecond round to a zero period.
        let period = (Duration::from_secs(1) / rate).max(Duration::from_nanos(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker: Mutex::new(ticker),
        }
    }

    async fn acquire(&self) {
        self.ticker.lock().await.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inventory(n: usize) -> ServerInventory {
        ServerInventory::new(
            (0..n)
                .map(|i| ServerRecord::new(format!("10.0.{}.{}", i / 256, i % 256), "ZZ", ""))
                .collect(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_record_yields_exactly_one_result() {
        let servers = inventory(100);
        let engine = ProbeEngine::new(7);

        let results = engine
            .run(&servers, |server| async move { Ok::<_, ErrorKind>(server.address().to_string()) })
            .await;

        assert_eq!(results.len(), 100);
        let seen: HashSet<_> = results.iter().map(|(r, _)| r.address().to_string()).collect();
        assert_eq!(seen.len(), 100);
        for (record, outcome) in &results {
            assert_eq!(outcome.as_deref(), Ok(record.address()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_work_never_exceeds_concurrency() {
        let servers = inventory(60);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let engine = ProbeEngine::new(5);
        let (flight, high) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let results = engine
            .run(&servers, move |_| {
                let (flight, high) = (Arc::clone(&flight), Arc::clone(&high));
                async move {
                    let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ErrorKind>(())
                }
            })
            .await;

        assert_eq!(results.len(), 60);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_stay_with_their_record() {
        let servers = inventory(10);
        let engine = ProbeEngine::new(3);

        let results = engine
            .run(&servers, |server| async move {
                if server.address().ends_with('3') {
                    Err(ErrorKind::Timeout)
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(results.len(), 10);
        let failed: Vec<_> = results.iter().filter(|(_, o)| o.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.address(), "10.0.0.3");
        assert_eq!(failed[0].1, Err(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_panicking_work_becomes_a_failure() {
        let servers = inventory(4);
        let engine = ProbeEngine::new(2);

        let results = engine
            .run(&servers, |server| async move {
                if server.address() == "10.0.0.2" {
                    panic!("resolver exploded");
                }
                Ok(())
            })
            .await;

        assert_eq!(results.len(), 4);
        let (_, outcome) = results
            .iter()
            .find(|(r, _)| r.address() == "10.0.0.2")
            .unwrap();
        match outcome {
            Err(ErrorKind::Other(message)) => assert!(message.starts_with("probe task failed")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_inventory_finishes_immediately() {
        let engine = ProbeEngine::new(10);
        let results = engine
            .run(&ServerInventory::default(), |_| async { Ok::<_, ErrorKind>(()) })
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rate_limit_caps_aggregate_dispatch() {
        let servers = inventory(11);
        // 50 per second is one dispatch every 20ms; the first is immediate.
        let engine = ProbeEngine::new(11).with_rate(50);
        assert_eq!(engine.rate(), Some(50));

        let start = Instant::now();
        let results = engine
            .run(&servers, |_| async { Ok::<_, ErrorKind>(()) })
            .await;

        assert_eq!(results.len(), 11);
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn test_zero_settings_are_normalised() {
        let engine = ProbeEngine::new(0).with_rate(0);
        assert_eq!(engine.concurrency(), 1);
        assert_eq!(engine.rate(), None);
    }

    #[tokio::test]
    async fn test_huge_rate_still_runs() {
        let servers = inventory(3);
        let engine = ProbeEngine::new(1).with_rate(2_000_000_000);
        let results = engine.run(&servers, |_| async { Ok(()) }).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_dispatches() {
        let servers = inventory(20);
        let engine = ProbeEngine::new(1);
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let (token, count) = (cancel.clone(), Arc::clone(&started));
        let results = engine
            .run_until_cancelled(
                &servers,
                move |_| {
                    let (token, count) = (token.clone(), Arc::clone(&count));
                    async move {
                        if count.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                            token.cancel();
                        }
                        Ok::<_, ErrorKind>(())
                    }
                },
                cancel,
            )
            .await;

        // The third unit of work was already in flight when it cancelled.
        assert_eq!(results.len(), 3);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_dispatches_nothing() {
        let servers = inventory(5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = ProbeEngine::new(5)
            .with_rate(100)
            .run_until_cancelled(&servers, |_| async { Ok::<_, ErrorKind>(()) }, cancel)
            .await;
        assert!(results.is_empty());
    }
}
