// THEORY:
// A `RepCounter` is strictly single-threaded: every call is a read-modify-write of
// one session's state. This module provides the two ways of sharing counters across
// threads without giving that up.
//
// Key architectural principles:
// 1.  **Lock Per Target**: `SharedCounter` wraps one counter in `Arc<Mutex<_>>`. A
//     frame loop and a UI thread can both hold a handle; every call takes the lock
//     for its whole duration, so an adjustment can never interleave with a frame.
// 2.  **Owner Per Target**: `SessionPool` runs one tokio task per CPU. Each session is
//     pinned to worker `id % workers` and lives in that worker's map, so the worker is
//     the only code that ever touches it. Commands for one session are processed in
//     the order they were sent; different sessions proceed in parallel.
// 3.  **Request / Reply**: Commands travel over an unbounded `mpsc` channel and carry
//     a `oneshot` sender for the reply. A caller that drops its future loses only the
//     reply, never the command.
// 4.  **Graceful Drain**: `shutdown` closes every channel and waits for the workers,
//     which finish all queued commands before exiting.

use crate::config::CounterConfig;
use crate::core_modules::sample::{AuxLandmarks, Sample};
use crate::core_modules::threshold_model::{AdjustDirection, SensitivityDirection, ThresholdSnapshot};
use crate::error::{CounterError, Result, SessionId};
use crate::pipeline::{DebugSnapshot, ParamValue, ParameterChange, RepCounter, Report};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A counter that can be shared between threads.
#[derive(Debug, Clone)]
pub struct SharedCounter {
    inner: Arc<Mutex<RepCounter>>,
}

impl SharedCounter {
    pub fn new(counter: RepCounter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(counter)),
        }
    }

    pub fn from_config(config: CounterConfig) -> Result<Self> {
        RepCounter::new(config).map(Self::new)
    }

    // A panic while holding the lock leaves a counter that is still internally
    // consistent between calls, so the poison flag is ignored.
    fn lock(&self) -> MutexGuard<'_, RepCounter> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the counter.
    pub fn with<T>(&self, f: impl FnOnce(&mut RepCounter) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn update(&self, sample: Sample, aux: Option<&AuxLandmarks>) -> u64 {
        self.lock().update(sample, aux)
    }

    pub fn process(&self, sample: Sample, aux: Option<&AuxLandmarks>) -> Report {
        self.lock().process(sample, aux)
    }

    pub fn count(&self) -> u64 {
        self.lock().count()
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        self.lock().snapshot()
    }

    pub fn adjust_reference(&self, direction: AdjustDirection, amount: f64) -> Result<ThresholdSnapshot> {
        self.lock().adjust_reference(direction, amount)
    }

    pub fn set_parameter(&self, name: &str, value: impl Into<ParamValue>) -> Result<ParameterChange> {
        self.lock().set_parameter(name, value)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

type Job = Box<dyn FnOnce(Option<&mut RepCounter>) + Send>;

enum Command {
    Open {
        id: SessionId,
        counter: Box<RepCounter>,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        id: SessionId,
        reply: oneshot::Sender<Result<DebugSnapshot>>,
    },
    Call {
        id: SessionId,
        job: Job,
    },
}

/// Serves many independent counting sessions on a fixed set of worker tasks.
///
/// Must be created inside a tokio runtime.
pub struct SessionPool {
    senders: Vec<mpsc::UnboundedSender<Command>>,
    workers: Vec<JoinHandle<()>>,
}

impl SessionPool {
    /// One worker per CPU.
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get())
    }

    pub fn with_workers(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (senders, workers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|index| {
                let (sender, receiver) = mpsc::unbounded_channel::<Command>();
                (sender, tokio::spawn(Self::run_worker(index, receiver)))
            })
            .unzip();
        info!(workers = worker_count, "Session pool started");
        Self { senders, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// The worker a session is pinned to.
    pub fn worker_for(&self, id: SessionId) -> usize {
        (id % self.senders.len() as u64) as usize
    }

    async fn run_worker(index: usize, mut receiver: mpsc::UnboundedReceiver<Command>) {
        let mut sessions: HashMap<SessionId, RepCounter> = HashMap::new();
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Open { id, counter, reply } => {
                    let result = if sessions.contains_key(&id) {
                        Err(CounterError::SessionExists(id))
                    } else {
                        debug!(worker = index, session = id, counter = counter.name(), "Session opened");
                        sessions.insert(id, *counter);
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
                Command::Close { id, reply } => {
                    let result = sessions
                        .remove(&id)
                        .map(|counter| {
                            debug!(worker = index, session = id, count = counter.count(), "Session closed");
                            counter.snapshot()
                        })
                        .ok_or(CounterError::SessionNotFound(id));
                    let _ = reply.send(result);
                }
                Command::Call { id, job } => job(sessions.get_mut(&id)),
            }
        }
        if !sessions.is_empty() {
            warn!(worker = index, open = sessions.len(), "Worker stopped with open sessions");
        }
    }

    fn send(&self, id: SessionId, command: Command) -> Result<()> {
        self.senders[self.worker_for(id)]
            .send(command)
            .map_err(|_| CounterError::PoolClosed)
    }

    async fn receive<T>(receiver: oneshot::Receiver<Result<T>>) -> Result<T> {
        receiver.await.map_err(|_| CounterError::PoolClosed)?
    }

    /// Starts a session around an existing counter.
    pub async fn open(&self, id: SessionId, counter: RepCounter) -> Result<()> {
        let (reply, receiver) = oneshot::channel();
        self.send(
            id,
            Command::Open {
                id,
                counter: Box::new(counter),
                reply,
            },
        )?;
        Self::receive(receiver).await
    }

    /// Ends a session, returning its final snapshot.
    pub async fn close(&self, id: SessionId) -> Result<DebugSnapshot> {
        let (reply, receiver) = oneshot::channel();
        self.send(id, Command::Close { id, reply })?;
        Self::receive(receiver).await
    }

    /// Runs `f` on the session's worker with exclusive access to its counter.
    pub async fn call<T, F>(&self, id: SessionId, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RepCounter) -> Result<T> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job: Job = Box::new(move |counter: Option<&mut RepCounter>| {
            let result = match counter {
                Some(counter) => f(counter),
                None => Err(CounterError::SessionNotFound(id)),
            };
            let _ = reply.send(result);
        });
        self.send(id, Command::Call { id, job })?;
        Self::receive(receiver).await
    }

    pub async fn update(&self, id: SessionId, sample: Sample, aux: Option<AuxLandmarks>) -> Result<Report> {
        self.call(id, move |counter| Ok(counter.process(sample, aux.as_ref()))).await
    }

    pub async fn count(&self, id: SessionId) -> Result<u64> {
        self.call(id, |counter| Ok(counter.count())).await
    }

    pub async fn snapshot(&self, id: SessionId) -> Result<DebugSnapshot> {
        self.call(id, |counter| Ok(counter.snapshot())).await
    }

    pub async fn adjust_reference(&self, id: SessionId, direction: AdjustDirection, amount: f64) -> Result<ThresholdSnapshot> {
        self.call(id, move |counter| counter.adjust_reference(direction, amount)).await
    }

    pub async fn set_sensitivity(&self, id: SessionId, multiplier: f64) -> Result<ThresholdSnapshot> {
        self.call(id, move |counter| counter.set_sensitivity(multiplier)).await
    }

    pub async fn nudge_sensitivity(&self, id: SessionId, direction: SensitivityDirection, factor: f64) -> Result<ThresholdSnapshot> {
        self.call(id, move |counter| counter.nudge_sensitivity(direction, factor)).await
    }

    pub async fn set_parameter(&self, id: SessionId, name: impl Into<String>, value: impl Into<ParamValue>) -> Result<ParameterChange> {
        let (name, value) = (name.into(), value.into());
        self.call(id, move |counter| counter.set_parameter(&name, value)).await
    }

    pub async fn reset(&self, id: SessionId) -> Result<()> {
        self.call(id, |counter| {
            counter.reset();
            Ok(())
        })
        .await
    }

    /// Closes the command channels and waits for every queued command to finish.
    pub async fn shutdown(self) {
        let Self { senders, workers } = self;
        drop(senders);
        for outcome in join_all(workers).await {
            if let Err(error) = outcome {
                warn!(%error, "Session worker ended abnormally");
            }
        }
        info!("Session pool stopped");
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> RepCounter {
        RepCounter::new(CounterConfig::human("plank")).expect("valid config")
    }

    #[test]
    fn shared_counter_serializes_threads() {
        let shared = SharedCounter::new(counter());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for frame in 0..10 {
                        shared.update(Sample::new(0.5, frame as f64, 1.0), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        // 40 warm-up frames: the window filled after 30 and the counter calibrated.
        assert!(shared.with(|c| c.is_calibrated()));
        assert_eq!(shared.count(), 0);
    }

    #[tokio::test]
    async fn sessions_are_pinned_by_id() {
        let pool = SessionPool::with_workers(3);
        assert_eq!(pool.worker_for(0), 0);
        assert_eq!(pool.worker_for(7), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_and_missing_sessions_are_reported() {
        let pool = SessionPool::with_workers(2);
        pool.open(1, counter()).await.expect("first open");
        assert!(matches!(pool.open(1, counter()).await, Err(CounterError::SessionExists(1))));
        assert!(matches!(pool.count(9).await, Err(CounterError::SessionNotFound(9))));
        assert!(pool.close(1).await.is_ok());
        assert!(matches!(pool.close(1).await, Err(CounterError::SessionNotFound(1))));
        pool.shutdown().await;
    }
}
