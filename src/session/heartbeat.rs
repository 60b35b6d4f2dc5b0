//! Per-connection heart-beat timers.
//!
//! # Responsibilities
//! - Read timer: no inbound traffic within the read deadline → close the
//!   connection with a policy violation
//! - Write timer: this side has been quiet for the write interval → send a
//!   heart-beat, then count down again
//!
//! # Design Decisions
//! - Every reset aborts the pending task before arming a new one, so at
//!   most one task per direction exists
//! - A firing read timer detaches itself before calling the hook, so a
//!   teardown triggered by the hook cannot cancel the hook mid-flight
//! - `closed` is checked after every sleep; a timer that races teardown
//!   does nothing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::session::transport::TransportError;

/// Callbacks invoked by the timers. Bodies must not block.
#[async_trait]
pub trait HeartBeatHooks: Send + Sync + 'static {
    /// Write a heart-beat to the peer without touching the write timer.
    async fn send_heartbeat(&self) -> Result<(), TransportError>;

    async fn on_read_timeout(&self);
}

/// Executor for timer tasks.
///
/// `dedicated` owns a multi-threaded runtime sized to the available
/// parallelism, kept apart from the I/O runtime. `current` reuses the
/// ambient runtime (tests with paused time).
pub struct Scheduler {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Scheduler {
    pub fn dedicated() -> std::io::Result<Self> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("stomp-heartbeat")
            .enable_time()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    /// Outside of a tokio runtime.
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
            runtime: None,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("dedicated", &self.runtime.is_some())
            .finish()
    }
}

struct Timer {
    interval: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct Timers {
    read: Option<Timer>,
    write: Option<Timer>,
}

struct Shared {
    hooks: Arc<dyn HeartBeatHooks>,
    timers: Mutex<Timers>,
    closed: AtomicBool,
}

pub struct HeartBeatMonitor {
    handle: Handle,
    shared: Arc<Shared>,
}

impl HeartBeatMonitor {
    pub fn new(scheduler: &Scheduler, hooks: Arc<dyn HeartBeatHooks>) -> Self {
        Self {
            handle: scheduler.handle().clone(),
            shared: Arc::new(Shared {
                hooks,
                timers: Mutex::new(Timers::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Arm both timers. `None` disables a direction. `read_timeout` already
    /// includes the tolerance multiplier.
    pub fn start(&self, read_timeout: Option<Duration>, write_interval: Option<Duration>) {
        if self.is_closed() {
            return;
        }
        {
            let mut timers = self.shared.timers.lock();
            timers.read = read_timeout.map(|interval| Timer {
                interval,
                generation: 0,
                task: None,
            });
            timers.write = write_interval.map(|interval| Timer {
                interval,
                generation: 0,
                task: None,
            });
        }
        self.reset_read();
        self.reset_send();
    }

    /// Inbound traffic seen; restart the read countdown.
    pub fn reset_read(&self) {
        if self.is_closed() {
            return;
        }
        let mut timers = self.shared.timers.lock();
        let Some(timer) = timers.read.as_mut() else {
            return;
        };
        timer.cancel();
        timer.generation += 1;

        let shared = Arc::clone(&self.shared);
        let (interval, generation) = (timer.interval, timer.generation);
        timer.task = Some(self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            if shared.closed.load(Ordering::Acquire) {
                return;
            }
            {
                let mut timers = shared.timers.lock();
                match timers.read.as_mut() {
                    Some(t) if t.generation == generation => {
                        // Detach: dropping the handle does not abort this task.
                        t.task = None;
                    }
                    _ => return,
                }
            }
            tracing::debug!(timeout_ms = interval.as_millis() as u64, "Heart-beat read timeout");
            shared.hooks.on_read_timeout().await;
        }));
    }

    /// Outbound traffic sent; restart the write countdown.
    pub fn reset_send(&self) {
        if self.is_closed() {
            return;
        }
        let mut timers = self.shared.timers.lock();
        let Some(timer) = timers.write.as_mut() else {
            return;
        };
        timer.cancel();
        timer.generation += 1;

        let shared = Arc::clone(&self.shared);
        let interval = timer.interval;
        timer.task = Some(self.handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                if let Err(e) = shared.hooks.send_heartbeat().await {
                    tracing::debug!(error = %e, "Heart-beat send failed, stopping write timer");
                    return;
                }
            }
        }));
    }

    /// Cancel both timers. Safe to call repeatedly and from any thread.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut timers = self.shared.timers.lock();
        if let Some(mut t) = timers.read.take() {
            t.cancel();
        }
        if let Some(mut t) = timers.write.take() {
            t.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for HeartBeatMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHooks {
        heartbeats: AtomicUsize,
        timeouts: AtomicUsize,
        fail_sends: AtomicBool,
    }

    #[async_trait]
    impl HeartBeatHooks for CountingHooks {
        async fn send_heartbeat(&self) -> Result<(), TransportError> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Closed("s".into()));
            }
            Ok(())
        }

        async fn on_read_timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor() -> (HeartBeatMonitor, Arc<CountingHooks>) {
        let hooks = Arc::new(CountingHooks::default());
        let monitor = HeartBeatMonitor::new(&Scheduler::current(), hooks.clone());
        (monitor, hooks)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_fires_once() {
        let (monitor, hooks) = monitor();
        monitor.start(Some(Duration::from_millis(1500)), None);

        advance(1400).await;
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 0);
        advance(200).await;
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 1);
        advance(5000).await;
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_read_postpones_timeout() {
        let (monitor, hooks) = monitor();
        monitor.start(Some(Duration::from_millis(1000)), None);

        for _ in 0..5 {
            advance(800).await;
            monitor.reset_read();
        }
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 0);
        advance(1100).await;
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_timer_sends_until_send_fails() {
        let (monitor, hooks) = monitor();
        monitor.start(None, Some(Duration::from_millis(100)));

        advance(350).await;
        assert_eq!(hooks.heartbeats.load(Ordering::SeqCst), 3);

        hooks.fail_sends.store(true, Ordering::SeqCst);
        advance(100).await;
        advance(500).await;
        assert_eq!(hooks.heartbeats.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_silences_timers() {
        let (monitor, hooks) = monitor();
        monitor.start(Some(Duration::from_millis(100)), Some(Duration::from_millis(100)));

        monitor.close();
        monitor.close();
        monitor.reset_read();
        assert!(monitor.is_closed());

        advance(1000).await;
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.heartbeats.load(Ordering::SeqCst), 0);
    }
}
