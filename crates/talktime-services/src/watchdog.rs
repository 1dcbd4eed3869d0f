//! Shared call timers
//!
//! One task owns a `DelayQueue` holding at most one pending timer per call.
//! The engine arms and cancels timers through a cloneable handle; expired
//! timers are delivered back on a channel. No task or thread is spawned per
//! call.

use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue::Key, DelayQueue};
use tracing::{debug, info, warn};

/// What the engine should do when a timer expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Reserved talk time is used up
    Terminate,
    /// Terminate was sent but no hangup arrived
    Evict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub call_id: String,
    pub kind: TimerKind,
}

#[derive(Debug)]
enum Command {
    Arm {
        call_id: String,
        kind: TimerKind,
        after: Duration,
    },
    Cancel {
        call_id: String,
    },
}

/// Cloneable handle for arming and cancelling call timers
#[derive(Clone)]
pub struct WatchdogHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl WatchdogHandle {
    /// Schedule `kind` for `call_id`, replacing any pending timer for that call
    pub fn arm(&self, call_id: &str, kind: TimerKind, after: Duration) {
        self.send(Command::Arm {
            call_id: call_id.to_string(),
            kind,
            after,
        });
    }

    pub fn cancel(&self, call_id: &str) {
        self.send(Command::Cancel {
            call_id: call_id.to_string(),
        });
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Watchdog is not running, timer command dropped");
        }
    }
}

/// Timer queue task
pub struct Watchdog {
    commands: mpsc::UnboundedReceiver<Command>,
    fired: mpsc::UnboundedSender<TimerFired>,
    queue: DelayQueue<(String, TimerKind)>,
    keys: HashMap<String, Key>,
}

impl Watchdog {
    /// Create the handle, the task, and the receiver of expired timers
    pub fn channel() -> (WatchdogHandle, Watchdog, mpsc::UnboundedReceiver<TimerFired>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();

        let watchdog = Watchdog {
            commands: command_rx,
            fired: fired_tx,
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        };

        (
            WatchdogHandle {
                commands: command_tx,
            },
            watchdog,
            fired_rx,
        )
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Arm {
                call_id,
                kind,
                after,
            } => {
                if let Some(key) = self.keys.remove(&call_id) {
                    self.queue.remove(&key);
                }
                debug!("Arming {:?} timer for call {} in {:?}", kind, call_id, after);
                let key = self.queue.insert((call_id.clone(), kind), after);
                self.keys.insert(call_id, key);
            }
            Command::Cancel { call_id } => {
                if let Some(key) = self.keys.remove(&call_id) {
                    self.queue.remove(&key);
                    debug!("Cancelled timer for call {}", call_id);
                }
            }
        }
    }

    /// Run until shutdown or until every handle and the fired receiver are gone
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Watchdog started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let (call_id, kind) = expired.into_inner();
                    self.keys.remove(&call_id);

                    if self.fired.send(TimerFired { call_id, kind }).is_err() {
                        warn!("Timer consumer gone, stopping watchdog");
                        break;
                    }
                }
            }
        }

        info!("Watchdog stopped with {} pending timers", self.keys.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (handle, watchdog, mut fired) = Watchdog::channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(watchdog.run(shutdown.clone()));

        handle.arm("c1", TimerKind::Terminate, Duration::from_secs(10));
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let timer = fired.recv().await.unwrap();
        assert_eq!(
            timer,
            TimerFired {
                call_id: "c1".to_string(),
                kind: TimerKind::Terminate,
            }
        );

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (handle, watchdog, mut fired) = Watchdog::channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(watchdog.run(shutdown.clone()));

        handle.arm("c1", TimerKind::Terminate, Duration::from_secs(5));
        handle.arm("c2", TimerKind::Terminate, Duration::from_secs(8));
        handle.cancel("c1");

        let timer = fired.recv().await.unwrap();
        assert_eq!(timer.call_id, "c2");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(fired.try_recv().is_err());
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let (handle, watchdog, mut fired) = Watchdog::channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(watchdog.run(shutdown.clone()));

        handle.arm("c1", TimerKind::Terminate, Duration::from_secs(5));
        handle.arm("c1", TimerKind::Evict, Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        let timer = fired.recv().await.unwrap();

        assert_eq!(timer.kind, TimerKind::Evict);
        assert!(started.elapsed() >= Duration::from_secs(60));
        shutdown.cancel();
    }
}
