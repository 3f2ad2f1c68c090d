//! Background Scheduler
//!
//! Two long-lived tickers, cache rewarm and expiration sweep. Each tick is
//! submitted through the command log rather than run locally, so every
//! replica performs the same maintenance at the same point in the log.
//! A failed tick is logged and skipped.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::replication::ReplicatedCommandLog;

/// Default period between cache rewarms (1 hour)
pub const DEFAULT_REWARM_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default period between volatile sweeps (1 hour)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration for the background tickers
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the `reloadCacheData` ticker
    pub rewarm_interval: Duration,

    /// Period of the `periodicDelete` ticker
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rewarm_interval: DEFAULT_REWARM_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Rewarm,
    Sweep,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Rewarm => write!(f, "rewarm"),
            Task::Sweep => write!(f, "sweep"),
        }
    }
}

/// Owner of the maintenance tickers.
pub struct Scheduler {
    log: ReplicatedCommandLog,
    config: SchedulerConfig,
    cancel: CancellationToken,
    span: Span,
}

impl Scheduler {
    pub fn new(log: ReplicatedCommandLog, config: SchedulerConfig) -> Self {
        Self {
            log,
            config,
            cancel: CancellationToken::new(),
            span: Span::none(),
        }
    }

    /// Run the tickers inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Stop the tickers when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Spawn both tickers. The first tick of each fires one period from now.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        info!(
            rewarm_interval = ?self.config.rewarm_interval,
            sweep_interval = ?self.config.sweep_interval,
            "Starting scheduler"
        );
        [
            (Task::Rewarm, self.config.rewarm_interval),
            (Task::Sweep, self.config.sweep_interval),
        ]
        .into_iter()
        .map(|(task, period)| {
            tokio::spawn(
                run(self.log.clone(), task, period, self.cancel.clone())
                    .instrument(self.span.clone()),
            )
        })
        .collect()
    }

    /// Stop both tickers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run(log: ReplicatedCommandLog, task: Task, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(task = %task, "Scheduler task shutting down");
                break;
            }
            _ = ticker.tick() => {
                let result = match task {
                    Task::Rewarm => log.reload_cache().await,
                    Task::Sweep => log.periodic_delete().await,
                };
                match result {
                    Ok(()) => debug!(task = %task, "Scheduled command applied"),
                    Err(e) => warn!(task = %task, error = %e, "Scheduled command failed, skipping this tick"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ConsensusError, ConsensusProvider};
    use crate::replication::{ApplyOutcome, Command, Operation};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records submitted operations; optionally refuses them.
    #[derive(Default)]
    struct Recorder {
        operations: Mutex<Vec<Operation>>,
        refuse: bool,
    }

    #[async_trait]
    impl ConsensusProvider for Recorder {
        async fn submit(
            &self,
            payload: Vec<u8>,
            _timeout: Duration,
        ) -> std::result::Result<Vec<u8>, ConsensusError> {
            if self.refuse {
                return Err(ConsensusError::NotLeader);
            }
            let command = Command::decode(&payload).map_err(|_| ConsensusError::Closed)?;
            self.operations.lock().push(command.operation());
            Ok(ApplyOutcome::Applied.encode())
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            rewarm_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickers_submit_through_log() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(ReplicatedCommandLog::new(recorder.clone()), config());
        let handles = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let operations = recorder.operations.lock().clone();
        assert_eq!(
            operations.iter().filter(|op| **op == Operation::ReloadCacheData).count(),
            1
        );
        assert_eq!(
            operations.iter().filter(|op| **op == Operation::PeriodicDelete).count(),
            2
        );

        scheduler.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_ticker() {
        let recorder = Arc::new(Recorder {
            refuse: true,
            ..Default::default()
        });
        let token = CancellationToken::new();
        let scheduler = Scheduler::new(ReplicatedCommandLog::new(recorder), config())
            .with_cancellation(token.clone());
        let handles = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(handles.iter().all(|h| !h.is_finished()));

        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
