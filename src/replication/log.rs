//! Replicated Command Log
//!
//! The submit side wraps every mutation as a [`Command`] and hands it to the
//! consensus provider. The apply side, [`CommandStateMachine`], is driven by
//! the provider on every replica and dispatches into a [`CommandApplier`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn, Instrument, Span};

use super::command::{ApplyOutcome, Command, Operation};
use super::ReplicationConfig;
use crate::domain::model::Student;
use crate::domain::ports::{CommandApplier, ConsensusProvider, StateMachine};
use crate::error::{Error, Result};
use crate::metrics;

// =============================================================================
// Submit side
// =============================================================================

/// Client of the consensus provider for one replica.
#[derive(Clone)]
pub struct ReplicatedCommandLog {
    provider: Arc<dyn ConsensusProvider>,
    config: ReplicationConfig,
}

impl ReplicatedCommandLog {
    pub fn new(provider: Arc<dyn ConsensusProvider>) -> Self {
        Self::with_config(provider, ReplicationConfig::default())
    }

    pub fn with_config(provider: Arc<dyn ConsensusProvider>, config: ReplicationConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Order `command` through the log and return the originating replica's
    /// apply result.
    ///
    /// A provider failure means the command was not appended and no tier on
    /// any replica was touched.
    #[instrument(skip(self, command), fields(operation = %command.operation()))]
    pub async fn submit(&self, command: Command) -> Result<()> {
        let payload = command.encode()?;

        let response = match self
            .provider
            .submit(payload, self.config.submit_timeout)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                metrics::record_submit("failed");
                warn!(error = %e, "Command was not ordered");
                return Err(Error::Replication(e.to_string()));
            }
        };

        let result = ApplyOutcome::decode(&response)?.into_result();
        match &result {
            Ok(()) => metrics::record_submit("ok"),
            Err(e) => {
                metrics::record_submit("rejected");
                debug!(error = %e, "Command ordered but rejected on apply");
            }
        }
        result
    }

    pub async fn create(&self, student: Student) -> Result<()> {
        self.submit(Command::add(student)).await
    }

    pub async fn modify(&self, update: Student) -> Result<()> {
        self.submit(Command::update(update)).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.submit(Command::delete(id)).await
    }

    pub async fn reload_cache(&self) -> Result<()> {
        self.submit(Command::reload_cache()).await
    }

    pub async fn periodic_delete(&self) -> Result<()> {
        self.submit(Command::periodic_delete()).await
    }
}

// =============================================================================
// Apply side
// =============================================================================

/// State machine that applies commands to a [`CommandApplier`].
pub struct CommandStateMachine {
    applier: Arc<dyn CommandApplier>,
    span: Span,
}

impl CommandStateMachine {
    pub fn new(applier: Arc<dyn CommandApplier>) -> Self {
        Self {
            applier,
            span: Span::none(),
        }
    }

    /// Apply every command inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        let (operation, entity, id) = command.into_parts();
        let missing = || Error::Replication(format!("{} command without payload", operation));

        match operation {
            Operation::Add => self.applier.apply_create(entity.ok_or_else(missing)?).await,
            Operation::Update => self.applier.apply_modify(entity.ok_or_else(missing)?).await,
            Operation::Delete => self.applier.apply_remove(&id.ok_or_else(missing)?).await,
            Operation::ReloadCacheData => self.applier.apply_rewarm().await,
            Operation::PeriodicDelete => self.applier.apply_sweep().await,
        }
    }
}

#[async_trait]
impl StateMachine for CommandStateMachine {
    async fn apply(&self, index: u64, payload: &[u8]) -> Vec<u8> {
        async {
            let result = match Command::decode(payload) {
                Ok(command) => {
                    debug!(index, operation = %command.operation(), "Applying command");
                    self.dispatch(command).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                debug!(index, error = %e, "Command rejected");
            }
            ApplyOutcome::from_result(&result).encode()
        }
        .instrument(self.span.clone())
        .await
    }

    async fn snapshot(&self) -> Result<Vec<u8>> {
        self.applier.snapshot_state().await
    }

    async fn restore(&self, snapshot: &[u8]) -> Result<()> {
        self.applier.restore_state(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ConsensusError;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Applier that records every call.
    #[derive(Default)]
    struct RecordingApplier {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandApplier for RecordingApplier {
        async fn apply_create(&self, student: Student) -> Result<()> {
            self.calls.lock().push(format!("create:{}", student.id));
            Ok(())
        }

        async fn apply_modify(&self, update: Student) -> Result<()> {
            self.calls.lock().push(format!("modify:{}", update.id));
            Ok(())
        }

        async fn apply_remove(&self, id: &str) -> Result<()> {
            self.calls.lock().push(format!("remove:{}", id));
            Err(Error::not_found(crate::domain::TierKind::Relational, id))
        }

        async fn apply_rewarm(&self) -> Result<()> {
            self.calls.lock().push("rewarm".into());
            Ok(())
        }

        async fn apply_sweep(&self) -> Result<()> {
            self.calls.lock().push("sweep".into());
            Ok(())
        }

        async fn snapshot_state(&self) -> Result<Vec<u8>> {
            Ok(b"snap".to_vec())
        }

        async fn restore_state(&self, _snapshot: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    /// Provider that applies directly on one state machine.
    struct Direct {
        machine: CommandStateMachine,
        fail: Option<ConsensusError>,
    }

    #[async_trait]
    impl ConsensusProvider for Direct {
        async fn submit(
            &self,
            payload: Vec<u8>,
            _timeout: Duration,
        ) -> std::result::Result<Vec<u8>, ConsensusError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            Ok(self.machine.apply(1, &payload).await)
        }
    }

    fn log_over(applier: Arc<RecordingApplier>, fail: Option<ConsensusError>) -> ReplicatedCommandLog {
        ReplicatedCommandLog::new(Arc::new(Direct {
            machine: CommandStateMachine::new(applier),
            fail,
        }))
    }

    #[tokio::test]
    async fn test_dispatch_by_operation() {
        let applier = Arc::new(RecordingApplier::default());
        let log = log_over(applier.clone(), None);

        log.create(Student::new("s1", "Ada", "f", "1A")).await.unwrap();
        log.modify(Student::new("s1", "", "", "2B")).await.unwrap();
        log.reload_cache().await.unwrap();
        log.periodic_delete().await.unwrap();

        assert_eq!(
            *applier.calls.lock(),
            vec!["create:s1", "modify:s1", "rewarm", "sweep"]
        );
    }

    #[tokio::test]
    async fn test_apply_error_reaches_submitter() {
        let log = log_over(Arc::new(RecordingApplier::default()), None);

        let err = log.remove("s1").await.unwrap_err();
        assert_matches!(err, Error::Rejected { kind: ErrorKind::NotFound, .. });
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_provider_failure_is_replication_error() {
        let applier = Arc::new(RecordingApplier::default());
        let log = log_over(applier.clone(), Some(ConsensusError::NotLeader));

        let err = log.create(Student::new("s1", "Ada", "f", "1A")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replication);
        assert!(applier.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operation_is_rejected_on_apply() {
        let machine = CommandStateMachine::new(Arc::new(RecordingApplier::default()));
        let response = machine.apply(7, br#"{"operation":"explode"}"#).await;

        let err = ApplyOutcome::decode(&response)
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replication);
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(ReplicationConfig::default().submit_timeout, Duration::from_millis(500));
    }
}
