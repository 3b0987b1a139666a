use std::time::Duration;

use crate::entry::AclEntry;
use crate::exec::ExecDispatcher;
use crate::forward::ForwardDispatcher;
use crate::request::{AclCommand, AclResult};

/// The ways a validated request can become a privileged side effect.
/// Chosen once from configuration, never per request.
#[derive(Clone, Debug)]
pub enum DispatchStrategy {
    Exec(ExecDispatcher),
    Forward(ForwardDispatcher),
}

impl DispatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exec(_) => "exec",
            Self::Forward(_) => "forward",
        }
    }

    async fn apply(&self, command: &AclCommand) -> AclResult {
        match self {
            Self::Exec(exec) => exec.apply(command).await,
            Self::Forward(forward) => forward.apply(command).await,
        }
    }
}

/// Validates, canonicalizes, and dispatches ACL requests.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    strategy: DispatchStrategy,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(strategy: DispatchStrategy) -> Self {
        Self { strategy, timeout: None }
    }

    /// Deadline for a single dispatch. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy(&self) -> &DispatchStrategy {
        &self.strategy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn dispatch(&self, target_path: &str, entry: &AclEntry) -> AclResult {
        let command = match AclCommand::prepare(target_path, entry) {
            Ok(command) => command,
            Err(err) => {
                log::warn!("rejected ACL request path={:?} err={}", target_path, err);
                return err.into();
            }
        };
        log::debug!(
            "dispatching via {} action={} entry={} path={}",
            self.strategy.name(),
            command.action,
            command.entry,
            command.path
        );

        let Some(limit) = self.timeout else {
            return self.strategy.apply(&command).await;
        };
        match tokio::time::timeout(limit, self.strategy.apply(&command)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                log::warn!(
                    "ACL operation timed out after {:?} action={} path={}",
                    limit,
                    command.action,
                    command.path
                );
                AclResult::failure(format!("ACL operation timed out after {:?}", limit))
            }
        }
    }
}
