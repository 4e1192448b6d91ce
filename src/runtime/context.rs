//! Shared state handed down the runner tree

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapters;
use crate::event::EventLog;

/// Leaf operations allowed to run at once when nothing else is configured
pub const DEFAULT_MAX_PARALLELISM: usize = 10;

/// What a sequential runner (and the pipeline) does after a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Keep going: every child and every stage is attempted
    #[default]
    BestEffort,
    /// Stop launching siblings after the first failing child
    FailFast,
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPolicy::BestEffort => write!(f, "best_effort"),
            ExecutionPolicy::FailFast => write!(f, "fail_fast"),
        }
    }
}

impl FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(ExecutionPolicy::BestEffort),
            "fail_fast" => Ok(ExecutionPolicy::FailFast),
            other => Err(format!(
                "unknown policy '{other}' (expected best_effort or fail_fast)"
            )),
        }
    }
}

/// Everything a runnable needs besides itself.
///
/// Cloning is cheap: all members are handles.
#[derive(Clone, Debug)]
pub struct RunContext {
    adapters: Adapters,
    limiter: Arc<Semaphore>,
    max_parallelism: usize,
    timeout: Option<Duration>,
    policy: ExecutionPolicy,
    cancel: CancellationToken,
    events: EventLog,
}

impl RunContext {
    pub fn new(adapters: Adapters) -> Self {
        Self {
            adapters,
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_PARALLELISM)),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            timeout: None,
            policy: ExecutionPolicy::default(),
            cancel: CancellationToken::new(),
            events: EventLog::new(),
        }
    }

    /// Bound the number of concurrently running leaf operations (min 1)
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.limiter = Arc::new(Semaphore::new(max));
        self.max_parallelism = max;
        self
    }

    /// Per-operation deadline; `None` waits forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    pub(crate) fn limiter(&self) -> &Semaphore {
        &self.limiter
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::memory_adapters;

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!("fail-fast".parse::<ExecutionPolicy>(), Ok(ExecutionPolicy::FailFast));
        assert_eq!("BEST_EFFORT".parse::<ExecutionPolicy>(), Ok(ExecutionPolicy::BestEffort));
        assert!("eventually".parse::<ExecutionPolicy>().is_err());
        assert_eq!(ExecutionPolicy::default(), ExecutionPolicy::BestEffort);
    }

    #[test]
    fn builder_sets_limits() {
        let ctx = RunContext::new(memory_adapters())
            .with_max_parallelism(0)
            .with_timeout(Some(Duration::from_secs(5)))
            .with_policy(ExecutionPolicy::FailFast);

        assert_eq!(ctx.max_parallelism(), 1);
        assert_eq!(ctx.limiter().available_permits(), 1);
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(ctx.policy(), ExecutionPolicy::FailFast);
        assert!(!ctx.cancellation().is_cancelled());
    }
}
