use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Where in the lifecycle a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Isolate,
    Init,
    Apply,
    Validate,
    Destroy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Isolate => "isolate",
            Self::Init => "init",
            Self::Apply => "apply",
            Self::Validate => "validate",
            Self::Destroy => "destroy",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Applied,
    Validated,
    Destroyed,
    Failed(Stage),
}

impl LifecycleState {
    /// `Failed(_)` may still move to `Destroyed` (or to `Failed(Destroy)` when
    /// teardown itself fails); `Destroyed` is final.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{Applied, Created, Destroyed, Failed, Initialized, Validated};
        match (self, next) {
            (Created, Initialized)
            | (Initialized, Applied)
            | (Applied, Validated)
            | (Validated | Failed(_), Destroyed) => true,
            (Failed(Stage::Destroy) | Destroyed, _) => false,
            (Failed(_), Failed(Stage::Destroy)) => true,
            (Failed(_), _) => false,
            (_, Failed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Initialized => f.write_str("initialized"),
            Self::Applied => f.write_str("applied"),
            Self::Validated => f.write_str("validated"),
            Self::Destroyed => f.write_str("destroyed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Ordered record of the states a run passed through.
#[derive(Debug, Clone, Default)]
pub(crate) struct Trail {
    states: Vec<LifecycleState>,
}

impl Trail {
    pub(crate) fn current(&self) -> Option<LifecycleState> {
        self.states.last().copied()
    }

    pub(crate) fn advance(&mut self, next: LifecycleState) {
        if let Some(current) = self.current() {
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "unexpected lifecycle transition");
            }
        }
        debug!(state = %next, "lifecycle");
        self.states.push(next);
    }

    pub(crate) fn fail(&mut self, stage: Stage) {
        self.advance(LifecycleState::Failed(stage));
    }

    pub(crate) fn into_states(self) -> Vec<LifecycleState> {
        self.states
    }
}
