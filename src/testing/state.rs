//! Group lifecycle
//!
//! `Pending → RunningBefore → RunningTest → RunningAfter → Completed`, with
//! `Failed` reachable from `RunningBefore` only.

use std::fmt;

use serde::Serialize;

use crate::common::{Error, Result};

/// Runtime state of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Pending,
    RunningBefore,
    RunningTest,
    RunningAfter,
    Completed,
    Failed,
}

impl GroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupState::Completed | GroupState::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition(&self, next: GroupState) -> bool {
        use GroupState::*;
        matches!(
            (self, next),
            (Pending, RunningBefore)
                | (RunningBefore, RunningTest)
                | (RunningBefore, Failed)
                | (RunningTest, RunningAfter)
                | (RunningAfter, Completed)
        )
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupState::Pending => "pending",
            GroupState::RunningBefore => "running_before",
            GroupState::RunningTest => "running_test",
            GroupState::RunningAfter => "running_after",
            GroupState::Completed => "completed",
            GroupState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Engine-owned lifecycle record for one group
#[derive(Debug)]
pub struct GroupLifecycle {
    group: String,
    state: GroupState,
}

impl GroupLifecycle {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            state: GroupState::Pending,
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: GroupState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                group: self.group.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(group = %self.group, from = %self.state, to = %next, "Group transition");
        self.state = next;
        Ok(())
    }
}
