//! Runner state of a schedule.

use serde::{Deserialize, Serialize};

/// Where a schedule is in its execution cycle.
///
/// ```text
/// Idle ──due──▶ Pending ──▶ Running ──ok──▶ Idle
///                              └──err──▶ Failed ──recorded──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    #[default]
    Idle,
    Pending,
    Running,
    Failed,
}

impl ScheduleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    /// Edits race with the action while it is due or executing.
    #[must_use]
    pub fn accepts_edits(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Pending)
                | (Self::Pending, Self::Running)
                | (Self::Running, Self::Idle | Self::Failed)
                | (Self::Failed, Self::Idle)
        )
    }
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_only_accept_edits_when_not_due_or_running() {
        assert!(ScheduleState::Idle.accepts_edits());
        assert!(ScheduleState::Failed.accepts_edits());
        assert!(!ScheduleState::Pending.accepts_edits());
        assert!(!ScheduleState::Running.accepts_edits());
    }

    #[test]
    fn should_follow_the_runner_cycle() {
        use ScheduleState::{Failed, Idle, Pending, Running};
        assert!(Idle.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Idle));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
    }
}
