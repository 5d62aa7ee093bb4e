//! Pipeline stages and the orchestration state machine.

use serde::Serialize;
use std::fmt;

/// The six provisioning stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Validate,
    Mount,
    Format,
    Remount,
    Keygen,
    Render,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Validate,
        Stage::Mount,
        Stage::Format,
        Stage::Remount,
        Stage::Keygen,
        Stage::Render,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> u8 {
        match self {
            Stage::Validate => 1,
            Stage::Mount => 2,
            Stage::Format => 3,
            Stage::Remount => 4,
            Stage::Keygen => 5,
            Stage::Render => 6,
        }
    }

    /// Name used in progress reports.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Validate => "Validate",
            Stage::Mount => "Mount",
            Stage::Format => "Format",
            Stage::Remount => "Remount",
            Stage::Keygen => "Keygen",
            Stage::Render => "Render",
        }
    }

    /// Lowercase label used in error messages ("stage 3 (format): ...").
    pub fn label(self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Mount => "mount",
            Stage::Format => "format",
            Stage::Remount => "remount",
            Stage::Keygen => "keygen",
            Stage::Render => "render",
        }
    }

    /// State while this stage runs.
    pub fn running(self) -> State {
        match self {
            Stage::Validate => State::Validating,
            Stage::Mount => State::Mounting,
            Stage::Format => State::Formatting,
            Stage::Remount => State::Remounting,
            Stage::Keygen => State::Keygen,
            Stage::Render => State::Rendering,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Validating,
    Mounting,
    Formatting,
    Remounting,
    Keygen,
    Rendering,
    Done,
    Failed(Stage),
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed(_))
    }

    /// Stage this state is running, if any.
    pub fn stage(self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.running() == self)
    }

    /// Legal successor states. Stages advance strictly in order; any
    /// running state may fail.
    pub fn can_move_to(self, next: State) -> bool {
        match (self, next) {
            (State::Idle, State::Validating) => true,
            (State::Rendering, State::Done) => true,
            (current, State::Failed(stage)) => current.stage() == Some(stage),
            (current, next) => match (current.stage(), next.stage()) {
                (Some(a), Some(b)) => b.number() == a.number() + 1,
                _ => false,
            },
        }
    }
}
