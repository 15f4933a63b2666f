//! Pure merge of status observations into UI progress.
//!
//! The timer and the push channel feed the same [`ReconcileState`], so the
//! result does not depend on which channel delivers an update first.

use serde::Serialize;

use crate::pipeline::types::{Stage, StageStatus, StatusUpdate, MAX_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Running,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing new.
    Unchanged,
    /// At least one stage completed; `step` is the new UI step.
    Advanced { step: u8 },
    /// The job reached `published`. Reported once.
    Finished,
    /// The state was already terminal.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    step: u8,
    completed: Vec<Stage>,
    phase: Phase,
}

impl ReconcileState {
    pub fn step(&self) -> u8 {
        self.step
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Published
    }

    pub fn merge(&mut self, update: &StatusUpdate) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }

        let mut changed = false;
        for (stage, status) in &update.stages {
            if *status != StageStatus::Completed || self.completed.contains(stage) {
                continue;
            }
            self.completed.push(*stage);
            self.step = self.step.max(stage.step());
            changed = true;
        }
        self.completed.sort();

        if update.published {
            self.step = MAX_STEP;
            self.phase = Phase::Published;
            return Transition::Finished;
        }
        if changed {
            Transition::Advanced { step: self.step }
        } else {
            Transition::Unchanged
        }
    }
}
