use crate::choices::UserChoices;

/// Lifecycle of a pre-join screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Editing,
    /// Validation passed; the room-entry handler is running.
    Submitting,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The room-entry handler received the snapshot.
    Submitted,
    /// The snapshot failed validation; nothing happened.
    Rejected,
    /// A previous commit already went through; ignored.
    AlreadySubmitted,
}

pub type SubmitHandler = Box<dyn FnOnce(UserChoices) + Send>;

/// Forwards a validated snapshot to room entry, at most once.
pub struct SubmissionGate {
    on_submit: Option<SubmitHandler>,
    phase: Phase,
}

impl SubmissionGate {
    pub fn new(on_submit: impl FnOnce(UserChoices) + Send + 'static) -> Self {
        Self {
            on_submit: Some(Box::new(on_submit)),
            phase: Phase::Editing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Validate and forward `choices`. `on_phase` sees every transition,
    /// `Submitting` before the handler runs and `Submitted` after.
    pub fn commit(
        &mut self,
        choices: &UserChoices,
        mut on_phase: impl FnMut(Phase),
    ) -> CommitOutcome {
        if self.phase != Phase::Editing {
            tracing::debug!("ignoring commit after submission");
            return CommitOutcome::AlreadySubmitted;
        }
        if !choices.is_valid() {
            tracing::warn!("validation failed with: {choices:?}");
            return CommitOutcome::Rejected;
        }

        self.enter(Phase::Submitting, &mut on_phase);
        if let Some(on_submit) = self.on_submit.take() {
            tracing::info!("submitting choices for {:?}", choices.display_name);
            on_submit(choices.clone());
        }
        self.enter(Phase::Submitted, &mut on_phase);
        CommitOutcome::Submitted
    }

    fn enter(&mut self, phase: Phase, on_phase: &mut impl FnMut(Phase)) {
        self.phase = phase;
        on_phase(phase);
    }
}
