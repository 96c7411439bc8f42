use crate::label::Outcome;
use crate::owner::Owner;
use std::cell::{Cell, RefCell};

/// Owner that records every notification it receives.
#[derive(Default)]
pub(crate) struct RecordingOwner {
    starts: Cell<usize>,
    outcomes: RefCell<Vec<Outcome>>,
}

impl RecordingOwner {
    pub(crate) fn starts(&self) -> usize {
        self.starts.get()
    }

    pub(crate) fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.borrow().clone()
    }
}

impl Owner for RecordingOwner {
    fn on_progress_start(&self) {
        self.starts.set(self.starts.get() + 1);
    }

    fn on_result(&self, outcome: Outcome) {
        self.outcomes.borrow_mut().push(outcome);
    }
}
