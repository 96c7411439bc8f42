//! Terminal stand-in for a results view.

use classify_core::{Outcome, Owner};
use std::cell::{Cell, RefCell};
use std::io::Write;

/// Renders outcomes as text lines (`"92% cat"`) or as one JSON document per outcome.
pub struct ConsoleOwner<W: Write> {
    out: RefCell<W>,
    json: bool,
    busy: Cell<bool>,
    last: RefCell<Option<Outcome>>,
}

impl<W: Write> ConsoleOwner<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out: RefCell::new(out),
            json,
            busy: Cell::new(false),
            last: RefCell::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last.borrow().clone()
    }

    #[cfg(test)]
    pub fn output(&self) -> std::cell::Ref<'_, W> {
        self.out.borrow()
    }

    fn write_outcome(&self, outcome: &Outcome) -> anyhow::Result<()> {
        let mut out = self.out.borrow_mut();
        if self.json {
            serde_json::to_writer(&mut *out, outcome)?;
            writeln!(out)?;
        } else {
            for line in outcome.render_lines() {
                writeln!(out, "{line}")?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl<W: Write> Owner for ConsoleOwner<W> {
    fn on_progress_start(&self) {
        self.busy.set(true);
        tracing::info!("classifying...");
    }

    fn on_result(&self, outcome: Outcome) {
        self.busy.set(false);
        if let Err(e) = self.write_outcome(&outcome) {
            tracing::warn!("could not write result: {e}");
        }
        *self.last.borrow_mut() = Some(outcome);
    }
}
