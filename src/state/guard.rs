use super::LocalMirror;
use leptos::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

/// Single-flight latch: at most one holder of a `Permit` at a time.
///
/// The latch state is reflected into `UiSelection::creating`.
#[derive(Clone)]
pub(crate) struct SingleFlight {
    engaged: Rc<Cell<bool>>,
    mirror: RwSignal<LocalMirror>,
}

/// Releases the latch when dropped, whichever way the holder exits.
pub(crate) struct Permit {
    latch: SingleFlight,
}

impl SingleFlight {
    pub fn new(mirror: RwSignal<LocalMirror>) -> Self {
        Self {
            engaged: Rc::new(Cell::new(false)),
            mirror,
        }
    }

    #[cfg(test)]
    pub fn is_engaged(&self) -> bool {
        self.engaged.get()
    }

    pub fn try_acquire(&self) -> Option<Permit> {
        if self.engaged.replace(true) {
            return None;
        }
        self.mirror.update(|m| m.selection.creating = true);
        Some(Permit {
            latch: self.clone(),
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.latch.engaged.set(false);
        self.latch.mirror.update(|m| m.selection.creating = false);
    }
}
