//! Borrow-and-restore of a source's time window and phase.

use super::{RetimableLink, RetimableSource};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

/// Fields a downstream node may borrow on a generator for one pull.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transient {
    /// Oversampling factor applied to the negotiated window.
    pub timemult: f64,
    /// User phase offset in radians.
    pub phase: f64,
}

impl Default for Transient {
    fn default() -> Self {
        Self {
            timemult: 1.0,
            phase: 0.0,
        }
    }
}

/// Applies a temporary [`Transient`] to a source and puts the previous one back
/// when dropped, whichever way the owning scope is left.
///
/// No borrow of the source is held between `engage` and drop, so the caller is
/// free to pull through the same link in the meantime.
pub struct TransientOverride {
    source: Rc<RefCell<dyn RetimableSource>>,
    saved: Transient,
}

impl TransientOverride {
    pub fn engage(
        link: &RetimableLink,
        adjust: impl FnOnce(&mut dyn RetimableSource, Transient) -> Transient,
    ) -> Option<Self> {
        let source = link.upgrade()?;
        let saved = {
            let mut node = source.borrow_mut();
            let saved = node.transient();
            let next = adjust(&mut *node, saved);
            node.set_transient(next);
            saved
        };
        Some(Self { source, saved })
    }

    pub fn source(&self) -> &Rc<RefCell<dyn RetimableSource>> {
        &self.source
    }

    pub fn saved(&self) -> Transient {
        self.saved
    }
}

impl Drop for TransientOverride {
    fn drop(&mut self) {
        match self.source.try_borrow_mut() {
            Ok(mut node) => node.set_transient(self.saved),
            Err(_) => warn!("[lab] source still borrowed, transient settings not restored"),
        }
    }
}
