//! Capacity-1 mailbox for actions that need the panel on screen.

use tracing::debug;

#[derive(Debug)]
pub struct VisibilityGate<A> {
    visible: bool,
    pending: Option<A>,
}

impl<A> VisibilityGate<A> {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            pending: None,
        }
    }

    /// Standalone shells start visible; embedded panels wait for the host's
    /// first shown signal.
    pub fn for_host(embedded: bool) -> Self {
        Self::new(!embedded)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn pending(&self) -> Option<&A> {
        self.pending.as_ref()
    }

    /// Returns the action when it may run right now. Otherwise it replaces
    /// whatever was pending.
    #[must_use]
    pub fn ensure_shown(&mut self, action: A) -> Option<A> {
        if self.visible {
            return Some(action);
        }
        if self.pending.replace(action).is_some() {
            debug!(event = "visibility_pending_superseded");
        }
        None
    }

    #[must_use]
    pub fn on_shown(&mut self) -> Option<A> {
        self.visible = true;
        self.pending.take()
    }

    pub fn on_hidden(&mut self) {
        self.visible = false;
    }

    /// Drops the pending action without running it. Visibility is untouched.
    pub fn clear_pending(&mut self) -> Option<A> {
        self.pending.take()
    }
}
