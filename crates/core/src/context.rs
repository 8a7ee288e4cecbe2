//! Cancellation context
//!
//! Every operation takes a `Context` and checks it before issuing a store
//! request, failing fast with `Canceled`. Cancelling a context also cancels
//! every child derived from it; a child may carry a tighter deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{TallyError, TallyResult};

#[derive(Debug)]
struct Inner {
    canceled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// Cancellation and deadline carrier, cheap to clone
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never done unless canceled explicitly
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Derive a child context that inherits this one's cancellation
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    /// Derive a child context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derive a child context that expires at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                deadline,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    /// Earliest deadline along the parent chain
    pub fn deadline(&self) -> Option<Instant> {
        let own = self.inner.deadline;
        let parent = self.inner.parent.as_ref().and_then(|p| p.deadline());
        match (own, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the context is canceled or past its deadline
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Fail with `Canceled` if the context is done
    pub fn check(&self) -> TallyResult<()> {
        if self.inner.canceled.load(Ordering::SeqCst) {
            return Err(TallyError::canceled("context canceled"));
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(TallyError::canceled("deadline exceeded"));
            }
        }
        match &self.inner.parent {
            Some(parent) => parent.check(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.check(), Err(TallyError::Canceled { .. })));
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_millis(1));
        let err = ctx.check().unwrap_err();
        assert_eq!(err, TallyError::canceled("deadline exceeded"));
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let outer = Context::background().with_timeout(Duration::from_secs(1));
        let inner = outer.with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());
    }
}
