//! Per-link mutual exclusion with recursive-safe ownership.
//!
//! Each physical serial link is a shared resource: the on-demand command
//! sender, the parameter poller and the acquisition sequence all write to the
//! same wire and must not interleave their exchanges. A [`Link`] serializes
//! them with scoped acquisition: [`Link::acquire`] returns a guard that
//! releases on drop, on every exit path including errors and cancellation.
//!
//! Acquisition is reentrant for the same [`LinkToken`]: a logical call chain
//! that already owns the link (the sequence controller holds the acquisition
//! link for its whole run) may acquire it again without deadlocking. Inner
//! guards only decrement a depth counter; the outermost guard releases the
//! lock itself.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical call chain for reentrancy purposes.
///
/// Tokens are cheap and process-unique; create one per logical operation
/// (one ad hoc command, one sequence run, one poller pass) and thread a
/// reference through every link acquisition that operation performs.
#[derive(Debug)]
pub struct LinkToken(u64);

impl LinkToken {
    pub fn new() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LinkToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive, recursive-safe ownership of one physical serial link.
#[derive(Clone)]
pub struct Link {
    name: String,
    inner: Arc<Mutex<()>>,
    owner: Arc<AtomicU64>,
    depth: Arc<AtomicUsize>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(())),
            owner: Arc::new(AtomicU64::new(0)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the link for `token`, waiting if another chain holds it.
    ///
    /// Reentrant: if `token` already owns the link the call returns
    /// immediately with a nested guard. Same-token acquisitions happen
    /// within one logical call chain and are therefore never concurrent.
    pub async fn acquire(&self, token: &LinkToken) -> LinkGuard {
        if self.owner.load(Ordering::SeqCst) == token.0 {
            self.depth.fetch_add(1, Ordering::SeqCst);
            return LinkGuard {
                owner: Arc::clone(&self.owner),
                depth: Arc::clone(&self.depth),
                _permit: None,
            };
        }

        let permit = self.inner.clone().lock_owned().await;
        self.owner.store(token.0, Ordering::SeqCst);
        self.depth.store(1, Ordering::SeqCst);
        LinkGuard {
            owner: Arc::clone(&self.owner),
            depth: Arc::clone(&self.depth),
            _permit: Some(permit),
        }
    }
}

/// Scoped ownership of a [`Link`]; releases on drop.
pub struct LinkGuard {
    owner: Arc<AtomicU64>,
    depth: Arc<AtomicUsize>,
    _permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        // The outermost guard clears ownership before its permit unlocks.
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.owner.store(0, Ordering::SeqCst);
        }
    }
}
