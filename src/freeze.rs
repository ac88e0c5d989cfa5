//! Process-wide "freeze" toggle.
//!
//! While frozen, tunnel forwarders keep reading (and sniffing/logging)
//! but stop moving bytes to the peer's write buffer. The flag is the
//! only state shared between the terminal thread and every tunnel
//! task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloneable handle to the shared freeze flag.
#[derive(Clone, Default)]
pub struct Freeze(Arc<AtomicBool>);

impl Freeze {
    pub fn new() -> Self {
        Freeze(Arc::new(AtomicBool::new(false)))
    }

    /// Flip the flag and return its new value.
    pub fn toggle(&self) -> bool {
        // Relaxed is sufficient: a stale read only delays forwarding
        // by at most one event cycle, which is the spec's own bound.
        let prev = self.0.fetch_xor(true, Ordering::Relaxed);
        !prev
    }

    pub fn is_frozen(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
