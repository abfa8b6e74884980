//! Single-supervisor guard

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::error::SupervisorError;

static PROCESS_SLOT: LazyLock<SupervisorSlot> = LazyLock::new(SupervisorSlot::new);

/// At most one live supervisor may hold a slot
///
/// Services use [`SupervisorSlot::process`]; tests create their own slot so
/// they can run in parallel.
#[derive(Debug, Clone, Default)]
pub struct SupervisorSlot {
    taken: Arc<AtomicBool>,
}

impl SupervisorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot shared by the whole process
    pub fn process() -> Self {
        PROCESS_SLOT.clone()
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::SeqCst)
    }

    pub(crate) fn claim(&self) -> Result<SlotGuard, SupervisorError> {
        self.taken
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SupervisorError::AlreadyExists)?;
        Ok(SlotGuard {
            taken: self.taken.clone(),
        })
    }
}

/// Releases the slot on drop
#[derive(Debug)]
pub(crate) struct SlotGuard {
    taken: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.taken.store(false, Ordering::SeqCst);
    }
}
