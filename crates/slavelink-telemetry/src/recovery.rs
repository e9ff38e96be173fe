use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

/// External power-loss recovery collaborator.
pub trait RecoveryHook: Send + Sync {
    /// Persist whatever is needed to resume after power comes back.
    fn backup(&self);
}

impl<F> RecoveryHook for F
where
    F: Fn() + Send + Sync,
{
    fn backup(&self) {
        self()
    }
}

/// Runs the recovery hook at most once per power cycle.
///
/// The guard starts armed. The first interruption notice fires the hook and
/// disarms it; further notices are ignored until [`PowerCycleGuard::power_on`].
pub struct PowerCycleGuard {
    armed: AtomicBool,
    hook: Box<dyn RecoveryHook>,
}

impl PowerCycleGuard {
    pub fn new(hook: impl RecoveryHook + 'static) -> Self {
        Self {
            armed: AtomicBool::new(true),
            hook: Box::new(hook),
        }
    }

    /// A guard whose hook does nothing.
    pub fn disabled() -> Self {
        Self::new(|| {})
    }

    /// Handle a power-interruption notice. Returns true if the hook ran.
    pub fn notify(&self) -> bool {
        if self.armed.swap(false, Ordering::AcqRel) {
            info!("power interruption, running recovery backup");
            self.hook.backup();
            true
        } else {
            debug!("power interruption already handled this cycle");
            false
        }
    }

    /// Re-arm after the board reports power restored.
    pub fn power_on(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for PowerCycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerCycleGuard")
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn counting_guard() -> (PowerCycleGuard, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let guard = PowerCycleGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (guard, calls)
    }

    #[test]
    fn second_notice_is_a_no_op() {
        let (guard, calls) = counting_guard();
        assert!(guard.notify());
        assert!(!guard.notify());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn power_on_rearms() {
        let (guard, calls) = counting_guard();
        guard.notify();
        guard.power_on();
        assert!(guard.is_armed());
        guard.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
