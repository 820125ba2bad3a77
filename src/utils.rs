/// Guard that runs a closure when dropped, including during an unwind.
pub(crate) struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub(crate) fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_on_unwind() {
        use std::sync::atomic::{AtomicBool, Ordering};

        static RAN: AtomicBool = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _guard = defer(|| RAN.store(true, Ordering::SeqCst));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(RAN.load(Ordering::SeqCst));
    }
}
