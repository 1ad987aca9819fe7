use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight guard: at most one holder per flag. Released on drop, so an
/// early return or error leaves the flag clear for the next caller.
pub(crate) struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_drop() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag).unwrap();
        assert!(FlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(FlightGuard::acquire(&flag).is_some());
    }
}
