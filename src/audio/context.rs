//! Process-wide PipeWire library lifetime

use parking_lot::Mutex;
use pipewire as pw;

static REFCOUNT: Mutex<usize> = Mutex::new(0);

/// Refcounted handle on the PipeWire library
///
/// The first guard calls `pw::init`, the last one dropped calls
/// `pw::deinit`. Every thread touching PipeWire holds one for its whole
/// lifetime.
pub struct PwInitGuard(());

impl PwInitGuard {
    pub fn acquire() -> Self {
        let mut refs = REFCOUNT.lock();
        if *refs == 0 {
            pw::init();
        }
        *refs += 1;
        Self(())
    }
}

impl Drop for PwInitGuard {
    fn drop(&mut self) {
        let mut refs = REFCOUNT.lock();
        *refs -= 1;
        if *refs == 0 {
            // No live guards means no live PipeWire objects.
            unsafe {
                pw::deinit();
            }
        }
    }
}
