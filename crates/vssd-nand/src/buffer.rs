//! The shared host write buffer.
//!
//! Allocation runs in dispatch context, so the lock is a spinning try-lock
//! with a CPU relax hint rather than a sleeping mutex; a blocking lock here
//! would distort the latency the simulator is trying to measure.

use spin::{Mutex, MutexGuard};

struct BufferState {
    size: u64,
    remaining: u64,
}

/// Byte-granular write buffer accounting, shared across partitions.
pub struct WriteBuffer {
    state: Mutex<BufferState>,
}

impl WriteBuffer {
    pub fn new(size: u64) -> WriteBuffer {
        WriteBuffer {
            state: Mutex::new(BufferState {
                size,
                remaining: size,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        loop {
            if let Some(guard) = self.state.try_lock() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    /// Reserves `bytes`; returns the granted amount, which is either the
    /// full request or 0. There are no partial grants.
    pub fn allocate(&self, bytes: u64) -> u64 {
        let mut state = self.lock();
        debug_assert!(bytes <= state.size);
        if state.remaining < bytes {
            return 0;
        }
        state.remaining -= bytes;
        bytes
    }

    /// Returns a reservation after the host-side writeback completes.
    pub fn release(&self, bytes: u64) {
        let mut state = self.lock();
        state.remaining += bytes;
        debug_assert!(state.remaining <= state.size);
    }

    /// Resets the buffer to fully free.
    pub fn refill(&self) {
        let mut state = self.lock();
        state.remaining = state.size;
    }

    pub fn remaining(&self) -> u64 {
        self.lock().remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_all_or_nothing() {
        let buf = WriteBuffer::new(8192);
        assert_eq!(buf.allocate(4096), 4096);
        assert_eq!(buf.allocate(4096), 4096);
        assert_eq!(buf.allocate(1), 0);
        assert_eq!(buf.remaining(), 0);

        buf.release(4096);
        assert_eq!(buf.remaining(), 4096);
        assert_eq!(buf.allocate(4096), 4096);
    }

    #[test]
    fn refill_restores_full_capacity() {
        let buf = WriteBuffer::new(8192);
        assert_eq!(buf.allocate(8192), 8192);
        buf.refill();
        assert_eq!(buf.remaining(), 8192);
    }
}
