use callstack_types::Pc;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};

const MAX_IDLE_BUFFERS: usize = 32;

/// Pool of fixed-capacity address buffers shared by concurrent captures.
#[derive(Debug)]
pub struct AddressPool {
    capacity: NonZeroUsize,
    idle: Mutex<Vec<Box<[Pc]>>>,
}

impl AddressPool {
    pub const fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Takes a buffer of exactly `capacity()` addresses. Contents are stale;
    /// only the prefix a walker reports as filled is meaningful.
    pub fn acquire(&self) -> PooledAddresses<'_> {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| vec![Pc::NULL; self.capacity.get()].into_boxed_slice());
        PooledAddresses { pool: self, buf }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, buf: Box<[Pc]>) {
        if buf.len() != self.capacity.get() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from an [`AddressPool`]; returned when dropped.
#[derive(Debug)]
pub struct PooledAddresses<'a> {
    pool: &'a AddressPool,
    buf: Box<[Pc]>,
}

impl Deref for PooledAddresses<'_> {
    type Target = [Pc];

    fn deref(&self) -> &[Pc] {
        &self.buf
    }
}

impl DerefMut for PooledAddresses<'_> {
    fn deref_mut(&mut self) -> &mut [Pc] {
        &mut self.buf
    }
}

impl Drop for PooledAddresses<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
