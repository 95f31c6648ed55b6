use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::datagram::{Datagram, Role};
use crate::error::Result;

/// Number of recycled buffers each pool keeps.
pub const POOL_DEPTH: usize = 2;

/// Counters describing how a pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated because no slot held a matching one.
    pub fresh: u64,
    /// Buffers handed out from a slot.
    pub reused: u64,
    /// Released buffers dropped because every slot was occupied.
    pub discarded: u64,
}

/// A small recycling cache of datagram buffers.
///
/// Buffers fall into two size classes: header-only (no payload capacity)
/// and full. Each class has [`POOL_DEPTH`] slots. Slots are only ever
/// touched with `try_lock`: a contended slot is treated as a miss, so the
/// pool never blocks and never hands one buffer to two holders. A full
/// buffer whose payload capacity does not match a request is put back
/// rather than resized.
#[derive(Debug)]
pub struct AllocationPool<R: Role> {
    header_only: [Slot<R>; POOL_DEPTH],
    full: [Slot<R>; POOL_DEPTH],
    fresh: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

type Slot<R> = Mutex<Option<Datagram<R>>>;

fn offer<R: Role>(slot: &Slot<R>, datagram: Datagram<R>) -> Option<Datagram<R>> {
    match slot.try_lock() {
        Some(mut guard) if guard.is_none() => {
            *guard = Some(datagram);
            None
        }
        _ => Some(datagram),
    }
}

fn take<R: Role>(slot: &Slot<R>) -> Option<Datagram<R>> {
    slot.try_lock().and_then(|mut guard| guard.take())
}

impl<R: Role> AllocationPool<R> {
    pub fn new() -> Self {
        Self {
            header_only: std::array::from_fn(|_| Mutex::new(None)),
            full: std::array::from_fn(|_| Mutex::new(None)),
            fresh: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn class(&self, payload_alloc: usize) -> &[Slot<R>; POOL_DEPTH] {
        if payload_alloc == 0 {
            &self.header_only
        } else {
            &self.full
        }
    }

    /// Take a recycled buffer with exactly `payload_alloc` bytes of payload
    /// capacity, if one is available.
    pub fn try_alloc(&self, payload_alloc: usize) -> Option<Datagram<R>> {
        let slots = self.class(payload_alloc);
        for index in 0..POOL_DEPTH {
            let Some(mut datagram) = take(&slots[index]) else {
                continue;
            };
            if datagram.allocated_payload() == payload_alloc {
                datagram.reset_header();
                self.reused.fetch_add(1, Ordering::Relaxed);
                return Some(datagram);
            }
            trace!(slot = index, payload_alloc, "pooled buffer size mismatch");
            // Own slot first, then the other.
            let leftover = offer(&slots[index], datagram)
                .and_then(|datagram| offer(&slots[(index + 1) % POOL_DEPTH], datagram));
            if leftover.is_some() {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
        None
    }

    /// A buffer with `payload_alloc` bytes of payload capacity, recycled when possible.
    pub fn alloc(&self, payload_alloc: usize) -> Result<Datagram<R>> {
        if let Some(datagram) = self.try_alloc(payload_alloc) {
            return Ok(datagram);
        }
        let datagram = Datagram::new(payload_alloc)?;
        self.fresh.fetch_add(1, Ordering::Relaxed);
        Ok(datagram)
    }

    /// Like [`alloc`](Self::alloc), but the buffer returns to the pool when
    /// the guard is dropped.
    pub fn alloc_scoped(self: &Arc<Self>, payload_alloc: usize) -> Result<Pooled<R>> {
        let datagram = self.alloc(payload_alloc)?;
        Ok(Pooled {
            pool: Arc::clone(self),
            datagram: Some(datagram),
        })
    }

    /// Offer a buffer back to its size class. It is dropped when both slots
    /// are occupied or contended.
    pub fn release(&self, datagram: Datagram<R>) {
        let mut leftover = Some(datagram);
        for slot in self.class(leftover.as_ref().map_or(0, Datagram::allocated_payload)) {
            match leftover.take() {
                Some(datagram) => leftover = offer(slot, datagram),
                None => break,
            }
        }
        if leftover.is_some() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of buffers currently held in slots, both classes.
    pub fn available(&self) -> usize {
        self.header_only
            .iter()
            .chain(self.full.iter())
            .filter(|slot| slot.try_lock().is_some_and(|guard| guard.is_some()))
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            fresh: self.fresh.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<R: Role> Default for AllocationPool<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// A pooled datagram that is released back to its pool on drop.
#[derive(Debug)]
pub struct Pooled<R: Role> {
    pool: Arc<AllocationPool<R>>,
    datagram: Option<Datagram<R>>,
}

impl<R: Role> Pooled<R> {
    /// Detach the datagram from the pool.
    pub fn into_inner(mut self) -> Datagram<R> {
        match self.datagram.take() {
            Some(datagram) => datagram,
            None => unreachable!("pooled datagram taken before drop"),
        }
    }
}

impl<R: Role> Deref for Pooled<R> {
    type Target = Datagram<R>;

    fn deref(&self) -> &Datagram<R> {
        match &self.datagram {
            Some(datagram) => datagram,
            None => unreachable!("pooled datagram taken before drop"),
        }
    }
}

impl<R: Role> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut Datagram<R> {
        match &mut self.datagram {
            Some(datagram) => datagram,
            None => unreachable!("pooled datagram taken before drop"),
        }
    }
}

impl<R: Role> Drop for Pooled<R> {
    fn drop(&mut self) {
        if let Some(datagram) = self.datagram.take() {
            self.pool.release(datagram);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagram::{Request, Response};
    use std::thread;

    #[test]
    fn steady_state_reuses_buffers() {
        let pool = Arc::new(AllocationPool::<Response>::new());
        for _ in 0..1000 {
            let mut d = pool.alloc_scoped(0).unwrap();
            d.set_read(0);
        }
        let stats = pool.stats();
        assert!(stats.fresh <= (POOL_DEPTH + 1) as u64, "{stats:?}");
        assert_eq!(stats.reused, 999);
    }

    #[test]
    fn size_classes_do_not_evict_each_other() {
        let pool = Arc::new(AllocationPool::<Request>::new());
        for _ in 0..100 {
            let header = pool.alloc_scoped(0).unwrap();
            let full = pool.alloc_scoped(16).unwrap();
            assert_eq!(header.allocated_payload(), 0);
            assert_eq!(full.allocated_payload(), 16);
        }
        assert_eq!(pool.stats().fresh, 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn reused_buffer_has_clean_header() {
        let pool = AllocationPool::<Request>::new();
        let mut d = pool.alloc(4).unwrap();
        d.set_write(3);
        d.set_address(0x40).unwrap();
        d.set_payload(&[1, 2, 3, 4]).unwrap();
        pool.release(d);

        let d = pool.alloc(4).unwrap();
        assert_eq!(d.header(), &[0x55, 0xAA, 0, 0, 0]);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn mismatched_size_is_put_back() {
        let pool = AllocationPool::<Response>::new();
        pool.release(Datagram::new(8).unwrap());

        let small = pool.alloc(2).unwrap();
        assert_eq!(small.allocated_payload(), 2);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.stats().fresh, 1);

        let big = pool.alloc(8).unwrap();
        assert_eq!(big.allocated_payload(), 8);
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn release_beyond_depth_discards() {
        let pool = AllocationPool::<Response>::new();
        for _ in 0..POOL_DEPTH + 2 {
            pool.release(Datagram::new(0).unwrap());
        }
        assert_eq!(pool.available(), POOL_DEPTH);
        assert_eq!(pool.stats().discarded, 2);

        pool.release(Datagram::new(3).unwrap());
        assert_eq!(pool.available(), POOL_DEPTH + 1);
    }

    #[test]
    fn into_inner_detaches_from_pool() {
        let pool = Arc::new(AllocationPool::<Request>::new());
        let d = pool.alloc_scoped(1).unwrap().into_inner();
        assert_eq!(d.allocated_payload(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn oversize_allocation_fails() {
        let pool = AllocationPool::<Request>::new();
        assert!(pool.alloc(256).is_err());
    }

    #[test]
    fn concurrent_use_never_shares_a_buffer() {
        let pool = Arc::new(AllocationPool::<Response>::new());
        let handles: Vec<_> = (0..4u8)
            .map(|id| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..500u16 {
                        let mut d = pool.alloc_scoped(1).unwrap();
                        let tag = id.wrapping_mul(61).wrapping_add(i as u8);
                        d.set_payload(&[tag]).unwrap();
                        d.set_address(id as usize).unwrap();
                        thread::yield_now();
                        assert_eq!(d.payload(), &[tag]);
                        assert_eq!(d.address(), id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.available() <= POOL_DEPTH);
    }
}
