//! Fixed-capacity freelist pools for DMA-visible objects (component B).
//!
//! Each pool is a plain array plus a head index. The freelist is threaded
//! through the same storage the hardware consumes: `Link` is the shared
//! prefix every pooled object carries, a `next` index paired with a
//! terminate bit, exactly as EHCI encodes horizontal/next pointers on the
//! wire. Reusing that cell for software bookkeeping avoids doubling the
//! footprint of every queue head and transfer descriptor.
//!
//! Neither `allocate` nor `free` disables interrupts; a caller that may
//! free from ISR context (host-mode reaping, §5) must wrap the call in
//! `critical_section::with`.

/// A freelist link: either "points at pool slot `next`" or "terminated
/// (not on any list)". The same bit the hardware uses to mean "end of
/// ring" means "not currently allocated" here.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Link {
    next: u16,
    terminate: bool,
}

impl Link {
    pub const fn terminated() -> Self {
        Link { next: 0, terminate: true }
    }

    pub const fn to(next: usize) -> Self {
        Link { next: next as u16, terminate: false }
    }

    pub fn index(&self) -> Option<usize> {
        if self.terminate {
            None
        } else {
            Some(self.next as usize)
        }
    }
}

/// Anything that can sit in a pool must expose its freelist cell.
/// A pooled object is never simultaneously on the freelist and
/// referenced by hardware (§3 invariant): once handed out by
/// `allocate`, a caller is responsible for overwriting `link` with
/// whatever the hardware needs it to mean (a horizontal/next pointer),
/// and must restore it to a `Link` before calling `free`.
pub trait Pooled {
    fn link(&self) -> Link;
    fn set_link(&mut self, link: Link);
}

/// A fixed-capacity pool of `N` elements of type `T`.
pub struct Pool<T, const N: usize> {
    storage: [T; N],
    head: Link,
}

impl<T: Pooled + Default, const N: usize> Pool<T, N> {
    /// Build a pool with every slot linked tail-to-terminate, i.e. the
    /// freelist starts full. Terminated by `N - 1`, the pool's *own*
    /// capacity constant — not a sibling pool's, per the bug this spec
    /// calls out avoiding (§9).
    pub fn new() -> Self {
        let mut storage: [T; N] = core::array::from_fn(|_| T::default());
        for i in 0..N {
            let link = if i + 1 < N { Link::to(i + 1) } else { Link::terminated() };
            storage[i].set_link(link);
        }
        let head = if N == 0 { Link::terminated() } else { Link::to(0) };
        Pool { storage, head }
    }
}

impl<T: Pooled, const N: usize> Pool<T, N> {
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Take the head element off the freelist. Only the link+terminate
    /// cell is cleared; the rest of the object is left as-is, matching
    /// the allocation contract in §4.B — callers that need a pristine
    /// object zero it themselves.
    pub fn allocate(&mut self) -> Option<usize> {
        let idx = self.head.index()?;
        self.head = self.storage[idx].link();
        self.storage[idx].set_link(Link::terminated());
        Some(idx)
    }

    /// Push `idx` back onto the head of the freelist.
    pub fn free(&mut self, idx: usize) {
        self.storage[idx].set_link(self.head);
        self.head = Link::to(idx);
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.storage[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.storage[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Slot {
        link: Link,
        tag: u32,
    }

    impl Pooled for Slot {
        fn link(&self) -> Link {
            self.link
        }
        fn set_link(&mut self, link: Link) {
            self.link = link;
        }
    }

    #[test]
    fn allocate_all_then_exhausted() {
        let mut pool: Pool<Slot, 4> = Pool::new();
        let mut got = std::vec::Vec::new();
        for _ in 0..4 {
            got.push(pool.allocate().expect("pool should have free slots"));
        }
        assert!(pool.allocate().is_none(), "pool exhaustion must return None, not block");
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn free_all_then_realloc_succeeds() {
        let mut pool: Pool<Slot, 8> = Pool::new();
        let mut allocated = std::vec::Vec::new();
        for _ in 0..8 {
            allocated.push(pool.allocate().unwrap());
        }
        // Free in a scrambled order; freelist order may differ afterwards
        // but the pool must return to fully-available (§8 invariant).
        for &idx in &[3, 0, 7, 1, 6, 2, 5, 4] {
            pool.free(idx);
        }
        let mut reallocated = std::vec::Vec::new();
        for _ in 0..8 {
            reallocated.push(pool.allocate().expect("pool must be fully available again"));
        }
        assert!(pool.allocate().is_none());
        reallocated.sort_unstable();
        assert_eq!(reallocated, (0..8).collect::<std::vec::Vec<_>>());
    }

    #[test]
    fn allocate_clears_only_the_link_cell() {
        let mut pool: Pool<Slot, 2> = Pool::new();
        pool.get_mut(0).tag = 0xABCD;
        let idx = pool.allocate().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(pool.get(0).tag, 0xABCD, "allocate must not zero caller data");
    }

    #[test]
    fn allocate_terminates_the_returned_slots_own_link() {
        let mut pool: Pool<Slot, 4> = Pool::new();
        // Slots 0..2 are pulled off the freelist first, leaving slot 3 as
        // the pool's structurally-last (already-terminated) one; the bug
        // this guards against only showed up on the other three.
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.get(a).link, Link::terminated());
        assert_eq!(pool.get(b).link, Link::terminated());
    }

    #[test]
    fn distinct_capacity_pools_each_terminate_on_their_own_count() {
        // Regression for the source bug (spec.md §9): a transfer pool must
        // never be terminated using a queue-head pool's capacity constant.
        let qh: Pool<Slot, 4> = Pool::new();
        let td: Pool<Slot, 32> = Pool::new();
        assert_eq!(qh.capacity(), 4);
        assert_eq!(td.capacity(), 32);
        assert_eq!(qh.storage[3].link, Link::terminated());
        assert_eq!(td.storage[31].link, Link::terminated());
    }
}
