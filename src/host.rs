//! Host-mode asynchronous queue manager (component G): QH
//! initialization, ring insertion, TD chaining, the pending-transfer
//! list, and ISR reaping (spec.md §4.G).
//!
//! hpm-hal's host-mode driver is an unimplemented stub; the ring/TD
//! bookkeeping here follows `ArthurHeymans-CrabEFI`'s EHCI async-list
//! and qTD chaining instead.

use tock_registers::interfaces::ReadWriteable;

use crate::error::Error;
use crate::pool::Pool;
use crate::qhtd::{EndpointSpeed, Pid, QueueHead, TransferDescriptor};
use crate::regs::{RegisterBlock, USBCMD};

pub type CompletionCallback = fn(user_data: usize, bytes_transferred: u16, halted: bool, transaction_error: bool);

/// Select host mode and point `ASYNCLISTADDR` at the sentinel, mirroring
/// `device::bringup`'s device-mode dQH base write (spec.md §4.G). Must
/// run before [`Host::set_up_async_endpoint`] sets `USBCMD::ASE`, or the
/// controller is enabled to run an async schedule it was never told the
/// location of.
pub fn bringup(regs: &RegisterBlock, sentinel_addr: u32) {
    regs.usbmode.modify(crate::regs::USBMODE::CM::Host);
    regs.endpointlistaddr.set(sentinel_addr);
}

/// A transfer handle returned by [`Host::schedule_transfer`]; opaque to
/// callers, used only to detect stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHandle(usize);

/// Placeholder for the periodic (interrupt/isochronous) frame list.
/// Population and `PERIODICLISTBASE` wiring are out of scope; this
/// exists so host substate has a concrete member for spec.md §3's
/// "periodic list (placeholder)" rather than silently dropping it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeriodicList;

struct PendingEntry {
    qh_index: usize,
    is_in: bool,
    max_len: u16,
    callback: CompletionCallback,
    user_data: usize,
    /// Software-only pending-list link, kept separate from the TD's own
    /// freelist cell so reaping one node never corrupts another's
    /// linkage (spec.md §9's "native references... converted at the
    /// DMA boundary" guidance).
    next: Option<usize>,
}

/// Host-mode peripheral substate (spec.md §3's "Host substate").
pub struct Host<const QH_COUNT: usize, const TD_COUNT: usize> {
    qh_pool: Pool<QueueHead, QH_COUNT>,
    td_pool: Pool<TransferDescriptor, TD_COUNT>,
    sentinel: QueueHead,
    /// Last TD appended to each QH's chain, if any — `None` means the
    /// endpoint is idle and the next transfer must go through
    /// [`crate::endpoint::prime`] directly rather than
    /// [`crate::endpoint::schedule_append`].
    chain_tail: [Option<usize>; QH_COUNT],
    pending_meta: [Option<PendingEntry>; TD_COUNT],
    pending_head: Option<usize>,
    pending_tail: Option<usize>,
    periodic_list: PeriodicList,
}

impl<const QH_COUNT: usize, const TD_COUNT: usize> Default for Host<QH_COUNT, TD_COUNT> {
    fn default() -> Self {
        Self {
            qh_pool: Pool::new(),
            td_pool: Pool::new(),
            sentinel: QueueHead::default(),
            chain_tail: [None; QH_COUNT],
            pending_meta: core::array::from_fn(|_| None),
            pending_head: None,
            pending_tail: None,
            periodic_list: PeriodicList,
        }
    }
}

impl<const QH_COUNT: usize, const TD_COUNT: usize> Host<QH_COUNT, TD_COUNT> {
    /// Seed the pools (both freelists start full) and construct the
    /// async sentinel: a self-looped ring of one.
    pub fn new(sentinel_addr: u32) -> Self {
        let mut host = Self::default();
        host.sentinel.horizontal_link = crate::qhtd::LinkPointer::from_address(sentinel_addr);
        host.sentinel.capabilities = host.sentinel.capabilities.with_head_of_reclamation_list(true);
        host
    }

    /// The periodic-list placeholder (spec.md §3); always empty.
    pub fn periodic_list(&self) -> &PeriodicList {
        &self.periodic_list
    }

    fn qh_addr(&self, idx: usize) -> u32 {
        self.qh_pool.get(idx) as *const QueueHead as u32
    }

    fn td_addr(&self, idx: usize) -> u32 {
        self.td_pool.get(idx) as *const TransferDescriptor as u32
    }

    /// Allocate (or reuse) a QH for `device_addr`/`ep_num`, populate its
    /// endpoint-characteristics fields, and splice it into the async
    /// ring if it isn't linked yet (spec.md §4.G).
    pub fn set_up_async_endpoint(
        &mut self,
        regs: &RegisterBlock,
        existing_qh: Option<usize>,
        device_addr: u8,
        ep_num: u8,
        speed: EndpointSpeed,
        is_control: bool,
        handle_data_toggle_in_hw: bool,
        max_packet: u16,
    ) -> Result<usize, Error> {
        let qh_index = match existing_qh {
            Some(idx) => idx,
            None => self.qh_pool.allocate().ok_or(Error::PoolExhausted)?,
        };

        regs.usbcmd.modify(USBCMD::ASE::CLEAR);

        let qh = self.qh_pool.get_mut(qh_index);
        qh.configure(
            device_addr,
            ep_num,
            speed,
            is_control && !matches!(speed, EndpointSpeed::High),
            max_packet,
            !handle_data_toggle_in_hw,
        );

        if qh.is_unlinked() {
            let new_addr = self.qh_addr(qh_index);
            let sentinel_next = self.sentinel.horizontal_link;
            self.qh_pool.get_mut(qh_index).horizontal_link = sentinel_next;
            self.sentinel.horizontal_link = crate::qhtd::LinkPointer::from_address(new_addr);
        }

        regs.usbcmd.modify(USBCMD::ASE::SET);
        Ok(qh_index)
    }

    /// Allocate a TD, fill its buffer pages and token, and append it to
    /// `qh`'s overlay chain under an IRQ-disabled critical section
    /// (spec.md §4.G, §5's append-path ordering guarantee).
    pub fn schedule_transfer(
        &mut self,
        regs: &RegisterBlock,
        qh_index: usize,
        pid: Pid,
        data_toggle: bool,
        data_ptr: u32,
        max_len: u16,
        callback: CompletionCallback,
        user_data: usize,
    ) -> Result<TransferHandle, Error> {
        let td_index = self.td_pool.allocate().ok_or(Error::PoolExhausted)?;
        self.td_pool.get_mut(td_index).reset();
        self.td_pool.get_mut(td_index).set_transfer(pid, data_toggle, max_len, data_ptr);
        let td_addr = self.td_addr(td_index);
        // The PRIME/STAT/ATDTW status bit is keyed by queue-head slot and
        // transfer direction, not by the downstream device's own endpoint
        // number — each async-ring slot owns one bit pair, shared across
        // whichever device/endpoint its QH currently represents.
        let ep = crate::endpoint::EndpointAddress::new(qh_index as u8, matches!(pid, Pid::In));

        critical_section::with(|_cs| match self.chain_tail[qh_index] {
            None => {
                let qh = self.qh_pool.get_mut(qh_index);
                crate::endpoint::prime(regs, qh, ep, td_addr);
            }
            Some(prev_idx) => {
                let must_prime =
                    crate::endpoint::schedule_append(regs, ep, &mut self.td_pool.get_mut(prev_idx).next, td_addr);
                if must_prime {
                    let qh = self.qh_pool.get_mut(qh_index);
                    crate::endpoint::prime(regs, qh, ep, td_addr);
                }
            }
        });
        self.chain_tail[qh_index] = Some(td_index);

        self.pending_meta[td_index] =
            Some(PendingEntry { qh_index, is_in: ep.is_in, max_len, callback, user_data, next: None });
        match self.pending_tail {
            Some(tail) => self.pending_meta[tail].as_mut().unwrap().next = Some(td_index),
            None => self.pending_head = Some(td_index),
        }
        self.pending_tail = Some(td_index);

        Ok(TransferHandle(td_index))
    }

    /// Cancel a still-pending transfer. Flush is the only cancellation
    /// primitive the hardware exposes: a packet already on the wire
    /// completes naturally, and [`Host::reap`] tells the two outcomes
    /// apart via the halted bit (spec.md §5's cancellation note).
    pub fn cancel_transfer(&mut self, regs: &RegisterBlock, handle: TransferHandle) -> Result<(), Error> {
        let td_index = handle.0;
        let meta = self.pending_meta[td_index].as_ref().ok_or(Error::UnknownTransfer)?;
        let ep = crate::endpoint::EndpointAddress::new(meta.qh_index as u8, meta.is_in);
        crate::endpoint::flush(regs, ep)
    }

    /// For each pending transfer whose TD is no longer active, invoke
    /// its completion callback and return the TD to its pool.
    ///
    /// The cursor variables are reassigned in *both* branches of the
    /// active/inactive check, and the completed branch snapshots
    /// `next` before freeing — preserved deliberately (spec.md §9):
    /// advancing over a freed node after its storage has been recycled
    /// as a freelist link would walk into garbage.
    pub fn reap(&mut self) {
        let mut prev: Option<usize> = None;
        let mut cur = self.pending_head;

        while let Some(idx) = cur {
            let active = self.td_pool.get(idx).is_active();
            if active {
                prev = Some(idx);
                cur = self.pending_meta[idx].as_ref().unwrap().next;
            } else {
                let next = self.pending_meta[idx].as_ref().unwrap().next;
                let meta = self.pending_meta[idx].take().unwrap();

                let bytes_transferred = self.td_pool.get(idx).bytes_transferred(meta.max_len);
                let halted = self.td_pool.get(idx).is_halted();
                let transaction_error = self.td_pool.get(idx).has_transaction_error();
                (meta.callback)(meta.user_data, bytes_transferred, halted, transaction_error);

                match prev {
                    Some(p) => self.pending_meta[p].as_mut().unwrap().next = next,
                    None => self.pending_head = next,
                }
                if self.pending_tail == Some(idx) {
                    self.pending_tail = prev;
                }
                if self.chain_tail[meta.qh_index] == Some(idx) {
                    self.chain_tail[meta.qh_index] = None;
                }
                self.td_pool.free(idx);
                cur = next;
            }
        }
    }
}
