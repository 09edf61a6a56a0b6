//! Endpoint primitives (component C): prime, the ATDTW append race
//! handler, flush, stall, disable, and the ready/complete status reads
//! that everything above this layer is built from (spec.md §4.C).
//!
//! Every function here takes the register block and the dQH slot it
//! operates on explicitly rather than owning them, so device-mode
//! (§4.D) and a future host-mode control pipe can share the same
//! primitives over different storage.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::error::Error;
use crate::qhtd::{LinkPointer, QueueHead};
use crate::regs::{RegisterBlock, ENDPTCTRL, USBCMD};

/// Hardware-acknowledgement busy-waits are bounded by this many polls
/// rather than left unbounded (spec.md §9).
pub const SPIN_BUDGET: u32 = 50_000;

/// An endpoint address: 0-15, plus direction (IN = true).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress {
    pub number: u8,
    pub is_in: bool,
}

impl EndpointAddress {
    pub const fn new(number: u8, is_in: bool) -> Self {
        Self { number, is_in }
    }

    /// Index into the dQH table: `(endpoint_number * 2) + is_in` (§3).
    pub const fn dqh_index(self) -> usize {
        (self.number as usize) * 2 + (self.is_in as usize)
    }

    /// Bit position in the 32-bit PRIME/FLUSH/STAT/COMPLETE registers,
    /// where IN endpoints occupy the high half and OUT the low half.
    const fn status_bit(self) -> u32 {
        1u32 << (self.number as u32 + if self.is_in { 16 } else { 0 })
    }

    const fn mask(self) -> u32 {
        self.status_bit()
    }
}

/// Write `first_td` as the QH's next-dTD pointer, clear the overlay's
/// active/halted flags, then set the corresponding PRIME bit.
///
/// Caller must ensure the endpoint is not currently priming: either it
/// is idle, or [`schedule_append`] is used instead (§4.C).
pub fn prime(regs: &RegisterBlock, qh: &mut QueueHead, ep: EndpointAddress, first_td_addr: u32) {
    qh.overlay.next = LinkPointer::from_address(first_td_addr);
    qh.overlay.token = qh.overlay.token.with_active(false).with_halted(false);
    regs.endptprime.set(regs.endptprime.get() | ep.mask());
}

/// Link `tail.next = new_td` then run the ATDTW handshake to decide
/// whether the hardware will pick up the appended TD on its own.
/// Returns `true` if the caller must now [`prime`] `new_td_addr`
/// explicitly — the hardware had already drained the previous chain
/// before the link update became visible (spec.md §4.C).
///
/// `tail_next` is a mutable view of the tail TD's `next` pointer field
/// (either a standalone TD's field or the QH overlay's, depending on
/// whether the chain is currently empty). It is never the same object
/// as the QH passed to the follow-up [`prime`] call, so this function
/// takes no QH reference itself — that keeps the two mutable borrows
/// disjoint at the call site.
#[must_use]
pub fn schedule_append(regs: &RegisterBlock, ep: EndpointAddress, tail_next: &mut LinkPointer, new_td_addr: u32) -> bool {
    *tail_next = LinkPointer::from_address(new_td_addr);

    for _ in 0..SPIN_BUDGET {
        regs.usbcmd.modify(USBCMD::ATDTW::SET);
        let ready = regs.endptstat_bit(ep.mask());
        if regs.usbcmd.is_set(USBCMD::ATDTW) {
            // Coherent observation: ATDTW was still set while we sampled
            // "ready", so nothing raced us between the two reads.
            regs.usbcmd.modify(USBCMD::ATDTW::CLEAR);
            return !ready;
        }
        // The controller cleared ATDTW out from under us (it finished
        // draining the previous chain mid-check); retry the handshake.
    }
    false
}

/// Issue FLUSH for the endpoint and busy-wait for the flush to
/// complete, bounded by [`SPIN_BUDGET`].
///
/// An endpoint with nothing primed and no transfer in flight has
/// nothing for FLUSH to cancel, so this returns immediately rather than
/// waiting on a hardware acknowledgement that was never going to arrive
/// (spec.md §5's cancellation sequence only applies once something was
/// primed).
pub fn flush(regs: &RegisterBlock, ep: EndpointAddress) -> Result<(), Error> {
    if regs.endptprime.get() & ep.mask() == 0 && !regs.endptstat_bit(ep.mask()) {
        return Ok(());
    }
    regs.endptflush.set(regs.endptflush.get() | ep.mask());
    for _ in 0..SPIN_BUDGET {
        if regs.endptflush.get() & ep.mask() == 0 {
            return Ok(());
        }
    }
    if regs.endptflush.get() & ep.mask() == 0 {
        Ok(())
    } else {
        Err(Error::ControllerUnresponsive)
    }
}

/// Set both RXS and TXS (stall is defined on the endpoint pair, not a
/// single direction). For endpoint 0, also flush both sides afterward
/// — the device-mode protocol stall (§4.C).
pub fn stall(regs: &RegisterBlock, ep_num: usize) -> Result<(), Error> {
    regs.endptctrl[ep_num].modify(ENDPTCTRL::RXS::SET + ENDPTCTRL::TXS::SET);
    if ep_num == 0 {
        flush(regs, EndpointAddress::new(0, false))?;
        flush(regs, EndpointAddress::new(0, true))?;
    }
    Ok(())
}

pub fn clear_stall(regs: &RegisterBlock, ep_num: usize) {
    regs.endptctrl[ep_num].modify(ENDPTCTRL::RXS::CLEAR + ENDPTCTRL::TXS::CLEAR);
}

/// Clear the enable bit, flush the hardware queue, and clear any
/// pending complete bit for this direction (§4.C).
pub fn disable(regs: &RegisterBlock, ep: EndpointAddress) -> Result<(), Error> {
    if ep.is_in {
        regs.endptctrl[ep.number as usize].modify(ENDPTCTRL::TXE::CLEAR);
    } else {
        regs.endptctrl[ep.number as usize].modify(ENDPTCTRL::RXE::CLEAR);
    }
    regs.endptcomplete.set(regs.endptcomplete.get() | ep.mask());
    flush(regs, ep)
}

pub fn is_ready(regs: &RegisterBlock, ep: EndpointAddress) -> bool {
    regs.endptstat_bit(ep.mask())
}

pub fn is_complete(regs: &RegisterBlock, ep: EndpointAddress) -> bool {
    regs.endptcomplete.get() & ep.mask() != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_address_dqh_index_interleaves_out_then_in() {
        assert_eq!(EndpointAddress::new(0, false).dqh_index(), 0);
        assert_eq!(EndpointAddress::new(0, true).dqh_index(), 1);
        assert_eq!(EndpointAddress::new(1, false).dqh_index(), 2);
        assert_eq!(EndpointAddress::new(1, true).dqh_index(), 3);
    }

    #[test]
    fn endpoint_address_status_bit_splits_in_and_out_halves() {
        assert_eq!(EndpointAddress::new(0, false).mask(), 1 << 0);
        assert_eq!(EndpointAddress::new(0, true).mask(), 1 << 16);
        assert_eq!(EndpointAddress::new(3, false).mask(), 1 << 3);
        assert_eq!(EndpointAddress::new(3, true).mask(), 1 << 19);
    }

    #[test]
    fn prime_sets_overlay_next_and_clears_active_halted() {
        let regs = RegisterBlock::zeroed();
        let mut qh = QueueHead::default();
        qh.overlay.token = qh.overlay.token.with_active(true).with_halted(true);
        prime(&regs, &mut qh, EndpointAddress::new(2, true), 0x2000_0100);
        assert!(!qh.overlay.token.active());
        assert!(!qh.overlay.token.halted());
        assert_eq!(qh.overlay.next.physical_address(), 0x2000_0100);
        assert_eq!(regs.endptprime.get(), 1 << 18);
    }
}
