//! DMA-visible Queue Head (QH) and Transfer Descriptor (TD) layouts
//! (spec data model §3), 64-byte aligned per EHCI §3.6.
//!
//! The freelist that threads unallocated QHs/TDs together reuses the
//! same horizontal-link / next-pointer cell the hardware consumes once
//! an object is handed out (§9: "retain this layout exactly for cache
//! and footprint reasons"). [`LinkPointer`] is the typed accessor that
//! keeps the two meanings ("DMA pointer + terminate bit" vs. "freelist
//! index + terminate bit") from leaking into each other: nothing
//! outside `to_link`/`from_link` interprets its `address` bits as
//! anything but an opaque 27-bit payload.

use bitfield_struct::bitfield;

use crate::pool::{Link, Pooled};

/// A 32-bit DMA pointer word: a terminate bit plus a 27-bit aligned
/// address (or, while the owning object sits on a freelist, a plain
/// pool index wearing the same bit pattern).
#[bitfield(u32)]
pub struct LinkPointer {
    pub terminate: bool,
    #[bits(4)]
    __reserved: u8,
    #[bits(27)]
    pub address: u32,
}

impl LinkPointer {
    pub const fn terminated() -> Self {
        Self::new().with_terminate(true)
    }

    /// Encode a 32-byte-aligned physical address as a live (non-terminate)
    /// link pointer.
    pub fn from_address(addr: u32) -> Self {
        Self::new().with_terminate(false).with_address(addr >> 5)
    }

    /// Recover the physical address this pointer refers to. Meaningless
    /// while `terminate` is set or while the cell is doing freelist duty.
    pub fn physical_address(self) -> u32 {
        self.address() << 5
    }

    fn from_link(link: Link) -> Self {
        match link.index() {
            Some(idx) => Self::new().with_terminate(false).with_address(idx as u32),
            None => Self::terminated(),
        }
    }

    fn to_link(self) -> Link {
        if self.terminate() {
            Link::terminated()
        } else {
            Link::to(self.address() as usize)
        }
    }
}

/// Endpoint characteristics, the first capability word of a Queue Head.
#[bitfield(u32)]
pub struct Capabilities {
    #[bits(7)]
    pub device_address: u8,
    pub inactivate_on_next_transaction: bool,
    #[bits(4)]
    pub endpoint_number: u8,
    #[bits(2)]
    pub endpoint_speed: u8,
    pub is_control_endpoint: bool,
    #[bits(11)]
    pub max_packet_length: u16,
    pub head_of_reclamation_list: bool,
    #[bits(2)]
    pub nak_count_reload: u8,
    pub data_toggle_control: bool,
    #[bits(2)]
    __reserved: u8,
}

/// Full/low/high speed encodings used in [`Capabilities::endpoint_speed`]
/// (spec.md §6: FS=0, LS=1, HS=2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EndpointSpeed {
    Full = 0,
    Low = 1,
    High = 2,
}

/// Micro-frame split-transaction masks, the second capability word.
#[bitfield(u32)]
pub struct SplitControl {
    #[bits(8)]
    pub interrupt_schedule_mask: u8,
    #[bits(8)]
    pub split_completion_mask: u8,
    #[bits(7)]
    pub hub_address: u8,
    #[bits(7)]
    pub port_number: u8,
    #[bits(2)]
    pub high_bandwidth_multiplier: u8,
}

/// USB PID codes used in [`Token::pid_code`] (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Pid {
    Out = 0,
    In = 1,
    Setup = 2,
}

/// The status/PID/byte-count word shared by a standalone TD and a QH's
/// overlay.
#[bitfield(u32)]
pub struct Token {
    pub ping_state_err: bool,
    pub split_transaction_state: bool,
    pub missed_microframe: bool,
    pub transaction_error: bool,
    pub babble_detected: bool,
    pub data_buffer_error: bool,
    pub halted: bool,
    pub active: bool,
    #[bits(2)]
    pub pid_code: u8,
    #[bits(2)]
    pub error_counter: u8,
    #[bits(3)]
    pub current_page: u8,
    pub interrupt_on_complete: bool,
    #[bits(15)]
    pub total_bytes: u16,
    pub data_toggle: bool,
}

/// Number of 4 KiB physical buffer pages a TD carries (spec.md §3).
pub const BUFFER_PAGE_COUNT: usize = 5;

/// A Transfer Descriptor: next/alternate-next pointers, a status word,
/// and five DMA buffer pages.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub struct TransferDescriptor {
    pub next: LinkPointer,
    pub alternate_next: LinkPointer,
    pub token: Token,
    pub buffer_pages: [u32; BUFFER_PAGE_COUNT],
}

impl Default for TransferDescriptor {
    fn default() -> Self {
        Self {
            next: LinkPointer::terminated(),
            alternate_next: LinkPointer::terminated(),
            token: Token::new(),
            buffer_pages: [0; BUFFER_PAGE_COUNT],
        }
    }
}

impl TransferDescriptor {
    /// Zero the descriptor for reuse, matching the TD-allocation
    /// contract in §4.B: the pool clears only the link cell, so a
    /// caller that needs a pristine object zeroes it explicitly.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_transfer(&mut self, pid: Pid, data_toggle: bool, total_bytes: u16, base_addr: u32) {
        self.alternate_next = LinkPointer::terminated();
        let mut token = Token::new()
            .with_active(true)
            .with_interrupt_on_complete(true)
            .with_pid_code(pid as u8)
            .with_total_bytes(total_bytes)
            .with_data_toggle(data_toggle);
        token = token.with_current_page(0);
        self.token = token;
        for (i, page) in self.buffer_pages.iter_mut().enumerate() {
            *page = base_addr.wrapping_add((i as u32) * 0x1000) & !0xFFF;
        }
        self.buffer_pages[0] = base_addr;
    }

    pub fn is_active(&self) -> bool {
        self.token.active()
    }

    pub fn is_halted(&self) -> bool {
        self.token.halted()
    }

    pub fn has_transaction_error(&self) -> bool {
        self.token.transaction_error() || self.token.babble_detected() || self.token.data_buffer_error()
    }

    /// `max_len - remaining_bytes`, per the host-mode reap formula
    /// (§4.G). `max_len` is the value the descriptor was primed with;
    /// the controller decrements `total_bytes` as it consumes the
    /// buffer, so what remains in the token *is* the remaining count.
    pub fn bytes_transferred(&self, max_len: u16) -> u16 {
        max_len.saturating_sub(self.token.total_bytes())
    }
}

impl Pooled for TransferDescriptor {
    fn link(&self) -> Link {
        self.next.to_link()
    }
    fn set_link(&mut self, link: Link) {
        self.next = LinkPointer::from_link(link);
    }
}

/// A Queue Head: the per-endpoint control block the controller walks
/// on both the device-mode dQH table and the host-mode async ring.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub struct QueueHead {
    pub horizontal_link: LinkPointer,
    pub capabilities: Capabilities,
    pub split_control: SplitControl,
    pub current_td: LinkPointer,
    pub overlay: TransferDescriptor,
    /// Device-mode setup-packet staging area; the controller DMAs an
    /// incoming SETUP transaction here before raising the per-endpoint
    /// setup-status bit (§4.D). Unused by host-mode QHs.
    pub setup_buffer: [u8; 8],
    /// Logical endpoint identity (address + direction), software-only
    /// and never touched by the controller (§3).
    pub back_reference: u32,
}

impl Default for QueueHead {
    fn default() -> Self {
        Self {
            horizontal_link: LinkPointer::terminated(),
            capabilities: Capabilities::new(),
            split_control: SplitControl::new(),
            current_td: LinkPointer::terminated(),
            overlay: TransferDescriptor::default(),
            setup_buffer: [0; 8],
            back_reference: 0,
        }
    }
}

impl QueueHead {
    pub fn configure(
        &mut self,
        device_address: u8,
        endpoint_number: u8,
        speed: EndpointSpeed,
        is_control: bool,
        max_packet_length: u16,
        data_toggle_control_in_software: bool,
    ) {
        self.capabilities = Capabilities::new()
            .with_device_address(device_address & 0x7F)
            .with_endpoint_number(endpoint_number & 0x0F)
            .with_endpoint_speed(speed as u8)
            .with_is_control_endpoint(is_control)
            .with_max_packet_length(max_packet_length & 0x7FF)
            .with_data_toggle_control(data_toggle_control_in_software);
        self.current_td = LinkPointer::terminated();
        self.overlay.reset();
    }

    /// True iff this QH is not linked into any live ring (§3 invariant).
    pub fn is_unlinked(&self) -> bool {
        self.horizontal_link.terminate()
    }
}

impl Pooled for QueueHead {
    fn link(&self) -> Link {
        self.horizontal_link.to_link()
    }
    fn set_link(&mut self, link: Link) {
        self.horizontal_link = LinkPointer::from_link(link);
    }
}

// Both structs are walked by DMA at a fixed stride (EHCI §3.6); a
// layout change that grows past one cache line would silently corrupt
// whatever the pool places next to it.
static_assertions::const_assert_eq!(core::mem::size_of::<TransferDescriptor>(), 64);
static_assertions::const_assert_eq!(core::mem::align_of::<TransferDescriptor>(), 64);
static_assertions::const_assert_eq!(core::mem::size_of::<QueueHead>(), 64);
static_assertions::const_assert_eq!(core::mem::align_of::<QueueHead>(), 64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;

    #[test]
    fn link_pointer_round_trips_through_pool_link() {
        let l = Link::to(17);
        let lp = LinkPointer::from_link(l);
        assert!(!lp.terminate());
        assert_eq!(lp.to_link(), l);

        let term = LinkPointer::terminated();
        assert_eq!(term.to_link(), Link::terminated());
    }

    #[test]
    fn queue_head_horizontal_link_terminate_matches_unlinked() {
        let qh = QueueHead::default();
        assert!(qh.is_unlinked());
    }

    #[test]
    fn transfer_descriptor_bytes_transferred_uses_remaining_count() {
        let mut td = TransferDescriptor::default();
        td.set_transfer(Pid::In, false, 1024, 0x2000_0000);
        // Simulate the controller having consumed the whole buffer.
        td.token = td.token.with_total_bytes(0).with_active(false);
        assert_eq!(td.bytes_transferred(1024), 1024);
        assert!(!td.is_active());
        assert!(!td.is_halted());
        assert!(!td.has_transaction_error());
    }

    #[test]
    fn qh_and_td_pools_use_their_own_capacity_as_freelist_qh() {
        let qh_pool: Pool<QueueHead, 4> = Pool::new();
        let td_pool: Pool<TransferDescriptor, 32> = Pool::new();
        assert_eq!(qh_pool.capacity(), 4);
        assert_eq!(td_pool.capacity(), 32);
    }

    #[test]
    fn capabilities_bitfield_round_trips_fields() {
        let caps = Capabilities::new()
            .with_device_address(0x2A)
            .with_endpoint_number(1)
            .with_endpoint_speed(EndpointSpeed::High as u8)
            .with_is_control_endpoint(true)
            .with_max_packet_length(512);
        assert_eq!(caps.device_address(), 0x2A);
        assert_eq!(caps.endpoint_number(), 1);
        assert_eq!(caps.endpoint_speed(), EndpointSpeed::High as u8);
        assert!(caps.is_control_endpoint());
        assert_eq!(caps.max_packet_length(), 512);
    }
}
