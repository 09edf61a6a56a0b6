//! Dual-role USB 2.0 (EHCI/SEHCI) controller core for the LPC43xx
//! USB0/USB1 block.
//!
//! The crate is split leaf-first: [`regs`] is the typed register
//! façade; [`pool`] and [`qhtd`] are the DMA-visible object model;
//! [`endpoint`] is the per-endpoint prime/flush/stall primitive set;
//! [`device`] is the device-mode bringup/bus-reset/ISR controller;
//! [`resolver`] and [`requests`] implement Chapter 9 enumeration;
//! [`host`] is the host-mode asynchronous queue manager; [`hooks`]
//! composes standard/class/vendor request dispatch.
//!
//! Built for `no_std`; the `test` cfg pulls in `std` so the register
//! and queue-management logic can be exercised without real hardware.
#![cfg_attr(not(test), no_std)]

pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod host;
pub mod pool;
pub mod qhtd;
pub mod regs;
pub mod requests;
pub mod resolver;

pub use error::Error;
pub use regs::RegisterBlock;

/// Reference SoC register base addresses (UM10503 §23). A target board
/// is free to ignore these and construct its own `&'static
/// RegisterBlock` however its memory map requires.
pub const USB0_BASE: usize = 0x4000_6000;
pub const USB1_BASE: usize = 0x4000_7000;

/// Default host-mode pool sizes. Queue-head and transfer-descriptor
/// pools are sized independently — conflating the two constants is the
/// documented source bug this core does not reproduce (see DESIGN.md).
pub const MAX_QUEUE_HEADS: usize = 8;
pub const MAX_TRANSFER_DESCRIPTORS: usize = 32;

/// Board-level configuration passed into [`register_block`]. Picks
/// which of the two USB controllers a `Peripheral` binds to; a board
/// with only one controller wired up just uses the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub base_address: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { base_address: USB0_BASE }
    }
}

/// Borrow a live register block at `config.base_address`.
///
/// # Safety
/// `config.base_address` must be the address of a mapped SEHCI register
/// block, valid for the `'static` lifetime, and not aliased by any
/// other live `&RegisterBlock` for this controller.
pub unsafe fn register_block(config: &Config) -> &'static RegisterBlock {
    unsafe { &*(config.base_address as *const RegisterBlock) }
}

/// Which role a peripheral is brought up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Device,
    Host,
}

/// One hardware controller's role-specific state. A sum type rather
/// than the overlapping union the reference firmware uses (spec
/// redesign note): device and host substates own disjoint storage, and
/// operations are dispatched by role at call sites where the role is
/// statically known — the device ISR, the host scheduler — never by a
/// runtime tag check inside shared logic.
pub enum Role {
    Device(device::Device),
    Host(host::Host<MAX_QUEUE_HEADS, MAX_TRANSFER_DESCRIPTORS>),
}

/// One hardware controller: its register block plus role-specific
/// substate (spec.md §3's "Peripheral").
pub struct Peripheral<'a> {
    pub regs: &'a RegisterBlock,
    pub role: Role,
}

impl<'a> Peripheral<'a> {
    /// Bring the controller up in device mode. `dqh_table_addr` must be
    /// the physical address of a 2048-byte-aligned
    /// [`device::DeviceQueueHeadTable`].
    pub fn new_device(regs: &'a RegisterBlock, dqh_table_addr: u32) -> Result<Self, Error> {
        device::bringup(regs, dqh_table_addr)?;
        Ok(Self { regs, role: Role::Device(device::Device::default()) })
    }

    /// Bring the controller up in host mode with a fresh async
    /// sentinel at `sentinel_addr`.
    pub fn new_host(regs: &'a RegisterBlock, sentinel_addr: u32) -> Self {
        host::bringup(regs, sentinel_addr);
        Self { regs, role: Role::Host(host::Host::new(sentinel_addr)) }
    }

    pub fn device_mut(&mut self) -> Option<&mut device::Device> {
        match &mut self.role {
            Role::Device(d) => Some(d),
            Role::Host(_) => None,
        }
    }

    pub fn host_mut(&mut self) -> Option<&mut host::Host<MAX_QUEUE_HEADS, MAX_TRANSFER_DESCRIPTORS>> {
        match &mut self.role {
            Role::Host(h) => Some(h),
            Role::Device(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_role_rejects_host_accessor() {
        let regs = RegisterBlock::zeroed();
        let table = device::DeviceQueueHeadTable::default();
        let mut peripheral = Peripheral::new_device(&regs, &table as *const _ as u32).unwrap();
        assert!(peripheral.device_mut().is_some());
        assert!(peripheral.host_mut().is_none());
    }

    #[test]
    fn host_role_rejects_device_accessor() {
        let regs = RegisterBlock::zeroed();
        let mut peripheral = Peripheral::new_host(&regs, 0x1000_0000);
        assert!(peripheral.host_mut().is_some());
        assert!(peripheral.device_mut().is_none());
    }
}
