//! Device-mode controller (component D): bringup, bus reset, address
//! assignment, and the ISR top-half that demultiplexes setup and
//! transfer-complete events to its caller (spec.md §4.D).
//!
//! PHY enablement, clock gating, and pin muxing are an external
//! collaborator's responsibility (spec.md §1) — bringup here only
//! covers the controller's own registers.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::LocalRegisterCopy;

use crate::descriptor::SetupPacket;
use crate::endpoint::{self, EndpointAddress};
use crate::error::Error;
use crate::qhtd::QueueHead;
use crate::regs::{RegisterBlock, DEVICEADDR, ENDPTCTRL_COUNT, USBCMD, USBINTR, USBMODE, USBSTS};

/// Number of logical endpoints this controller exposes, one
/// `ENDPTCTRL` register each (spec.md §6).
pub const ENDPOINT_COUNT: usize = ENDPTCTRL_COUNT;

/// `2 * ENDPOINT_COUNT`, ordered `(ep0_out, ep0_in, ep1_out, ep1_in, …)`
/// (spec.md §3/§6).
pub const DQH_COUNT: usize = ENDPOINT_COUNT * 2;

const BRINGUP_SPIN_BUDGET: u32 = 50_000;

/// The device-mode dQH table: contiguous, 2048-byte aligned, indexed by
/// [`EndpointAddress::dqh_index`].
#[repr(C, align(2048))]
pub struct DeviceQueueHeadTable {
    pub entries: [QueueHead; DQH_COUNT],
}

impl Default for DeviceQueueHeadTable {
    fn default() -> Self {
        Self { entries: core::array::from_fn(|_| QueueHead::default()) }
    }
}

impl DeviceQueueHeadTable {
    pub fn get(&self, ep: EndpointAddress) -> &QueueHead {
        &self.entries[ep.dqh_index()]
    }

    pub fn get_mut(&mut self, ep: EndpointAddress) -> &mut QueueHead {
        &mut self.entries[ep.dqh_index()]
    }
}

/// Device-mode peripheral substate (spec.md §3's "Device substate").
pub struct Device {
    pub dqh: DeviceQueueHeadTable,
    /// Setup packet cache, duplicated across an endpoint pair's two
    /// dQH slots so the standard-request engine can read it from
    /// whichever direction the data stage uses (spec.md §9).
    setup_cache: [SetupPacket; DQH_COUNT],
    pub address: u8,
    pub active_configuration: Option<u8>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            dqh: DeviceQueueHeadTable::default(),
            setup_cache: [SetupPacket::default(); DQH_COUNT],
            address: 0,
            active_configuration: None,
        }
    }
}

impl Device {
    pub fn setup_packet(&self, ep: EndpointAddress) -> SetupPacket {
        self.setup_cache[ep.dqh_index()]
    }
}

/// Observer hooks the ISR top-half dispatches to. A standard-request
/// engine implements `setup_complete`/`transfer_complete`; the rest are
/// informational (spec.md §4.D).
pub trait DeviceEvents {
    fn setup_complete(&mut self, regs: &RegisterBlock, device: &mut Device, ep_num: u8, setup: SetupPacket);
    fn transfer_complete(&mut self, device: &mut Device, ep: EndpointAddress);
    fn port_status_changed(&mut self, device: &mut Device) {
        let _ = device;
    }
    fn suspended(&mut self, device: &mut Device) {
        let _ = device;
    }
}

/// Enable PHY (external), reset the controller, select device mode,
/// set ITC=0, write the dQH base pointer, and unmask the USB, error,
/// port-change, reset, suspend, and NAK interrupts (spec.md §4.D).
pub fn bringup(regs: &RegisterBlock, dqh_table_addr: u32) -> Result<(), Error> {
    regs.usbcmd.modify(USBCMD::RST::SET);
    let mut cleared = false;
    for _ in 0..BRINGUP_SPIN_BUDGET {
        if !regs.usbcmd.is_set(USBCMD::RST) {
            cleared = true;
            break;
        }
    }
    if !cleared && regs.usbcmd.is_set(USBCMD::RST) {
        return Err(Error::ControllerUnresponsive);
    }

    regs.usbmode.modify(USBMODE::CM::Device);
    regs.usbcmd.modify(USBCMD::ITC.val(0));
    regs.endpointlistaddr.set(dqh_table_addr);
    regs.usbintr.set(
        (USBINTR::UE::SET
            + USBINTR::UEE::SET
            + USBINTR::PCE::SET
            + USBINTR::URE::SET
            + USBINTR::SLE::SET
            + USBINTR::NAKE::SET)
            .value,
    );
    Ok(())
}

pub fn set_address_immediate(regs: &RegisterBlock, address: u8) {
    regs.deviceaddr.modify(DEVICEADDR::USBADR.val(address as u32) + DEVICEADDR::USBADRA::CLEAR);
}

/// Latches at the *next* IN status stage, via the USBADRA bit. Used by
/// the SET_ADDRESS handler because the current control transfer's
/// status stage must still be acknowledged at the old address
/// (spec.md §4.D).
pub fn set_address_deferred(regs: &RegisterBlock, address: u8) {
    regs.deviceaddr.modify(DEVICEADDR::USBADR.val(address as u32) + DEVICEADDR::USBADRA::SET);
}

/// On USB_RESET_RECEIVED: disable all endpoints, clear all interrupt
/// status, flush all primed endpoints, write address 0 immediately,
/// apply configuration 0 (spec.md §4.D).
pub fn bus_reset(regs: &RegisterBlock, device: &mut Device) -> Result<(), Error> {
    for ep_num in 0..ENDPOINT_COUNT as u8 {
        for is_in in [false, true] {
            let ep = EndpointAddress::new(ep_num, is_in);
            endpoint::disable(regs, ep)?;
        }
    }
    regs.usbsts.set(regs.usbsts.get());
    set_address_immediate(regs, 0);
    device.address = 0;
    device.active_configuration = None;
    Ok(())
}

/// Read USBSTS masked by USBINTR, write-clear the read bits, and
/// dispatch: SETUP events before COMPLETE events (spec.md §5 ordering
/// guarantee 1), then USB_RESET, then port-change and suspend.
pub fn poll<E: DeviceEvents>(regs: &RegisterBlock, device: &mut Device, events: &mut E) -> Result<(), Error> {
    let raw = regs.take_status();
    let status = LocalRegisterCopy::<u32, USBSTS::Register>::new(raw);

    if status.is_set(USBSTS::UI) {
        handle_setup_events(regs, device, events)?;
        handle_complete_events(regs, device, events);
    }
    if status.is_set(USBSTS::URI) {
        bus_reset(regs, device)?;
    }
    if status.is_set(USBSTS::PCI) {
        events.port_status_changed(device);
    }
    if status.is_set(USBSTS::SLI) {
        events.suspended(device);
    }
    Ok(())
}

fn handle_setup_events<E: DeviceEvents>(
    regs: &RegisterBlock,
    device: &mut Device,
    events: &mut E,
) -> Result<(), Error> {
    let setup_stat = regs.endptsetupstat.get();
    for ep_num in 0..ENDPOINT_COUNT as u8 {
        if setup_stat & (1 << ep_num) == 0 {
            continue;
        }
        let out = EndpointAddress::new(ep_num, false);
        let in_ = EndpointAddress::new(ep_num, true);
        let setup = SetupPacket::from(device.dqh.get(out).setup_buffer);
        device.setup_cache[out.dqh_index()] = setup;
        device.setup_cache[in_.dqh_index()] = setup;

        if !regs.clear_setup_status(ep_num as usize, endpoint::SPIN_BUDGET) {
            return Err(Error::ControllerUnresponsive);
        }
        endpoint::flush(regs, out)?;
        endpoint::flush(regs, in_)?;

        events.setup_complete(regs, device, ep_num, setup);
    }
    Ok(())
}

fn handle_complete_events<E: DeviceEvents>(regs: &RegisterBlock, device: &mut Device, events: &mut E) {
    let complete = regs.endptcomplete.get();
    for is_in in [false, true] {
        for ep_num in 0..ENDPOINT_COUNT as u8 {
            let ep = EndpointAddress::new(ep_num, is_in);
            let bit = if is_in { 1u32 << (ep_num as u32 + 16) } else { 1u32 << ep_num as u32 };
            if complete & bit != 0 {
                regs.endptcomplete.set(bit);
                events.transfer_complete(device, ep);
            }
        }
    }
}

impl From<[u8; 8]> for SetupPacket {
    fn from(bytes: [u8; 8]) -> Self {
        SetupPacket {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: [bytes[2], bytes[3]],
            w_index: [bytes[4], bytes[5]],
            w_length: [bytes[6], bytes[7]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        setups: std::vec::Vec<(u8, SetupPacket)>,
        completes: std::vec::Vec<EndpointAddress>,
    }

    impl DeviceEvents for Recorder {
        fn setup_complete(&mut self, _regs: &RegisterBlock, _device: &mut Device, ep_num: u8, setup: SetupPacket) {
            self.setups.push((ep_num, setup));
        }
        fn transfer_complete(&mut self, _device: &mut Device, ep: EndpointAddress) {
            self.completes.push(ep);
        }
    }

    #[test]
    fn bus_reset_zeroes_address_and_configuration() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        device.address = 0x2A;
        device.active_configuration = Some(1);
        bus_reset(&regs, &mut device).unwrap();
        assert_eq!(device.address, 0);
        assert_eq!(device.active_configuration, None);
        assert_eq!(regs.deviceaddr.get() & 0xFE00_0000, 0);
    }

    #[test]
    fn poll_dispatches_setup_before_complete_in_same_interrupt() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let setup_bytes: [u8; 8] = [0x00, 0x05, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00];
        device.dqh.get_mut(EndpointAddress::new(0, false)).setup_buffer = setup_bytes;

        regs.usbintr.set(USBINTR::UE::SET.value);
        regs.usbsts.set(USBSTS::UI::SET.value);
        regs.endptsetupstat.set(1);
        regs.endptcomplete.set(1);

        let mut recorder = Recorder { setups: std::vec::Vec::new(), completes: std::vec::Vec::new() };
        poll(&regs, &mut device, &mut recorder).unwrap();

        assert_eq!(recorder.setups.len(), 1);
        assert_eq!(recorder.setups[0].0, 0);
        assert_eq!(recorder.completes, std::vec![EndpointAddress::new(0, false)]);
    }
}
