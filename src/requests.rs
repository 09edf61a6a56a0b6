//! Standard-request engine (component F): the endpoint-0 three-stage
//! control-transfer state machine for USB 2.0 Chapter 9 requests
//! (spec.md §4.F).
//!
//! The engine owns no register/QH access beyond endpoint 0's dedicated
//! TDs and reply buffer — everything else is dispatched through
//! [`crate::endpoint`] and resolved through [`crate::resolver`].

use crate::descriptor::{DescriptorType, RequestKind, SetupPacket, StandardRequest};
use crate::device::{Device, DeviceEvents};
use crate::endpoint::{self, EndpointAddress};
use crate::error::Error;
use crate::qhtd::{Pid, TransferDescriptor};
use crate::regs::RegisterBlock;
use crate::resolver::DescriptorTables;

/// How many bytes a single control-transfer reply may carry. Large
/// enough for any configuration descriptor this core is expected to
/// serve in one DMA scatter (five 4 KiB pages, per spec.md §3).
pub const CONTROL_REPLY_CAPACITY: usize = 1024;

/// Endpoint-0 scratch state: the dedicated IN/OUT TDs the engine primes
/// for data and status stages, and the buffer a GET_* reply is copied
/// into before priming.
pub struct ControlPipe {
    ep0_in_td: TransferDescriptor,
    ep0_out_td: TransferDescriptor,
    reply: [u8; CONTROL_REPLY_CAPACITY],
}

impl Default for ControlPipe {
    fn default() -> Self {
        Self {
            ep0_in_td: TransferDescriptor::default(),
            ep0_out_td: TransferDescriptor::default(),
            reply: [0; CONTROL_REPLY_CAPACITY],
        }
    }
}

impl ControlPipe {
    fn in_td_addr(&self) -> u32 {
        &self.ep0_in_td as *const TransferDescriptor as u32
    }

    fn out_td_addr(&self) -> u32 {
        &self.ep0_out_td as *const TransferDescriptor as u32
    }

    /// Prime a data-stage IN carrying `len` bytes of `self.reply`,
    /// followed by a zero-length OUT status ACK.
    fn reply_then_ack(&mut self, regs: &RegisterBlock, device: &mut Device, len: u16) {
        self.ep0_in_td.set_transfer(Pid::In, true, len, self.reply.as_ptr() as u32);
        let in_addr = self.in_td_addr();
        endpoint::prime(regs, device.dqh.get_mut(EndpointAddress::new(0, true)), EndpointAddress::new(0, true), in_addr);

        self.ep0_out_td.set_transfer(Pid::Out, true, 0, 0);
        let out_addr = self.out_td_addr();
        endpoint::prime(
            regs,
            device.dqh.get_mut(EndpointAddress::new(0, false)),
            EndpointAddress::new(0, false),
            out_addr,
        );
    }

    /// Prime a zero-length IN status ACK only — used for host-to-device
    /// requests with no data stage (SET_ADDRESS, SET_CONFIGURATION).
    fn ack_in(&mut self, regs: &RegisterBlock, device: &mut Device) {
        self.ep0_in_td.set_transfer(Pid::In, true, 0, 0);
        let in_addr = self.in_td_addr();
        endpoint::prime(regs, device.dqh.get_mut(EndpointAddress::new(0, true)), EndpointAddress::new(0, true), in_addr);
    }
}

/// Observer for SET_CONFIGURATION, invoked after the resolver accepts
/// (or clears) a configuration value.
pub trait ConfigurationObserver {
    fn configuration_changed(&mut self, value: Option<u8>);
}

/// Runs the standard-request engine as a [`DeviceEvents`] implementation
/// so it can be handed straight to [`crate::device::poll`] (optionally
/// composed with class/vendor hooks — see [`crate::hooks`]).
pub struct StandardRequestEngine<'a, C> {
    pub control: ControlPipe,
    pub tables: DescriptorTables<'a>,
    pub observer: C,
}

impl<'a, C: ConfigurationObserver> StandardRequestEngine<'a, C> {
    pub fn new(tables: DescriptorTables<'a>, observer: C) -> Self {
        Self { control: ControlPipe::default(), tables, observer }
    }

    fn handle(&mut self, regs: &RegisterBlock, device: &mut Device, setup: SetupPacket) -> Result<(), Error> {
        match setup.request() {
            Some(StandardRequest::GetStatus) => {
                self.control.reply[0] = 0;
                self.control.reply[1] = 0;
                self.control.reply_then_ack(regs, device, 2);
                Ok(())
            }
            Some(StandardRequest::SetAddress) => {
                crate::device::set_address_deferred(regs, setup.w_value() as u8);
                self.control.ack_in(regs, device);
                Ok(())
            }
            Some(StandardRequest::GetDescriptor) => self.handle_get_descriptor(regs, device, setup),
            Some(StandardRequest::GetConfiguration) => {
                if setup.w_length() != 1 {
                    return endpoint::stall(regs, 0);
                }
                self.control.reply[0] = device.active_configuration.unwrap_or(0);
                self.control.reply_then_ack(regs, device, 1);
                Ok(())
            }
            Some(StandardRequest::SetConfiguration) => self.handle_set_configuration(regs, device, setup),
            _ => endpoint::stall(regs, 0),
        }
    }

    fn handle_get_descriptor(
        &mut self,
        regs: &RegisterBlock,
        device: &mut Device,
        setup: SetupPacket,
    ) -> Result<(), Error> {
        let (ty, index) = setup.descriptor_type_and_index();
        let speed = crate::resolver::current_speed(regs);
        let bytes: &[u8] = match ty {
            Some(DescriptorType::Device) => self.tables.device,
            Some(DescriptorType::DeviceQualifier) => match self.tables.qualifier {
                Some(bytes) => bytes,
                None => return endpoint::stall(regs, 0),
            },
            // The wire index is 0-based; configuration-value lookup is
            // 1-based. Preserved for bug-compatibility (spec.md §9).
            Some(DescriptorType::Configuration) => {
                match self.tables.find_configuration(speed, index.wrapping_add(1)) {
                    Some(bytes) => bytes,
                    None => return endpoint::stall(regs, 0),
                }
            }
            Some(DescriptorType::OtherSpeedConfiguration) => {
                match self.tables.find_other_speed_configuration(speed, index.wrapping_add(1)) {
                    Some(bytes) => bytes,
                    None => return endpoint::stall(regs, 0),
                }
            }
            Some(DescriptorType::String) => match self.tables.find_string(index) {
                Some(bytes) => bytes,
                None => return endpoint::stall(regs, 0),
            },
            _ => return endpoint::stall(regs, 0),
        };

        if bytes.is_empty() {
            return endpoint::stall(regs, 0);
        }

        // For a configuration descriptor, the subordinate interface and
        // endpoint descriptors follow: send `total_length`, not `length`.
        let declared_length = match ty {
            Some(DescriptorType::Configuration) | Some(DescriptorType::OtherSpeedConfiguration) => {
                u16::from_le_bytes([bytes[2], bytes[3]])
            }
            _ => bytes[0] as u16,
        };

        let send_len = (declared_length.min(setup.w_length()) as usize).min(bytes.len()).min(CONTROL_REPLY_CAPACITY);
        self.control.reply[..send_len].copy_from_slice(&bytes[..send_len]);
        self.control.reply_then_ack(regs, device, send_len as u16);
        Ok(())
    }

    fn handle_set_configuration(
        &mut self,
        regs: &RegisterBlock,
        device: &mut Device,
        setup: SetupPacket,
    ) -> Result<(), Error> {
        let value = setup.w_value() as u8;
        if value == 0 {
            device.active_configuration = None;
            self.observer.configuration_changed(None);
            self.control.ack_in(regs, device);
            return Ok(());
        }
        let speed = crate::resolver::current_speed(regs);
        if self.tables.find_configuration(speed, value).is_some() {
            device.active_configuration = Some(value);
            self.observer.configuration_changed(Some(value));
            self.control.ack_in(regs, device);
            Ok(())
        } else {
            endpoint::stall(regs, 0)
        }
    }
}

impl<'a, C: ConfigurationObserver> crate::hooks::RequestHandler for StandardRequestEngine<'a, C> {
    fn handle(&mut self, regs: &RegisterBlock, device: &mut Device, ep_num: u8, setup: SetupPacket) -> Result<(), Error> {
        if ep_num != 0 {
            return endpoint::stall(regs, ep_num as usize);
        }
        StandardRequestEngine::handle(self, regs, device, setup)
    }
}

impl<'a, C: ConfigurationObserver> DeviceEvents for StandardRequestEngine<'a, C> {
    fn setup_complete(&mut self, regs: &RegisterBlock, device: &mut Device, ep_num: u8, setup: SetupPacket) {
        if ep_num != 0 || !matches!(setup.kind(), RequestKind::Standard) {
            return;
        }
        let _ = self.handle(regs, device, setup);
    }

    fn transfer_complete(&mut self, _device: &mut Device, _ep: EndpointAddress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::RegisterBlock;

    struct NullObserver;
    impl ConfigurationObserver for NullObserver {
        fn configuration_changed(&mut self, _value: Option<u8>) {}
    }

    fn device_descriptor_bytes() -> [u8; 18] {
        [18, 1, 0x00, 0x02, 0, 0, 0, 64, 0xAD, 0xDE, 0xEF, 0xBE, 0, 1, 0, 0, 0, 1]
    }

    #[test]
    fn get_descriptor_device_truncates_to_wlength() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let dev_bytes = device_descriptor_bytes();
        let tables = DescriptorTables {
            device: &dev_bytes,
            qualifier: None,
            configurations_full_speed: &[],
            configurations_high_speed: &[],
            strings: &[],
        };
        let mut engine = StandardRequestEngine::new(tables, NullObserver);

        let setup_bytes: [u8; 8] = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00];
        let setup = SetupPacket::from(setup_bytes);
        engine.setup_complete(&regs, &mut device, 0, setup);

        assert_eq!(&engine.control.reply[..8], &dev_bytes[..8]);
    }

    #[test]
    fn set_configuration_then_get_configuration_round_trips() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let mut cfg = std::vec![9u8, 2, 9, 0, 1, 1, 0, 0x80, 50];
        cfg[2..4].copy_from_slice(&9u16.to_le_bytes());
        let pool = [Some(cfg.as_slice())];
        let tables = DescriptorTables {
            device: &[],
            qualifier: None,
            configurations_full_speed: &pool,
            configurations_high_speed: &[],
            strings: &[],
        };
        let mut engine = StandardRequestEngine::new(tables, NullObserver);

        let set_bytes: [u8; 8] = [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        engine.setup_complete(&regs, &mut device, 0, SetupPacket::from(set_bytes));
        assert_eq!(device.active_configuration, Some(1));

        let get_bytes: [u8; 8] = [0x80, 0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        engine.setup_complete(&regs, &mut device, 0, SetupPacket::from(get_bytes));
        assert_eq!(engine.control.reply[0], 1);

        let deconfig_bytes: [u8; 8] = [0x00, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        engine.setup_complete(&regs, &mut device, 0, SetupPacket::from(deconfig_bytes));
        assert_eq!(device.active_configuration, None);
    }

    #[test]
    fn unknown_descriptor_type_stalls_ep0() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let tables = DescriptorTables {
            device: &[],
            qualifier: None,
            configurations_full_speed: &[],
            configurations_high_speed: &[],
            strings: &[],
        };
        let mut engine = StandardRequestEngine::new(tables, NullObserver);
        let bytes: [u8; 8] = [0x80, 0x06, 0x00, 0x42, 0x00, 0x00, 0x40, 0x00];
        engine.setup_complete(&regs, &mut device, 0, SetupPacket::from(bytes));
        use tock_registers::interfaces::Readable;
        assert_eq!(regs.endptctrl[0].get() & 0x0001_0001, 0x0001_0001);
    }
}
