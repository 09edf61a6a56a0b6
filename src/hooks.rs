//! Class/vendor dispatch hooks (component H): a polymorphic
//! request-handler capability with three variants {standard, class,
//! vendor}, dispatched by `bmRequestType`'s type bits (spec.md §4.H,
//! §9 redesign flag — replacing a bound function-pointer trio).

use crate::descriptor::{RequestKind, SetupPacket};
use crate::device::{Device, DeviceEvents};
use crate::endpoint;
use crate::error::Error;
use crate::regs::RegisterBlock;

/// One arm of the {standard, class, vendor} trio. The standard engine
/// (`crate::requests::StandardRequestEngine`) implements this; higher
/// layers provide class/vendor implementations.
pub trait RequestHandler {
    fn handle(&mut self, regs: &RegisterBlock, device: &mut Device, ep_num: u8, setup: SetupPacket) -> Result<(), Error>;
}

/// A handler with nothing to serve: stalls every request routed to it.
/// The default for a peripheral that implements no class or vendor
/// commands.
pub struct NullHandler;

impl RequestHandler for NullHandler {
    fn handle(&mut self, regs: &RegisterBlock, _device: &mut Device, ep_num: u8, _setup: SetupPacket) -> Result<(), Error> {
        endpoint::stall(regs, ep_num as usize)
    }
}

/// Composes the three handler arms into one [`DeviceEvents`] the
/// device-mode ISR can dispatch setup events to directly.
pub struct Dispatcher<S, C, V> {
    pub standard: S,
    pub class: C,
    pub vendor: V,
}

impl<S, C, V> Dispatcher<S, C, V> {
    pub fn new(standard: S, class: C, vendor: V) -> Self {
        Self { standard, class, vendor }
    }
}

impl<S: RequestHandler, C: RequestHandler, V: RequestHandler> DeviceEvents for Dispatcher<S, C, V> {
    fn setup_complete(&mut self, regs: &RegisterBlock, device: &mut Device, ep_num: u8, setup: SetupPacket) {
        let result = match setup.kind() {
            RequestKind::Standard => self.standard.handle(regs, device, ep_num, setup),
            RequestKind::Class => self.class.handle(regs, device, ep_num, setup),
            RequestKind::Vendor => self.vendor.handle(regs, device, ep_num, setup),
            RequestKind::Reserved => endpoint::stall(regs, ep_num as usize),
        };
        let _ = result;
    }

    fn transfer_complete(&mut self, _device: &mut Device, _ep: endpoint::EndpointAddress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::RegisterBlock;

    #[test]
    fn reserved_request_type_stalls() {
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let mut dispatcher = Dispatcher::new(NullHandler, NullHandler, NullHandler);
        // type bits 6:5 = 0b11 (reserved), recipient/device, request/value/index/length irrelevant.
        let bytes: [u8; 8] = [0x60, 0x00, 0, 0, 0, 0, 0, 0];
        dispatcher.setup_complete(&regs, &mut device, 0, SetupPacket::from(bytes));
        use tock_registers::interfaces::Readable;
        assert_ne!(regs.endptctrl[0].get() & 1, 0);
    }

    #[test]
    fn vendor_request_routes_to_vendor_handler_not_standard() {
        struct CountingHandler(core::cell::Cell<u32>);
        impl RequestHandler for &CountingHandler {
            fn handle(&mut self, _regs: &RegisterBlock, _device: &mut Device, _ep_num: u8, _setup: SetupPacket) -> Result<(), Error> {
                self.0.set(self.0.get() + 1);
                Ok(())
            }
        }
        let vendor_calls = CountingHandler(core::cell::Cell::new(0));
        let regs = RegisterBlock::zeroed();
        let mut device = Device::default();
        let mut dispatcher = Dispatcher::new(NullHandler, NullHandler, &vendor_calls);
        // type bits 6:5 = 0b10 (vendor).
        let bytes: [u8; 8] = [0x40, 0x00, 0, 0, 0, 0, 0, 0];
        dispatcher.setup_complete(&regs, &mut device, 0, SetupPacket::from(bytes));
        assert_eq!(vendor_calls.0.get(), 1);
    }
}
