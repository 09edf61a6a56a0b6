//! Byte-exact wire formats: the USB 2.0 Chapter 9 descriptors and the
//! 8-byte setup packet (spec.md §6). `zerocopy` gives us `FromBytes`/
//! `IntoBytes` so these structs can be read straight out of DMA buffers
//! and written straight into them without a manual byte-by-byte codec.

use zerocopy::{Immutable, IntoBytes, KnownLayout, FromBytes, Unaligned};

/// Standard descriptor type codes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
}

impl DescriptorType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Device,
            2 => Self::Configuration,
            3 => Self::String,
            4 => Self::Interface,
            5 => Self::Endpoint,
            6 => Self::DeviceQualifier,
            7 => Self::OtherSpeedConfiguration,
            8 => Self::InterfacePower,
            _ => return None,
        })
    }
}

/// Standard request codes (spec.md §6). Only 0, 5, 6, 8, 9 are
/// implemented by the standard-request engine; the rest stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

impl StandardRequest {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::GetStatus,
            1 => Self::ClearFeature,
            3 => Self::SetFeature,
            5 => Self::SetAddress,
            6 => Self::GetDescriptor,
            7 => Self::SetDescriptor,
            8 => Self::GetConfiguration,
            9 => Self::SetConfiguration,
            10 => Self::GetInterface,
            11 => Self::SetInterface,
            12 => Self::SynchFrame,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// The 8-byte setup packet, decoded from its wire layout
/// (`bmRequestType, bRequest, wValue(lo,hi), wIndex(lo,hi), wLength(lo,hi)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: [u8; 2],
    pub w_index: [u8; 2],
    pub w_length: [u8; 2],
}

impl SetupPacket {
    pub fn is_device_to_host(&self) -> bool {
        self.bm_request_type & 0x80 != 0
    }

    pub fn kind(&self) -> RequestKind {
        match (self.bm_request_type >> 5) & 0x03 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> u8 {
        self.bm_request_type & 0x1F
    }

    pub fn request(&self) -> Option<StandardRequest> {
        StandardRequest::from_u8(self.b_request)
    }

    pub fn w_value(&self) -> u16 {
        u16::from_le_bytes(self.w_value)
    }

    pub fn w_index(&self) -> u16 {
        u16::from_le_bytes(self.w_index)
    }

    pub fn w_length(&self) -> u16 {
        u16::from_le_bytes(self.w_length)
    }

    /// Split `wValue` for GET_DESCRIPTOR: high byte is the descriptor
    /// type, low byte is the descriptor index.
    pub fn descriptor_type_and_index(&self) -> (Option<DescriptorType>, u8) {
        let v = self.w_value();
        (DescriptorType::from_u8((v >> 8) as u8), (v & 0xFF) as u8)
    }
}

/// Device descriptor (USB 2.0 §9.6.1), 18 bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: [u8; 2],
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub id_vendor: [u8; 2],
    pub id_product: [u8; 2],
    pub bcd_device: [u8; 2],
    pub manufacturer: u8,
    pub product: u8,
    pub serial_number: u8,
    pub num_configurations: u8,
}

/// Device qualifier descriptor (USB 2.0 §9.6.2), 10 bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DeviceQualifierDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: [u8; 2],
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub num_configurations: u8,
    pub reserved: u8,
}

/// Configuration descriptor header (USB 2.0 §9.6.3). The bytes that
/// follow `total_length - length` in the backing buffer are the
/// subordinate interface/endpoint descriptors, concatenated in
/// enumeration order.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: [u8; 2],
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub fn total_length(&self) -> u16 {
        u16::from_le_bytes(self.total_length)
    }
}

/// Endpoint descriptor (USB 2.0 §9.6.6).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: [u8; 2],
    pub interval: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn setup_packet_round_trips_bit_for_bit() {
        let bytes: [u8; 8] = [0x00, 0x05, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00];
        let setup = SetupPacket::read_from_bytes(&bytes).unwrap();
        assert_eq!(setup.as_bytes(), &bytes);
        assert_eq!(setup.request(), Some(StandardRequest::SetAddress));
        assert_eq!(setup.w_value(), 0x2A);
        assert!(!setup.is_device_to_host());
    }

    #[test]
    fn get_descriptor_device_decodes_type_and_index() {
        let bytes: [u8; 8] = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        let setup = SetupPacket::read_from_bytes(&bytes).unwrap();
        assert!(setup.is_device_to_host());
        let (ty, idx) = setup.descriptor_type_and_index();
        assert_eq!(ty, Some(DescriptorType::Device));
        assert_eq!(idx, 0);
        assert_eq!(setup.w_length(), 18);
    }

    #[test]
    fn unknown_descriptor_type_decodes_to_none() {
        let bytes: [u8; 8] = [0x80, 0x06, 0x00, 0x42, 0x00, 0x00, 0x40, 0x00];
        let setup = SetupPacket::read_from_bytes(&bytes).unwrap();
        let (ty, _idx) = setup.descriptor_type_and_index();
        assert_eq!(ty, None);
    }

    #[test]
    fn configuration_descriptor_total_length_is_little_endian() {
        let mut cfg = ConfigurationDescriptor {
            length: 9,
            descriptor_type: DescriptorType::Configuration as u8,
            total_length: [0, 0],
            num_interfaces: 1,
            configuration_value: 1,
            configuration: 0,
            attributes: 0x80,
            max_power: 50,
        };
        cfg.total_length = 32u16.to_le_bytes();
        assert_eq!(cfg.total_length(), 32);
    }
}
