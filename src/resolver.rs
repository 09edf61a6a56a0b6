//! Descriptor resolver (component E): configuration/string/endpoint
//! lookup and speed-aware configuration pool selection (spec.md §4.E).
//!
//! Configuration descriptors are held as raw wire bytes (header plus
//! concatenated subordinate interface/endpoint descriptors) rather than
//! parsed into an owned tree — the resolver only ever needs to find one
//! descriptor's start and length, not build a navigable object graph.

use tock_registers::interfaces::Readable;
use zerocopy::FromBytes;

use crate::descriptor::{ConfigurationDescriptor, DescriptorType, EndpointDescriptor};
use crate::qhtd::EndpointSpeed;
use crate::regs::{RegisterBlock, PORTSC1};

/// Everything the resolver searches: per-speed configuration pools plus
/// the device/qualifier descriptors and string table. Borrowed, not
/// owned — these tables live in whatever static storage the caller
/// allocated them in.
pub struct DescriptorTables<'a> {
    pub device: &'a [u8],
    pub qualifier: Option<&'a [u8]>,
    /// Null-terminated in the sense that the slice ends where the
    /// table ends; `None` entries mark unused slots in a fixed-size
    /// backing array without requiring every configuration pool to be
    /// the same length.
    pub configurations_full_speed: &'a [Option<&'a [u8]>],
    pub configurations_high_speed: &'a [Option<&'a [u8]>],
    /// Sparse (index, UTF-16LE or language-list bytes) pairs; index 0
    /// conventionally carries the supported-languages list.
    pub strings: &'a [(u8, &'a [u8])],
}

/// Read PORTSC1's speed field (spec.md §4.E: "current speed is read
/// from PORTSC").
pub fn current_speed(regs: &RegisterBlock) -> EndpointSpeed {
    match regs.portsc1.read_as_enum(PORTSC1::PSPD) {
        Some(PORTSC1::PSPD::Value::Full) => EndpointSpeed::Full,
        Some(PORTSC1::PSPD::Value::Low) => EndpointSpeed::Low,
        Some(PORTSC1::PSPD::Value::High) => EndpointSpeed::High,
        None => EndpointSpeed::Full,
    }
}

fn configuration_value(bytes: &[u8]) -> Option<u8> {
    let header = ConfigurationDescriptor::ref_from_bytes(bytes.get(..9)?).ok()?;
    Some(header.configuration_value)
}

fn find_in_pool<'a>(pool: &[Option<&'a [u8]>], value: u8) -> Option<&'a [u8]> {
    if value == 0 {
        return None;
    }
    pool.iter()
        .flatten()
        .find(|bytes| configuration_value(bytes) == Some(value))
        .copied()
}

impl<'a> DescriptorTables<'a> {
    /// Search the current-speed pool. Value 0 is the well-defined
    /// "not configured" state, not an error.
    pub fn find_configuration(&self, speed: EndpointSpeed, value: u8) -> Option<&'a [u8]> {
        let pool = match speed {
            EndpointSpeed::High => self.configurations_high_speed,
            EndpointSpeed::Full | EndpointSpeed::Low => self.configurations_full_speed,
        };
        find_in_pool(pool, value)
    }

    /// Search the opposite-speed pool, for GET_DESCRIPTOR's
    /// OTHER_SPEED_CONFIGURATION variant.
    pub fn find_other_speed_configuration(&self, speed: EndpointSpeed, value: u8) -> Option<&'a [u8]> {
        let pool = match speed {
            EndpointSpeed::High => self.configurations_full_speed,
            EndpointSpeed::Full | EndpointSpeed::Low => self.configurations_high_speed,
        };
        find_in_pool(pool, value)
    }

    /// Walk `configuration`'s subordinate descriptors linearly, bounded
    /// by the configuration's own `total_length`, looking for an
    /// ENDPOINT descriptor whose address byte matches.
    pub fn find_endpoint_descriptor(configuration: &'a [u8], endpoint_address: u8) -> Option<&'a [u8]> {
        let header = ConfigurationDescriptor::ref_from_bytes(configuration.get(..9)?).ok()?;
        let total_length = header.total_length() as usize;
        let bound = configuration.len().min(total_length);

        let mut offset = 0usize;
        while offset + 2 <= bound {
            let length = configuration[offset] as usize;
            if length == 0 || offset + length > bound {
                break;
            }
            let descriptor_type = configuration[offset + 1];
            let header_size = core::mem::size_of::<EndpointDescriptor>();
            if descriptor_type == DescriptorType::Endpoint as u8 && length >= header_size {
                if let Ok(ep) = EndpointDescriptor::ref_from_bytes(&configuration[offset..offset + header_size]) {
                    if ep.endpoint_address == endpoint_address {
                        return Some(&configuration[offset..offset + length]);
                    }
                }
            }
            offset += length;
        }
        None
    }

    pub fn find_string(&self, index: u8) -> Option<&'a [u8]> {
        self.strings.iter().find(|(i, _)| *i == index).map(|(_, bytes)| *bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_bytes(value: u8, total_length: u16, extra: &[u8]) -> std::vec::Vec<u8> {
        let mut v = std::vec![9u8, 2, 0, 0, 1, value, 0, 0x80, 50];
        v[2..4].copy_from_slice(&total_length.to_le_bytes());
        v.extend_from_slice(extra);
        v
    }

    #[test]
    fn value_zero_is_not_configured_even_if_a_slot_uses_it() {
        let cfg = config_bytes(0, 9, &[]);
        let pool = [Some(cfg.as_slice())];
        let tables = DescriptorTables {
            device: &[],
            qualifier: None,
            configurations_full_speed: &pool,
            configurations_high_speed: &[],
            strings: &[],
        };
        assert!(tables.find_configuration(EndpointSpeed::Full, 0).is_none());
    }

    #[test]
    fn find_configuration_matches_by_value_not_pool_position() {
        let cfg1 = config_bytes(1, 9, &[]);
        let cfg2 = config_bytes(2, 9, &[]);
        let pool = [Some(cfg1.as_slice()), Some(cfg2.as_slice())];
        let tables = DescriptorTables {
            device: &[],
            qualifier: None,
            configurations_full_speed: &pool,
            configurations_high_speed: &[],
            strings: &[],
        };
        let found = tables.find_configuration(EndpointSpeed::Full, 2).unwrap();
        assert_eq!(configuration_value(found), Some(2));
    }

    #[test]
    fn find_endpoint_descriptor_walks_subordinate_descriptors() {
        let interface = [9u8, 4, 0, 0, 1, 0, 0, 0, 0];
        let endpoint = [7u8, 5, 0x81, 0x02, 0x00, 0x02, 0x00];
        let mut extra = std::vec::Vec::new();
        extra.extend_from_slice(&interface);
        extra.extend_from_slice(&endpoint);
        let total_length = 9 + extra.len() as u16;
        let cfg = config_bytes(1, total_length, &extra);

        let found = DescriptorTables::find_endpoint_descriptor(&cfg, 0x81).unwrap();
        assert_eq!(found, &endpoint);
        assert!(DescriptorTables::find_endpoint_descriptor(&cfg, 0x02).is_none());
    }

    #[test]
    fn string_index_zero_is_the_language_list() {
        let languages: [u8; 4] = [0x04, 0x03, 0x09, 0x04];
        let strings = [(0u8, languages.as_slice())];
        let tables = DescriptorTables {
            device: &[],
            qualifier: None,
            configurations_full_speed: &[],
            configurations_high_speed: &[],
            strings: &strings,
        };
        assert_eq!(tables.find_string(0), Some(languages.as_slice()));
    }
}
