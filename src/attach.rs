//! ## Attach
//!
//! The one-shot device-claim sequence (§4.2/§4.9): read the device
//! descriptor, apply the VID/PID and serial-number filters, allocate a
//! bus address, walk the configuration descriptors for a USBTMC
//! interface, extract its endpoints, select the configuration, read
//! GET_CAPABILITIES and, if the interface allows it, assert
//! REN_CONTROL. Grounded on `Init()`/`EndpointXtract()`/`Release()` in
//! `original_source/USBTMCHostV2/usbtmc.cpp`.

use crate::capabilities::Capabilities;
use crate::constants::{control_requests, usb, usbtmc_status};
use crate::error::AttachError;
use crate::state_machine::Driver;
use crate::transport::{EventSink, HostTransport, TransferOutcome};
use crate::types::{DeviceDescriptor, DeviceId, EndpointTable, SerialPrefix};

const GET_CAPABILITIES_RESPONSE_SIZE: usize = 24;
const CONFIG_DESCRIPTOR_SCRATCH_SIZE: usize = 256;

/// VID/PID and serial-number-prefix filter applied during attach.
#[derive(Debug, Clone, Default)]
pub struct AttachFilter {
    target: DeviceId,
    serial_prefix: Option<SerialPrefix>,
}

impl AttachFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only claim devices with this exact VID/PID. `0` in either field
    /// (the default) matches any value.
    pub fn with_vendor_product(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.target = DeviceId { vendor_id, product_id };
        self
    }

    /// Only claim devices whose serial number starts with `prefix`.
    /// Prefixes longer than 32 bytes are truncated.
    pub fn set_target_serial_number(&mut self, prefix: &[u8]) {
        let mut stored = SerialPrefix::new();
        let _ = stored.extend_from_slice(&prefix[..prefix.len().min(stored.capacity())]);
        self.serial_prefix = Some(stored);
    }
}

/// Result of a successful attach: the running driver plus the device
/// descriptor the owner's `EventSink::on_device_descriptor` would also
/// have received.
pub struct Attached {
    pub driver: Driver,
    pub descriptor: DeviceDescriptor,
}

pub fn attach(
    transport: &mut dyn HostTransport,
    filter: &AttachFilter,
    sink: &mut dyn EventSink,
) -> Result<Attached, AttachError> {
    let descriptor = transport
        .get_device_descriptor(0)
        .map_err(AttachError::DeviceDescriptorFailed)?;

    if !filter.target.matches(&descriptor) {
        return Err(AttachError::VidPidMismatch);
    }

    if let Some(prefix) = &filter.serial_prefix {
        let mut serial = [0u8; 32];
        let n = transport
            .get_serial_number(0, &mut serial)
            .map_err(AttachError::DeviceDescriptorFailed)?;
        if n < prefix.len() || &serial[..prefix.len()] != prefix.as_slice() {
            return Err(AttachError::SerialNumberMismatch);
        }
    }

    sink.on_device_descriptor(descriptor);

    let address = transport.alloc_address().ok_or(AttachError::AddressPoolExhausted)?;
    log::debug!(
        "usbtmc: attaching vid={:#06x} pid={:#06x} at address {address}",
        descriptor.vendor_id,
        descriptor.product_id
    );

    match attach_at_address(transport, address, descriptor) {
        Ok(attached) => {
            log::debug!("usbtmc: attach succeeded at address {address}");
            Ok(attached)
        }
        Err(err) => {
            log::warn!("usbtmc: attach failed: {err}");
            transport.free_address(address);
            Err(err)
        }
    }
}

fn attach_at_address(
    transport: &mut dyn HostTransport,
    address: u8,
    descriptor: DeviceDescriptor,
) -> Result<Attached, AttachError> {
    transport.set_address(address).map_err(AttachError::SetAddressFailed)?;

    let mut endpoints = None;
    let mut config_value = 0u8;
    let mut scratch = [0u8; CONFIG_DESCRIPTOR_SCRATCH_SIZE];
    for index in 0..descriptor.num_configurations {
        let n = transport
            .get_config_descriptor(address, index, &mut scratch)
            .map_err(AttachError::ConfigDescriptorFailed)?;
        if let Some((value, table)) = find_usbtmc_interface(&scratch[..n]) {
            config_value = value;
            endpoints = Some(table);
            break;
        }
    }
    let endpoints = endpoints.ok_or(AttachError::NoDataEndpoints)?;

    transport
        .set_configuration(address, config_value)
        .map_err(AttachError::SetConfigurationFailed)?;

    transport
        .set_endpoint_entry(address, 1, &endpoints.bulk_in)
        .map_err(AttachError::SetEndpointEntryFailed)?;
    transport
        .set_endpoint_entry(address, 2, &endpoints.bulk_out)
        .map_err(AttachError::SetEndpointEntryFailed)?;
    if endpoints.interrupt_in.present {
        transport
            .set_endpoint_entry(address, 3, &endpoints.interrupt_in)
            .map_err(AttachError::SetEndpointEntryFailed)?;
    }

    let capabilities = get_capabilities(transport, address)?;

    if capabilities.accepts_ren_control() {
        assert_ren_control(transport, address)?;
    }

    transport.register_device_class(address);

    Ok(Attached {
        driver: Driver::new(address, endpoints, capabilities),
        descriptor,
    })
}

/// Walk one configuration descriptor's raw bytes looking for an
/// interface with USBTMC's class/subclass/protocol triple, returning
/// its bConfigurationValue and extracted endpoint table.
fn find_usbtmc_interface(buf: &[u8]) -> Option<(u8, EndpointTable)> {
    let mut config_value = 0u8;
    let mut table = EndpointTable::new();
    let mut in_target_interface = false;
    let mut found_interface = false;

    let mut cursor = 0usize;
    while cursor + 1 < buf.len() {
        let len = buf[cursor] as usize;
        if len < 2 {
            break;
        }
        let desc_type = buf[cursor + 1];
        match desc_type {
            0x02 if cursor + 5 < buf.len() => {
                config_value = buf[cursor + 5];
            }
            0x04 if cursor + 7 < buf.len() => {
                let class = buf[cursor + 5];
                let subclass = buf[cursor + 6];
                let protocol = buf[cursor + 7];
                in_target_interface = class == usb::USBTMC_CLASS_CODE
                    && subclass == usb::USBTMC_SUBCLASS_CODE
                    && protocol == usb::USBTMC_PROTOCOL_CODE;
                found_interface |= in_target_interface;
            }
            0x05 if in_target_interface && cursor + 5 < buf.len() => {
                let address = buf[cursor + 2];
                let attributes = buf[cursor + 3];
                let max_packet_size = u16::from_le_bytes([buf[cursor + 4], buf[cursor + 5]]);
                let transfer_type = attributes & 0x03;
                let is_in = address & 0x80 != 0;
                match (transfer_type, is_in) {
                    (0x02, true) => {
                        table.bulk_in.address = address;
                        table.bulk_in.max_packet_size = max_packet_size;
                        table.bulk_in.present = true;
                    }
                    (0x02, false) => {
                        table.bulk_out.address = address;
                        table.bulk_out.max_packet_size = max_packet_size;
                        table.bulk_out.present = true;
                    }
                    (0x03, true) => {
                        table.interrupt_in.address = address;
                        table.interrupt_in.max_packet_size = max_packet_size;
                        table.interrupt_in.present = true;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        cursor += len;
    }

    if found_interface && table.has_required_data_endpoints() {
        Some((config_value, table))
    } else {
        None
    }
}

fn get_capabilities(transport: &mut dyn HostTransport, address: u8) -> Result<Capabilities, AttachError> {
    let mut resp = [0u8; GET_CAPABILITIES_RESPONSE_SIZE];
    let outcome = transport.control_request(address, 0xA1, control_requests::GET_CAPABILITIES, 0, 0, &mut resp);
    match outcome {
        TransferOutcome::Ack(_) if resp[0] == usbtmc_status::STATUS_SUCCESS => Ok(Capabilities::new(
            u16::from_le_bytes([resp[3], resp[4]]),
            resp[5],
            resp[6],
            u16::from_le_bytes([resp[12], resp[13]]),
            resp[14],
            resp[15],
        )),
        TransferOutcome::Ack(_) => Err(AttachError::GetCapabilitiesFailed(resp[0])),
        _ => Err(AttachError::GetCapabilitiesFailed(0)),
    }
}

fn assert_ren_control(transport: &mut dyn HostTransport, address: u8) -> Result<(), AttachError> {
    let mut status = [0u8; 1];
    let outcome = transport.control_request(address, 0x21, control_requests::REN_CONTROL, 1, 0, &mut status);
    match outcome {
        TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => Ok(()),
        TransferOutcome::Ack(_) => Err(AttachError::RenControlRejected(status[0])),
        _ => Err(AttachError::RenControlRejected(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One configuration descriptor: config header, a USBTMC interface
    /// with a bulk-IN and a bulk-OUT endpoint, laid out the way a real
    /// device would send it over the wire.
    fn usbtmc_config_descriptor(config_value: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[9, 0x02, 0, 0, 2, config_value, 0, 0x80, 50]);
        buf.extend_from_slice(&[
            9,
            0x04,
            0,
            0,
            2,
            usb::USBTMC_CLASS_CODE,
            usb::USBTMC_SUBCLASS_CODE,
            usb::USBTMC_PROTOCOL_CODE,
            0,
        ]);
        buf.extend_from_slice(&[7, 0x05, 0x81, 0x02, 64, 0, 0]); // bulk-IN
        buf.extend_from_slice(&[7, 0x05, 0x02, 0x02, 64, 0, 0]); // bulk-OUT
        buf
    }

    #[test]
    fn finds_the_usbtmc_interface_and_its_endpoints() {
        let buf = usbtmc_config_descriptor(1);
        let (config_value, table) = find_usbtmc_interface(&buf).expect("interface found");
        assert_eq!(config_value, 1);
        assert!(table.bulk_in.present);
        assert_eq!(table.bulk_in.address, 0x81);
        assert_eq!(table.bulk_in.max_packet_size, 64);
        assert!(table.bulk_out.present);
        assert_eq!(table.bulk_out.address, 0x02);
        assert!(!table.interrupt_in.present);
    }

    #[test]
    fn rejects_a_configuration_with_no_usbtmc_interface() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[9, 0x02, 0, 0, 1, 1, 0, 0x80, 50]);
        buf.extend_from_slice(&[9, 0x04, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0]);
        assert!(find_usbtmc_interface(&buf).is_none());
    }

    #[test]
    fn rejects_a_usbtmc_interface_missing_a_data_endpoint() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[9, 0x02, 0, 0, 1, 1, 0, 0x80, 50]);
        buf.extend_from_slice(&[
            9,
            0x04,
            0,
            0,
            1,
            usb::USBTMC_CLASS_CODE,
            usb::USBTMC_SUBCLASS_CODE,
            usb::USBTMC_PROTOCOL_CODE,
            0,
        ]);
        buf.extend_from_slice(&[7, 0x05, 0x81, 0x02, 64, 0, 0]); // bulk-IN only
        assert!(find_usbtmc_interface(&buf).is_none());
    }
}
