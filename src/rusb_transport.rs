//! ## rusb transport adapter (feature `rusb`)
//!
//! A concrete [`HostTransport`]/[`Clock`] pair backed by `rusb`, for
//! talking to a real instrument over libusb. Grounded on the teacher's
//! `init.rs`/`communication` modules, which already do every one of
//! these operations against a blocking `rusb::DeviceHandle` — this
//! adapter keeps that exact wire behaviour and just reshapes it to the
//! engine's non-blocking `TransferOutcome` boundary.
//!
//! Desktop USB is already enumerated by the OS by the time libusb opens
//! a device, so `set_address`/`alloc_address`/`free_address` are
//! simplified to bookkeeping no-ops here: there is exactly one device
//! behind a `RusbTransport`, and it already has its final bus address.

use std::time::{Duration, Instant};

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use crate::transport::{Clock, HostTransport, RawCode, TransferOutcome};
use crate::types::{DeviceDescriptor, Endpoint};

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
const BULK_TIMEOUT: Duration = Duration::from_millis(50);

fn map_transfer_error(err: rusb::Error) -> TransferOutcome {
    match err {
        rusb::Error::Timeout => TransferOutcome::Nak,
        rusb::Error::Pipe => TransferOutcome::Stall,
        rusb::Error::NoDevice => TransferOutcome::Error(0x01),
        rusb::Error::Access => TransferOutcome::Error(0x02),
        rusb::Error::Busy => TransferOutcome::Error(0x03),
        rusb::Error::Overflow => TransferOutcome::Error(0x04),
        _ => TransferOutcome::Error(0xFF),
    }
}

/// `HostTransport` backed by one open `rusb` device handle.
pub struct RusbTransport {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
    address_allocated: bool,
}

impl RusbTransport {
    pub fn new(device: Device<Context>, handle: DeviceHandle<Context>) -> Self {
        RusbTransport {
            device,
            handle,
            address_allocated: false,
        }
    }

    fn control_in(&mut self, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8]) -> TransferOutcome {
        match self
            .handle
            .read_control(request_type, request, value, index, buf, CONTROL_TIMEOUT)
        {
            Ok(n) => TransferOutcome::Ack(n),
            Err(e) => map_transfer_error(e),
        }
    }
}

impl HostTransport for RusbTransport {
    fn get_device_descriptor(&mut self, _address: u8) -> Result<DeviceDescriptor, RawCode> {
        let descr = self.device.device_descriptor().map_err(|_| 0xFFu8)?;
        Ok(DeviceDescriptor {
            vendor_id: descr.vendor_id(),
            product_id: descr.product_id(),
            device_class: descr.class_code(),
            max_packet_size0: descr.max_packet_size(),
            num_configurations: descr.num_configurations(),
        })
    }

    fn set_address(&mut self, _address: u8) -> Result<(), RawCode> {
        self.address_allocated = true;
        Ok(())
    }

    fn set_configuration(&mut self, _address: u8, config_value: u8) -> Result<(), RawCode> {
        self.handle
            .set_active_configuration(config_value)
            .map_err(|_| 0xFFu8)
    }

    fn set_endpoint_entry(&mut self, _address: u8, _index: u8, _endpoint: &Endpoint) -> Result<(), RawCode> {
        // libusb tracks endpoint/toggle state internally; nothing to mirror.
        Ok(())
    }

    /// `rusb` hands back already-parsed interface/endpoint descriptors
    /// rather than the raw configuration-descriptor byte stream libusb
    /// read off the wire. This re-serialises just the fields
    /// `find_usbtmc_interface` inspects (descriptor type, lengths,
    /// class triple, endpoint address/attributes/wMaxPacketSize) into
    /// the same on-wire shape, so the shared parser works unmodified
    /// against either transport.
    fn get_config_descriptor(&mut self, _address: u8, index: u8, buf: &mut [u8]) -> Result<usize, RawCode> {
        let config = self.device.config_descriptor(index).map_err(|_| 0xFFu8)?;
        let mut cursor = 0usize;
        let mut put = |bytes: &[u8]| {
            let n = bytes.len().min(buf.len().saturating_sub(cursor));
            buf[cursor..cursor + n].copy_from_slice(&bytes[..n]);
            cursor += n;
        };

        put(&[9, 0x02, 0, 0, 0, config.number(), 0, 0, 0]);
        for interface in config.interfaces() {
            for desc in interface.descriptors() {
                put(&[
                    9,
                    0x04,
                    desc.interface_number(),
                    desc.setting_number(),
                    desc.num_endpoints(),
                    desc.class_code(),
                    desc.sub_class_code(),
                    desc.protocol_code(),
                    0,
                ]);
                for ep in desc.endpoint_descriptors() {
                    let max_packet = ep.max_packet_size().to_le_bytes();
                    put(&[7, 0x05, ep.address(), ep.transfer_type() as u8, max_packet[0], max_packet[1], 0]);
                }
            }
        }
        Ok(cursor)
    }

    fn get_serial_number(&mut self, _address: u8, buf: &mut [u8]) -> Result<usize, RawCode> {
        let descr = self.device.device_descriptor().map_err(|_| 0xFFu8)?;
        let serial = self
            .handle
            .read_serial_number_string_ascii(&descr)
            .map_err(|_| 0xFFu8)?;
        let bytes = serial.as_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn control_request(
        &mut self,
        _address: u8,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
    ) -> TransferOutcome {
        if request_type & 0x80 != 0 {
            self.control_in(request_type, request, value, index, data)
        } else {
            match self.handle.write_control(request_type, request, value, index, data, CONTROL_TIMEOUT) {
                Ok(n) => TransferOutcome::Ack(n),
                Err(e) => map_transfer_error(e),
            }
        }
    }

    fn bulk_out(&mut self, _address: u8, endpoint: &mut Endpoint, data: &[u8]) -> TransferOutcome {
        match self.handle.write_bulk(endpoint.address, data, BULK_TIMEOUT) {
            Ok(n) => TransferOutcome::Ack(n),
            Err(e) => map_transfer_error(e),
        }
    }

    fn bulk_in(&mut self, _address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome {
        match self.handle.read_bulk(endpoint.address, buf, BULK_TIMEOUT) {
            Ok(n) => TransferOutcome::Ack(n),
            Err(e) => map_transfer_error(e),
        }
    }

    fn interrupt_in(&mut self, _address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome {
        match self.handle.read_interrupt(endpoint.address, buf, BULK_TIMEOUT) {
            Ok(n) => TransferOutcome::Ack(n),
            Err(e) => map_transfer_error(e),
        }
    }

    fn clear_feature_halt(&mut self, _address: u8, endpoint_address: u8) -> Result<(), RawCode> {
        self.handle.clear_halt(endpoint_address).map_err(|_| 0xFFu8)
    }

    fn alloc_address(&mut self) -> Option<u8> {
        if self.address_allocated {
            None
        } else {
            Some(self.device.address())
        }
    }

    fn free_address(&mut self, _address: u8) {
        self.address_allocated = false;
    }

    fn register_device_class(&mut self, _address: u8) {}

    fn task(&mut self) {}
}

/// Wall clock backed by `std::time::Instant`/`SystemTime`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u32 {
        let elapsed = Instant::now().duration_since(self.start);
        elapsed.as_millis() as u32
    }
}

/// Find and open the first USBTMC-class device on the system.
pub fn open_first_usbtmc_device(context: &Context) -> Option<RusbTransport> {
    for device in context.devices().ok()?.iter() {
        let descr = device.device_descriptor().ok()?;
        let is_usbtmc = (0..descr.num_configurations()).any(|n| {
            device
                .config_descriptor(n)
                .map(|config| {
                    config.interfaces().any(|iface| {
                        iface.descriptors().any(|d| {
                            d.class_code() == crate::constants::usb::USBTMC_CLASS_CODE
                                && d.sub_class_code() == crate::constants::usb::USBTMC_SUBCLASS_CODE
                                && d.protocol_code() == crate::constants::usb::USBTMC_PROTOCOL_CODE
                        })
                    })
                })
                .unwrap_or(false)
        });
        if is_usbtmc {
            if let Ok(handle) = device.open() {
                return Some(RusbTransport::new(device, handle));
            }
        }
    }
    None
}
