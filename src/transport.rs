//! ## Transport
//!
//! The downward (`HostTransport`, `Clock`) and upward (`EventSink`)
//! trait boundary between the engine and its owner. Both downward
//! traits are object-safe so an owner can hold `&mut dyn HostTransport`,
//! matching the trait-object style of `other_examples/...usbmidi-host...
//! lib.rs`'s `USBHost`/`Driver` pair (adapted here from `async_trait` to
//! a synchronous, non-blocking signature: every method returns
//! immediately and reports NAK rather than retrying internally).

use crate::types::{DeviceDescriptor, Endpoint};

/// Opaque transport-level result code, passed through unmodified from
/// whatever the concrete transport's error representation is.
pub type RawCode = u8;

/// Outcome of one non-blocking transfer attempt.
///
/// This stands in for an `nb`-style would-block result without adding
/// that dependency: `Nak` is a first-class outcome the driver consumes
/// directly rather than a retryable error, per invariant 3.4.5 ("NAK is
/// returned to the driver, not retried by the transport").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The transfer completed; the payload is `n` bytes.
    Ack(usize),
    /// The endpoint NAKed; try again on a later tick.
    Nak,
    /// The endpoint STALLed; the caller should clear the halt feature.
    Stall,
    /// Any other transport failure, opaque to the engine.
    Error(RawCode),
}

impl TransferOutcome {
    pub fn is_ack(self) -> bool {
        matches!(self, TransferOutcome::Ack(_))
    }
}

/// The host-controller operations the engine needs, supplied by the
/// owner. No method blocks; every transfer method returns promptly with
/// a [`TransferOutcome`].
pub trait HostTransport {
    /// Read the device descriptor of the device at `address`.
    fn get_device_descriptor(&mut self, address: u8) -> Result<DeviceDescriptor, RawCode>;

    /// Assign a new bus address to the device currently at address 0.
    fn set_address(&mut self, address: u8) -> Result<(), RawCode>;

    /// Select configuration `config_value` on the device at `address`.
    fn set_configuration(&mut self, address: u8, config_value: u8) -> Result<(), RawCode>;

    /// Register one endpoint's toggle/NAK-power state with the
    /// transport's endpoint table.
    fn set_endpoint_entry(&mut self, address: u8, index: u8, endpoint: &Endpoint) -> Result<(), RawCode>;

    /// Read configuration descriptor `index` of the device at `address`
    /// into `buf`, returning the number of bytes written.
    fn get_config_descriptor(&mut self, address: u8, index: u8, buf: &mut [u8]) -> Result<usize, RawCode>;

    /// Read the ASCII serial number string of the device at `address`
    /// into `buf`, returning the number of bytes written. Used only by
    /// the attach-time serial-number prefix filter.
    fn get_serial_number(&mut self, address: u8, buf: &mut [u8]) -> Result<usize, RawCode>;

    /// Issue a control transfer on endpoint 0 of the device at `address`.
    /// `data` is the setup-stage payload (OUT) or the scratch buffer to
    /// fill (IN), sized by the caller for the direction implied by
    /// `request_type`.
    fn control_request(
        &mut self,
        address: u8,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
    ) -> TransferOutcome;

    /// Submit `data` to the bulk-OUT endpoint.
    fn bulk_out(&mut self, address: u8, endpoint: &mut Endpoint, data: &[u8]) -> TransferOutcome;

    /// Read one packet from the bulk-IN endpoint into `buf`.
    fn bulk_in(&mut self, address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome;

    /// Read one packet from the interrupt-IN endpoint into `buf`,
    /// without blocking if nothing is pending.
    fn interrupt_in(&mut self, address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome;

    /// Clear the halt feature on the given endpoint address.
    fn clear_feature_halt(&mut self, address: u8, endpoint_address: u8) -> Result<(), RawCode>;

    /// Allocate a free bus address from the host's address pool.
    fn alloc_address(&mut self) -> Option<u8>;

    /// Return `address` to the host's address pool.
    fn free_address(&mut self, address: u8);

    /// Register this driver instance as owning `address`'s device
    /// class, so the host dispatches further polling/teardown to it.
    fn register_device_class(&mut self, address: u8);

    /// Cooperative per-tick housekeeping the transport itself needs to
    /// run (bus resets, enumeration bookkeeping); called once per
    /// engine tick before the engine's own state machine runs.
    fn task(&mut self);
}

/// Millisecond wall-clock source, used for NAK-retry deadlines.
pub trait Clock {
    fn now_millis(&self) -> u32;
}

/// Owner-supplied notification sink (§4.7/§9's four upward
/// notifications). Default bodies make all four optional to implement.
#[allow(unused_variables)]
pub trait EventSink {
    /// The device descriptor read during attach.
    fn on_device_descriptor(&mut self, descriptor: DeviceDescriptor) {}

    /// `data` is one complete DEV_DEP_MSG_IN payload (EOM already seen).
    fn on_received(&mut self, data: &[u8]) {}

    /// The single byte returned by a completed READ_STATUS_BYTE.
    fn on_read_status_byte(&mut self, status_byte: u8) {}

    /// A recoverable or terminal failure, with its info code and detail.
    fn on_failed(&mut self, info: crate::error::UsbtmcInfo, detail: u8) {}
}
