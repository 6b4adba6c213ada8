//! ## USBTMC Errors
//!
//! Two error surfaces flow out of the engine, per the host-transport /
//! protocol split in the spec: [`UsbtmcInfo`] is the protocol-level
//! information code the engine emits to its [`crate::transport::EventSink`]
//! via `on_failed`, alongside a raw `u8` detail which is either one of the
//! [`crate::constants::detail_code`] sentinels or an opaque transport
//! result code passed through unmodified. [`AttachError`] covers the
//! separate, one-shot attach sequence.
//!

/// Informational/failure taxonomy emitted via `EventSink::on_failed`.
///
/// Positive variants are successful recovery outcomes; negative variants
/// are failures. The discriminants match the USBTMC host driver this
/// engine is modeled on, so logs and on-wire captures line up with
/// vendor documentation.
#[allow(unused)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i8)]
pub enum UsbtmcInfo {
    #[error("abort bulk-in succeeded")]
    AbortBulkInSucceed = 1,
    #[error("clear succeeded")]
    ClearSucceed = 2,
    #[error("transmit failed")]
    TransmitError = -1,
    #[error("request failed")]
    RequestError = -2,
    #[error("read status byte failed")]
    ReadStatusByteError = -3,
    #[error("receive header timed out waiting on a NAK")]
    ReceiveHeaderNakAndTimeouted = -4,
    #[error("receive header failed")]
    ReceiveHeaderError = -5,
    #[error("receive payload timed out waiting on a NAK")]
    ReceivePayloadNakAndTimeouted = -6,
    #[error("receive payload failed")]
    ReceivePayloadError = -7,
    #[error("initiate abort bulk-out failed (transport error)")]
    InitiateAbortBulkOutError = -8,
    #[error("initiate abort bulk-out rejected by device")]
    InitiateAbortBulkOutFailed = -9,
    #[error("check abort bulk-out status failed")]
    CheckAbortBulkOutStatusError = -10,
    #[error("initiate abort bulk-in failed (transport error)")]
    InitiateAbortBulkInError = -11,
    #[error("initiate abort bulk-in rejected by device")]
    InitiateAbortBulkInFailed = -12,
    #[error("draining bulk-in during abort failed")]
    ReadingByAbortBulkInError = -13,
    #[error("check abort bulk-in status failed")]
    CheckAbortBulkInStatusError = -14,
    #[error("initiate clear failed (transport error)")]
    InitiateClearError = -15,
    #[error("initiate clear rejected by device")]
    InitiateClearFailed = -16,
    #[error("check clear status failed")]
    CheckClearStatusError = -17,
    #[error("draining bulk-in during clear failed")]
    ReadingByInitiateClearError = -18,
    #[error("clear-feature (endpoint halt) failed")]
    ClearFeatureError = -19,
}

impl UsbtmcInfo {
    /// True for the two successful-recovery variants (positive codes).
    pub fn is_success(self) -> bool {
        matches!(self, UsbtmcInfo::AbortBulkInSucceed | UsbtmcInfo::ClearSucceed)
    }
}

/// Detail accompanying a `UsbtmcInfo` failure notification: either one of
/// the four sentinel conditions the engine itself detects, or an opaque
/// transport result code passed through unmodified.
#[allow(unused)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DetailCode {
    #[error("operation failed")]
    Failed,
    #[error("transmit ring overflowed")]
    Overflowed,
    #[error("response had an unexpected size")]
    UnexpectedSize,
    #[error("engine busy with another operation")]
    Busy,
    #[error("transport result code {0:#04x}")]
    Raw(u8),
}

impl DetailCode {
    /// Collapse back to the raw byte stored in a notification, matching
    /// the sentinel values in [`crate::constants::detail_code`].
    pub fn as_byte(self) -> u8 {
        match self {
            DetailCode::Failed => crate::constants::detail_code::FAILED,
            DetailCode::Overflowed => crate::constants::detail_code::OVERFLOWED,
            DetailCode::UnexpectedSize => crate::constants::detail_code::UNEXPECTEDSIZE,
            DetailCode::Busy => crate::constants::detail_code::BUSY,
            DetailCode::Raw(code) => code,
        }
    }

    /// Recover a `DetailCode` from the raw byte in a notification.
    pub fn from_byte(byte: u8) -> Self {
        use crate::constants::detail_code::*;
        match byte {
            FAILED => DetailCode::Failed,
            OVERFLOWED => DetailCode::Overflowed,
            UNEXPECTEDSIZE => DetailCode::UnexpectedSize,
            BUSY => DetailCode::Busy,
            raw => DetailCode::Raw(raw),
        }
    }
}

/// Attach-time failures. Any of these leaves the driver unattached and,
/// per the spec, releases the bus address that had been allocated.
#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("device descriptor read failed (rcode {0:#04x})")]
    DeviceDescriptorFailed(u8),
    #[error("device does not match the configured VID/PID filter")]
    VidPidMismatch,
    #[error("device serial number does not match the configured prefix")]
    SerialNumberMismatch,
    #[error("no address available in the host's address pool")]
    AddressPoolExhausted,
    #[error("address assignment failed (rcode {0:#04x})")]
    SetAddressFailed(u8),
    #[error("endpoint-table assignment failed (rcode {0:#04x})")]
    SetEndpointEntryFailed(u8),
    #[error("configuration descriptor read failed (rcode {0:#04x})")]
    ConfigDescriptorFailed(u8),
    #[error("no configuration exposed both a bulk-IN and a bulk-OUT endpoint")]
    NoDataEndpoints,
    #[error("SET_CONFIGURATION failed (rcode {0:#04x})")]
    SetConfigurationFailed(u8),
    #[error("GET_CAPABILITIES failed (rcode {0:#04x})")]
    GetCapabilitiesFailed(u8),
    #[error("REN_CONTROL assertion rejected (status {0:#04x})")]
    RenControlRejected(u8),
}
