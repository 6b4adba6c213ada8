//! ## Constants
//!
//! Wire-format and protocol constants shared by the codec, the state
//! machine and the attach sequence.
//!

#[allow(unused)]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// The protocol code for the USB488 spec of usbtmc
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x01;
}

#[allow(unused)]
pub mod misc {
    /// Size in bytes of a USBTMC bulk message header.
    pub const USBTMC_HEADER_SIZE: usize = 12;
    /// Capacity of the transmit ring.
    pub const USBTMC_FIFO_SIZE: usize = 128;
    /// Size of the scratch buffer used to receive one bulk-IN packet.
    pub const RECEIVE_BUFFER_SIZE: usize = 64;
    /// NAK-retry deadline for ReceiveHeader/ReceivePayload, in milliseconds.
    pub const NAK_TIMEOUT_MILLIS: u32 = 5000;
    /// NAK power that makes the transport hand a NAK back to the driver
    /// immediately instead of retrying it internally (USB Host Shield
    /// convention; used on the bulk-IN endpoint slot).
    pub const NAK_NOWAIT: u8 = 0;
    /// NAK power that makes the transport retry a NAK internally before
    /// giving up (USB Host Shield convention; used everywhere else).
    pub const NAK_MAX_POWER: u8 = 15;
    /// Default termination character (NI-VISA default '\n'), used only by
    /// the convenience line-reader, never by the engine itself.
    pub const DEFAULT_TERM_CHAR: u8 = b'\n';
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// The device has received a split transaction CHECK_STATUS request and the request is being processed
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure for unspecified or undefined reason
    pub const STATUS_FAILED: u8 = 0x80;
    /// The device received an INITIATE_ABORT request, but the request is not in progress
    pub const STATUS_TRANSFER_NOT_IN_PROGRESS: u8 = 0x81;
    /// The device got a CHECK_STATUS request without any INITIATE request being processed
    pub const STATUS_SPLIT_NOT_IN_PROGRESS: u8 = 0x82;
    /// The device got an INIATE request, but another one is already being processed
    pub const STATUS_SPLIT_IN_PROGRESS: u8 = 0x83;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 1;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 2;
    pub const INITIATE_ABORT_BULK_IN: u8 = 3;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;
    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;
    pub const INDICATOR_PULSE: u8 = 64;
    /// USB488 subclass request.
    pub const REN_CONTROL: u8 = 0xA0;
    /// USB488 subclass request.
    pub const READ_STATUS_BYTE: u8 = 128;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEV_DEP_MSG_OUT: u8 = 1;
    pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
    /// Shares its MsgID with `REQUEST_DEV_DEP_MSG_IN`; the two are told
    /// apart by which endpoint (and direction) the packet travels on.
    /// See DESIGN.md for the discrepancy with the spec glossary.
    pub const DEV_DEP_MSG_IN: u8 = 2;
    pub const VENDOR_SPECIFIC_MSG_OUT: u8 = 126;
    pub const REQUEST_VENDOR_SPECIFIC_MSG_IN: u8 = 127;
    pub const VENDOR_SPECIFIC_MSG_IN: u8 = 127;
}

#[allow(unused)]
pub mod detail_code {
    pub const FAILED: u8 = 0xF1;
    pub const OVERFLOWED: u8 = 0xF2;
    pub const UNEXPECTEDSIZE: u8 = 0xF3;
    pub const BUSY: u8 = 0xF4;
}
