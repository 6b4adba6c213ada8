//! ## Command state machine
//!
//! The cooperative, non-blocking driver. Nothing here blocks or
//! allocates: one call to [`Driver::run`] advances the state machine by
//! at most one transport operation. Grounded almost line-for-line on
//! `Run()` and its helpers in
//! `original_source/USBTMCHostV2/usbtmc.cpp`, translated to the trait
//! boundary in [`crate::transport`] and with the Open-Question fixes
//! from the design notes applied (see `DESIGN.md`).

use crate::capabilities::Capabilities;
use crate::codec;
use crate::constants::{control_requests, detail_code, misc, usbtmc_status};
use crate::error::{DetailCode, UsbtmcInfo};
use crate::ring::TransmitRing;
use crate::transport::{Clock, EventSink, HostTransport, TransferOutcome};
use crate::types::{BulkTagGenerator, EndpointTable, StatusByteTagGenerator};

/// The 13 states of the main command state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Pause,
    ReceiveHeader,
    ReceivePayload,
    InitiateAbortBulkOut,
    CheckAbortBulkOutStatus,
    InitiateAbortBulkIn,
    ReadingByAbortBulkIn,
    CheckAbortBulkInStatus,
    InitiateClear,
    CheckClearStatus,
    ReadingByInitiateClear,
    ClearFeature,
}

/// The independent single-shot READ_STATUS_BYTE procedure (§4.6). It
/// ticks alongside the main state machine rather than inside it, since
/// the two share no state beyond the device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusByteState {
    AwaitingControlResponse,
    AwaitingInterruptByte,
}

struct StatusByteRequest {
    state: StatusByteState,
    rtb_tag: u8,
    wait_begin_millis: u32,
}

/// The cooperative USBTMC/USB488 driver. Owns no transport, no clock and
/// no event sink; all three are supplied to [`Driver::run`] (and to the
/// attach sequence in [`crate::attach`]) on every call.
pub struct Driver {
    pub(crate) address: u8,
    pub(crate) endpoints: EndpointTable,
    pub(crate) capabilities: Capabilities,
    state: CommandState,
    connected: bool,

    bulk_tag: BulkTagGenerator,
    last_btag: u8,
    status_tag: StatusByteTagGenerator,

    tx_ring: TransmitRing,
    is_sent_header: bool,

    /// Bytes still owed to the caller for the active `Request` (the
    /// spec's `requestLength`), clamped against the device's declared
    /// `TransferSize` as soon as a header arrives (§8 "Receive clamping").
    request_remaining: u32,
    scratch: [u8; misc::RECEIVE_BUFFER_SIZE],

    wait_begin_millis: u32,
    status_request: Option<StatusByteRequest>,
}

impl Driver {
    pub fn new(address: u8, endpoints: EndpointTable, capabilities: Capabilities) -> Self {
        Driver {
            address,
            endpoints,
            capabilities,
            state: CommandState::Idle,
            connected: true,
            bulk_tag: BulkTagGenerator::new(),
            last_btag: 0,
            status_tag: StatusByteTagGenerator::new(),
            tx_ring: TransmitRing::new(),
            is_sent_header: false,
            request_remaining: 0,
            scratch: [0; misc::RECEIVE_BUFFER_SIZE],
            wait_begin_millis: 0,
            status_request: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == CommandState::Idle
    }

    /// The current state, for owners that want to report or log it.
    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_pause(&self) -> bool {
        self.state == CommandState::Pause
    }

    pub fn pause(&mut self) {
        if self.state == CommandState::Idle {
            self.state = CommandState::Pause;
        }
    }

    pub fn unpause(&mut self) {
        if self.state == CommandState::Pause {
            self.state = CommandState::Idle;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Queue `data` for transmission, finishing with EOM once the ring
    /// has drained it all (§4.4's fixed-size `Transmit(n, ptr)`, i.e.
    /// `BeginTransmit(n)` followed by `TransmitData` for every byte).
    /// Per the design notes, every byte is fed into the ring regardless
    /// of how much room `transmit_done` would report free right now; the
    /// ring drains itself across ticks. Rejected with `TransmitError`/
    /// `BUSY` (and the wire untouched) unless the engine is `Idle`.
    pub fn transmit(&mut self, data: &[u8], sink: &mut dyn EventSink) -> usize {
        if !self.is_idle() {
            sink.on_failed(UsbtmcInfo::TransmitError, DetailCode::Busy.as_byte());
            return 0;
        }
        self.is_sent_header = false;
        self.push_transmit_bytes(data, sink)
    }

    /// Begin a streaming transmission; call [`Driver::transmit_data`]
    /// one or more times, then poll [`Driver::transmit_done`]. Rejected
    /// with `TransmitError`/`BUSY` unless the engine is `Idle`.
    pub fn begin_transmit(&mut self, sink: &mut dyn EventSink) {
        if !self.is_idle() {
            sink.on_failed(UsbtmcInfo::TransmitError, DetailCode::Busy.as_byte());
            return;
        }
        self.is_sent_header = false;
    }

    /// Feed one more chunk of a streaming transmission into the ring.
    /// Returns the number of bytes actually queued. Rejected with
    /// `TransmitError`/`BUSY` unless the engine is `Idle`. If queueing
    /// `data` would overflow the ring, the transfer is abandoned: the
    /// ring is flushed, `TransmitError`/`OVERFLOWED` is reported, and
    /// `InitiateAbortBulkOut` is scheduled iff a header had already gone
    /// out (§4.4 "Overflow").
    pub fn transmit_data(&mut self, data: &[u8], sink: &mut dyn EventSink) -> usize {
        if !self.is_idle() {
            sink.on_failed(UsbtmcInfo::TransmitError, DetailCode::Busy.as_byte());
            return 0;
        }
        self.push_transmit_bytes(data, sink)
    }

    /// True once every previously queued byte has reached the wire in a
    /// packet that carried the end-of-message bit (§4.4 `TransmitDone`).
    pub fn transmit_done(&self) -> bool {
        self.tx_ring.is_empty() && !self.is_sent_header
    }

    fn push_transmit_bytes(&mut self, data: &[u8], sink: &mut dyn EventSink) -> usize {
        let written = self.tx_ring.write(data);
        if written < data.len() {
            self.tx_ring.flush();
            let had_sent_header = self.is_sent_header;
            self.is_sent_header = false;
            sink.on_failed(UsbtmcInfo::TransmitError, DetailCode::Overflowed.as_byte());
            if had_sent_header {
                self.state = CommandState::InitiateAbortBulkOut;
            }
        }
        written
    }

    /// Issue REQUEST_DEV_DEP_MSG_IN for up to `length` bytes (§4.5
    /// `Request(n)`), an operation entirely independent of `transmit`.
    /// Requires the engine to be `Idle`; otherwise rejects with
    /// `RequestError`/`BUSY` and leaves the wire untouched.
    pub fn request(&mut self, length: u32, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        if !self.is_idle() {
            sink.on_failed(UsbtmcInfo::RequestError, DetailCode::Busy.as_byte());
            return;
        }
        self.begin_receive(transport, clock, length);
    }

    /// Kick off the USB488 READ_STATUS_BYTE procedure. Does nothing if
    /// one is already in flight.
    pub fn read_status_byte(&mut self, clock: &dyn Clock) {
        if self.status_request.is_some() {
            return;
        }
        let rtb_tag = self.status_tag.advance();
        self.status_request = Some(StatusByteRequest {
            state: StatusByteState::AwaitingControlResponse,
            rtb_tag,
            wait_begin_millis: clock.now_millis(),
        });
    }

    pub fn abort_transmit(&mut self) {
        if matches!(self.state, CommandState::Idle | CommandState::Pause) {
            self.state = CommandState::InitiateAbortBulkOut;
        }
    }

    pub fn abort_receive(&mut self) {
        if matches!(self.state, CommandState::Idle | CommandState::Pause) {
            self.state = CommandState::InitiateAbortBulkIn;
        }
    }

    pub fn clear(&mut self) {
        if matches!(self.state, CommandState::Idle | CommandState::Pause) {
            self.state = CommandState::InitiateClear;
        }
    }

    fn fail(&mut self, sink: &mut dyn EventSink, info: UsbtmcInfo, detail: DetailCode) {
        log::warn!("usbtmc: {info} (detail {detail})");
        self.state = CommandState::Idle;
        sink.on_failed(info, detail.as_byte());
    }

    fn nak_timed_out(&self, clock: &dyn Clock) -> bool {
        clock.now_millis().wrapping_sub(self.wait_begin_millis) >= misc::NAK_TIMEOUT_MILLIS
    }

    /// Advance the state machine by one step. Call this repeatedly
    /// (e.g. once per main loop iteration); it never blocks.
    pub fn run(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        transport.task();
        self.drain_transmit_ring(transport, sink);
        self.tick_status_byte(transport, clock, sink);

        match self.state {
            CommandState::Idle | CommandState::Pause => {}
            CommandState::ReceiveHeader => self.tick_receive_header(transport, clock, sink),
            CommandState::ReceivePayload => self.tick_receive_payload(transport, clock, sink),
            CommandState::InitiateAbortBulkOut => self.tick_initiate_abort_bulk_out(transport, sink),
            CommandState::CheckAbortBulkOutStatus => self.tick_check_abort_bulk_out_status(transport, sink),
            CommandState::InitiateAbortBulkIn => self.tick_initiate_abort_bulk_in(transport, sink),
            CommandState::ReadingByAbortBulkIn => self.tick_reading_by_abort_bulk_in(transport, sink),
            CommandState::CheckAbortBulkInStatus => self.tick_check_abort_bulk_in_status(transport, sink),
            CommandState::InitiateClear => self.tick_initiate_clear(transport, sink),
            CommandState::CheckClearStatus => self.tick_check_clear_status(transport, sink),
            CommandState::ReadingByInitiateClear => self.tick_reading_by_initiate_clear(transport, sink),
            CommandState::ClearFeature => self.tick_clear_feature(transport, sink),
        }
    }

    /// Alias kept for owners that think of `run` as advancing a clock
    /// tick rather than a protocol step; identical behaviour.
    pub fn time_step(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        self.run(transport, clock, sink)
    }

    // -- bulk-OUT draining --

    fn drain_transmit_ring(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        if self.tx_ring.is_empty() && !self.is_sent_header {
            return;
        }
        if !matches!(self.state, CommandState::Idle) {
            return;
        }

        let max_packet = self.endpoints.bulk_out.max_packet_size as usize;
        let payload_cap = max_packet.min(self.scratch.len() - misc::USBTMC_HEADER_SIZE);
        let mut payload_len = 0;
        while payload_len < payload_cap {
            match self.tx_ring.pop() {
                Some(b) => {
                    self.scratch[misc::USBTMC_HEADER_SIZE + payload_len] = b;
                    payload_len += 1;
                }
                None => break,
            }
        }
        let end_of_message = self.tx_ring.is_empty();

        let tag = self.bulk_tag.current();
        let header = codec::dev_dep_msg_out_header(tag, payload_len as u32, end_of_message);
        self.scratch[..misc::USBTMC_HEADER_SIZE].copy_from_slice(&header);

        let packet_len = misc::USBTMC_HEADER_SIZE + payload_len;
        let scratch = self.scratch;
        match transport.bulk_out(self.address, &mut self.endpoints.bulk_out, &scratch[..packet_len]) {
            TransferOutcome::Ack(_) => {
                self.last_btag = self.bulk_tag.advance();
                self.is_sent_header = true;
                if end_of_message {
                    self.is_sent_header = false;
                }
            }
            TransferOutcome::Nak => {
                // retried on a later tick; nothing queued is lost.
            }
            TransferOutcome::Stall | TransferOutcome::Error(_) => {
                self.tx_ring.flush();
                let had_sent_header = self.is_sent_header;
                self.is_sent_header = false;
                sink.on_failed(UsbtmcInfo::TransmitError, detail_code::FAILED);
                if had_sent_header {
                    self.state = CommandState::InitiateAbortBulkOut;
                }
            }
        }
    }

    fn begin_receive(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, length: u32) {
        let tag = self.bulk_tag.current();
        let header = codec::request_dev_dep_msg_in_header(tag, length, None);
        match transport.bulk_out(self.address, &mut self.endpoints.bulk_out, &header) {
            TransferOutcome::Ack(_) => {
                self.last_btag = self.bulk_tag.advance();
                self.request_remaining = length;
                self.wait_begin_millis = clock.now_millis();
                self.state = CommandState::ReceiveHeader;
                log::trace!("usbtmc: sent REQUEST_DEV_DEP_MSG_IN (btag {tag}, length {length})");
            }
            _ => {
                // left idle; the owner can retry `request` themselves.
            }
        }
    }

    // -- bulk-IN receive --

    fn tick_receive_header(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        let mut buf = self.scratch;
        let cap = buf.len();
        match transport.bulk_in(self.address, &mut self.endpoints.bulk_in, &mut buf[..cap]) {
            TransferOutcome::Ack(n) => {
                self.scratch = buf;
                match codec::parse_dev_dep_msg_in_header(&self.scratch[..n]) {
                    Some(header) => {
                        // §8 "Receive clamping": requestLength = min(requestLength, declared).
                        self.request_remaining = self.request_remaining.min(header.transfer_size);
                        let available = (n - misc::USBTMC_HEADER_SIZE) as u32;
                        let delivered = available.min(self.request_remaining) as usize;
                        if delivered > 0 {
                            let start = misc::USBTMC_HEADER_SIZE;
                            sink.on_received(&self.scratch[start..start + delivered]);
                        }
                        self.request_remaining -= delivered as u32;
                        if self.request_remaining == 0 || header.end_of_message {
                            self.state = CommandState::Idle;
                        } else {
                            self.state = CommandState::ReceivePayload;
                        }
                    }
                    None => self.fail(sink, UsbtmcInfo::ReceiveHeaderError, DetailCode::UnexpectedSize),
                }
            }
            TransferOutcome::Nak => {
                if self.nak_timed_out(clock) {
                    self.fail(sink, UsbtmcInfo::ReceiveHeaderNakAndTimeouted, DetailCode::Failed);
                }
            }
            TransferOutcome::Stall | TransferOutcome::Error(_) => {
                self.fail(sink, UsbtmcInfo::ReceiveHeaderError, DetailCode::Failed)
            }
        }
    }

    fn tick_receive_payload(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        let mut buf = self.scratch;
        let cap = buf.len();
        match transport.bulk_in(self.address, &mut self.endpoints.bulk_in, &mut buf[..cap]) {
            TransferOutcome::Ack(n) => {
                self.scratch = buf;
                let delivered = (n as u32).min(self.request_remaining) as usize;
                if delivered > 0 {
                    sink.on_received(&self.scratch[..delivered]);
                }
                self.request_remaining = self.request_remaining.saturating_sub(delivered as u32);
                let short_packet = (n as u16) < self.endpoints.bulk_in.max_packet_size;
                if self.request_remaining == 0 || short_packet {
                    self.state = CommandState::Idle;
                } else {
                    self.wait_begin_millis = clock.now_millis();
                }
            }
            TransferOutcome::Nak => {
                if self.nak_timed_out(clock) {
                    self.fail(sink, UsbtmcInfo::ReceivePayloadNakAndTimeouted, DetailCode::Failed);
                }
            }
            TransferOutcome::Stall | TransferOutcome::Error(_) => {
                self.fail(sink, UsbtmcInfo::ReceivePayloadError, DetailCode::Failed)
            }
        }
    }

    // -- abort bulk-OUT --

    fn tick_initiate_abort_bulk_out(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut status = [0u8; 2];
        let outcome = transport.control_request(
            self.address,
            0xA2,
            control_requests::INITIATE_ABORT_BULK_OUT,
            self.last_btag as u16,
            self.endpoints.bulk_out.address as u16,
            &mut status,
        );
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.state = CommandState::CheckAbortBulkOutStatus;
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::InitiateAbortBulkOutFailed, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::InitiateAbortBulkOutError, DetailCode::Failed),
        }
    }

    fn tick_check_abort_bulk_out_status(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut status = [0u8; misc::USBTMC_HEADER_SIZE];
        let outcome = transport.control_request(
            self.address,
            0xA2,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
            0,
            self.endpoints.bulk_out.address as u16,
            &mut status,
        );
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.tx_ring.flush();
                self.is_sent_header = false;
                self.state = CommandState::Idle;
            }
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_PENDING => {
                // stay; poll again next tick.
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::CheckAbortBulkOutStatusError, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::CheckAbortBulkOutStatusError, DetailCode::Failed),
        }
    }

    // -- abort bulk-IN --

    fn tick_initiate_abort_bulk_in(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut status = [0u8; 2];
        let outcome = transport.control_request(
            self.address,
            0xA2,
            control_requests::INITIATE_ABORT_BULK_IN,
            self.bulk_tag.current() as u16,
            self.endpoints.bulk_in.address as u16,
            &mut status,
        );
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.state = CommandState::ReadingByAbortBulkIn;
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::InitiateAbortBulkInFailed, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::InitiateAbortBulkInError, DetailCode::Failed),
        }
    }

    fn tick_reading_by_abort_bulk_in(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut buf = self.scratch;
        let cap = buf.len();
        match transport.bulk_in(self.address, &mut self.endpoints.bulk_in, &mut buf[..cap]) {
            TransferOutcome::Ack(n) => {
                self.scratch = buf;
                let short_packet = (n as u16) < self.endpoints.bulk_in.max_packet_size;
                if short_packet {
                    self.state = CommandState::CheckAbortBulkInStatus;
                }
                // a full packet is simply discarded; draining continues.
            }
            TransferOutcome::Nak => self.state = CommandState::CheckAbortBulkInStatus,
            TransferOutcome::Stall | TransferOutcome::Error(_) => {
                self.fail(sink, UsbtmcInfo::ReadingByAbortBulkInError, DetailCode::Failed)
            }
        }
    }

    fn tick_check_abort_bulk_in_status(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut status = [0u8; misc::USBTMC_HEADER_SIZE];
        let outcome = transport.control_request(
            self.address,
            0xA2,
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
            0,
            self.endpoints.bulk_in.address as u16,
            &mut status,
        );
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.request_remaining = 0;
                self.state = CommandState::Idle;
                log::debug!("usbtmc: abort bulk-in completed");
                sink.on_failed(UsbtmcInfo::AbortBulkInSucceed, 0);
            }
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_PENDING => {
                // bmAbortBulkIn bit 0: device wants another short read first.
                let bm_abort_bulk_in = status[1];
                if (bm_abort_bulk_in & 0x01) == 0x01 {
                    self.state = CommandState::ReadingByAbortBulkIn;
                }
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::CheckAbortBulkInStatusError, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::CheckAbortBulkInStatusError, DetailCode::Failed),
        }
    }

    // -- clear --

    fn tick_initiate_clear(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut status = [0u8; 1];
        let outcome = transport.control_request(self.address, 0xA1, control_requests::INITIATE_CLEAR, 0, 0, &mut status);
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.state = CommandState::CheckClearStatus;
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::InitiateClearFailed, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::InitiateClearError, DetailCode::Failed),
        }
    }

    fn tick_check_clear_status(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        // Per the design notes: the response to CHECK_CLEAR_STATUS is
        // 2 bytes, not the 8 a literal reading of the original buffer
        // size would suggest.
        let mut status = [0u8; 2];
        let outcome = transport.control_request(self.address, 0xA1, control_requests::CHECK_CLEAR_STATUS, 0, 0, &mut status);
        match outcome {
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_SUCCESS => {
                self.state = CommandState::ClearFeature;
            }
            TransferOutcome::Ack(_) if status[0] == usbtmc_status::STATUS_PENDING => {
                if (status[1] & 0x01) == 0x01 {
                    self.state = CommandState::ReadingByInitiateClear;
                }
            }
            TransferOutcome::Ack(_) => {
                self.fail(sink, UsbtmcInfo::CheckClearStatusError, DetailCode::Raw(status[0]));
            }
            _ => self.fail(sink, UsbtmcInfo::CheckClearStatusError, DetailCode::Failed),
        }
    }

    fn tick_reading_by_initiate_clear(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        let mut buf = self.scratch;
        let cap = buf.len();
        match transport.bulk_in(self.address, &mut self.endpoints.bulk_in, &mut buf[..cap]) {
            TransferOutcome::Ack(n) => {
                self.scratch = buf;
                let short_packet = (n as u16) < self.endpoints.bulk_in.max_packet_size;
                if short_packet {
                    self.state = CommandState::CheckClearStatus;
                }
            }
            TransferOutcome::Nak => self.state = CommandState::CheckClearStatus,
            TransferOutcome::Stall | TransferOutcome::Error(_) => {
                self.fail(sink, UsbtmcInfo::ReadingByInitiateClearError, DetailCode::Failed)
            }
        }
    }

    fn tick_clear_feature(&mut self, transport: &mut dyn HostTransport, sink: &mut dyn EventSink) {
        match transport.clear_feature_halt(self.address, self.endpoints.bulk_out.address) {
            Ok(()) => match transport.clear_feature_halt(self.address, self.endpoints.bulk_in.address) {
                Ok(()) => {
                    self.tx_ring.flush();
                    self.is_sent_header = false;
                    self.request_remaining = 0;
                    self.bulk_tag = BulkTagGenerator::new();
                    self.state = CommandState::Idle;
                    log::debug!("usbtmc: clear completed");
                    sink.on_failed(UsbtmcInfo::ClearSucceed, 0);
                }
                Err(_) => self.fail(sink, UsbtmcInfo::ClearFeatureError, DetailCode::Failed),
            },
            Err(_) => self.fail(sink, UsbtmcInfo::ClearFeatureError, DetailCode::Failed),
        }
    }

    // -- READ_STATUS_BYTE (§4.6), ticked independently of CommandState --

    fn tick_status_byte(&mut self, transport: &mut dyn HostTransport, clock: &dyn Clock, sink: &mut dyn EventSink) {
        let Some(req) = &self.status_request else { return };
        let state = req.state;
        let rtb_tag = req.rtb_tag;
        let wait_begin_millis = req.wait_begin_millis;
        match state {
            StatusByteState::AwaitingControlResponse => {
                let mut resp = [0u8; 3];
                let outcome = transport.control_request(
                    self.address,
                    0xA1,
                    control_requests::READ_STATUS_BYTE,
                    rtb_tag as u16,
                    0,
                    &mut resp,
                );
                match outcome {
                    TransferOutcome::Ack(_) if resp[0] == usbtmc_status::STATUS_SUCCESS => {
                        // §4.6: an SR1-capable 488.2 interface with an
                        // interrupt-IN endpoint reports the status byte
                        // there, correlated by tag; otherwise the
                        // control-response payload is authoritative.
                        let use_interrupt_in = self.capabilities.is_488_2_interface()
                            && self.capabilities.is_sr1_capable()
                            && self.endpoints.interrupt_in.present;
                        if use_interrupt_in {
                            self.status_request = Some(StatusByteRequest {
                                state: StatusByteState::AwaitingInterruptByte,
                                rtb_tag,
                                wait_begin_millis: clock.now_millis(),
                            });
                        } else {
                            self.status_request = None;
                            sink.on_read_status_byte(resp[2]);
                        }
                    }
                    TransferOutcome::Ack(_) => {
                        self.status_request = None;
                        sink.on_failed(UsbtmcInfo::ReadStatusByteError, resp[0]);
                    }
                    TransferOutcome::Nak => {
                        if clock.now_millis().wrapping_sub(wait_begin_millis) >= misc::NAK_TIMEOUT_MILLIS {
                            self.status_request = None;
                            sink.on_failed(UsbtmcInfo::ReadStatusByteError, detail_code::FAILED);
                        }
                    }
                    TransferOutcome::Stall | TransferOutcome::Error(_) => {
                        self.status_request = None;
                        sink.on_failed(UsbtmcInfo::ReadStatusByteError, detail_code::FAILED);
                    }
                }
            }
            StatusByteState::AwaitingInterruptByte => {
                let mut buf = [0u8; 2];
                let outcome = transport.interrupt_in(self.address, &mut self.endpoints.interrupt_in, &mut buf);
                match outcome {
                    TransferOutcome::Ack(n) if n >= 2 && buf[0] & 0x80 != 0 && buf[0] & 0x7F == rtb_tag => {
                        self.status_request = None;
                        sink.on_read_status_byte(buf[1]);
                    }
                    TransferOutcome::Ack(_) => {
                        // notification for a different tag, or not yet a
                        // notification byte; keep waiting for ours.
                    }
                    TransferOutcome::Nak => {
                        if clock.now_millis().wrapping_sub(wait_begin_millis) >= misc::NAK_TIMEOUT_MILLIS {
                            self.status_request = None;
                            sink.on_failed(UsbtmcInfo::ReadStatusByteError, detail_code::FAILED);
                        }
                    }
                    TransferOutcome::Stall | TransferOutcome::Error(_) => {
                        self.status_request = None;
                        sink.on_failed(UsbtmcInfo::ReadStatusByteError, detail_code::FAILED);
                    }
                }
            }
        }
    }
}
