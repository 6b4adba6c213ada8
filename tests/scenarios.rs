//! End-to-end scenarios against an in-memory mock transport, covering
//! the driver's recoverable-failure and happy-path behaviour.

use std::cell::Cell;

use usbtmc_host::codec;
use usbtmc_host::constants::bulk_msg_id;
use usbtmc_host::error::UsbtmcInfo;
use usbtmc_host::transport::{Clock, EventSink, HostTransport, RawCode, TransferOutcome};
use usbtmc_host::types::{DeviceDescriptor, Endpoint, EndpointTable};
use usbtmc_host::{Capabilities, CommandState, Driver};

fn test_endpoints() -> EndpointTable {
    let mut endpoints = EndpointTable::new();
    endpoints.bulk_out.address = 0x02;
    endpoints.bulk_out.max_packet_size = 64;
    endpoints.bulk_out.present = true;
    endpoints.bulk_in.address = 0x81;
    endpoints.bulk_in.max_packet_size = 64;
    endpoints.bulk_in.present = true;
    endpoints
}

struct StepClock {
    millis: Cell<u32>,
}

impl StepClock {
    fn new() -> Self {
        StepClock { millis: Cell::new(0) }
    }

    fn advance(&self, by: u32) {
        self.millis.set(self.millis.get() + by);
    }
}

impl Clock for StepClock {
    fn now_millis(&self) -> u32 {
        self.millis.get()
    }
}

#[derive(Default)]
struct Recorder {
    received: Vec<u8>,
    failures: Vec<UsbtmcInfo>,
    status_bytes: Vec<u8>,
}

impl EventSink for Recorder {
    fn on_received(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }
    fn on_failed(&mut self, info: UsbtmcInfo, _detail: u8) {
        self.failures.push(info);
    }
    fn on_read_status_byte(&mut self, status_byte: u8) {
        self.status_bytes.push(status_byte);
    }
}

/// A scriptable fake USBTMC device. `reply` is what `bulk_in` hands back
/// (once, wrapped in a DEV_DEP_MSG_IN header); `nak_budget` NAKs are
/// returned from bulk-IN before the device answers; `interrupt_reply` is
/// what `interrupt_in` hands back (once) for the SR1 status-byte path.
struct ScriptedDevice {
    reply: Option<Vec<u8>>,
    nak_budget: u32,
    interrupt_reply: Option<[u8; 2]>,
}

impl ScriptedDevice {
    fn new(reply: &[u8]) -> Self {
        ScriptedDevice {
            reply: Some(reply.to_vec()),
            nak_budget: 0,
            interrupt_reply: None,
        }
    }
}

impl HostTransport for ScriptedDevice {
    fn get_device_descriptor(&mut self, _address: u8) -> Result<DeviceDescriptor, RawCode> {
        Ok(DeviceDescriptor::default())
    }
    fn set_address(&mut self, _address: u8) -> Result<(), RawCode> {
        Ok(())
    }
    fn set_configuration(&mut self, _address: u8, _config_value: u8) -> Result<(), RawCode> {
        Ok(())
    }
    fn set_endpoint_entry(&mut self, _address: u8, _index: u8, _endpoint: &Endpoint) -> Result<(), RawCode> {
        Ok(())
    }
    fn get_config_descriptor(&mut self, _address: u8, _index: u8, _buf: &mut [u8]) -> Result<usize, RawCode> {
        Ok(0)
    }
    fn get_serial_number(&mut self, _address: u8, _buf: &mut [u8]) -> Result<usize, RawCode> {
        Ok(0)
    }
    fn control_request(
        &mut self,
        _address: u8,
        _request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        data: &mut [u8],
    ) -> TransferOutcome {
        use usbtmc_host::constants::control_requests::*;
        use usbtmc_host::constants::usbtmc_status::*;
        match request {
            INITIATE_ABORT_BULK_OUT => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            CHECK_ABORT_BULK_OUT_STATUS => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            INITIATE_ABORT_BULK_IN => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            CHECK_ABORT_BULK_IN_STATUS => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            INITIATE_CLEAR => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            CHECK_CLEAR_STATUS => {
                data[0] = STATUS_SUCCESS;
                TransferOutcome::Ack(data.len())
            }
            READ_STATUS_BYTE => {
                data[0] = STATUS_SUCCESS;
                data[2] = 0x42;
                TransferOutcome::Ack(data.len())
            }
            _ => TransferOutcome::Stall,
        }
    }
    fn bulk_out(&mut self, _address: u8, _endpoint: &mut Endpoint, data: &[u8]) -> TransferOutcome {
        TransferOutcome::Ack(data.len())
    }
    fn bulk_in(&mut self, _address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome {
        if self.nak_budget > 0 {
            self.nak_budget -= 1;
            return TransferOutcome::Nak;
        }
        let Some(reply) = self.reply.take() else {
            return TransferOutcome::Nak;
        };
        let header = codec::dev_dep_msg_out_header(1, reply.len() as u32, true);
        let mut wire = header.to_vec();
        wire[0] = bulk_msg_id::DEV_DEP_MSG_IN;
        wire.extend_from_slice(&reply);
        let n = wire.len().min(endpoint.max_packet_size as usize).min(buf.len());
        buf[..n].copy_from_slice(&wire[..n]);
        TransferOutcome::Ack(n)
    }
    fn interrupt_in(&mut self, _address: u8, _endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome {
        match self.interrupt_reply.take() {
            Some(notice) => {
                buf[..2].copy_from_slice(&notice);
                TransferOutcome::Ack(2)
            }
            None => TransferOutcome::Nak,
        }
    }
    fn clear_feature_halt(&mut self, _address: u8, _endpoint_address: u8) -> Result<(), RawCode> {
        Ok(())
    }
    fn alloc_address(&mut self) -> Option<u8> {
        Some(2)
    }
    fn free_address(&mut self, _address: u8) {}
    fn register_device_class(&mut self, _address: u8) {}
    fn task(&mut self) {}
}

#[test]
fn scpi_idn_round_trip() {
    let mut device = ScriptedDevice::new(b"DEMO,MOCK-SCOPE,0,1.0\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.transmit(b"*IDN?\n", &mut sink);
    for _ in 0..4 {
        if driver.transmit_done() {
            break;
        }
        driver.run(&mut device, &clock, &mut sink);
    }
    assert!(driver.transmit_done());

    driver.request(1024, &mut device, &clock, &mut sink);
    for _ in 0..16 {
        driver.run(&mut device, &clock, &mut sink);
        if driver.is_idle() && !sink.received.is_empty() {
            break;
        }
    }

    assert_eq!(sink.received, b"DEMO,MOCK-SCOPE,0,1.0\n");
    assert!(sink.failures.is_empty());
}

#[test]
fn receive_header_nak_times_out() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    device.nak_budget = u32::MAX;
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.request(1024, &mut device, &clock, &mut sink);
    assert_eq!(driver.state(), CommandState::ReceiveHeader);

    driver.run(&mut device, &clock, &mut sink); // bulk-IN NAKs, still within the timeout
    assert_eq!(driver.state(), CommandState::ReceiveHeader);

    clock.advance(6000);
    driver.run(&mut device, &clock, &mut sink);

    assert_eq!(sink.failures, vec![UsbtmcInfo::ReceiveHeaderNakAndTimeouted]);
    assert!(driver.is_idle());
}

#[test]
fn request_rejected_while_not_idle() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.abort_receive();
    assert_eq!(driver.state(), CommandState::InitiateAbortBulkIn);

    driver.request(1024, &mut device, &clock, &mut sink);

    assert_eq!(sink.failures, vec![UsbtmcInfo::RequestError]);
    // the busy request must not have touched the wire or the state.
    assert_eq!(driver.state(), CommandState::InitiateAbortBulkIn);
}

#[test]
fn transmit_overflow_flushes_ring_and_reports_error() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.begin_transmit(&mut sink);
    // the ring holds at most 127 usable bytes; 200 overflows it before
    // a single packet has gone out.
    let written = driver.transmit_data(&[0u8; 200], &mut sink);

    assert_eq!(written, 127);
    assert_eq!(sink.failures, vec![UsbtmcInfo::TransmitError]);
    assert!(driver.transmit_done());
    assert!(driver.is_idle());

    // the engine is left usable: draining finds nothing queued.
    driver.run(&mut device, &clock, &mut sink);
    assert!(driver.is_idle());
}

#[test]
fn transmit_overflow_after_header_sent_schedules_abort() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.begin_transmit(&mut sink);
    // queue enough that one drain tick can't empty the ring, so the
    // first packet goes out without the end-of-message bit.
    driver.transmit_data(&[1u8; 100], &mut sink);
    driver.run(&mut device, &clock, &mut sink);
    assert!(driver.is_idle()); // drain doesn't change CommandState by itself

    // 48 bytes remain queued (100 - 52-byte packet); only 79 more fit.
    let written = driver.transmit_data(&[2u8; 80], &mut sink);

    assert_eq!(written, 79);
    assert_eq!(sink.failures, vec![UsbtmcInfo::TransmitError]);
    assert_eq!(driver.state(), CommandState::InitiateAbortBulkOut);
    assert!(driver.transmit_done());
}

#[test]
fn abort_receive_drains_and_recovers() {
    let mut device = ScriptedDevice::new(b"stuck\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.abort_receive();
    for _ in 0..8 {
        driver.run(&mut device, &clock, &mut sink);
        if driver.is_idle() {
            break;
        }
    }

    assert!(driver.is_idle());
}

#[test]
fn clear_resets_the_engine() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.clear();
    for _ in 0..8 {
        driver.run(&mut device, &clock, &mut sink);
        if driver.is_idle() {
            break;
        }
    }

    assert_eq!(sink.failures, vec![UsbtmcInfo::ClearSucceed]);
    assert!(driver.is_idle());
}

#[test]
fn read_status_byte_reports_the_device_byte() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.read_status_byte(&clock);
    driver.run(&mut device, &clock, &mut sink);

    assert_eq!(sink.status_bytes, vec![0x42]);
}

#[test]
fn pause_suspends_the_state_machine() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut driver = Driver::new(2, test_endpoints(), Capabilities::default());
    let mut sink = Recorder::default();

    driver.pause();
    assert!(driver.is_pause());

    // Pause counts as busy: a caller-facing entry point is rejected
    // exactly like any other non-idle state, not silently queued.
    driver.request(1024, &mut device, &clock, &mut sink);
    assert_eq!(sink.failures, vec![UsbtmcInfo::RequestError]);
    assert!(driver.is_pause());

    driver.unpause();
    assert!(driver.is_idle());
}

#[test]
fn read_status_byte_uses_interrupt_in_for_sr1_capable_devices() {
    let mut device = ScriptedDevice::new(b"irrelevant\n");
    let clock = StepClock::new();
    let mut endpoints = test_endpoints();
    endpoints.interrupt_in.address = 0x83;
    endpoints.interrupt_in.max_packet_size = 8;
    endpoints.interrupt_in.present = true;
    // USB488 D2 (488.2 interface) and device D2 (SR1 capable).
    let capabilities = Capabilities::new(0, 0, 0, 0x0090, 0b0000_0100, 0b0000_0100);
    let mut driver = Driver::new(2, endpoints, capabilities);
    let mut sink = Recorder::default();

    driver.read_status_byte(&clock);
    // rtb_tag generation starts at 2; the notification must carry that
    // tag with the high bit set.
    device.interrupt_reply = Some([0x82, 0x50]);

    driver.run(&mut device, &clock, &mut sink); // control response, switches to interrupt-IN
    assert!(sink.status_bytes.is_empty());

    driver.run(&mut device, &clock, &mut sink); // interrupt-IN delivers the byte

    assert_eq!(sink.status_bytes, vec![0x50]);
}
