//! Convenience line-reader demo.
//!
//! Shows the idiom an owner would use to assemble a line-terminated
//! ASCII response out of `EventSink::on_received` chunks: spin on
//! `Driver::run` until either a `'\n'` byte arrives or a deadline
//! elapses. This is demonstration code, not part of the engine; it
//! plays against an in-memory mock transport rather than real hardware,
//! matching the teacher's top-level `UsbtmcClient` convenience surface
//! reimplemented here on top of the cooperative engine.

use usbtmc_host::codec;
use usbtmc_host::constants::bulk_msg_id;
use usbtmc_host::transport::{Clock, EventSink, HostTransport, RawCode, TransferOutcome};
use usbtmc_host::types::{DeviceDescriptor, Endpoint, EndpointTable};
use usbtmc_host::{Capabilities, Driver};

/// A fake instrument that answers `*IDN?` with a fixed, newline
/// terminated identity string, one packet at a time.
struct MockInstrument {
    /// Full on-wire DEV_DEP_MSG_IN response (header + payload), queued
    /// once the host's REQUEST_DEV_DEP_MSG_IN is seen.
    pending_wire: Option<Vec<u8>>,
    cursor: usize,
}

impl MockInstrument {
    fn new() -> Self {
        MockInstrument {
            pending_wire: None,
            cursor: 0,
        }
    }
}

impl HostTransport for MockInstrument {
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
        _request: u8,
        _value: u16,
        _index: u16,
        _data: &mut [u8],
    ) -> TransferOutcome {
        TransferOutcome::Stall
    }
    fn bulk_out(&mut self, _address: u8, _endpoint: &mut Endpoint, data: &[u8]) -> TransferOutcome {
        if data.first() == Some(&bulk_msg_id::REQUEST_DEV_DEP_MSG_IN) && data.len() >= 2 {
            let reply_text = b"DEMO,MOCK-SCOPE,0,1.0\n";
            let header = codec::dev_dep_msg_out_header(data[1], reply_text.len() as u32, true);
            let mut wire = header.to_vec();
            wire.extend_from_slice(reply_text);
            // the header MsgID for a response is DEV_DEP_MSG_IN, not
            // the OUT variant `dev_dep_msg_out_header` stamped.
            wire[0] = bulk_msg_id::DEV_DEP_MSG_IN;
            self.pending_wire = Some(wire);
            self.cursor = 0;
        }
        TransferOutcome::Ack(data.len())
    }
    fn bulk_in(&mut self, _address: u8, endpoint: &mut Endpoint, buf: &mut [u8]) -> TransferOutcome {
        let Some(wire) = &self.pending_wire else {
            return TransferOutcome::Nak;
        };
        let remaining = &wire[self.cursor..];
        if remaining.is_empty() {
            return TransferOutcome::Nak;
        }
        let n = remaining.len().min(endpoint.max_packet_size.max(1) as usize).min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        if self.cursor >= wire.len() {
            self.pending_wire = None;
        }
        TransferOutcome::Ack(n)
    }
    fn interrupt_in(&mut self, _address: u8, _endpoint: &mut Endpoint, _buf: &mut [u8]) -> TransferOutcome {
        TransferOutcome::Nak
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

struct MockClock {
    millis: std::cell::Cell<u32>,
}

impl Clock for MockClock {
    fn now_millis(&self) -> u32 {
        let v = self.millis.get();
        self.millis.set(v + 1);
        v
    }
}

struct LineCollector {
    line: Vec<u8>,
    done: bool,
}

impl EventSink for LineCollector {
    fn on_received(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'\n' {
                self.done = true;
            } else {
                self.line.push(b);
            }
        }
    }
}

/// Spin on `driver.run` until a newline-terminated line has arrived or
/// `max_ticks` ticks have elapsed.
fn read_line(driver: &mut Driver, transport: &mut dyn HostTransport, clock: &dyn Clock, max_ticks: u32) -> Option<String> {
    let mut collector = LineCollector { line: Vec::new(), done: false };
    for _ in 0..max_ticks {
        driver.run(transport, clock, &mut collector);
        if collector.done {
            return String::from_utf8(collector.line).ok();
        }
    }
    None
}

fn main() {
    let mut transport = MockInstrument::new();
    let clock = MockClock { millis: std::cell::Cell::new(0) };

    let mut endpoints = EndpointTable::new();
    endpoints.bulk_out.address = 0x02;
    endpoints.bulk_out.max_packet_size = 64;
    endpoints.bulk_out.present = true;
    endpoints.bulk_in.address = 0x81;
    endpoints.bulk_in.max_packet_size = 64;
    endpoints.bulk_in.present = true;

    let mut driver = Driver::new(2, endpoints, Capabilities::default());

    let mut send_sink = LineCollector { line: Vec::new(), done: false };
    driver.transmit(b"*IDN?\n", &mut send_sink);
    for _ in 0..10_000 {
        if driver.transmit_done() {
            break;
        }
        driver.run(&mut transport, &clock, &mut send_sink);
    }

    driver.request(1024, &mut transport, &clock, &mut send_sink);
    match read_line(&mut driver, &mut transport, &clock, 10_000) {
        Some(line) => println!("instrument replied: {line}"),
        None => println!("timed out waiting for a reply"),
    }
}
