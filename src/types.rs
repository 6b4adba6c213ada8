//! ## Types
//!
//! The endpoint table, bulk-tag generators and small value types shared
//! across the engine. None of these allocate on the heap.
//!

use crate::constants::misc::{NAK_MAX_POWER, NAK_NOWAIT};

/// One slot of the fixed four-entry endpoint table (§3 "Endpoint table").
#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoint {
    /// Endpoint address (bEndpointAddress, direction bit included where
    /// the transport expects it).
    pub address: u8,
    /// wMaxPacketSize for this endpoint.
    pub max_packet_size: u16,
    /// Outbound data-toggle bit.
    pub send_toggle: bool,
    /// Inbound data-toggle bit.
    pub receive_toggle: bool,
    /// NAK power the transport should apply to this endpoint.
    pub nak_power: u8,
    /// Whether this slot has been populated by the attach walk.
    pub present: bool,
}

impl Endpoint {
    fn with_nak_power(nak_power: u8) -> Self {
        Endpoint {
            nak_power,
            ..Default::default()
        }
    }

    pub fn reset_toggles(&mut self) {
        self.send_toggle = false;
        self.receive_toggle = false;
    }
}

/// Fixed 4-slot endpoint table: slot 0 is the control endpoint, slots
/// 1/2/3 are bulk-IN/bulk-OUT/interrupt-IN (§3 invariant 4).
#[derive(Debug, Clone)]
pub struct EndpointTable {
    pub control: Endpoint,
    pub bulk_in: Endpoint,
    pub bulk_out: Endpoint,
    pub interrupt_in: Endpoint,
}

impl EndpointTable {
    pub fn new() -> Self {
        let mut control = Endpoint::default();
        // Mirrors the device-descriptor default of 8 bytes used before
        // the descriptor has actually been read.
        control.max_packet_size = 8;
        control.present = true;

        EndpointTable {
            control,
            bulk_in: Endpoint::with_nak_power(NAK_NOWAIT),
            bulk_out: Endpoint::with_nak_power(NAK_MAX_POWER),
            interrupt_in: Endpoint::with_nak_power(NAK_MAX_POWER),
        }
    }

    /// Number of populated endpoints, including the always-present
    /// control endpoint (mirrors the original driver's `bNumEP`).
    pub fn populated_count(&self) -> u8 {
        1 + [self.bulk_in, self.bulk_out, self.interrupt_in]
            .iter()
            .filter(|ep| ep.present)
            .count() as u8
    }

    pub fn has_required_data_endpoints(&self) -> bool {
        self.bulk_in.present && self.bulk_out.present
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonically cycling bulk-message tag, `bTag` in the spec.
///
/// `advance` is called only after a *successful* bulk-OUT submission,
/// never on a failed one, so a transport error never burns a tag.
#[derive(Debug, Clone, Copy)]
pub struct BulkTagGenerator {
    current: u8,
}

impl BulkTagGenerator {
    pub fn new() -> Self {
        BulkTagGenerator { current: 1 }
    }

    /// The tag the *next* outgoing header should carry.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Record that `current()` was just used successfully; returns that
    /// tag (for the caller to stash as `last_bTag`) and rolls the
    /// counter forward, wrapping `0 -> 1` per invariant `1 <= bTag <= 255`.
    pub fn advance(&mut self) -> u8 {
        let used = self.current;
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.current = 1;
        }
        used
    }
}

impl Default for BulkTagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonically cycling status-byte tag, `rtb_bTag` in the spec, used
/// only by READ_STATUS_BYTE (§4.3, range `2..=127`).
#[derive(Debug, Clone, Copy)]
pub struct StatusByteTagGenerator {
    current: u8,
}

impl StatusByteTagGenerator {
    pub fn new() -> Self {
        StatusByteTagGenerator { current: 2 }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Record that `current()` was just used; returns that tag and
    /// rolls the counter forward, wrapping `128.. -> 2`.
    pub fn advance(&mut self) -> u8 {
        let used = self.current;
        self.current += 1;
        if self.current > 127 {
            self.current = 2;
        }
        used
    }
}

impl Default for StatusByteTagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror of the fields of a USB device descriptor this engine needs;
/// delivered verbatim to `EventSink::on_device_descriptor` during attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub max_packet_size0: u8,
    pub num_configurations: u8,
}

/// USB vendor/product identifier pair used to filter which device to
/// claim during attach. `0` in either field means "any".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    pub fn matches(&self, descr: &DeviceDescriptor) -> bool {
        (self.vendor_id == 0 || self.vendor_id == descr.vendor_id)
            && (self.product_id == 0 || self.product_id == descr.product_id)
    }
}

/// Fixed-capacity serial-number prefix filter; avoids heap allocation
/// for the attach-time byte-prefix match (§6 "attach filter").
pub type SerialPrefix = heapless::Vec<u8, 32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_tag_wraps_zero_to_one() {
        let mut tags = BulkTagGenerator::new();
        assert_eq!(tags.current(), 1);
        let mut last = tags.advance();
        while last != 255 {
            last = tags.advance();
        }
        assert_eq!(tags.current(), 1);
    }

    #[test]
    fn bulk_tag_not_advanced_on_failure_is_reused() {
        let mut tags = BulkTagGenerator::new();
        let first = tags.current();
        // a failed submission never calls advance(); the same tag must
        // be offered again on retry.
        assert_eq!(tags.current(), first);
        assert_eq!(tags.advance(), first);
        assert_eq!(tags.current(), first + 1);
    }

    #[test]
    fn status_byte_tag_wraps_past_127_to_two() {
        let mut tags = StatusByteTagGenerator::new();
        assert_eq!(tags.current(), 2);
        let mut last = tags.advance();
        while last != 127 {
            last = tags.advance();
        }
        assert_eq!(tags.current(), 2);
    }

    #[test]
    fn device_id_wildcard_matches_any_vendor_or_product() {
        let any = DeviceId::default();
        let descr = DeviceDescriptor {
            vendor_id: 0x1234,
            product_id: 0x5678,
            ..Default::default()
        };
        assert!(any.matches(&descr));

        let specific = DeviceId {
            vendor_id: 0x1234,
            product_id: 0x9999,
        };
        assert!(!specific.matches(&descr));
    }
}
