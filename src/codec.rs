//! ## Codec
//!
//! Pure encode/decode functions for the 12-byte USBTMC bulk message
//! header (§4.1). These never touch a transport; the state machine
//! calls them to build outgoing packets and to parse incoming ones.
//!
//! Grounded on `device_dependent_msg_out_header` /
//! `request_device_dependent_msg_in_header` from the teacher's
//! `communication/bulk.rs`, adapted to fixed-size arrays (no `Vec`,
//! no `anyhow`) and extended with a DEV_DEP_MSG_IN response parser the
//! teacher never needed (it read the payload directly off the wire
//! buffer instead of through a typed header).

use crate::constants::{bulk_msg_id, misc::USBTMC_HEADER_SIZE};

/// bmTransferAttributes bit 0 of a DEV_DEP_MSG_OUT header: this packet
/// carries the end of the message.
const EOM_BIT: u8 = 0b0000_0001;

/// bmTransferAttributes bit 1 of a REQUEST_DEV_DEP_MSG_IN header: a
/// TermChar is present in byte 9 and should end the transfer early.
const TERM_CHAR_ENABLED_BIT: u8 = 0b0000_0010;

/// Build a DEV_DEP_MSG_OUT header (§4.1).
pub fn dev_dep_msg_out_header(btag: u8, transfer_size: u32, end_of_message: bool) -> [u8; USBTMC_HEADER_SIZE] {
    let mut header = [0u8; USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::DEV_DEP_MSG_OUT;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if end_of_message {
        header[8] = EOM_BIT;
    }
    header
}

/// Build a REQUEST_DEV_DEP_MSG_IN header (§4.1). Per the Non-goal
/// "no TermChar-based early termination on bulk-IN", this engine never
/// sets the TermChar bit itself; `term_char` exists so a caller driving
/// the codec directly (e.g. the convenience demo) can opt in.
pub fn request_dev_dep_msg_in_header(
    btag: u8,
    transfer_size: u32,
    term_char: Option<u8>,
) -> [u8; USBTMC_HEADER_SIZE] {
    let mut header = [0u8; USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::REQUEST_DEV_DEP_MSG_IN;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = TERM_CHAR_ENABLED_BIT;
        header[9] = tc;
    }
    header
}

/// A decoded DEV_DEP_MSG_IN response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevDepMsgInHeader {
    pub btag: u8,
    pub transfer_size: u32,
    pub end_of_message: bool,
}

/// Parse the 12-byte header at the front of a DEV_DEP_MSG_IN bulk-IN
/// packet. Returns `None` if `packet` is too short or the MsgID/bTag
/// checksum don't match, both of which the state machine treats as a
/// malformed response.
pub fn parse_dev_dep_msg_in_header(packet: &[u8]) -> Option<DevDepMsgInHeader> {
    if packet.len() < USBTMC_HEADER_SIZE {
        return None;
    }
    if packet[0] != bulk_msg_id::DEV_DEP_MSG_IN {
        return None;
    }
    if packet[2] != !packet[1] {
        return None;
    }
    let transfer_size = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
    let end_of_message = packet[8] & EOM_BIT != 0;
    Some(DevDepMsgInHeader {
        btag: packet[1],
        transfer_size,
        end_of_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_header_sets_checksum_and_eom() {
        let header = dev_dep_msg_out_header(5, 11, true);
        assert_eq!(header[0], bulk_msg_id::DEV_DEP_MSG_OUT);
        assert_eq!(header[1], 5);
        assert_eq!(header[2], !5u8);
        assert_eq!(&header[4..8], &11u32.to_le_bytes());
        assert_eq!(header[8], EOM_BIT);
    }

    #[test]
    fn request_header_without_term_char_leaves_byte_8_clear() {
        let header = request_dev_dep_msg_in_header(9, 64, None);
        assert_eq!(header[0], bulk_msg_id::REQUEST_DEV_DEP_MSG_IN);
        assert_eq!(header[8], 0);
        assert_eq!(header[9], 0);
    }

    #[test]
    fn request_header_with_term_char_sets_bit_and_byte() {
        let header = request_dev_dep_msg_in_header(9, 64, Some(b'\n'));
        assert_eq!(header[8], TERM_CHAR_ENABLED_BIT);
        assert_eq!(header[9], b'\n');
    }

    #[test]
    fn parse_round_trips_a_well_formed_response() {
        let mut packet = [0u8; USBTMC_HEADER_SIZE + 4];
        packet[0] = bulk_msg_id::DEV_DEP_MSG_IN;
        packet[1] = 7;
        packet[2] = !7u8;
        packet[4..8].copy_from_slice(&4u32.to_le_bytes());
        packet[8] = EOM_BIT;
        let parsed = parse_dev_dep_msg_in_header(&packet).unwrap();
        assert_eq!(
            parsed,
            DevDepMsgInHeader {
                btag: 7,
                transfer_size: 4,
                end_of_message: true,
            }
        );
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let mut packet = [0u8; USBTMC_HEADER_SIZE];
        packet[0] = bulk_msg_id::DEV_DEP_MSG_IN;
        packet[1] = 7;
        packet[2] = 7; // should be !7
        assert!(parse_dev_dep_msg_in_header(&packet).is_none());
    }

    #[test]
    fn parse_rejects_short_packet() {
        assert!(parse_dev_dep_msg_in_header(&[1, 2, 3]).is_none());
    }
}
