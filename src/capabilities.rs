//! ## Capabilities
//!
//! Decoded GET_CAPABILITIES response (§4.1 control request table). The
//! wire layout is two capability blocks back to back: the plain USBTMC
//! block and, when the interface is a USB488 interface, the USB488
//! block. Bit layouts are taken from `original_source/USBTMCHost/usbtmc.h`
//! and the wider USBTMC/USB488 class specification it implements.

/// Decoded capability bytes for a claimed USBTMC/USB488 interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub bcd_usbtmc: u16,
    usbtmc_interface: u8,
    usbtmc_device: u8,
    pub bcd_usb488: u16,
    usb488_interface: u8,
    usb488_device: u8,
}

impl Capabilities {
    pub fn new(
        bcd_usbtmc: u16,
        usbtmc_interface: u8,
        usbtmc_device: u8,
        bcd_usb488: u16,
        usb488_interface: u8,
        usb488_device: u8,
    ) -> Self {
        Capabilities {
            bcd_usbtmc,
            usbtmc_interface,
            usbtmc_device,
            bcd_usb488,
            usb488_interface,
            usb488_device,
        }
    }

    // -- USBTMC interface capabilities --

    /// D2: the interface accepts the INDICATOR_PULSE control request.
    pub fn accepts_indicator_pulse(&self) -> bool {
        self.usbtmc_interface & 0x04 != 0
    }

    /// D1: the interface is talk-only.
    pub fn is_talk_only(&self) -> bool {
        self.usbtmc_interface & 0x02 != 0
    }

    /// D0: the interface is listen-only.
    pub fn is_listen_only(&self) -> bool {
        self.usbtmc_interface & 0x01 != 0
    }

    // -- USBTMC device capabilities --

    /// D0: bulk-IN transfers can be terminated early by TermChar. The
    /// engine never uses this (Non-goal: no TermChar-based early
    /// termination on bulk-IN); exposed for owners that want to know.
    pub fn supports_term_char(&self) -> bool {
        self.usbtmc_device & 0x01 != 0
    }

    // -- USB488 interface capabilities --

    /// D2: the interface is a 488.2 USB488 interface.
    pub fn is_488_2_interface(&self) -> bool {
        self.usb488_interface & 0x04 != 0
    }

    /// D1: the interface accepts REN_CONTROL, GO_TO_LOCAL and
    /// LOCAL_LOCKOUT requests.
    pub fn accepts_ren_control(&self) -> bool {
        self.usb488_interface & 0x02 != 0
    }

    /// D0: the interface accepts the TRIGGER USBTMC command message.
    pub fn accepts_trigger(&self) -> bool {
        self.usb488_interface & 0x01 != 0
    }

    // -- USB488 device capabilities --

    /// D3: the device understands all mandatory SCPI commands.
    pub fn is_scpi_compliant(&self) -> bool {
        self.usb488_device & 0x08 != 0
    }

    /// D2: the device is SR1 capable and has an interrupt-IN endpoint
    /// it uses to request service (§4.6).
    pub fn is_sr1_capable(&self) -> bool {
        self.usb488_device & 0x04 != 0
    }

    /// D1: the device is RL1 capable.
    pub fn is_rl1_capable(&self) -> bool {
        self.usb488_device & 0x02 != 0
    }

    /// D0: the device is DT1 capable.
    pub fn is_dt1_capable(&self) -> bool {
        self.usb488_device & 0x01 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_usbtmc_interface_bits_independently() {
        let caps = Capabilities::new(0x0100, 0b0000_0110, 0, 0, 0, 0);
        assert!(caps.accepts_indicator_pulse());
        assert!(caps.is_talk_only());
        assert!(!caps.is_listen_only());
    }

    #[test]
    fn decodes_usb488_bits_without_conflating_ren_and_sr1() {
        // REN_CONTROL acceptance lives on the interface byte; SR1 lives
        // on the device byte. A device advertising SR1 but not REN
        // acceptance must report exactly that, not both or neither.
        let caps = Capabilities::new(0, 0, 0, 0x0090, 0b0000_0100, 0b0000_0100);
        assert!(caps.is_488_2_interface());
        assert!(!caps.accepts_ren_control());
        assert!(caps.is_sr1_capable());
    }

    #[test]
    fn default_capabilities_report_nothing_supported() {
        let caps = Capabilities::default();
        assert!(!caps.is_scpi_compliant());
        assert!(!caps.accepts_ren_control());
        assert!(!caps.supports_term_char());
    }
}
