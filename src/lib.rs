//! # usbtmc-host
//!
//! A cooperative, non-blocking USBTMC / USB488 host protocol engine.
//!
//! This crate does not own a USB host controller, a clock, or a
//! transport. The owner supplies all three — implementing
//! [`transport::HostTransport`] and [`transport::Clock`] against
//! whatever USB stack they have, and an [`transport::EventSink`] to
//! receive notifications — and drives the engine forward by calling
//! [`state_machine::Driver::run`] repeatedly from their own main loop
//! or scheduler. Nothing in the engine blocks, retries internally, or
//! allocates on the heap.
//!
//! ## Usage
//!
//! ```no_run
//! use usbtmc_host::attach::{attach, AttachFilter};
//! use usbtmc_host::transport::EventSink;
//!
//! struct Logger;
//! impl EventSink for Logger {
//!     fn on_received(&mut self, data: &[u8]) {
//!         print!("{}", String::from_utf8_lossy(data));
//!     }
//! }
//!
//! # fn run(transport: &mut dyn usbtmc_host::transport::HostTransport, clock: &dyn usbtmc_host::transport::Clock) {
//! let filter = AttachFilter::new().with_vendor_product(0x1234, 0x5678);
//! let mut sink = Logger;
//! let attached = attach(transport, &filter, &mut sink).expect("attach failed");
//! let mut driver = attached.driver;
//!
//! driver.transmit(b"*IDN?\n", &mut sink);
//! while !driver.transmit_done() {
//!     driver.run(transport, clock, &mut sink);
//! }
//!
//! driver.request(1024, transport, clock, &mut sink);
//! loop {
//!     driver.run(transport, clock, &mut sink);
//!     if driver.is_idle() {
//!         break;
//!     }
//! }
//! # }
//! ```
//!
//! With the optional `rusb` feature enabled, [`rusb_transport`] supplies
//! a ready-made `HostTransport`/`Clock` pair backed by libusb for use
//! against a real instrument.

pub mod attach;
pub mod capabilities;
pub mod codec;
pub mod constants;
pub mod error;
pub mod ring;
pub mod state_machine;
pub mod transport;
pub mod types;

#[cfg(feature = "rusb")]
pub mod rusb_transport;

pub use attach::{attach, AttachFilter, Attached};
pub use capabilities::Capabilities;
pub use error::{AttachError, DetailCode, UsbtmcInfo};
pub use state_machine::{CommandState, Driver};
pub use transport::{Clock, EventSink, HostTransport, RawCode, TransferOutcome};
pub use types::{DeviceDescriptor, DeviceId};
