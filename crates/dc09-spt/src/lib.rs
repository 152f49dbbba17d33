//! Secured Premises Transceiver (SPT)
//!
//! Client endpoint of the SIA DC-09 alarm transmission protocol
//! (EN 50136-1): delivers intrusion/access/status events from an alarm
//! panel to one or more Alarm Receiving Centres over IP, with a four-path
//! failover lattice, heartbeat polling, AES-CBC encrypted framing,
//! CRC-validated acknowledgements, and receiver-clock skew correction.
//!
//! - [`codec`] builds and parses DC-09 wire blocks.
//! - [`msg`] encodes SIA DC-03 (alphanumeric) and DC-05 (Contact-ID) payloads.
//! - [`transport`] is the blocking TCP/UDP socket layer.
//! - [`path`] holds the `{main,back-up} x {primary,secondary}` path lattice.
//! - [`core`] is the public `Spt` handle: paths, queue, counters, API.
//! - [`dispatcher`] and [`poller`] are the two background workers.

pub mod codec;
pub mod core;
pub mod crc;
mod dispatcher;
pub mod error;
pub mod msg;
pub mod path;
mod poller;
pub mod settings;
pub mod transport;

pub use codec::{Ack, AckStatus, BlockCodec};
pub use core::{Spt, SptState};
pub use error::{Error, Result};
pub use msg::{CodeClass, EventType, MessageParams};
pub use path::{Branch, Slot};
pub use settings::SptSettings;
pub use transport::TransportKind;
