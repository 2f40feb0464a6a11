//! # relay-core
//!
//! Foundation types for the scale relay.
//!
//! - [`reading`]: normalized [`Reading`] records, connection roles, source groups
//! - [`protocol`]: outbound wire envelopes (`welcome`, `history`, `weight`, `pong`)
//! - [`classifier`]: turns raw inbound JSON into an [`Inbound`] variant
//! - [`history`]: bounded FIFO of the most recent readings
//! - [`errors`]: the relay error taxonomy
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod classifier;
pub mod clock;
pub mod errors;
pub mod history;
pub mod logging;
pub mod protocol;
pub mod reading;

pub use classifier::{Inbound, classify, parse_payload};
pub use errors::{RelayError, Result};
pub use history::HistoryBuffer;
pub use protocol::{Envelope, Pong, Welcome};
pub use reading::{ConnectionRole, Reading, SourceGroupId};
