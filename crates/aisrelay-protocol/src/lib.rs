//! # aisrelay-protocol
//!
//! Wire formats on both sides of the relay.
//!
//! This crate defines the aisstream.io feed messages, the position-update
//! messages pushed to local subscribers, and the extractor that turns a feed
//! envelope into a normalized position report.

pub mod codec;
pub mod extract;
pub mod messages;

pub use codec::*;
pub use extract::{Extraction, Extractor, ValidationError};
pub use messages::*;
