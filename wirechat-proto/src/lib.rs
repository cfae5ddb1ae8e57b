//! `WireChat` protocol library: identifiers, message records, the delivery
//! status lattice, the realtime event taxonomy, and the frame codec shared
//! by the core and the gateway.

pub mod codec;
pub mod delivery;
pub mod event;
pub mod ids;
pub mod message;
