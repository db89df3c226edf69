//! Station runtime: reading generation, wire encoding, transports,
//! failover and the station loop.

pub mod encoding;
pub mod failover;
pub mod reading;
pub mod station;
pub mod transport;
