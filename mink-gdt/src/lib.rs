//! Generic Data Transport runtime for the MINK distributed agent fabric.

pub mod pool;
pub mod registry;
pub mod spsc;
pub mod transport;

pub mod asn1;
pub mod cli;
pub mod client;
pub mod config;
pub mod heartbeat;
pub mod log;
pub mod registration;
pub mod routing;
pub mod service;
pub mod session;
pub mod stream;
pub mod sysagent;
pub mod util;
