pub mod client;
pub mod forwarder;
pub mod monitor;
pub mod preflight;
