pub mod client;
pub mod forwarder;

pub use forwarder::{ForwardError, HttpForwarder};
