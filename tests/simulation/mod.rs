//! In-process network simulation: a transport wrapper that drops requests, loses
//! responses, returns server errors and adds latency.

pub mod lossy_transport;

pub use lossy_transport::{LossyTransport, LossyTransportConfig};
