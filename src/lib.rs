//! Resumable chunked uploads: the client that splits, sends, resumes and merges a file,
//! and the server that stores chunks and assembles them into a published object.

pub mod api;
pub mod assembler;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod integrity;
pub mod manager;
pub mod metrics;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
