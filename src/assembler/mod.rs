//! Server-side assembly of stored chunks into one published object.

pub mod assembler;
pub mod error;
pub mod publisher;

pub use assembler::{Assembler, MergeOutcome, MergeRequest};
pub use error::{AssemblyError, AssemblyResult};
pub use publisher::ObjectPublisher;
