pub mod error;
pub mod locks;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use locks::SessionLocks;
pub use store::SessionStore;
pub use types::{UploadSession, UploadStatus};
