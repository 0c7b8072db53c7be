pub mod error;
pub mod manager;
pub mod types;

pub use error::{ManagerError, ManagerResult};
pub use manager::UploadManager;
pub use types::FileStatus;
