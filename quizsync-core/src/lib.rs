pub mod error;
pub mod types;
pub mod checksum;
pub mod validation;
pub mod transfer;
pub mod storage;

pub use error::{AuthError, Error, Result};
pub use types::*;
pub use checksum::checksum;
pub use storage::{FileKvStore, KeyValueStore, MemoryKvStore};
