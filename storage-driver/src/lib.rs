//! # Storage driver contract
//!
//! The trait every storage backend implements, and the error model shared
//! by all of them.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
