pub mod conformance;
mod error;
mod memory;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use traits::ProcessStorage;
