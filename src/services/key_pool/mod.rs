//! Key Pool Module
//!
//! Holds the API keys shared by the rotating chat and embedding providers.
//!
//! # Example
//! ```
//! use rag_keyring::services::KeyPool;
//!
//! fn main() -> Result<(), rag_keyring::ConfigurationError> {
//!     let pool = KeyPool::new(["key-a", "key-b", "key-a"])?;
//!     assert_eq!(pool.len(), 2);
//!     assert_eq!(pool.current(), "key-a");
//!     assert_eq!(pool.advance(), "key-b");
//!     Ok(())
//! }
//! ```

mod loader;
mod pool;

pub use loader::{
    KeyLoader, KeySource, KeySourceConfig, DEFAULT_KEY_FILE, DEFAULT_NUMBERED_PREFIX,
    DEFAULT_SINGLE_VAR,
};
pub use pool::{KeyPool, KeyPoolStats};
