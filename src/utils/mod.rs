//! Utility modules
//!
//! Contains credential redaction and string helpers.

pub mod string;

pub use string::{mask_key, truncate_str};
