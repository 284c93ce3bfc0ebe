//! Core definitions relied upon by all ctxsync-* crates.

pub mod error;
pub mod result;

pub use error::{CancelCause, Error, ErrorKind};
pub use result::Result;
