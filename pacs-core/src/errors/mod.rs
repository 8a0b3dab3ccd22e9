//! Error types for the server index.

pub mod error_code;
mod index_error;

pub use index_error::IndexError;
