//! Configuration for the server index.

mod index_config;

pub use index_config::IndexConfig;
