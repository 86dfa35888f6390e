//! Configuration module for pixelwarden
//!
//! Provides types, discovery and loading for `pxw.toml`.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
