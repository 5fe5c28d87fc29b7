//! Common utilities for tidal
//!
//! This crate provides the error type shared by the document server and the ODM.

pub mod error;

pub use error::{Result, TidalError};
