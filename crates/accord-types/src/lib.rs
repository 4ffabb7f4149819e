#![forbid(unsafe_code)]
#![doc = "Common types and error codes for the accord TLS engine."]

pub mod error;

pub use error::*;
