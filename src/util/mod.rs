//! Helpers built on the value layer.

pub mod json;

pub use json::{from_json, to_json};
