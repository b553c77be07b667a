//! Descriptor model and name resolution for fastproto
//!
//! This crate provides read-only views over the descriptor set carried in a
//! `CodeGeneratorRequest`, plus the deterministic mapping from descriptor
//! names to the identifiers used in generated output.

pub mod descriptor;
pub mod error;
pub mod names;

pub use descriptor::*;
pub use error::*;
