//! Byte-level access to method bodies.
//!
//! Method bodies handed over by a [`crate::MethodCatalog`] are plain little-endian CIL byte
//! sequences. This module provides the bounds-checked cursor used by the decoder and the
//! primitive conversions shared with the encoder.
//!
//! # Key Components
//!
//! - [`crate::file::parser::Parser`] - Cursor over a method body
//! - [`crate::file::io`] - Little-endian primitive reads and writes

pub(crate) mod io;
pub(crate) mod parser;
