//! Cursor-based reader for CIL method bodies.
//!
//! [`Parser`] wraps a byte slice and tracks the current position. Every read is bounds checked,
//! which makes it safe to feed method bodies that come from an untrusted catalog.

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A bounds-checked cursor over a method body.
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::file::parser::Parser;
///
/// let data = [0x11, 0x0A, 0x2A];
/// let mut parser = Parser::new(&data);
///
/// assert_eq!(parser.read_le::<u8>()?, 0x11);
/// assert_eq!(parser.read_le::<u8>()?, 0x0A);
/// assert!(parser.has_more_data());
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Read a type `T` from the current position in little-endian format and advance the
    /// position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }
}
