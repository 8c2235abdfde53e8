//! Metadata token implementation for operand references.
//!
//! Call and `ldstr` operands in a CIL method body are 4-byte metadata tokens. The top byte
//! identifies the table the token points into, the lower 24 bits are a 1-based row index.
//! Only two tables are used by method bodies handled here: the member reference table for call
//! targets and the user string heap for string literals.
//!
//! # Token Format
//!
//! ```text
//! 31    24 23                    0
//! +-------+------------------------+
//! | Table |          Row           |
//! +-------+------------------------+
//! ```

use std::fmt;

/// Table identifier for member references (`call` / `callvirt` operands).
pub const TABLE_MEMBER_REF: u8 = 0x0A;

/// Table identifier for user strings (`ldstr` operands).
pub const TABLE_USER_STRING: u8 = 0x70;

/// Largest row index a token can hold.
pub const MAX_ROW: u32 = 0x00FF_FFFF;

/// A metadata token referencing a row in one of the operand tables.
///
/// # Examples
///
/// ```rust
/// use dotpatch::metadata::token::Token;
///
/// let token = Token::new(0x0A000003);
/// assert_eq!(token.table(), 0x0A);
/// assert_eq!(token.row(), 3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table identifier and a 1-based row.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & MAX_ROW))
    }

    /// Returns the raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table identifier stored in the top byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the 1-based row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the reserved null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
