//! Method definitions and their raw bodies.
//!
//! A [`MethodDef`] is what a [`crate::MethodCatalog`] hands out for a resolved
//! [`crate::MethodIdentity`]: the declared signature, the declared locals and the encoded
//! [`MethodBody`]. Call and string operands inside the body are metadata tokens resolved
//! through the body's [`TokenTable`].

use bitflags::bitflags;

use crate::{
    metadata::{
        identity::{MethodIdentity, MethodRef},
        token::{Token, MAX_ROW, TABLE_MEMBER_REF, TABLE_USER_STRING},
    },
    Result,
};

bitflags! {
    /// Attributes of a method definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        /// The method has no `this` argument
        const STATIC = 0x0010;
        /// The method is dispatched virtually
        const VIRTUAL = 0x0040;
        /// The method has no body
        const ABSTRACT = 0x0400;
    }
}

/// A declared method parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// Parameter name as declared
    pub name: String,
    /// Full name of the parameter type
    pub ty: String,
}

impl Param {
    /// Creates a new parameter.
    #[must_use]
    pub fn new(name: &str, ty: &str) -> Self {
        Param {
            name: name.to_string(),
            ty: ty.to_string(),
        }
    }
}

/// Operand tables of a method body.
///
/// Member references and user strings are stored in insertion order, row `n` of a table is
/// element `n - 1`. Interning returns the existing token when an equal entry is already present,
/// which keeps re-encoding of an unmodified stream stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenTable {
    members: Vec<MethodRef>,
    strings: Vec<String>,
}

impl TokenTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a member reference token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token does not point into the member table.
    pub fn member(&self, token: Token) -> Result<&MethodRef> {
        if token.table() != TABLE_MEMBER_REF || token.is_null() {
            return Err(malformed_error!("Token {} is not a member reference", token));
        }

        self.members
            .get(token.row() as usize - 1)
            .ok_or_else(|| malformed_error!("Member reference {} is out of range", token))
    }

    /// Resolves a user string token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token does not point into the string heap.
    pub fn string(&self, token: Token) -> Result<&str> {
        if token.table() != TABLE_USER_STRING || token.is_null() {
            return Err(malformed_error!("Token {} is not a user string", token));
        }

        self.strings
            .get(token.row() as usize - 1)
            .map(String::as_str)
            .ok_or_else(|| malformed_error!("User string {} is out of range", token))
    }

    /// Returns the token for `member`, adding it to the table if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table is full.
    pub fn intern_member(&mut self, member: &MethodRef) -> Result<Token> {
        let index = self
            .members
            .iter()
            .position(|m| m == member)
            .unwrap_or(self.members.len());

        let token = row_token(TABLE_MEMBER_REF, index)?;
        if index == self.members.len() {
            self.members.push(member.clone());
        }
        Ok(token)
    }

    /// Returns the token for `value`, adding it to the heap if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is full.
    pub fn intern_string(&mut self, value: &str) -> Result<Token> {
        let index = self
            .strings
            .iter()
            .position(|s| s == value)
            .unwrap_or(self.strings.len());

        let token = row_token(TABLE_USER_STRING, index)?;
        if index == self.strings.len() {
            self.strings.push(value.to_string());
        }
        Ok(token)
    }

    /// Number of member references.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of user strings.
    #[must_use]
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}

/// Token for the 0-based `index` of `table`. Rows are 1-based and must fit in 24 bits.
fn row_token(table: u8, index: usize) -> Result<Token> {
    index
        .checked_add(1)
        .and_then(|row| u32::try_from(row).ok())
        .filter(|row| *row <= MAX_ROW)
        .map(|row| Token::from_parts(table, row))
        .ok_or_else(|| {
            malformed_error!(
                "Table 0x{:02X} is full, row {} does not fit a token",
                table,
                index.saturating_add(1)
            )
        })
}

/// The encoded body of a method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodBody {
    /// Raw CIL bytes
    pub code: Vec<u8>,
    /// Operand tables referenced by the code
    pub tokens: TokenTable,
    /// Maximum evaluation stack depth, as computed by the encoder
    pub max_stack: u16,
}

/// A resolved method: signature, locals and body.
#[derive(Clone, Debug)]
pub struct MethodDef {
    /// Identity the method was resolved from
    pub identity: MethodIdentity,
    /// Method attributes
    pub flags: MethodFlags,
    /// Declared parameters, `this` excluded
    pub params: Vec<Param>,
    /// Full name of the return type, `None` for void
    pub returns: Option<String>,
    /// Full names of the declared local variable types, indexed by slot
    pub locals: Vec<String>,
    /// The encoded body
    pub body: MethodBody,
}

impl MethodDef {
    /// Returns `true` if the method receives a `this` argument.
    #[must_use]
    pub fn has_this(&self) -> bool {
        !self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` if the method produces a return value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.returns.is_some()
    }

    /// Number of argument slots, `this` included.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this())
    }

    /// Looks up a declared parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<(usize, &Param)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    /// A call-site reference to this method.
    #[must_use]
    pub fn to_method_ref(&self) -> MethodRef {
        MethodRef {
            declaring_type: self.identity.declaring_type().to_string(),
            name: self.identity.name().to_string(),
            params: self.identity.params().to_vec(),
            returns: self.returns.clone(),
            has_this: self.has_this(),
        }
    }
}
