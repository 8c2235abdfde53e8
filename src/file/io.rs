//! Little-endian primitive reading and writing for CIL method bodies.
//!
//! The [`CilIO`] trait abstracts over the fixed-size integer types that appear as CIL operands.
//! All reads are bounds checked and return [`crate::Error::OutOfBounds`] instead of panicking on
//! truncated input.
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotpatch::file::io::{read_le_at, write_le};
//!
//! let data = [0x0C, 0x00, 0xE8, 0x03];
//! let mut offset = 2;
//! let index: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(index, 1000);
//! assert_eq!(offset, 4);
//!
//! let mut out = Vec::new();
//! write_le(&mut out, 1000u16);
//! assert_eq!(out, [0xE8, 0x03]);
//! ```

use crate::Result;

/// Trait for the primitive types that can be read from and written to a method body.
///
/// CIL stores every multi-byte operand in little-endian order, so only that direction is
/// provided.
pub trait CilIO: Sized {
    /// Associated type for the fixed-size byte array representation
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read the value from a little-endian byte array
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Convert the value into a little-endian byte array
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
}

/// Reads a value of type `T` at `offset` and advances the offset by the size of `T`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would exceed the data length.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Appends the little-endian representation of `value` to `out`.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_le_at_advances() {
        let data = [0x2A, 0xE8, 0x03, 0x01, 0x00, 0x00, 0x0A];
        let mut offset = 0;

        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0x2A);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1000);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x0A00_0001);
        assert_eq!(offset, 7);
    }

    #[test]
    fn read_le_at_signed() {
        let data = [0xFE, 0xFF, 0xFF, 0xFF];
        let mut offset = 0;
        assert_eq!(read_le_at::<i32>(&data, &mut offset).unwrap(), -2);

        let mut offset = 0;
        assert_eq!(read_le_at::<i8>(&data, &mut offset).unwrap(), -2);
    }

    #[test]
    fn read_le_at_out_of_bounds() {
        let data = [0x01, 0x02];
        let mut offset = 1;

        let result = read_le_at::<u16>(&data, &mut offset);
        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
        assert_eq!(offset, 1);
    }

    #[test]
    fn write_le_appends() {
        let mut out = Vec::new();
        write_le(&mut out, 0x2Cu8);
        write_le(&mut out, 0i8);
        write_le(&mut out, 0x7000_0001u32);

        assert_eq!(out, [0x2C, 0x00, 0x01, 0x00, 0x00, 0x70]);

        write_le(&mut out, -5i8);
        assert_eq!(out.last(), Some(&0xFB));
    }
}
