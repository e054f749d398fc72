//! Marker traits for the key/value domain the tree is generic over, and the
//! fixed-width wire encoding used by the marshaller.
//!
//! Grounded in the teacher's `PodType` blanket-impl pattern
//! (`data_management::PodType`): any type that satisfies the bound gets the
//! marker trait for free, so callers never implement it by hand.

use byteorder::{ByteOrder, LittleEndian};

/// A type with a fixed, known-at-compile-time wire width, convertible to and
/// from a byte slice of exactly that width. Implemented for the plain integer
/// types; POD structs can implement it by hand to compose multiple fields.
pub trait FixedWidth: Copy {
    /// The exact number of bytes this type occupies on the wire.
    const WIDTH: usize;

    /// Writes `self` into `buf`, which must be exactly `WIDTH` bytes long.
    fn write_bytes(&self, buf: &mut [u8]);

    /// Reads a value out of `buf`, which must be exactly `WIDTH` bytes long.
    fn read_bytes(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_width_int {
    ($ty:ty, $width:expr, $write:ident, $read:ident) => {
        impl FixedWidth for $ty {
            const WIDTH: usize = $width;

            fn write_bytes(&self, buf: &mut [u8]) {
                debug_assert_eq!(buf.len(), Self::WIDTH);
                LittleEndian::$write(buf, *self);
            }

            fn read_bytes(buf: &[u8]) -> Self {
                debug_assert_eq!(buf.len(), Self::WIDTH);
                LittleEndian::$read(buf)
            }
        }
    };
}

impl_fixed_width_int!(u16, 2, write_u16, read_u16);
impl_fixed_width_int!(u32, 4, write_u32, read_u32);
impl_fixed_width_int!(u64, 8, write_u64, read_u64);
impl_fixed_width_int!(i16, 2, write_i16, read_i16);
impl_fixed_width_int!(i32, 4, write_i32, read_i32);
impl_fixed_width_int!(i64, 8, write_i64, read_i64);

impl FixedWidth for u8 {
    const WIDTH: usize = 1;

    fn write_bytes(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn read_bytes(buf: &[u8]) -> Self {
        buf[0]
    }
}

/// Marker for a key type: totally ordered, fixed-width, trivially copyable,
/// and shareable across the cache's worker threads. Blanket-implemented for
/// anything satisfying the bound, mirroring the teacher's `PodType`.
pub trait Key:
    Ord + Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + FixedWidth + 'static
{
}
impl<T> Key for T where
    T: Ord + Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + FixedWidth + 'static
{
}

/// Marker for a value type: fixed-width, trivially copyable, shareable.
/// Unlike [`Key`] it need not be ordered or hashable.
pub trait Value: Copy + std::fmt::Debug + Send + Sync + FixedWidth + 'static {}
impl<T> Value for T where T: Copy + std::fmt::Debug + Send + Sync + FixedWidth + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u64() {
        let mut buf = [0u8; 8];
        42u64.write_bytes(&mut buf);
        assert_eq!(u64::read_bytes(&buf), 42);
    }

    #[test]
    fn round_trips_u32() {
        let mut buf = [0u8; 4];
        0xDEAD_BEEFu32.write_bytes(&mut buf);
        assert_eq!(u32::read_bytes(&buf), 0xDEAD_BEEF);
    }
}
