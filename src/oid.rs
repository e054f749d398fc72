//! Object identifiers: tagged addresses that refer either to an in-memory
//! resident, or to a byte range in one of the on-disk/on-pmem backing media.

use std::fmt;

/// Which medium an [`Oid`] resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Medium {
    /// The object lives only in memory; the payload is a pointer-derived tag.
    Volatile,
    /// The object lives in a block-allocated file.
    File,
    /// The object lives in a persistent-memory mapping.
    PMem,
}

/// Which node shape an [`Oid`] refers to. Authoritative for dispatch at
/// deserialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// A leaf ("data") node.
    Leaf = 0,
    /// An internal ("pivot") node.
    Internal = 1,
}

impl TypeTag {
    pub(crate) fn from_u8(b: u8) -> crate::Result<Self> {
        match b {
            0 => Ok(TypeTag::Leaf),
            1 => Ok(TypeTag::Internal),
            other => Err(crate::Error::Fatal(format!(
                "unknown type tag {other} during deserialization"
            ))),
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Payload {
    Volatile { tag: usize },
    Located { offset: u64, size: u32 },
}

/// An object identifier: a tagged address that may refer to an in-memory
/// object, a byte range in a file, or a byte range in a persistent-memory
/// mapping.
///
/// Two OIDs are equal iff their medium, type tag and payload all match;
/// cross-medium comparisons are never equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid {
    medium: Medium,
    type_tag: TypeTag,
    payload: Payload,
}

impl Oid {
    /// Builds a volatile OID from a heap address. `ptr` is stored as an
    /// opaque integer tag; this type never dereferences it, it only ever
    /// serves as a cache key.
    pub fn from_volatile(type_tag: TypeTag, ptr: usize) -> Self {
        Oid {
            medium: Medium::Volatile,
            type_tag,
            payload: Payload::Volatile { tag: ptr },
        }
    }

    /// Builds an OID addressing a byte range in a block file.
    pub fn from_file(type_tag: TypeTag, offset: u64, size: u32) -> Self {
        Oid {
            medium: Medium::File,
            type_tag,
            payload: Payload::Located { offset, size },
        }
    }

    /// Builds an OID addressing a byte range in a persistent-memory mapping.
    pub fn from_pmem(type_tag: TypeTag, offset: u64, size: u32) -> Self {
        Oid {
            medium: Medium::PMem,
            type_tag,
            payload: Payload::Located { offset, size },
        }
    }

    /// Builds an OID for `medium`, addressed the same way `from_file` and
    /// `from_pmem` are (both are append-only offset/size stores). Used by
    /// code that is generic over which on-disk medium it targets.
    pub fn from_located(medium: Medium, type_tag: TypeTag, offset: u64, size: u32) -> Self {
        debug_assert!(!matches!(medium, Medium::Volatile));
        Oid {
            medium,
            type_tag,
            payload: Payload::Located { offset, size },
        }
    }

    /// The medium this OID resolves against.
    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// The node shape this OID refers to.
    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    /// `true` if this OID has never been persisted (it only has meaning as a
    /// cache key).
    pub fn is_volatile(&self) -> bool {
        matches!(self.medium, Medium::Volatile)
    }

    /// The `(offset, size)` pair for a `File`/`PMem` OID. Panics if called on
    /// a `Volatile` OID — callers are expected to check `is_volatile` first,
    /// mirroring the spec's "the medium discriminant governs which payload is
    /// read" contract.
    pub fn location(&self) -> (u64, u32) {
        match self.payload {
            Payload::Located { offset, size } => (offset, size),
            Payload::Volatile { .. } => {
                unreachable!("location() called on a volatile OID")
            }
        }
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Payload::Volatile { tag } => {
                write!(f, "Oid(Volatile, {:?}, tag={:#x})", self.type_tag, tag)
            }
            Payload::Located { offset, size } => write!(
                f,
                "Oid({:?}, {:?}, off={offset}, size={size})",
                self.medium, self.type_tag
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_medium_never_equal() {
        let a = Oid::from_volatile(TypeTag::Leaf, 0x1000);
        let b = Oid::from_file(TypeTag::Leaf, 0, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn same_fields_equal() {
        let a = Oid::from_file(TypeTag::Internal, 128, 64);
        let b = Oid::from_file(TypeTag::Internal, 128, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn type_tag_distinguishes() {
        let a = Oid::from_file(TypeTag::Leaf, 128, 64);
        let b = Oid::from_file(TypeTag::Internal, 128, 64);
        assert_ne!(a, b);
    }
}
