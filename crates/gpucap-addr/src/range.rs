use core::fmt;

use crate::AddressError;

/// Logical identifier of a traced API object (resource, heap, descriptor heap).
///
/// Keys are handed out by the interception layer and stay valid across the capture/replay
/// boundary, unlike the native addresses they stand in for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(pub u64);

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

impl From<u64> for ObjectKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Half-open address interval `[start, end)` owned by `key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub key: ObjectKey,
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    /// Build the range `[start, start + size)`.
    ///
    /// Empty ranges cannot contain any address and are rejected, as are ranges that would wrap
    /// past the end of the 64-bit address space.
    pub fn from_size(key: ObjectKey, start: u64, size: u64) -> Result<Self, AddressError> {
        if size == 0 {
            return Err(AddressError::EmptyRange { key });
        }
        let end = start
            .checked_add(size)
            .ok_or(AddressError::AddressOverflow { key, start, size })?;
        Ok(Self { key, start, end })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }

    #[inline]
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// `true` if `other` lies entirely inside `self`.
    #[inline]
    pub fn encloses(&self, other: &AddressRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}
