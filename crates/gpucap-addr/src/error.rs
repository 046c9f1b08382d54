use thiserror::Error;

use crate::ObjectKey;

/// Errors returned by [`crate::AddressRegistry`] registration entry points.
///
/// Lookups never fail with an error: an untracked address is an ordinary `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address range for {key} is empty")]
    EmptyRange { key: ObjectKey },

    #[error("address range for {key} overflows: start=0x{start:x} size=0x{size:x}")]
    AddressOverflow {
        key: ObjectKey,
        start: u64,
        size: u64,
    },

    #[error("heap {heap} is not registered")]
    UnknownHeap { heap: ObjectKey },

    #[error(
        "placed resource {key} [0x{start:x}, 0x{end:x}) lies outside heap {heap} [0x{heap_start:x}, 0x{heap_end:x})"
    )]
    OutsideHeap {
        key: ObjectKey,
        start: u64,
        end: u64,
        heap: ObjectKey,
        heap_start: u64,
        heap_end: u64,
    },

    #[error("placed resource {key} uses the key of its own heap")]
    KeyConflict { key: ObjectKey },
}

/// Errors returned when registering descriptor handle ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor range for {owner} has a zero stride")]
    ZeroStride { owner: ObjectKey },

    #[error("descriptor range for {owner} is empty: start=0x{start:x} end=0x{end:x}")]
    EmptyRange {
        owner: ObjectKey,
        start: u64,
        end: u64,
    },

    #[error("descriptor range for {owner} overflows: start=0x{start:x} count={count} stride={stride}")]
    Overflow {
        owner: ObjectKey,
        start: u64,
        count: u64,
        stride: u64,
    },
}
