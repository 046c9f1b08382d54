//! `gpucap-addr` turns raw GPU addresses and descriptor handles observed during interception into
//! stable logical identifiers.
//!
//! Native virtual addresses are meaningless once a capture is replayed on another device (or
//! another run on the same device), so recorded commands carry `(object key, offset)` pairs
//! instead. This crate provides:
//! - [`AddressRegistry`]: standalone resources and heaps, resolved by address.
//! - [`PlacedResourceIndex`]: per-heap index of placed (possibly aliased) resources.
//! - [`DescriptorHandleRegistry`]: CPU/GPU descriptor handle ranges of descriptor heaps.
//!
//! Every registry is internally synchronized and is meant to be shared behind an `Arc` by all
//! interception threads.

mod descriptor;
mod error;
mod placed;
mod range;
mod registry;
mod stats;

pub use descriptor::{
    DescriptorHandleRange, DescriptorHandleRegistry, DescriptorHeapType, HandleInfo, HandleKind,
};
pub use error::{AddressError, DescriptorError};
pub use placed::{PlacedResourceIndex, PlacedResourceRange, ResourceUsage};
pub use range::{AddressRange, ObjectKey};
pub use registry::{AddressRegistry, ResolvedAddress};
pub use stats::{RegistryStats, RegistryStatsSnapshot};
