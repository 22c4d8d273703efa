//! # ovstore
//!
//! An immutable, indexed, on-disk repository of pairwise read-alignment
//! records ("overlaps") for whole-genome assembly pipelines.
//!
//! A store is a directory: a fixed-layout `info` header, one or more
//! numbered data files of fixed-size [`Overlap`] records sorted by
//! `(a_id, b_id)`, an `index` mapping each A-read id to its block of
//! records, and an optional `evalues` overlay that corrects the error
//! estimate of every record without rewriting the data files.
//!
//! Stores are built either sequentially with [`StoreWriter`] (input must
//! already be sorted) or in parallel through the bucketize → sort → merge
//! pipeline in [`parallel`]: many independent [`Bucketizer`] workers
//! partition raw overlaps by slice, one [`SliceSorter`] per slice sorts and
//! writes its partition, and a single [`Merger`] verifies the result and
//! performs the one atomic `finalize` step that makes the store readable.
//!
//! Completed stores are opened with [`Store`], which answers point, range
//! and batch queries through the index without scanning data files.

mod error;
mod file;
mod filter;
mod histogram;
mod index;
mod info;
mod overlay;
pub mod parallel;
mod reader;
mod record;
mod writer;

pub use error::{Error, HeaderError, IndexError, OverlayError, ReadError, Result, WriteError};
pub use filter::{FilterCounters, FilterPolicy, OverlapFilter, ReadFlags};
pub use histogram::Histogram;
pub use index::{IndexEntry, StoreIndex};
pub use info::StoreInfo;
pub use parallel::{slice_for_read, Bucketizer, Merger, SliceSorter};
pub use reader::{write_corrections, Store};
pub use record::{decode_evalue, encode_erate, Overlap};
pub use writer::StoreWriter;

/// Magic value of a finalized store header.
pub const STORE_MAGIC: u64 = u64::from_le_bytes(*b"OVLSTORE");

/// Magic value of a store still under construction.
pub const STORE_MAGIC_INCOMPLETE: u64 = u64::from_le_bytes(*b"OVLSTORP");

/// Current store format version.
pub const STORE_VERSION: u64 = 2;

/// On-disk size of one overlap record in bytes.
///
/// Persisted in the header as the encoding width; a reader refuses any
/// store whose width differs from its own.
pub const RECORD_BYTES: u64 = std::mem::size_of::<Overlap>() as u64;

/// Largest encodable error value.
pub const MAX_EVALUE: u16 = u16::MAX;

/// Default number of records per data file before the sequential writer
/// rotates to the next-numbered file (1 GiB of records).
pub const DEFAULT_FILE_LIMIT: u64 = (1 << 30) / RECORD_BYTES;
