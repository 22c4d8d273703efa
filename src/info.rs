//! The persisted store header.
//!
//! The header is a single 64-byte block in the `info` file of a store
//! directory. During parallel construction each sort worker writes its own
//! temporary `NNNN.info`, and the merge step folds them into the final
//! header. The magic field doubles as the completion state machine: a
//! store is readable only once [`StoreInfo::finalize`] has flipped it from
//! the incomplete to the complete constant.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};

use crate::{
    error::{HeaderError, Result},
    RECORD_BYTES, STORE_MAGIC, STORE_MAGIC_INCOMPLETE, STORE_VERSION,
};

/// Size of the serialized header in bytes.
pub const SIZE_INFO: usize = std::mem::size_of::<StoreInfo>();

/// Persisted store metadata.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct StoreInfo {
    /// Completion state: [`STORE_MAGIC`] or [`STORE_MAGIC_INCOMPLETE`]
    magic: u64,
    /// Format version
    version: u64,
    reserved: u64,
    /// Smallest A-read id holding overlaps
    smallest_id: u64,
    /// Largest A-read id holding overlaps
    largest_id: u64,
    /// Total overlap count across all data files
    num_overlaps: u64,
    /// Highest data file index (equals the slice count after a parallel build)
    num_files: u64,
    /// Record byte width the store was written with
    encoding_width: u64,
}

impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            magic: STORE_MAGIC_INCOMPLETE,
            version: STORE_VERSION,
            reserved: 0,
            smallest_id: u64::MAX,
            largest_id: 0,
            num_overlaps: 0,
            num_files: 0,
            encoding_width: RECORD_BYTES,
        }
    }
}

impl StoreInfo {
    /// Resets to construction defaults: incomplete magic, empty id range.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Path of the header file: `info`, or `NNNN.info` for a slice.
    #[must_use]
    pub fn name(store: &Path, slice: Option<u32>) -> PathBuf {
        match slice {
            Some(slice) => store.join(format!("{slice:04}.info")),
            None => store.join("info"),
        }
    }

    /// Loads the final header, or a per-slice temporary when `slice` is set.
    ///
    /// No completion or version checks are applied here; readers go through
    /// [`StoreInfo::open`] instead.
    pub fn load(store: &Path, slice: Option<u32>) -> Result<Self> {
        let name = Self::name(store, slice);
        if !name.is_file() {
            return Err(HeaderError::NotAStore(store.to_path_buf()).into());
        }
        let mut bytes = [0u8; SIZE_INFO];
        File::open(name)?.read_exact(&mut bytes)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Loads and validates the final header for reading.
    ///
    /// Fails with a distinguishable error when the store is still under
    /// construction, and refuses any store whose version or record width
    /// differs from this build's constants.
    pub fn open(store: &Path) -> Result<Self> {
        let info = Self::load(store, None)?;
        if info.check_incomplete() {
            return Err(HeaderError::Incomplete(store.to_path_buf()).into());
        }
        if !info.check_magic() {
            return Err(HeaderError::BadMagic(info.magic).into());
        }
        if !info.check_version() {
            return Err(HeaderError::VersionMismatch {
                found: info.version,
                expected: STORE_VERSION,
            }
            .into());
        }
        if !info.check_width() {
            return Err(HeaderError::WidthMismatch {
                found: info.encoding_width,
                expected: RECORD_BYTES,
            }
            .into());
        }
        Ok(info)
    }

    /// Writes the header as-is, to `info` or a per-slice temporary.
    pub fn save(&self, store: &Path, slice: Option<u32>) -> Result<()> {
        let mut file = File::create(Self::name(store, slice))?;
        file.write_all(bytemuck::bytes_of(self))?;
        Ok(())
    }

    /// The single atomic step that makes the store visible to readers.
    ///
    /// Overwrites the magic with the complete constant, stamps the current
    /// version, and records the number of data files.
    pub fn finalize(&mut self, store: &Path, num_files: u32) -> Result<()> {
        self.magic = STORE_MAGIC;
        self.version = STORE_VERSION;
        self.num_files = u64::from(num_files);
        self.save(store, None)
    }

    /// Existence and magic check only; used to poll completion without a
    /// full load.
    #[must_use]
    pub fn quick_check(store: &Path) -> bool {
        match Self::load(store, None) {
            Ok(info) => info.check_magic(),
            Err(_) => false,
        }
    }

    /// Widens the id range and bumps the total count.
    ///
    /// Called once per sealed A-read block, not once per record.
    pub fn record_append(&mut self, id: u32, n: u64) {
        let id = u64::from(id);
        if self.smallest_id > id {
            self.smallest_id = id;
        }
        if self.largest_id < id {
            self.largest_id = id;
        }
        self.num_overlaps += n;
    }

    #[must_use]
    pub fn check_magic(&self) -> bool {
        self.magic == STORE_MAGIC
    }
    #[must_use]
    pub fn check_incomplete(&self) -> bool {
        self.magic == STORE_MAGIC_INCOMPLETE
    }
    #[must_use]
    pub fn check_version(&self) -> bool {
        self.version == STORE_VERSION
    }
    #[must_use]
    pub fn check_width(&self) -> bool {
        self.encoding_width == RECORD_BYTES
    }

    #[must_use]
    pub fn num_overlaps(&self) -> u64 {
        self.num_overlaps
    }

    /// Smallest A-read id in the store; meaningless while the store is empty.
    #[must_use]
    pub fn smallest_id(&self) -> u32 {
        self.smallest_id.min(u64::from(u32::MAX)) as u32
    }

    #[must_use]
    pub fn largest_id(&self) -> u32 {
        self.largest_id as u32
    }

    #[must_use]
    pub fn num_files(&self) -> u32 {
        self.num_files as u32
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}
