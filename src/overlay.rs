//! The evalue overlay: a memory-mapped dense array of corrected error
//! estimates, one `u16` slot per overlap, addressed by global overlap id.
//!
//! The overlay lives in its own `evalues` file with a lifetime independent
//! of the base data files. It can be rebuilt or overwritten any number of
//! times; the base records are never touched. When a reader finds the file
//! it substitutes the overlay value for every record's stored evalue.

use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use memmap2::{Mmap, MmapMut};

use crate::{
    error::{OverlayError, Result},
    file::{data_file_name, num_overlaps_in, OverlapFileReader},
    StoreInfo,
};

/// Path of the overlay file inside a store directory.
#[must_use]
pub fn overlay_name(store: &Path) -> PathBuf {
    store.join("evalues")
}

/// Read-only view of the overlay.
#[derive(Debug)]
pub struct EvalueOverlay {
    mmap: Mmap,
}

impl EvalueOverlay {
    /// Maps the overlay of a store holding `total` overlaps.
    ///
    /// Returns `None` when no overlay has been written; a present file of
    /// the wrong length is an error rather than a silently wrong answer.
    pub fn open(store: &Path, total: u64) -> Result<Option<Self>> {
        let name = overlay_name(store);
        if !name.is_file() {
            return Ok(None);
        }
        let file = File::open(name)?;
        let bytes = file.metadata()?.len();
        if bytes != total * 2 {
            return Err(OverlayError::LengthMismatch {
                bytes,
                expected: total,
            }
            .into());
        }
        // Safety: the store is immutable once finalized; concurrent overlay
        // rewrites over the same range are serialized by the caller.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Some(Self { mmap }))
    }

    /// Corrected evalue of the overlap with global id `overlap_id`.
    #[must_use]
    pub fn get(&self, overlap_id: u64) -> u16 {
        let values: &[u16] = bytemuck::cast_slice(&self.mmap);
        values[overlap_id as usize]
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        (self.mmap.len() / 2) as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Mutable view of the overlay, used by [`crate::Store::add_evalues`].
pub struct EvalueOverlayMut {
    mmap: MmapMut,
}

impl EvalueOverlayMut {
    /// Opens the overlay for writing, seeding it first if it does not
    /// exist yet.
    ///
    /// Seeding copies every base record's evalue out of the data files, so
    /// overlaps outside any corrected range keep their original value.
    pub fn create_or_open(store: &Path, info: &StoreInfo) -> Result<Self> {
        let name = overlay_name(store);
        if !name.is_file() {
            Self::seed(store, info)?;
        }

        let file = OpenOptions::new().read(true).write(true).open(name)?;
        let bytes = file.metadata()?.len();
        if bytes != info.num_overlaps() * 2 {
            return Err(OverlayError::LengthMismatch {
                bytes,
                expected: info.num_overlaps(),
            }
            .into());
        }
        // Safety: whole-range overwrites over disjoint id ranges only; the
        // caller serializes overlapping writers.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { mmap })
    }

    fn seed(store: &Path, info: &StoreInfo) -> Result<()> {
        let mut out = File::create(overlay_name(store)).map(BufWriter::new)?;
        let mut seeded = 0u64;
        for file_index in 1..=info.num_files() {
            let path = data_file_name(store, file_index);
            if num_overlaps_in(&path)? == 0 {
                continue;
            }
            let mut reader = OverlapFileReader::open(&path)?;
            while let Some(overlap) = reader.read_overlap()? {
                out.write_u16::<LittleEndian>(overlap.evalue)?;
                seeded += 1;
            }
        }
        if seeded != info.num_overlaps() {
            return Err(OverlayError::LengthMismatch {
                bytes: seeded * 2,
                expected: info.num_overlaps(),
            }
            .into());
        }
        Ok(())
    }

    /// Overwrites the whole range starting at global id `first` with
    /// `values`. Never patches less than the supplied range.
    pub fn set_range(&mut self, first: u64, values: &[u16]) -> Result<()> {
        let len = (self.mmap.len() / 2) as u64;
        let count = values.len() as u64;
        if first + count > len {
            return Err(OverlayError::RangeOutOfBounds { first, count, len }.into());
        }
        let slots: &mut [u16] = bytemuck::cast_slice_mut(&mut self.mmap);
        slots[first as usize..(first + count) as usize].copy_from_slice(values);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
