//! The per-read index: one entry per A-read that holds overlaps.
//!
//! Entries are kept sorted by A-read id, so point lookups are a binary
//! search and range counts fall out of the running global overlap id,
//! which is the exclusive prefix sum of all earlier entries' counts. That
//! same running id is what addresses the evalue overlay without touching
//! the data files.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::{
    error::{IndexError, Result},
    file::{index_name, slice_index_name},
    StoreInfo,
};

/// Locates the block of overlaps belonging to one A-read.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct IndexEntry {
    /// A-read id owning this block
    pub a_id: u32,
    /// 1-based data file holding the block
    pub file_index: u32,
    /// Record offset of the block within its file
    pub offset: u32,
    /// Number of overlaps in the block
    pub num_overlaps: u32,
    /// Global id of the block's first overlap
    pub overlap_id: u64,
}

/// The sorted array of index entries for a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreIndex {
    entries: Vec<IndexEntry>,
}

impl StoreIndex {
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    /// Loads the final index of a store.
    pub fn load(store: &Path) -> Result<Self> {
        Self::load_from(&index_name(store), store)
    }

    /// Loads a per-slice temporary index.
    pub fn load_slice(store: &Path, slice: u32) -> Result<Self> {
        Self::load_from(&slice_index_name(store, slice), store)
    }

    fn load_from(path: &Path, store: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(IndexError::MissingIndex(store.to_path_buf()).into());
        }
        let len = std::fs::metadata(path)?.len();
        let entry_size = std::mem::size_of::<IndexEntry>() as u64;
        if len % entry_size != 0 {
            return Err(IndexError::Truncated(len).into());
        }

        // Read into an owned, correctly aligned array rather than casting
        // the raw file bytes.
        let mut entries = vec![IndexEntry::zeroed(); (len / entry_size) as usize];
        File::open(path)?.read_exact(bytemuck::cast_slice_mut(&mut entries))?;
        Ok(Self { entries })
    }

    pub fn save(&self, store: &Path) -> Result<()> {
        self.save_to(&index_name(store))
    }

    pub fn save_slice(&self, store: &Path, slice: u32) -> Result<()> {
        self.save_to(&slice_index_name(store, slice))
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(bytemuck::cast_slice(&self.entries))?;
        Ok(())
    }

    /// Finds the entry for `a_id`; reads with zero overlaps have none.
    #[must_use]
    pub fn lookup(&self, a_id: u32) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by_key(&a_id, |e| e.a_id)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Position of the first entry with `a_id >= id`.
    #[must_use]
    pub fn first_at_or_after(&self, id: u32) -> usize {
        self.entries.partition_point(|e| e.a_id < id)
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total overlaps for reads in `[low, high]`, answered from the prefix
    /// sums alone.
    #[must_use]
    pub fn num_overlaps_in_range(&self, low: u32, high: u32) -> u64 {
        let lo = self.entries.partition_point(|e| e.a_id < low);
        let hi = self.entries.partition_point(|e| e.a_id <= high);
        if lo >= hi {
            return 0;
        }
        let last = &self.entries[hi - 1];
        last.overlap_id + u64::from(last.num_overlaps) - self.entries[lo].overlap_id
    }

    /// Per-read overlap counts for every read in `[bgn, end]`; reads with
    /// no entry report zero.
    #[must_use]
    pub fn num_overlaps_per_read(&self, bgn: u32, end: u32) -> Vec<u32> {
        let mut counts = vec![0u32; (end - bgn + 1) as usize];
        let lo = self.first_at_or_after(bgn);
        for entry in &self.entries[lo..] {
            if entry.a_id > end {
                break;
            }
            counts[(entry.a_id - bgn) as usize] = entry.num_overlaps;
        }
        counts
    }

    /// Global id of the first overlap for reads in `[bgn, end]` and the
    /// number of overlaps the range holds. Used to address the overlay.
    #[must_use]
    pub fn overlay_range(&self, bgn: u32, end: u32) -> (u64, u64) {
        let count = self.num_overlaps_in_range(bgn, end);
        if count == 0 {
            return (0, 0);
        }
        let lo = self.first_at_or_after(bgn);
        (self.entries[lo].overlap_id, count)
    }

    /// Walks the index checking every structural invariant against the
    /// header and the actual data file lengths.
    ///
    /// With `do_fixes`, two repairable classes are handled in place:
    /// stale placeholder entries with zero overlaps are dropped, and the
    /// running global overlap ids are recomputed. Returns whether any fix
    /// was applied; all other inconsistencies are hard errors.
    pub fn verify(
        &mut self,
        info: &StoreInfo,
        file_counts: &[u64],
        do_fixes: bool,
    ) -> Result<bool> {
        let mut fixed = false;

        if do_fixes && self.entries.iter().any(|e| e.num_overlaps == 0) {
            self.entries.retain(|e| e.num_overlaps > 0);
            fixed = true;
        }

        let mut prev: Option<u32> = None;
        let mut running = 0u64;
        for entry in &mut self.entries {
            if let Some(prev) = prev {
                if entry.a_id <= prev {
                    return Err(IndexError::IdsOutOfOrder {
                        prev,
                        next: entry.a_id,
                    }
                    .into());
                }
            }
            prev = Some(entry.a_id);

            if u64::from(entry.a_id) < u64::from(info.smallest_id())
                || entry.a_id > info.largest_id()
            {
                return Err(IndexError::IdOutOfBounds {
                    a_id: entry.a_id,
                    smallest: info.smallest_id(),
                    largest: info.largest_id(),
                }
                .into());
            }

            if entry.file_index == 0 || entry.file_index as usize > file_counts.len() {
                return Err(IndexError::FileOutOfBounds {
                    a_id: entry.a_id,
                    file_index: entry.file_index,
                    num_files: file_counts.len() as u32,
                }
                .into());
            }
            let file_len = file_counts[(entry.file_index - 1) as usize];
            if u64::from(entry.offset) + u64::from(entry.num_overlaps) > file_len {
                return Err(IndexError::BlockOutOfBounds {
                    a_id: entry.a_id,
                    offset: entry.offset,
                    num_overlaps: entry.num_overlaps,
                    file_len,
                }
                .into());
            }

            if entry.overlap_id != running {
                if do_fixes {
                    entry.overlap_id = running;
                    fixed = true;
                } else {
                    return Err(IndexError::Discontinuity {
                        a_id: entry.a_id,
                        found: entry.overlap_id,
                        expected: running,
                    }
                    .into());
                }
            }
            running += u64::from(entry.num_overlaps);
        }

        if running != info.num_overlaps() {
            return Err(IndexError::CountMismatch {
                indexed: running,
                expected: info.num_overlaps(),
            }
            .into());
        }

        Ok(fixed)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn entry(a_id: u32, file_index: u32, offset: u32, n: u32, overlap_id: u64) -> IndexEntry {
        IndexEntry {
            a_id,
            file_index,
            offset,
            num_overlaps: n,
            overlap_id,
        }
    }

    fn sample() -> StoreIndex {
        // Reads 2, 5, 9 in file 1; read 12 in file 2. Read 7 has none.
        StoreIndex::from_entries(vec![
            entry(2, 1, 0, 3, 0),
            entry(5, 1, 3, 1, 3),
            entry(9, 1, 4, 4, 4),
            entry(12, 2, 0, 2, 8),
        ])
    }

    fn sample_info() -> StoreInfo {
        let mut info = StoreInfo::default();
        info.record_append(2, 3);
        info.record_append(5, 1);
        info.record_append(9, 4);
        info.record_append(12, 2);
        info
    }

    #[test]
    fn test_lookup() {
        let index = sample();
        assert_eq!(index.lookup(5).unwrap().num_overlaps, 1);
        assert!(index.lookup(7).is_none());
        assert!(index.lookup(13).is_none());
    }

    #[test]
    fn test_prefix_sum_invariant() {
        let index = sample();
        for pair in index.entries().windows(2) {
            assert_eq!(
                pair[1].overlap_id,
                pair[0].overlap_id + u64::from(pair[0].num_overlaps)
            );
        }
    }

    #[test]
    fn test_range_counts() {
        let index = sample();
        assert_eq!(index.num_overlaps_in_range(2, 12), 10);
        assert_eq!(index.num_overlaps_in_range(3, 9), 5);
        assert_eq!(index.num_overlaps_in_range(6, 8), 0);
        assert_eq!(index.num_overlaps_in_range(12, 100), 2);

        assert_eq!(index.num_overlaps_per_read(1, 6), vec![0, 3, 0, 0, 1, 0]);
    }

    #[test]
    fn test_overlay_range() {
        let index = sample();
        assert_eq!(index.overlay_range(5, 9), (3, 5));
        assert_eq!(index.overlay_range(6, 8), (0, 0));
        assert_eq!(index.overlay_range(2, 12), (0, 10));
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = sample();
        index.save(dir.path())?;
        assert_eq!(StoreIndex::load(dir.path())?, index);

        index.save_slice(dir.path(), 2)?;
        assert_eq!(StoreIndex::load_slice(dir.path(), 2)?, index);
        Ok(())
    }

    #[test]
    fn test_load_missing_and_truncated() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(StoreIndex::load(dir.path()).is_err());

        std::fs::write(index_name(dir.path()), [0u8; 25])?;
        assert!(matches!(
            StoreIndex::load(dir.path()).unwrap_err(),
            crate::Error::Index(IndexError::Truncated(25))
        ));
        Ok(())
    }

    #[test]
    fn test_verify_clean() -> Result<()> {
        let mut index = sample();
        let fixed = index.verify(&sample_info(), &[8, 2], false)?;
        assert!(!fixed);
        Ok(())
    }

    #[test]
    fn test_verify_detects_disorder() {
        let mut index = StoreIndex::from_entries(vec![entry(5, 1, 0, 1, 0), entry(3, 1, 1, 1, 1)]);
        let mut info = StoreInfo::default();
        info.record_append(3, 1);
        info.record_append(5, 1);
        assert!(matches!(
            index.verify(&info, &[2], false).unwrap_err(),
            crate::Error::Index(IndexError::IdsOutOfOrder { prev: 5, next: 3 })
        ));
    }

    #[test]
    fn test_verify_detects_block_overrun() {
        let mut index = sample();
        // File 1 claims fewer records than the index needs.
        assert!(matches!(
            index.verify(&sample_info(), &[7, 2], false).unwrap_err(),
            crate::Error::Index(IndexError::BlockOutOfBounds { a_id: 9, .. })
        ));
    }

    #[test]
    fn test_verify_repairs_discontinuity() -> Result<()> {
        let mut index = sample();
        index.entries[2].overlap_id = 99;

        let info = sample_info();
        assert!(matches!(
            index.clone().verify(&info, &[8, 2], false).unwrap_err(),
            crate::Error::Index(IndexError::Discontinuity {
                a_id: 9,
                found: 99,
                expected: 4
            })
        ));

        let fixed = index.verify(&info, &[8, 2], true)?;
        assert!(fixed);
        assert_eq!(index, sample());
        Ok(())
    }

    #[test]
    fn test_verify_drops_empty_placeholders() -> Result<()> {
        let mut entries = sample().entries().to_vec();
        entries.insert(2, entry(7, 1, 4, 0, 4));
        let mut index = StoreIndex::from_entries(entries);

        let info = sample_info();
        let fixed = index.verify(&info, &[8, 2], true)?;
        assert!(fixed);
        assert_eq!(index, sample());
        Ok(())
    }

    #[test]
    fn test_verify_detects_count_mismatch() {
        let mut index = sample();
        let mut info = sample_info();
        info.record_append(12, 5); // inflate the header total
        assert!(matches!(
            index.verify(&info, &[8, 2], false).unwrap_err(),
            crate::Error::Index(IndexError::CountMismatch {
                indexed: 10,
                expected: 15
            })
        ));
    }
}
