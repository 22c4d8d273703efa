//! Read access to a completed store.
//!
//! A [`Store`] keeps the header and the whole index in memory and opens
//! data files lazily as its cursor crosses them. Queries resolve through
//! the index first, so counting never touches a data file, and a point
//! query seeks directly to its block. When an `evalues` overlay is
//! present every record handed out carries the corrected estimate in
//! place of the stored one.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{OverlayError, ReadError, Result},
    file::{data_file_name, OverlapFileReader},
    overlay::{EvalueOverlay, EvalueOverlayMut},
    Histogram, Overlap, StoreIndex, StoreInfo,
};

/// Reader over a finalized store directory.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    info: StoreInfo,
    index: StoreIndex,
    evalues: Option<EvalueOverlay>,

    // Range restriction on A-read ids, inclusive on both ends.
    range_low: u32,
    range_high: u32,

    // Streaming cursor: index entry position and records consumed from
    // that entry's block.
    pos: usize,
    block_read: u32,

    file: Option<OverlapFileReader>,
    file_index: u32,
    // Record position of the open file's read head, to skip redundant
    // seeks while streaming contiguous blocks.
    next_record: u64,
}

impl Store {
    /// Opens a store for reading.
    ///
    /// Fails with a distinguishable error when the directory holds no
    /// store or the store was never finalized; see
    /// [`Error::is_not_a_store`](crate::Error::is_not_a_store) and
    /// [`Error::is_incomplete`](crate::Error::is_incomplete).
    pub fn open(path: &Path) -> Result<Self> {
        let info = StoreInfo::open(path)?;
        let index = StoreIndex::load(path)?;
        let evalues = EvalueOverlay::open(path, info.num_overlaps())?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
            index,
            evalues,
            range_low: 0,
            range_high: u32::MAX,
            pos: 0,
            block_read: 0,
            file: None,
            file_index: 0,
            next_record: 0,
        })
    }

    #[must_use]
    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    #[must_use]
    pub fn has_evalues(&self) -> bool {
        self.evalues.is_some()
    }

    /// Restricts the cursor and all counts to reads in `[low, high]` and
    /// repositions the cursor at the first read inside it.
    pub fn set_range(&mut self, low: u32, high: u32) -> Result<()> {
        if low > high {
            return Err(ReadError::InvalidRange { low, high }.into());
        }
        self.range_low = low;
        self.range_high = high;
        self.pos = self.index.first_at_or_after(low);
        self.block_read = 0;
        Ok(())
    }

    /// Lifts any range restriction and rewinds to the first read.
    pub fn reset_range(&mut self) {
        self.range_low = 0;
        self.range_high = u32::MAX;
        self.pos = 0;
        self.block_read = 0;
    }

    /// A-read id the cursor will hand out next; `None` at the end of the
    /// range.
    #[must_use]
    pub fn current_a_id(&self) -> Option<u32> {
        self.index
            .entries()
            .get(self.pos)
            .map(|e| e.a_id)
            .filter(|&a_id| a_id <= self.range_high)
    }

    /// Reads the next overlap in the current range; `None` once the range
    /// is exhausted.
    pub fn read_overlap(&mut self) -> Result<Option<Overlap>> {
        let Some(entry) = self.index.entries().get(self.pos).copied() else {
            return Ok(None);
        };
        if entry.a_id > self.range_high {
            return Ok(None);
        }

        if self.block_read == 0 {
            self.position_at(entry.file_index, u64::from(entry.offset))?;
        }

        let file = self.file.as_mut().expect("positioned above");
        let Some(mut overlap) = file.read_overlap()? else {
            return Err(ReadError::UnexpectedEndOfData {
                file_index: entry.file_index,
            }
            .into());
        };
        self.next_record += 1;

        if let Some(overlay) = &self.evalues {
            overlap.evalue = overlay.get(entry.overlap_id + u64::from(self.block_read));
        }

        // Advance eagerly past a finished block so current_a_id() always
        // names the next record's read.
        self.block_read += 1;
        if self.block_read >= entry.num_overlaps {
            self.pos += 1;
            self.block_read = 0;
        }
        Ok(Some(overlap))
    }

    /// Reads every remaining overlap of the read under the cursor into
    /// `buf`, returning the count. The cursor ends up on the next read.
    pub fn read_all_for_current_id(&mut self, buf: &mut Vec<Overlap>) -> Result<u64> {
        let mut count = 0;
        let Some(a_id) = self.current_a_id() else {
            return Ok(0);
        };
        while self.current_a_id() == Some(a_id) {
            let overlap = self.read_overlap()?.ok_or(ReadError::UnexpectedEndOfData {
                file_index: self.file_index,
            })?;
            buf.push(overlap);
            count += 1;
        }
        Ok(count)
    }

    /// Point query: replaces `buf` with every overlap of read `id`.
    ///
    /// A read with no overlaps, or one outside the current range, yields
    /// an empty buffer. Leaves the cursor on the read after `id`.
    pub fn read_overlaps_for_id(&mut self, id: u32, buf: &mut Vec<Overlap>) -> Result<u64> {
        buf.clear();
        if id < self.range_low || id > self.range_high || self.index.lookup(id).is_none() {
            return Ok(0);
        }
        self.pos = self.index.first_at_or_after(id);
        self.block_read = 0;
        self.read_all_for_current_id(buf)
    }

    /// Total overlaps for reads in the current range, answered from the
    /// index alone.
    #[must_use]
    pub fn num_overlaps_in_range(&self) -> u64 {
        self.index
            .num_overlaps_in_range(self.range_low, self.range_high)
    }

    /// Per-read overlap counts for every read in `[bgn, end]`.
    #[must_use]
    pub fn num_overlaps_per_read(&self, bgn: u32, end: u32) -> Vec<u32> {
        self.index.num_overlaps_per_read(bgn, end)
    }

    /// Loads the store's aggregate statistics.
    pub fn histogram(&self) -> Result<Histogram> {
        Histogram::load(&self.path, None)
    }

    /// Applies correction files to the overlay (see [`write_corrections`]
    /// for the format), creating and seeding the overlay on first use.
    ///
    /// Each file's declared read range must account for exactly the
    /// overlaps the store holds there; a partial patch is refused rather
    /// than leaving some records half-corrected. Subsequent reads from
    /// this store hand out the corrected estimates.
    pub fn add_evalues(&mut self, corrections: &[PathBuf]) -> Result<()> {
        let mut overlay = EvalueOverlayMut::create_or_open(&self.path, &self.info)?;

        for path in corrections {
            let mut inner = File::open(path).map(BufReader::new)?;
            let bgn = inner.read_u32::<LittleEndian>()?;
            let end = inner.read_u32::<LittleEndian>()?;
            let supplied = inner.read_u64::<LittleEndian>()?;

            let (first, expected) = self.index.overlay_range(bgn, end);
            if supplied != expected {
                return Err(OverlayError::SizeMismatch { supplied, expected }.into());
            }

            let mut values = vec![0u16; supplied as usize];
            inner.read_u16_into::<LittleEndian>(&mut values)?;
            overlay.set_range(first, &values)?;
        }

        overlay.flush()?;
        self.evalues = EvalueOverlay::open(&self.path, self.info.num_overlaps())?;
        Ok(())
    }

    fn position_at(&mut self, file_index: u32, offset: u64) -> Result<()> {
        if self.file.is_none() || self.file_index != file_index {
            self.file = Some(OverlapFileReader::open(&data_file_name(
                &self.path, file_index,
            ))?);
            self.file_index = file_index;
            self.next_record = 0;
        }
        if self.next_record != offset {
            self.file.as_mut().expect("just opened").seek_to(offset)?;
            self.next_record = offset;
        }
        Ok(())
    }
}

/// Writes one evalue correction file: the read range it covers and one
/// corrected value per overlap the store holds for that range, in store
/// order.
pub fn write_corrections(path: &Path, bgn: u32, end: u32, values: &[u16]) -> Result<()> {
    let mut out = File::create(path).map(BufWriter::new)?;
    out.write_u32::<LittleEndian>(bgn)?;
    out.write_u32::<LittleEndian>(end)?;
    out.write_u64::<LittleEndian>(values.len() as u64)?;
    for &value in values {
        out.write_u16::<LittleEndian>(value)?;
    }
    Ok(())
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{Error, StoreWriter};

    /// Reads 2, 5, 9 and 12 hold overlaps; built with a rotation limit
    /// that pushes read 12 into a second data file.
    fn build_store(dir: &Path) -> Result<PathBuf> {
        let store = dir.join("asm.ovl");
        let pairs: &[(u32, u32)] = &[
            (2, 5),
            (2, 9),
            (2, 11),
            (5, 1),
            (9, 2),
            (9, 3),
            (9, 7),
            (9, 8),
            (12, 4),
            (12, 6),
        ];
        let mut writer = StoreWriter::with_file_limit(&store, 8)?;
        for (i, &(a, b)) in pairs.iter().enumerate() {
            let mut ov = Overlap::new(a, b);
            ov.set_coords(0, 100 + i as u32, 0, 100 + i as u32);
            ov.evalue = 1000 + i as u16;
            writer.write_overlap(&ov)?;
        }
        writer.finish()?;
        Ok(store)
    }

    #[test]
    fn test_stream_whole_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = Store::open(&build_store(dir.path())?)?;

        let mut all = Vec::new();
        while let Some(ov) = store.read_overlap()? {
            all.push(ov);
        }
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].b_id, 5);
        assert_eq!(all[9], {
            let mut ov = Overlap::new(12, 6);
            ov.set_coords(0, 109, 0, 109);
            ov.evalue = 1009;
            ov
        });
        // Exhausted cursor stays exhausted.
        assert!(store.read_overlap()?.is_none());
        Ok(())
    }

    #[test]
    fn test_point_queries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = Store::open(&build_store(dir.path())?)?;

        let mut buf = Vec::new();
        assert_eq!(store.read_overlaps_for_id(9, &mut buf)?, 4);
        assert_eq!(buf.iter().map(|ov| ov.b_id).collect::<Vec<_>>(), [2, 3, 7, 8]);

        // Read 12 lives in the second data file.
        assert_eq!(store.read_overlaps_for_id(12, &mut buf)?, 2);
        assert_eq!(buf[0].b_id, 4);

        // Reads with no overlaps yield an empty buffer.
        for id in [1, 3, 7, 100] {
            assert_eq!(store.read_overlaps_for_id(id, &mut buf)?, 0);
            assert!(buf.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_cursor_tracks_current_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = Store::open(&build_store(dir.path())?)?;

        assert_eq!(store.current_a_id(), Some(2));
        store.read_overlap()?;
        assert_eq!(store.current_a_id(), Some(2));

        let mut buf = Vec::new();
        assert_eq!(store.read_all_for_current_id(&mut buf)?, 2);
        // The cursor moved to the next read, not past it.
        assert_eq!(store.current_a_id(), Some(5));
        Ok(())
    }

    #[test]
    fn test_range_restriction() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = Store::open(&build_store(dir.path())?)?;

        store.set_range(5, 9)?;
        assert_eq!(store.num_overlaps_in_range(), 5);
        assert_eq!(store.current_a_id(), Some(5));

        let mut all = Vec::new();
        while let Some(ov) = store.read_overlap()? {
            all.push(ov);
        }
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|ov| (5..=9).contains(&ov.a_id)));

        // Point queries honor the restriction too.
        let mut buf = Vec::new();
        assert_eq!(store.read_overlaps_for_id(2, &mut buf)?, 0);

        store.reset_range();
        assert_eq!(store.num_overlaps_in_range(), 10);
        assert_eq!(store.read_overlaps_for_id(2, &mut buf)?, 3);

        assert!(matches!(
            store.set_range(9, 5).unwrap_err(),
            Error::Read(ReadError::InvalidRange { low: 9, high: 5 })
        ));
        Ok(())
    }

    #[test]
    fn test_counts_come_from_the_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store_path = build_store(dir.path())?;
        let store = Store::open(&store_path)?;

        assert_eq!(store.num_overlaps_per_read(1, 6), vec![0, 3, 0, 0, 1, 0]);
        assert_eq!(store.num_overlaps_per_read(12, 12), vec![2]);

        let hist = store.histogram()?;
        assert_eq!(hist.num_recorded(), 10);
        Ok(())
    }

    #[test]
    fn test_open_failure_modes_are_distinguishable() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let err = Store::open(&dir.path().join("nothing.ovl")).unwrap_err();
        assert!(err.is_not_a_store());

        // A store whose build never finished.
        let store = dir.path().join("dead.ovl");
        let writer = StoreWriter::create(&store)?;
        drop(writer);
        let err = Store::open(&store).unwrap_err();
        assert!(err.is_incomplete());
        assert!(!err.is_not_a_store());
        Ok(())
    }

    #[test]
    fn test_add_evalues_corrects_a_range() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store_path = build_store(dir.path())?;
        let mut store = Store::open(&store_path)?;
        assert!(!store.has_evalues());

        // Correct reads 5..=9: one overlap for read 5, four for read 9.
        let corrections = dir.path().join("0001.evalues");
        write_corrections(&corrections, 5, 9, &[7, 8, 9, 10, 11])?;
        store.add_evalues(&[corrections])?;
        assert!(store.has_evalues());

        let mut buf = Vec::new();
        store.read_overlaps_for_id(5, &mut buf)?;
        assert_eq!(buf[0].evalue, 7);
        store.read_overlaps_for_id(9, &mut buf)?;
        assert_eq!(buf.iter().map(|ov| ov.evalue).collect::<Vec<_>>(), [8, 9, 10, 11]);

        // Records outside the corrected range keep their stored values.
        store.read_overlaps_for_id(2, &mut buf)?;
        assert_eq!(buf[0].evalue, 1000);
        store.read_overlaps_for_id(12, &mut buf)?;
        assert_eq!(buf[0].evalue, 1008);

        // A fresh reader picks the overlay up from disk.
        let mut reopened = Store::open(&store_path)?;
        assert!(reopened.has_evalues());
        reopened.read_overlaps_for_id(5, &mut buf)?;
        assert_eq!(buf[0].evalue, 7);
        Ok(())
    }

    #[test]
    fn test_add_evalues_rejects_partial_ranges() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = Store::open(&build_store(dir.path())?)?;

        // Reads 5..=9 hold five overlaps, not three.
        let corrections = dir.path().join("short.evalues");
        write_corrections(&corrections, 5, 9, &[1, 2, 3])?;
        assert!(matches!(
            store.add_evalues(&[corrections]).unwrap_err(),
            Error::Overlay(OverlayError::SizeMismatch {
                supplied: 3,
                expected: 5
            })
        ));
        Ok(())
    }
}
