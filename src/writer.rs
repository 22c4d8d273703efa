//! Sequential, append-only store construction.
//!
//! The writer trusts its caller to supply overlaps already sorted by
//! `(a_id, b_id)`; it never sorts. Index entries are a side effect of
//! writing: whenever the observed A-id changes, the open block is sealed
//! (offset and count fixed) and a new one begins at the current position.
//! Data files rotate at a configurable record limit, always on a block
//! boundary, so a single index entry never spans two files.
//!
//! Nothing on disk is a valid store until [`StoreWriter::finish`] writes
//! the index and flips the header magic.

use std::path::{Path, PathBuf};

use crate::{
    error::{Result, WriteError},
    file::{data_file_name, OverlapFileWriter},
    Histogram, IndexEntry, Overlap, StoreIndex, StoreInfo, DEFAULT_FILE_LIMIT,
};

/// Single-process builder of header + index + data files.
pub struct StoreWriter {
    path: PathBuf,
    info: StoreInfo,
    histogram: Histogram,

    entries: Vec<IndexEntry>,
    block: Option<IndexEntry>,
    prev_a: u32,
    prev_b: u32,

    file: Option<OverlapFileWriter>,
    file_index: u32,
    file_limit: u64,
    num_written: u64,

    // Set when this writer produces one slice of a parallel build; the
    // data file is numbered by the slice and finish() leaves the store
    // unfinalized.
    slice: Option<u32>,
}

impl StoreWriter {
    /// Creates a store directory and an incomplete header inside it.
    pub fn create(path: &Path) -> Result<Self> {
        Self::with_file_limit(path, DEFAULT_FILE_LIMIT)
    }

    /// As [`StoreWriter::create`], with a custom data file rotation limit.
    pub fn with_file_limit(path: &Path, file_limit: u64) -> Result<Self> {
        if file_limit == 0 || file_limit > u64::from(u32::MAX) {
            return Err(WriteError::InvalidFileLimit(file_limit).into());
        }
        std::fs::create_dir_all(path)?;

        let info = StoreInfo::default();
        info.save(path, None)?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            histogram: Histogram::default(),
            entries: Vec::new(),
            block: None,
            prev_a: 0,
            prev_b: 0,
            file: None,
            file_index: 0,
            file_limit,
            num_written: 0,
            slice: None,
        })
    }

    /// Writer for one slice artifact of a parallel build.
    ///
    /// The slice owns data file `slice` outright and rotation is disabled;
    /// its index and header are written as `NNNN.index` / `NNNN.info`
    /// temporaries with local overlap ids starting at zero.
    pub(crate) fn for_slice(path: &Path, slice: u32) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            info: StoreInfo::default(),
            histogram: Histogram::default(),
            entries: Vec::new(),
            block: None,
            prev_a: 0,
            prev_b: 0,
            file: None,
            file_index: slice - 1,
            file_limit: u64::from(u32::MAX),
            num_written: 0,
            slice: Some(slice),
        })
    }

    /// Appends one overlap.
    ///
    /// Input must be sorted by `(a_id, b_id)`; an out-of-order record is
    /// rejected rather than silently producing a broken index.
    pub fn write_overlap(&mut self, overlap: &Overlap) -> Result<()> {
        if self.num_written > 0
            && (overlap.a_id < self.prev_a
                || (overlap.a_id == self.prev_a && overlap.b_id < self.prev_b))
        {
            return Err(WriteError::UnsortedOverlap {
                a_id: overlap.a_id,
                b_id: overlap.b_id,
                prev_a: self.prev_a,
                prev_b: self.prev_b,
            }
            .into());
        }

        if self.block.is_some_and(|b| b.a_id != overlap.a_id) {
            self.seal_block();
        }

        if self.block.is_none() {
            self.start_block(overlap.a_id)?;
        }

        let file = self.file.as_mut().expect("open block implies open file");
        file.write_overlap(overlap)?;
        self.block.as_mut().expect("block just opened").num_overlaps += 1;
        self.histogram.record(overlap);

        self.num_written += 1;
        self.prev_a = overlap.a_id;
        self.prev_b = overlap.b_id;
        Ok(())
    }

    /// Seals the last block, writes index and histogram, and, for a
    /// sequential build, finalizes the header. Returns the header.
    pub fn finish(mut self) -> Result<StoreInfo> {
        self.seal_block();
        if let Some(file) = self.file.take() {
            file.finish()?;
        }

        let index = StoreIndex::from_entries(std::mem::take(&mut self.entries));
        match self.slice {
            Some(slice) => {
                index.save_slice(&self.path, slice)?;
                self.histogram.save(&self.path, Some(slice))?;
                self.info.save(&self.path, Some(slice))?;
            }
            None => {
                index.save(&self.path)?;
                self.histogram.save(&self.path, None)?;
                self.info.finalize(&self.path, self.file_index)?;
            }
        }
        Ok(self.info)
    }

    #[must_use]
    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    fn start_block(&mut self, a_id: u32) -> Result<()> {
        // Rotation happens only here, between blocks.
        let rotate = match &self.file {
            Some(file) => file.num_written() >= self.file_limit,
            None => true,
        };
        if rotate {
            if let Some(file) = self.file.take() {
                file.finish()?;
            }
            self.file_index += 1;
            self.file = Some(OverlapFileWriter::create(&data_file_name(
                &self.path,
                self.file_index,
            ))?);
        }

        let offset = self.file.as_ref().expect("file just opened").num_written();
        self.block = Some(IndexEntry {
            a_id,
            file_index: self.file_index,
            offset: offset as u32,
            num_overlaps: 0,
            overlap_id: self.num_written,
        });
        Ok(())
    }

    fn seal_block(&mut self) {
        if let Some(block) = self.block.take() {
            if block.num_overlaps > 0 {
                self.info
                    .record_append(block.a_id, u64::from(block.num_overlaps));
                self.entries.push(block);
            }
        }
    }
}
