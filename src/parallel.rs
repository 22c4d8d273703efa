//! Parallel store construction: bucketize → sort → merge.
//!
//! Overlap computation is embarrassingly parallel, so construction is
//! organized around independent worker *processes* that never share
//! memory:
//!
//! 1. **Bucketize**: each compute worker owns one [`Bucketizer`] and
//!    partitions its raw overlaps by destination slice (a range partition
//!    of the A-read id space). Both the forward and the reverse record of
//!    every overlap are pushed, so each overlap is findable under either
//!    endpoint. Fragments are unsorted and spread across worker
//!    directories; a per-bucket sizes table lets sorters preallocate.
//! 2. **Sort**: one [`SliceSorter`] per slice gathers that slice's
//!    fragments from every bucket, sorts in memory, and writes one slice
//!    artifact through the sequential writer: data file, temporary index,
//!    temporary header, temporary histogram.
//! 3. **Merge**: a single [`Merger`] folds the per-slice headers,
//!    indexes and histograms together, rebases the global overlap ids,
//!    verifies every index invariant, and only then finalizes the header.
//!    Slice artifacts become garbage strictly after a successful
//!    finalize; a missing artifact is a hard failure, never skipped.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{Result, WriteError},
    file::{data_file_name, num_overlaps_in, OverlapFileReader, OverlapFileWriter},
    writer::StoreWriter,
    Histogram, Overlap, StoreIndex, StoreInfo,
};

/// Destination slice (1-based) of a read id under a range partition of
/// `1..=max_id` into `num_slices` pieces.
#[must_use]
pub fn slice_for_read(a_id: u32, max_id: u32, num_slices: u32) -> u32 {
    debug_assert!(num_slices > 0);
    let piece = u64::from(a_id) * u64::from(num_slices) / (u64::from(max_id) + 1);
    1 + piece.min(u64::from(num_slices) - 1) as u32
}

fn bucket_dir(store: &Path, bucket: u32) -> PathBuf {
    store.join(format!("bucket{bucket:04}"))
}

fn fragment_name(dir: &Path, slice: u32) -> PathBuf {
    dir.join(format!("slice{slice:04}.dat"))
}

fn sizes_name(dir: &Path) -> PathBuf {
    dir.join("sizes")
}

/// Phase 1 worker: partitions raw overlaps into per-slice fragments.
///
/// Each bucketize worker owns its own `bucketNNNN/` directory, so no
/// coordination is needed between workers.
pub struct Bucketizer {
    dir: PathBuf,
    writers: Vec<OverlapFileWriter>,
    max_id: u32,
    num_slices: u32,
}

impl Bucketizer {
    pub fn new(store: &Path, bucket: u32, num_slices: u32, max_id: u32) -> Result<Self> {
        let dir = bucket_dir(store, bucket);
        std::fs::create_dir_all(&dir)?;

        let mut writers = Vec::with_capacity(num_slices as usize);
        for slice in 1..=num_slices {
            writers.push(OverlapFileWriter::create(&fragment_name(&dir, slice))?);
        }
        Ok(Self {
            dir,
            writers,
            max_id,
            num_slices,
        })
    }

    /// Routes one record by its A-read id.
    ///
    /// Callers push both `overlap` and `overlap.reversed()` so the store
    /// answers queries from either read's perspective.
    pub fn push(&mut self, overlap: &Overlap) -> Result<()> {
        let slice = slice_for_read(overlap.a_id, self.max_id, self.num_slices);
        self.writers[(slice - 1) as usize].write_overlap(overlap)
    }

    /// Flushes every fragment and writes the sizes table sorters
    /// preallocate from. Returns the per-slice counts.
    pub fn finish(self) -> Result<Vec<u64>> {
        let mut sizes = Vec::with_capacity(self.writers.len());
        for writer in self.writers {
            sizes.push(writer.finish()?);
        }

        let mut out = File::create(sizes_name(&self.dir)).map(BufWriter::new)?;
        for &count in &sizes {
            out.write_u64::<LittleEndian>(count)?;
        }
        Ok(sizes)
    }
}

/// Phase 2 worker: sorts one slice and writes its artifact.
pub struct SliceSorter {
    store: PathBuf,
    slice: u32,
    num_buckets: u32,
    overlaps: Vec<Overlap>,
}

impl SliceSorter {
    #[must_use]
    pub fn new(store: &Path, slice: u32, num_buckets: u32) -> Self {
        Self {
            store: store.to_path_buf(),
            slice,
            num_buckets,
            overlaps: Vec::new(),
        }
    }

    /// Total overlap count destined for this slice, summed over every
    /// bucket's sizes table.
    pub fn load_bucket_sizes(&self) -> Result<u64> {
        let mut total = 0;
        for bucket in 1..=self.num_buckets {
            total += self.fragment_size(bucket)?;
        }
        Ok(total)
    }

    /// Loads every fragment destined for this slice into one exactly
    /// preallocated buffer. Returns the count loaded.
    pub fn load_overlaps(&mut self) -> Result<u64> {
        let expected = self.load_bucket_sizes()?;
        self.overlaps.clear();
        self.overlaps.reserve_exact(expected as usize);

        for bucket in 1..=self.num_buckets {
            if self.fragment_size(bucket)? == 0 {
                continue;
            }
            let name = fragment_name(&bucket_dir(&self.store, bucket), self.slice);
            if !name.is_file() {
                return Err(WriteError::MissingBucket {
                    bucket,
                    slice: self.slice,
                }
                .into());
            }
            OverlapFileReader::open(&name)?.read_to_end(&mut self.overlaps)?;
        }

        if self.overlaps.len() as u64 != expected {
            return Err(WriteError::SliceCountMismatch {
                slice: self.slice,
                loaded: self.overlaps.len() as u64,
                expected,
            }
            .into());
        }
        Ok(expected)
    }

    /// In-memory sort by `(a_id, b_id)`.
    pub fn sort(&mut self) {
        self.overlaps.sort_unstable_by_key(|ov| (ov.a_id, ov.b_id));
    }

    /// Writes the slice artifact through the sequential writer.
    pub fn write(self) -> Result<StoreInfo> {
        let mut writer = StoreWriter::for_slice(&self.store, self.slice)?;
        for overlap in &self.overlaps {
            writer.write_overlap(overlap)?;
        }
        writer.finish()
    }

    /// Convenience: load, sort, write.
    pub fn run(mut self) -> Result<StoreInfo> {
        self.load_overlaps()?;
        self.sort();
        self.write()
    }

    fn fragment_size(&self, bucket: u32) -> Result<u64> {
        let dir = bucket_dir(&self.store, bucket);
        let name = sizes_name(&dir);
        if !name.is_file() {
            return Err(WriteError::MissingBucket {
                bucket,
                slice: self.slice,
            }
            .into());
        }
        let declared = std::fs::metadata(&name)?.len() / 8;
        if u64::from(self.slice) > declared {
            return Err(WriteError::BucketSizesTruncated {
                bucket,
                slice: self.slice,
            }
            .into());
        }
        let mut inner = File::open(name).map(BufReader::new)?;
        let mut size = 0;
        for _ in 0..self.slice {
            size = inner.read_u64::<LittleEndian>()?;
        }
        Ok(size)
    }
}

/// Phase 3 coordinator: runs once, after every sort worker terminated.
pub struct Merger {
    store: PathBuf,
    num_slices: u32,
}

impl Merger {
    #[must_use]
    pub fn new(store: &Path, num_slices: u32) -> Self {
        Self {
            store: store.to_path_buf(),
            num_slices,
        }
    }

    /// Confirms every expected slice artifact exists before any merging
    /// starts. A worker killed mid-sort leaves its header absent.
    pub fn check_sorting_is_complete(&self) -> Result<()> {
        for slice in 1..=self.num_slices {
            if !StoreInfo::name(&self.store, Some(slice)).is_file() {
                return Err(WriteError::MissingSlice(slice).into());
            }
        }
        Ok(())
    }

    /// Folds the per-slice headers and indexes into the final ones.
    ///
    /// Counts are summed, the id range widened to the union, and every
    /// slice's local overlap ids rebased by the running total of earlier
    /// slices. The resulting header is written but still carries the
    /// incomplete magic; only [`Merger::finalize`] flips it.
    pub fn merge_info_files(&self) -> Result<StoreInfo> {
        let mut info = StoreInfo::default();
        let mut entries = Vec::new();
        let mut running = 0u64;

        for slice in 1..=self.num_slices {
            if !StoreInfo::name(&self.store, Some(slice)).is_file() {
                return Err(WriteError::MissingSlice(slice).into());
            }
            let slice_info = StoreInfo::load(&self.store, Some(slice))?;

            for entry in StoreIndex::load_slice(&self.store, slice)?.entries() {
                let mut entry = *entry;
                entry.overlap_id += running;
                entries.push(entry);
            }

            if slice_info.num_overlaps() > 0 {
                info.record_append(slice_info.smallest_id(), 0);
                info.record_append(slice_info.largest_id(), slice_info.num_overlaps());
            }
            running += slice_info.num_overlaps();
        }

        StoreIndex::from_entries(entries).save(&self.store)?;
        info.save(&self.store, None)?;
        Ok(info)
    }

    /// The analogous associative merge for statistics.
    pub fn merge_histograms(&self) -> Result<Histogram> {
        let mut merged = Histogram::default();
        for slice in 1..=self.num_slices {
            merged.merge(&Histogram::load(&self.store, Some(slice))?);
        }
        merged.save(&self.store, None)?;
        Ok(merged)
    }

    /// Walks the merged index checking every invariant against the header
    /// and the actual data file lengths. With `do_fixes`, repairable
    /// classes are corrected in place and the index rewritten; returns
    /// whether that happened.
    pub fn test_index(&self, do_fixes: bool) -> Result<bool> {
        let info = StoreInfo::load(&self.store, None)?;
        let mut index = StoreIndex::load(&self.store)?;

        let mut file_counts = Vec::with_capacity(self.num_slices as usize);
        for slice in 1..=self.num_slices {
            file_counts.push(num_overlaps_in(&data_file_name(&self.store, slice))?);
        }

        let fixed = index.verify(&info, &file_counts, do_fixes)?;
        if fixed {
            index.save(&self.store)?;
        }
        Ok(fixed)
    }

    /// The single atomic step that makes the store visible to readers.
    pub fn finalize(&self) -> Result<StoreInfo> {
        let mut info = StoreInfo::load(&self.store, None)?;
        info.finalize(&self.store, self.num_slices)?;
        Ok(info)
    }

    /// Deletes one slice's temporaries. The slice's data file is part of
    /// the final store and stays.
    pub fn remove_overlap_slice(&self, slice: u32) -> Result<()> {
        for name in [
            StoreInfo::name(&self.store, Some(slice)),
            crate::file::slice_index_name(&self.store, slice),
            Histogram::name(&self.store, Some(slice)),
        ] {
            if name.is_file() {
                std::fs::remove_file(name)?;
            }
        }
        Ok(())
    }

    /// Deletes every construction temporary: slice headers, indexes,
    /// histograms, and all bucketize directories.
    ///
    /// Must run strictly after [`Merger::finalize`]; removing artifacts
    /// before verification would make a detected corruption unrecoverable.
    pub fn remove_all_intermediate_files(&self) -> Result<()> {
        for slice in 1..=self.num_slices {
            self.remove_overlap_slice(slice)?;
        }
        for entry in std::fs::read_dir(&self.store)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && entry.file_name().to_string_lossy().starts_with("bucket")
            {
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    /// Runs the whole merge phase in order: completeness check, header and
    /// index merge, histogram merge, verification, finalize, cleanup.
    pub fn merge(&self) -> Result<StoreInfo> {
        self.check_sorting_is_complete()?;
        self.merge_info_files()?;
        self.merge_histograms()?;
        self.test_index(false)?;
        let info = self.finalize()?;
        self.remove_all_intermediate_files()?;
        Ok(info)
    }
}
