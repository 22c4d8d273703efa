//! Aggregate statistics collected while a store is written.
//!
//! Both writers feed one histogram per output; the merge step folds the
//! per-slice histograms into the final `hist` file. Merging is associative
//! and commutative, so slice completion order never changes the result.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{error::Result, Overlap};

/// Number of evalue buckets (1024 evalues each).
pub const ERATE_BUCKETS: usize = 64;

/// Number of log2 length buckets.
pub const LENGTH_BUCKETS: usize = 64;

/// Per-bucket counts of the error and length distributions of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    erate: Vec<u64>,
    length: Vec<u64>,
    num_recorded: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            erate: vec![0; ERATE_BUCKETS],
            length: vec![0; LENGTH_BUCKETS],
            num_recorded: 0,
        }
    }
}

impl Histogram {
    /// Path of the histogram file: `hist`, or `NNNN.hist` for a slice.
    #[must_use]
    pub fn name(store: &Path, slice: Option<u32>) -> PathBuf {
        match slice {
            Some(slice) => store.join(format!("{slice:04}.hist")),
            None => store.join("hist"),
        }
    }

    /// Tallies one overlap.
    pub fn record(&mut self, overlap: &Overlap) {
        let eb = (overlap.evalue as usize) >> 10;
        self.erate[eb.min(ERATE_BUCKETS - 1)] += 1;

        let span = overlap.a_span();
        let lb = if span == 0 { 0 } else { span.ilog2() as usize };
        self.length[lb.min(LENGTH_BUCKETS - 1)] += 1;

        self.num_recorded += 1;
    }

    /// Folds another histogram into this one.
    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.erate.iter_mut().zip(&other.erate) {
            *a += b;
        }
        for (a, b) in self.length.iter_mut().zip(&other.length) {
            *a += b;
        }
        self.num_recorded += other.num_recorded;
    }

    pub fn save(&self, store: &Path, slice: Option<u32>) -> Result<()> {
        let mut out = File::create(Self::name(store, slice)).map(BufWriter::new)?;
        out.write_u64::<LittleEndian>(self.num_recorded)?;
        for &count in self.erate.iter().chain(&self.length) {
            out.write_u64::<LittleEndian>(count)?;
        }
        Ok(())
    }

    pub fn load(store: &Path, slice: Option<u32>) -> Result<Self> {
        let mut inner = File::open(Self::name(store, slice)).map(BufReader::new)?;
        let mut hist = Self {
            num_recorded: inner.read_u64::<LittleEndian>()?,
            ..Self::default()
        };
        for count in hist.erate.iter_mut().chain(hist.length.iter_mut()) {
            *count = inner.read_u64::<LittleEndian>()?;
        }
        Ok(hist)
    }

    #[must_use]
    pub fn num_recorded(&self) -> u64 {
        self.num_recorded
    }

    #[must_use]
    pub fn erate_buckets(&self) -> &[u64] {
        &self.erate
    }

    #[must_use]
    pub fn length_buckets(&self) -> &[u64] {
        &self.length
    }

    /// Highest populated erate bucket; `None` for an empty histogram.
    #[must_use]
    pub fn max_erate_bucket(&self) -> Option<usize> {
        self.erate.iter().rposition(|&count| count > 0)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::encode_erate;

    fn overlap(erate: f64, span: u32) -> Overlap {
        let mut ov = Overlap::new(1, 2);
        ov.set_coords(0, span, 0, span);
        ov.evalue = encode_erate(erate);
        ov
    }

    #[test]
    fn test_record_buckets() {
        let mut hist = Histogram::default();
        hist.record(&overlap(0.0, 1000));
        hist.record(&overlap(1.0, 1000));
        hist.record(&overlap(0.5, 0));

        assert_eq!(hist.num_recorded(), 3);
        assert_eq!(hist.erate_buckets()[0], 1);
        assert_eq!(hist.erate_buckets()[ERATE_BUCKETS - 1], 1);
        assert_eq!(hist.erate_buckets()[31] + hist.erate_buckets()[32], 1);
        assert_eq!(hist.length_buckets()[0], 1);
        assert_eq!(hist.length_buckets()[9], 2);
        assert_eq!(hist.max_erate_bucket(), Some(ERATE_BUCKETS - 1));
    }

    #[test]
    fn test_merge_is_associative_and_commutative() {
        let mut a = Histogram::default();
        let mut b = Histogram::default();
        let mut c = Histogram::default();
        a.record(&overlap(0.01, 500));
        b.record(&overlap(0.20, 900));
        b.record(&overlap(0.02, 50));
        c.record(&overlap(0.99, 8000));

        // (a + b) + c
        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        // c + (b + a)
        let mut inner = b.clone();
        inner.merge(&a);
        let mut right = c.clone();
        right.merge(&inner);

        assert_eq!(left, right);
        assert_eq!(left.num_recorded(), 4);
    }

    #[test]
    fn test_save_load_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut hist = Histogram::default();
        hist.record(&overlap(0.05, 750));
        hist.record(&overlap(0.10, 320));

        hist.save(dir.path(), None)?;
        assert_eq!(Histogram::load(dir.path(), None)?, hist);

        hist.save(dir.path(), Some(4))?;
        assert!(dir.path().join("0004.hist").is_file());
        assert_eq!(Histogram::load(dir.path(), Some(4))?, hist);
        Ok(())
    }

    #[test]
    fn test_empty_histogram() {
        let hist = Histogram::default();
        assert_eq!(hist.num_recorded(), 0);
        assert_eq!(hist.max_erate_bucket(), None);
    }
}
