//! The overlap-acceptance filter applied during store construction.
//!
//! Every raw overlap is evaluated from both of its perspectives (the
//! forward record and the implied reverse) because eligibility is a
//! property of the specific read: an overlap may be worth keeping for
//! trimming read A yet useless for trimming read B. The filter only sets
//! provenance flags and tallies counters; callers decide what to do with
//! records left with no flags at all.

use crate::{decode_evalue, record::Overlap};

/// Per-read eligibility flags supplied by the read-metadata collaborator.
///
/// The store itself never consults read metadata; only the construction
/// filter does, and only through this interface.
pub trait ReadFlags {
    /// Number of reads known to the metadata provider; read ids are
    /// `1..=num_reads()`.
    fn num_reads(&self) -> u32;

    /// Library the read was sequenced from.
    fn library(&self, id: u32) -> u32;

    /// Whether overlap-based trimming was requested for the read.
    fn trimming_requested(&self, id: u32) -> bool;

    /// Whether duplicate removal was requested for the read.
    fn dedup_requested(&self, id: u32) -> bool;
}

/// Run-time policy knobs for the filter.
///
/// These were compile-time constants in older assemblers; whether the
/// asymmetries they encode are intentional biology is an open question, so
/// they stay configurable rather than baked in.
#[derive(Clone, Copy, Debug)]
pub struct FilterPolicy {
    /// Global ceiling on the error rate; overlaps above it are dropped for
    /// every purpose.
    pub max_erate: f64,

    /// Overlaps shorter than this on the read being trimmed carry no
    /// trimming signal.
    pub min_trim_span: u32,

    /// Overlaps at or below this error rate are too similar to inform
    /// trimming (zero disables the check).
    pub min_trim_erate: f64,

    /// Overlaps above this error rate are too dissimilar to witness a
    /// duplicate.
    pub max_dup_erate: f64,

    /// Whether duplicate detection only trusts pairs from the same library.
    pub dup_requires_same_library: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            max_erate: 0.12,
            min_trim_span: 40,
            min_trim_erate: 0.0,
            max_dup_erate: 0.02,
            dup_requires_same_library: true,
        }
    }
}

/// Diagnostic tallies of accept/reject decisions.
///
/// Counters never influence acceptance; they exist so a construction run
/// can report what it threw away. Each overlap side counts once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterCounters {
    pub saved_assembly: u64,
    pub saved_trimming: u64,
    pub saved_dedup: u64,

    pub skipped_erate: u64,

    pub skipped_trim_not_requested: u64,
    pub skipped_trim_short: u64,
    pub skipped_trim_similar: u64,

    pub skipped_dup_not_requested: u64,
    pub skipped_dup_library: u64,
    pub skipped_dup_dissimilar: u64,
}

/// Accept/reject policy applied per overlap while constructing a store.
pub struct OverlapFilter<'a, F: ReadFlags> {
    reads: &'a F,
    policy: FilterPolicy,
    counters: FilterCounters,
}

impl<'a, F: ReadFlags> OverlapFilter<'a, F> {
    pub fn new(reads: &'a F, policy: FilterPolicy) -> Self {
        Self {
            reads,
            policy,
            counters: FilterCounters::default(),
        }
    }

    /// Evaluates one raw overlap from both perspectives.
    ///
    /// `forward` is the record as computed; `reverse` is its mirror (see
    /// [`Overlap::reversed`]). Each side gets its own provenance flags.
    pub fn filter(&mut self, forward: &mut Overlap, reverse: &mut Overlap) {
        self.filter_side(forward);
        self.filter_side(reverse);
    }

    fn filter_side(&mut self, overlap: &mut Overlap) {
        overlap.clear_provenance();

        let erate = decode_evalue(overlap.evalue);
        if erate > self.policy.max_erate {
            self.counters.skipped_erate += 1;
            return;
        }

        // Everything under the error ceiling feeds the unitig graph.
        overlap.set_for_assembly(true);
        self.counters.saved_assembly += 1;

        let a_id = overlap.a_id;

        if !self.reads.trimming_requested(a_id) {
            self.counters.skipped_trim_not_requested += 1;
        } else if overlap.a_span() < self.policy.min_trim_span {
            self.counters.skipped_trim_short += 1;
        } else if erate <= self.policy.min_trim_erate {
            self.counters.skipped_trim_similar += 1;
        } else {
            overlap.set_for_trimming(true);
            self.counters.saved_trimming += 1;
        }

        if !self.reads.dedup_requested(a_id) {
            self.counters.skipped_dup_not_requested += 1;
        } else if self.policy.dup_requires_same_library
            && self.reads.library(a_id) != self.reads.library(overlap.b_id)
        {
            self.counters.skipped_dup_library += 1;
        } else if erate > self.policy.max_dup_erate {
            self.counters.skipped_dup_dissimilar += 1;
        } else {
            overlap.set_for_dedup(true);
            self.counters.saved_dedup += 1;
        }
    }

    #[must_use]
    pub fn counters(&self) -> &FilterCounters {
        &self.counters
    }

    /// Zeroes the counters at the start of a construction run.
    pub fn reset_counters(&mut self) {
        self.counters = FilterCounters::default();
    }

    #[must_use]
    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::encode_erate;

    /// Fixed-table metadata provider for tests.
    struct TestFlags {
        libraries: Vec<u32>,
        trim: Vec<bool>,
        dedup: Vec<bool>,
    }

    impl ReadFlags for TestFlags {
        fn num_reads(&self) -> u32 {
            self.libraries.len() as u32
        }
        fn library(&self, id: u32) -> u32 {
            self.libraries[(id - 1) as usize]
        }
        fn trimming_requested(&self, id: u32) -> bool {
            self.trim[(id - 1) as usize]
        }
        fn dedup_requested(&self, id: u32) -> bool {
            self.dedup[(id - 1) as usize]
        }
    }

    fn flags() -> TestFlags {
        TestFlags {
            libraries: vec![1, 1, 2],
            trim: vec![true, false, true],
            dedup: vec![true, true, true],
        }
    }

    fn overlap(a_id: u32, b_id: u32, erate: f64, span: u32) -> Overlap {
        let mut ov = Overlap::new(a_id, b_id);
        ov.set_coords(0, span, 0, span);
        ov.evalue = encode_erate(erate);
        ov
    }

    #[test]
    fn test_erate_ceiling_rejects_both_sides() {
        let reads = flags();
        let mut filter = OverlapFilter::new(&reads, FilterPolicy::default());

        let mut fwd = overlap(1, 2, 0.5, 500);
        let mut rev = fwd.reversed();
        filter.filter(&mut fwd, &mut rev);

        assert!(!fwd.is_kept());
        assert!(!rev.is_kept());
        assert_eq!(filter.counters().skipped_erate, 2);
        assert_eq!(filter.counters().saved_assembly, 0);
    }

    #[test]
    fn test_sides_decided_independently() {
        let reads = flags();
        let mut filter = OverlapFilter::new(&reads, FilterPolicy::default());

        // Trimming requested for read 1 but not read 2.
        let mut fwd = overlap(1, 2, 0.05, 500);
        let mut rev = fwd.reversed();
        filter.filter(&mut fwd, &mut rev);

        assert!(fwd.for_assembly() && rev.for_assembly());
        assert!(fwd.for_trimming());
        assert!(!rev.for_trimming());
        assert_eq!(filter.counters().saved_trimming, 1);
        assert_eq!(filter.counters().skipped_trim_not_requested, 1);
    }

    #[test]
    fn test_trim_span_and_similarity_checks() {
        let reads = flags();
        let policy = FilterPolicy {
            min_trim_erate: 0.01,
            ..FilterPolicy::default()
        };
        let mut filter = OverlapFilter::new(&reads, policy);

        let mut short = overlap(1, 2, 0.05, 20);
        let mut rev = short.reversed();
        filter.filter(&mut short, &mut rev);
        assert!(!short.for_trimming());
        assert_eq!(filter.counters().skipped_trim_short, 1);

        let mut similar = overlap(1, 2, 0.005, 500);
        let mut rev = similar.reversed();
        filter.filter(&mut similar, &mut rev);
        assert!(!similar.for_trimming());
        assert_eq!(filter.counters().skipped_trim_similar, 1);
    }

    #[test]
    fn test_dedup_library_and_similarity_checks() {
        let reads = flags();
        let mut filter = OverlapFilter::new(&reads, FilterPolicy::default());

        // Reads 1 and 2 share a library; a near-identical overlap is a dup.
        let mut fwd = overlap(1, 2, 0.01, 500);
        let mut rev = fwd.reversed();
        filter.filter(&mut fwd, &mut rev);
        assert!(fwd.for_dedup() && rev.for_dedup());

        // Reads 1 and 3 do not share a library.
        let mut fwd = overlap(1, 3, 0.01, 500);
        let mut rev = fwd.reversed();
        filter.filter(&mut fwd, &mut rev);
        assert!(!fwd.for_dedup() && !rev.for_dedup());
        assert_eq!(filter.counters().skipped_dup_library, 2);

        // Same library but too dissimilar to witness a duplicate.
        let mut fwd = overlap(1, 2, 0.08, 500);
        let mut rev = fwd.reversed();
        filter.filter(&mut fwd, &mut rev);
        assert!(!fwd.for_dedup());
        assert_eq!(filter.counters().skipped_dup_dissimilar, 2);
    }

    #[test]
    fn test_counter_accounting_per_side() {
        let reads = flags();
        let mut filter = OverlapFilter::new(&reads, FilterPolicy::default());

        for b in [2u32, 3] {
            let mut fwd = overlap(1, b, 0.05, 500);
            let mut rev = fwd.reversed();
            filter.filter(&mut fwd, &mut rev);
        }

        let c = filter.counters();
        // Every side under the error ceiling lands in the assembly tally,
        // and every side resolves to exactly one trim and one dup outcome.
        assert_eq!(c.saved_assembly, 4);
        assert_eq!(
            c.saved_trimming + c.skipped_trim_not_requested + c.skipped_trim_short
                + c.skipped_trim_similar,
            4
        );
        assert_eq!(
            c.saved_dedup + c.skipped_dup_not_requested + c.skipped_dup_library
                + c.skipped_dup_dissimilar,
            4
        );

        filter.reset_counters();
        assert_eq!(*filter.counters(), FilterCounters::default());
    }
}
