//! The overlap record and its fixed-width binary encoding.
//!
//! One [`Overlap`] is a directed pairwise alignment between an A-read and a
//! B-read: relative orientation, alignment coordinates on each read, a
//! fixed-point error estimate, and three provenance flags recording which
//! downstream stages the construction filter kept the overlap for.
//!
//! Records are stored identically in memory and on disk (32 bytes each);
//! data files are flat arrays of them in `(a_id, b_id)` order.

use bytemuck::{Pod, Zeroable};

use crate::MAX_EVALUE;

/// B-read aligns to the reverse complement of the A-read
pub const FLAG_FLIPPED: u32 = 1 << 0;

/// Kept for unitig graph construction
pub const FLAG_FOR_ASSEMBLY: u32 = 1 << 1;

/// Kept for overlap-based read trimming
pub const FLAG_FOR_TRIMMING: u32 = 1 << 2;

/// Kept for duplicate read removal
pub const FLAG_FOR_DEDUP: u32 = 1 << 3;

/// Encodes an error rate in `[0, 1]` as a fixed-point evalue.
#[must_use]
pub fn encode_erate(erate: f64) -> u16 {
    (erate.clamp(0.0, 1.0) * f64::from(MAX_EVALUE)).round() as u16
}

/// Decodes a fixed-point evalue back to an error rate.
#[must_use]
pub fn decode_evalue(evalue: u16) -> f64 {
    f64::from(evalue) / f64::from(MAX_EVALUE)
}

/// One directed pairwise alignment between two reads.
///
/// This is stored identically in memory and on disk. Coordinates are
/// always on the forward strand of their read, so reversing a record is a
/// pure swap of the A and B halves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct Overlap {
    /// Id of the read this record is indexed under
    pub a_id: u32,
    /// Id of the other read
    pub b_id: u32,
    /// Orientation and provenance bits
    flags: u32,
    /// Fixed-point error estimate (see [`decode_evalue`])
    pub evalue: u16,
    reserved: u16,
    /// Alignment start on the A-read
    pub a_bgn: u32,
    /// Alignment end on the A-read
    pub a_end: u32,
    /// Alignment start on the B-read
    pub b_bgn: u32,
    /// Alignment end on the B-read
    pub b_end: u32,
}

impl Overlap {
    #[must_use]
    pub fn new(a_id: u32, b_id: u32) -> Self {
        Self {
            a_id,
            b_id,
            ..Self::default()
        }
    }

    /// Sets the alignment coordinates on both reads.
    pub fn set_coords(&mut self, a_bgn: u32, a_end: u32, b_bgn: u32, b_end: u32) {
        self.a_bgn = a_bgn;
        self.a_end = a_end;
        self.b_bgn = b_bgn;
        self.b_end = b_end;
    }

    /// Sets the error estimate from an error rate in `[0, 1]`.
    pub fn set_erate(&mut self, erate: f64) {
        self.evalue = encode_erate(erate);
    }

    /// Returns the error estimate as an error rate.
    #[must_use]
    pub fn erate(&self) -> f64 {
        decode_evalue(self.evalue)
    }

    /// Alignment span on the A-read.
    #[must_use]
    pub fn a_span(&self) -> u32 {
        self.a_end - self.a_bgn
    }

    /// Alignment span on the B-read.
    #[must_use]
    pub fn b_span(&self) -> u32 {
        self.b_end - self.b_bgn
    }

    #[must_use]
    pub fn flipped(&self) -> bool {
        self.flags & FLAG_FLIPPED != 0
    }
    #[must_use]
    pub fn for_assembly(&self) -> bool {
        self.flags & FLAG_FOR_ASSEMBLY != 0
    }
    #[must_use]
    pub fn for_trimming(&self) -> bool {
        self.flags & FLAG_FOR_TRIMMING != 0
    }
    #[must_use]
    pub fn for_dedup(&self) -> bool {
        self.flags & FLAG_FOR_DEDUP != 0
    }

    pub fn set_flipped(&mut self, value: bool) {
        self.set_flag(FLAG_FLIPPED, value);
    }
    pub fn set_for_assembly(&mut self, value: bool) {
        self.set_flag(FLAG_FOR_ASSEMBLY, value);
    }
    pub fn set_for_trimming(&mut self, value: bool) {
        self.set_flag(FLAG_FOR_TRIMMING, value);
    }
    pub fn set_for_dedup(&mut self, value: bool) {
        self.set_flag(FLAG_FOR_DEDUP, value);
    }

    /// Clears all three provenance flags, leaving orientation intact.
    pub fn clear_provenance(&mut self) {
        self.flags &= !(FLAG_FOR_ASSEMBLY | FLAG_FOR_TRIMMING | FLAG_FOR_DEDUP);
    }

    /// Returns whether any provenance flag is set.
    #[must_use]
    pub fn is_kept(&self) -> bool {
        self.flags & (FLAG_FOR_ASSEMBLY | FLAG_FOR_TRIMMING | FLAG_FOR_DEDUP) != 0
    }

    /// Returns the same alignment seen from the B-read's perspective.
    ///
    /// Orientation is symmetric, so the flipped bit carries over; the
    /// provenance flags do not, since each side is filtered on its own.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut rev = *self;
        rev.a_id = self.b_id;
        rev.b_id = self.a_id;
        rev.a_bgn = self.b_bgn;
        rev.a_end = self.b_end;
        rev.b_bgn = self.a_bgn;
        rev.b_end = self.a_end;
        rev.clear_provenance();
        rev
    }

    fn set_flag(&mut self, bit: u32, value: bool) {
        if value {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }
}
