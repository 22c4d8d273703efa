use std::path::PathBuf;

/// Custom Result type for overlap store operations, wrapping the custom
/// [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the ovstore library, encompassing all possible
/// error cases that can occur while constructing or querying a store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to the store header
    #[error("Error processing store header: {0}")]
    Header(#[from] HeaderError),

    /// Errors related to the per-read index
    #[error("Error processing store index: {0}")]
    Index(#[from] IndexError),

    /// Errors that occur during store construction
    #[error("Error writing store: {0}")]
    Write(#[from] WriteError),

    /// Errors that occur while querying a store
    #[error("Error reading store: {0}")]
    Read(#[from] ReadError),

    /// Errors related to the evalue overlay
    #[error("Error processing evalue overlay: {0}")]
    Overlay(#[from] OverlayError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    Io(#[from] std::io::Error),
}
impl Error {
    /// Checks whether the error is the "store under construction" case.
    ///
    /// This distinguishes a store whose header carries the incomplete
    /// magic (construction has not finished, or a build died before the
    /// merge) from a store in an unrecognized or wrong format.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Header(HeaderError::Incomplete(_)))
    }

    /// Checks whether the error means the path holds no store at all.
    #[must_use]
    pub fn is_not_a_store(&self) -> bool {
        matches!(self, Self::Header(HeaderError::NotAStore(_)))
    }
}

/// Errors specific to loading and validating the store header
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The directory has no `info` file and is not an overlap store
    #[error("directory '{0}' is not an overlap store; missing its info file")]
    NotAStore(PathBuf),

    /// The header carries the incomplete magic; construction never finished
    #[error("store '{0}' is still under construction; its header was never finalized")]
    Incomplete(PathBuf),

    /// The magic number in the header matches neither the complete nor the
    /// incomplete constant
    #[error("Invalid store magic number: {0:#018x}")]
    BadMagic(u64),

    /// The store was written by a different format version
    #[error("Store version {found} is incompatible with this reader (version {expected})")]
    VersionMismatch { found: u64, expected: u64 },

    /// The store encodes records with a different width than this reader
    #[error("Store record width {found} does not match the compiled-in width {expected}")]
    WidthMismatch { found: u64, expected: u64 },
}

/// Index invariant violations, raised by verification and by loading
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The store directory has no `index` file
    #[error("store '{0}' has no index file")]
    MissingIndex(PathBuf),

    /// The index file length is not a whole number of entries
    #[error("Index file length ({0} bytes) is not a whole number of entries")]
    Truncated(u64),

    /// Adjacent entries are not strictly ascending by A-read id
    #[error("Index ids out of order: {prev} followed by {next}")]
    IdsOutOfOrder { prev: u32, next: u32 },

    /// An entry's id falls outside the header's id range
    #[error("Index id {a_id} outside the header id range [{smallest}, {largest}]")]
    IdOutOfBounds {
        a_id: u32,
        smallest: u32,
        largest: u32,
    },

    /// An entry references a data file the header does not account for
    #[error("Index entry for read {a_id} references data file {file_index} of {num_files}")]
    FileOutOfBounds {
        a_id: u32,
        file_index: u32,
        num_files: u32,
    },

    /// An entry's block extends past the end of its data file
    #[error(
        "Block for read {a_id} (offset {offset}, {num_overlaps} overlaps) exceeds data file length ({file_len} overlaps)"
    )]
    BlockOutOfBounds {
        a_id: u32,
        offset: u32,
        num_overlaps: u32,
        file_len: u64,
    },

    /// The running global overlap id does not continue across entries
    #[error("Overlap id discontinuity at read {a_id}: found {found}, expected {expected}")]
    Discontinuity { a_id: u32, found: u64, expected: u64 },

    /// The sum of entry counts disagrees with the header's total
    #[error("Index accounts for {indexed} overlaps but the header claims {expected}")]
    CountMismatch { indexed: u64, expected: u64 },
}

/// Errors that can occur while constructing a store
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Overlaps must arrive sorted by `(a_id, b_id)`
    #[error(
        "Overlap ({a_id}, {b_id}) arrived after ({prev_a}, {prev_b}); writer input must be sorted"
    )]
    UnsortedOverlap {
        a_id: u32,
        b_id: u32,
        prev_a: u32,
        prev_b: u32,
    },

    /// The configured data file rotation limit cannot be addressed by the
    /// index offset field
    #[error("File limit {0} exceeds the addressable records per data file")]
    InvalidFileLimit(u64),

    /// A sort worker could not find an expected bucketize artifact
    #[error("Bucket {bucket} holds no fragment for slice {slice}")]
    MissingBucket { bucket: u32, slice: u32 },

    /// A bucket's sizes table does not cover the requested slice
    #[error("Sizes table of bucket {bucket} does not cover slice {slice}")]
    BucketSizesTruncated { bucket: u32, slice: u32 },

    /// A slice's bucket fragments disagree with the declared sizes
    #[error("Slice {slice} loaded {loaded} overlaps but the bucket sizes declared {expected}")]
    SliceCountMismatch {
        slice: u32,
        loaded: u64,
        expected: u64,
    },

    /// The merge step could not find an expected per-slice artifact
    #[error("Slice {0} has no artifact to merge; its sort worker never completed")]
    MissingSlice(u32),
}

/// Errors that can occur while querying a completed store
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// A range restriction with `low > high`
    #[error("Invalid range specified: low ({low}) is greater than high ({high})")]
    InvalidRange { low: u32, high: u32 },

    /// A data file's length is not a whole number of records
    #[error("Data file length ({0} bytes) is not a whole number of overlap records")]
    Truncated(u64),

    /// A partial record at the end of a data file
    #[error("Partial overlap record at end of data file ({0} bytes)")]
    PartialRecord(usize),

    /// The index promised more records than the data file holds
    #[error("Data file {file_index} ended before the indexed block was read")]
    UnexpectedEndOfData { file_index: u32 },
}

/// Errors related to the evalue overlay
#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    /// The supplied corrections disagree with the range's overlap count
    #[error("Supplied {supplied} corrected evalues for a range holding {expected} overlaps")]
    SizeMismatch { supplied: u64, expected: u64 },

    /// The overlay file length disagrees with the header's overlap count
    #[error("Overlay file is {bytes} bytes but the store holds {expected} overlaps")]
    LengthMismatch { bytes: u64, expected: u64 },

    /// A correction range addresses overlap ids past the end of the store
    #[error("Correction range [{first}, {first}+{count}) exceeds overlay length {len}")]
    RangeOutOfBounds { first: u64, count: u64, len: u64 },
}
