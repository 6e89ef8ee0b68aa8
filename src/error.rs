/// Custom Result type for alnseq operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the alnseq library, encompassing all possible error cases
/// that can occur while writing, reading, merging or piling up alignment archives.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to archive header processing
    HeaderError(#[from] HeaderError),
    /// Errors related to the chunked entries stream
    ChunkError(#[from] ChunkError),
    /// Errors related to the position index
    IndexError(#[from] IndexError),
    /// Errors that occur during read operations
    ReadError(#[from] ReadError),
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Errors raised while combining several archives
    MergeError(#[from] MergeError),
    /// Errors raised by the pileup pipeline
    PipelineError(#[from] PipelineError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// UTF-8 encoding/decoding errors
    Utf8Error(#[from] std::string::FromUtf8Error),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}
impl Error {
    /// Checks if the error is an index that could not be used for seeking
    ///
    /// Readers treat such archives as unindexed and fall back to a linear scan.
    #[must_use]
    pub fn is_index_unavailable(&self) -> bool {
        matches!(
            self,
            Self::IndexError(IndexError::Missing(_) | IndexError::Empty)
                | Self::ReadError(ReadError::NotIndexed)
        )
    }

    /// Checks if the error reports a truncated or corrupt chunk
    #[must_use]
    pub fn is_corrupt_chunk(&self) -> bool {
        matches!(
            self,
            Self::ChunkError(
                ChunkError::Truncated { .. }
                    | ChunkError::UnknownCodec(_)
                    | ChunkError::MissingDelimiter(_)
                    | ChunkError::MalformedRecord(_)
                    | ChunkError::MalformedPayload { .. }
            )
        )
    }
}

/// Errors specific to processing and validating archive headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic number in the header does not match the expected value
    ///
    /// # Arguments
    /// * `[u8; 4]` - The invalid magic bytes that were found
    #[error("Invalid magic number: {0:?}")]
    InvalidMagicNumber([u8; 4]),

    /// The format version in the header is not supported
    #[error("Invalid format version: {0}")]
    InvalidFormatVersion(u8),

    /// The header body ended before all declared fields were read
    #[error("Header is truncated at byte {0}")]
    Truncated(usize),

    /// A query length was requested for a query outside the stored range
    #[error("Query index {0} has no stored length")]
    MissingQueryLength(u32),
}

/// Errors raised while framing or unframing chunks of the entries stream
#[derive(thiserror::Error, Debug)]
pub enum ChunkError {
    /// The chunk declares more bytes than remain in the stream
    ///
    /// # Fields
    /// * `offset` - Byte offset of the chunk start
    /// * `expected` - Payload length declared in the chunk
    /// * `available` - Bytes actually remaining
    #[error("Chunk at byte {offset} declares {expected} bytes but only {available} remain")]
    Truncated {
        offset: usize,
        expected: usize,
        available: usize,
    },

    /// The chunk codec byte is not recognised
    #[error("Unknown chunk codec code: {0}")]
    UnknownCodec(u8),

    /// The delimiter preceding the chunk length is missing
    #[error("Missing chunk delimiter at byte {0}")]
    MissingDelimiter(usize),

    /// A record inside a decoded chunk payload is malformed
    #[error("Malformed record payload at byte {0} of the chunk")]
    MalformedRecord(usize),

    /// A record's compressed fields carry a known codec code but cannot be decoded
    #[error("Compressed fields of query {query_index} (codec {code}) are malformed")]
    MalformedPayload { code: u8, query_index: u32 },
}

/// Errors related to the position index
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The magic number of the index file is invalid
    #[error("Invalid magic number: {0:?}")]
    InvalidMagicNumber([u8; 4]),

    /// The index file does not exist next to the entries
    #[error("Index file is missing: {0}")]
    Missing(String),

    /// The index holds no chunk boundaries
    #[error("Index holds no entries")]
    Empty,

    /// The offsets and absolute positions arrays differ in length
    #[error("Index arrays differ in length: {offsets} offsets, {positions} positions")]
    LengthMismatch { offsets: usize, positions: usize },

    /// The synthetic positions are not sorted ascending
    #[error("Index positions decrease at entry {0}")]
    Unsorted(usize),

    /// A target index exceeds the number of target lengths the index was built with
    #[error("Target index {0} is out of range ({1} targets)")]
    TargetOutOfRange(u32, usize),
}

/// Errors that can occur while reading alignment archives
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The path is not a regular file (e.g., it might be a directory or special file)
    #[error("File is not regular: {0}")]
    IncompatibleFile(String),

    /// A length or identifier accessor was used before the header was loaded
    #[error("Header must be loaded before accessing {0}")]
    HeaderNotLoaded(&'static str),

    /// A random-access operation was requested on an archive without a usable index
    #[error("Archive is not sorted and indexed; random access is unsupported")]
    NotIndexed,

    /// The reader was closed
    #[error("Reader is closed")]
    Closed,
}

/// Errors that can occur while writing alignment archives
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A sequence variation violates the equal-length/no-double-gap invariants
    #[error("Invalid sequence variation at position {position}: {reason}")]
    InvalidVariation { position: u32, reason: &'static str },

    /// The writer has already been finished
    #[error("Writer is already closed")]
    Closed,

    /// A length-prefixed record field exceeds what its prefix can hold
    #[error("Field {field} holds {len} bytes, more than its length prefix allows")]
    FieldTooLong { field: &'static str, len: usize },

    /// Attempted to build a writer without a basename
    #[error("Missing basename in writer builder")]
    MissingBasename,
}

/// Errors raised while concatenating or merging archives
#[derive(thiserror::Error, Debug)]
pub enum MergeError {
    /// At least one archive is required
    #[error("No input archives were provided")]
    NoInputs,

    /// The inputs do not share a reference
    ///
    /// # Fields
    /// * `basename` - The archive that disagrees with the first input
    /// * `expected` - Target count of the first input
    /// * `found` - Target count of `basename`
    #[error("Archive {basename} has {found} targets, expected {expected}")]
    TargetMismatch {
        basename: String,
        expected: usize,
        found: usize,
    },

    /// Renumbered query indices of an archive no longer fit in a `u32`
    #[error("Query indices of {basename} overflow after renumbering")]
    QueryIndexOverflow { basename: String },
}

/// Errors raised by the pileup/genotype pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The alignment stream went backwards
    #[error("Input is not sorted: ({target}, {position}) follows ({last_target}, {last_position})")]
    UnsortedInput {
        target: u32,
        position: u32,
        last_target: u32,
        last_position: u32,
    },

    /// A record carries a sample index beyond the configured number of samples
    #[error("Sample index {0} exceeds the {1} configured samples")]
    SampleOutOfRange(usize, usize),
}
