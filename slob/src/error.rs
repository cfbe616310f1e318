//! Error types for slob archive operations

use thiserror::Error;

/// Result type for slob operations
pub type Result<T> = std::result::Result<T, Error>;

/// Slob error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(std::io::Error),

    /// File does not start with the slob magic bytes
    #[error("Unknown file format")]
    UnknownFileFormat,

    /// Declared file size does not match the actual length, or a read ran
    /// past the end of the source
    #[error("Truncated file")]
    TruncatedFile,

    /// Text could not be decoded in the archive's declared encoding
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The archive has been closed
    #[error("Archive is closed")]
    Closed,

    /// Blob id is not of the form `<bin>-<item>`
    #[error("Malformed blob id: {0:?}")]
    BlobIdMalformed(String),

    /// Index is out of range for the list it addresses
    #[error("Index {index} is out of range, must be less than {count}")]
    IndexOutOfRange { index: u64, count: u64 },

    /// The compression name in the header has no registered decompressor
    #[error("Unknown compression: {0:?}")]
    UnknownCompression(String),

    /// Collator construction or sort key generation failed
    #[error("Collation error: {0}")]
    Collation(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        // Reads go through `std::io` adapters, so slob errors raised below
        // them come back wrapped in `std::io::Error`.
        match e.downcast::<Error>() {
            Ok(inner) => inner,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Error::TruncatedFile,
            Err(e) => Error::Io(e),
        }
    }
}
