//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// A read was requested past the end of the byte source.
    #[error("Read of {length} bytes at offset {offset} exceeds source length {source_length}")]
    OutOfBounds {
        offset: u64,
        length: u64,
        source_length: u64,
    },

    /// No End Of Central Directory Record was found within the scan window.
    #[error("Not a Zip archive: couldn't find End Of Central Directory Record")]
    NotAZip,

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    Malformed(&'static str),

    /// The entry's compression method has no registered processor.
    #[error("No processor registered for compression method {0}")]
    UnsupportedMethod(u16),

    /// The ZIP archive uses an unsupported feature
    /// (encryption, multiple disks, ...).
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedFeature(String),

    /// Decompressed data failed its CRC-32 check.
    #[error("CRC-32 mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    CrcMismatch { declared: u32, computed: u32 },

    /// A full read would exceed the caller's size cap.
    #[error("Entry is {size} bytes, over the caller's cap of {cap}")]
    TooLarge { size: u64, cap: u64 },

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A name or comment can't be encoded as CP437.
    #[error("{0:?} is not representable in CP437; store UTF-8 instead (general purpose bit 11)")]
    EncodingUnsupported(String),

    /// The compression backend reported a failure.
    #[error("Compression backend error: {0}")]
    Backend(String),

    /// An option value was outside its documented domain.
    #[error("Invalid option: {0}")]
    InvalidOption(&'static str),

    /// An operation was invoked in the wrong phase.
    #[error("Operation out of order: {0}")]
    State(&'static str),

    /// A cast from a 64-bit int to a usize failed, probably on a 32-bit system.
    ///
    /// Future work could include a reader that pages records through a smaller
    /// window so 32-bit targets can still walk huge directories.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}
