//! The compression-method abstraction: streaming processors and the
//! registry that maps method numbers to them.
//!
//! A [`DataProcessor`] is a push-style transform: feed it input with
//! [`process`], flush it with [`finish`], and it appends whatever output it
//! produces to the buffer you hand it. The default registries cover method 0
//! (Store, an identity passthrough) and method 8 (raw DEFLATE via flate2);
//! anything else can be registered by callers.
//!
//! [`process`]: DataProcessor::process
//! [`finish`]: DataProcessor::finish

use std::collections::HashMap;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use log::trace;

use crate::result::*;

/// Compression method 0: the file is uncompressed.
pub const METHOD_STORE: u16 = 0;
/// Compression method 8: raw DEFLATE per RFC 1951.
pub const METHOD_DEFLATE: u16 = 8;

/// How much output space to make available per squeeze of the backend.
const OUT_STEP: usize = 32 * 1024;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Store,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with some other format.
    /// (The u16 is the method code from APPNOTE 4.4.5; processors for it
    /// can be registered in a [`CompressionRegistry`].)
    Other(u16),
}

impl CompressionMethod {
    pub fn from_u16(u: u16) -> Self {
        match u {
            METHOD_STORE => CompressionMethod::Store,
            METHOD_DEFLATE => CompressionMethod::Deflate,
            v => CompressionMethod::Other(v),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Store => METHOD_STORE,
            CompressionMethod::Deflate => METHOD_DEFLATE,
            CompressionMethod::Other(v) => v,
        }
    }
}

/// A push-style streaming transform.
///
/// Exactly one `finish` call ends the stream; after it (or after a
/// decompressor sees its end-of-stream marker) `is_finished` reports true
/// and further input is an error.
pub trait DataProcessor {
    /// Consumes all of `input`, appending any bytes produced to `out`.
    ///
    /// Producing nothing is normal — compressors buffer, and an inflater
    /// may need more input before it can emit a single byte.
    fn process(&mut self, input: &[u8], out: &mut Vec<u8>) -> ZipResult<()>;

    /// Signals end of input and appends all remaining output to `out`.
    fn finish(&mut self, out: &mut Vec<u8>) -> ZipResult<()>;

    /// True once the stream has ended, either via [`finish`] or because the
    /// underlying format announced its own end.
    ///
    /// [`finish`]: DataProcessor::finish
    fn is_finished(&self) -> bool;
}

/// Method 0: bytes go in, the same bytes come out.
#[derive(Default)]
pub struct StoreProcessor {
    finished: bool,
}

impl DataProcessor for StoreProcessor {
    fn process(&mut self, input: &[u8], out: &mut Vec<u8>) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::State("processor already finished"));
        }
        out.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<u8>) -> ZipResult<()> {
        self.finished = true;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Method 8, write side: raw DEFLATE compression.
pub struct DeflateProcessor {
    inner: Compress,
    finished: bool,
}

impl DeflateProcessor {
    pub fn new() -> Self {
        Self::with_level(Compression::default())
    }

    pub fn with_level(level: Compression) -> Self {
        Self {
            // No zlib header; ZIP stores raw deflate streams.
            inner: Compress::new(level, false),
            finished: false,
        }
    }
}

impl Default for DeflateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProcessor for DeflateProcessor {
    fn process(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::State("processor already finished"));
        }
        while !input.is_empty() {
            out.reserve(OUT_STEP);
            let before = self.inner.total_in();
            self.inner
                .compress_vec(input, out, FlushCompress::None)
                .map_err(|e| ZipError::Backend(e.to_string()))?;
            let consumed = (self.inner.total_in() - before) as usize;
            input = &input[consumed..];
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> ZipResult<()> {
        while !self.finished {
            out.reserve(OUT_STEP);
            let status = self
                .inner
                .compress_vec(&[], out, FlushCompress::Finish)
                .map_err(|e| ZipError::Backend(e.to_string()))?;
            if status == Status::StreamEnd {
                self.finished = true;
            }
        }
        trace!(
            "deflate finished: {} bytes in, {} bytes out",
            self.inner.total_in(),
            self.inner.total_out()
        );
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Method 8, read side: raw DEFLATE decompression.
///
/// A deflate stream announces its own end, so this can finish before
/// `finish` is called; trailing input past that point is malformed.
pub struct InflateProcessor {
    inner: Decompress,
    finished: bool,
}

impl InflateProcessor {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
            finished: false,
        }
    }
}

impl Default for InflateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProcessor for InflateProcessor {
    fn process(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> ZipResult<()> {
        while !input.is_empty() {
            if self.finished {
                return Err(ZipError::Malformed(
                    "Compressed data continues past the end of the deflate stream",
                ));
            }
            out.reserve(OUT_STEP);
            let before = self.inner.total_in();
            let status = self
                .inner
                .decompress_vec(input, out, FlushDecompress::None)
                .map_err(|e| ZipError::Backend(e.to_string()))?;
            let consumed = (self.inner.total_in() - before) as usize;
            input = &input[consumed..];
            if status == Status::StreamEnd {
                self.finished = true;
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> ZipResult<()> {
        while !self.finished {
            out.reserve(OUT_STEP);
            let before = self.inner.total_out();
            let status = self
                .inner
                .decompress_vec(&[], out, FlushDecompress::Finish)
                .map_err(|e| ZipError::Backend(e.to_string()))?;
            match status {
                Status::StreamEnd => self.finished = true,
                // No input left, no output produced: the stream is cut short.
                _ if self.inner.total_out() == before => {
                    return Err(ZipError::Malformed("Deflate stream is truncated"));
                }
                _ => {}
            }
        }
        trace!(
            "inflate finished: {} bytes in, {} bytes out",
            self.inner.total_in(),
            self.inner.total_out()
        );
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

type ProcessorFactory = Box<dyn Fn() -> Box<dyn DataProcessor>>;

/// Maps numeric compression methods to processor factories.
pub struct CompressionRegistry {
    factories: HashMap<u16, ProcessorFactory>,
}

impl CompressionRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The default read-side registry: Store passthrough and Inflate.
    pub fn decompressors() -> Self {
        let mut registry = Self::empty();
        registry.register(METHOD_STORE, || Box::<StoreProcessor>::default());
        registry.register(METHOD_DEFLATE, || Box::new(InflateProcessor::new()));
        registry
    }

    /// The default write-side registry: Store passthrough and Deflate.
    pub fn compressors() -> Self {
        let mut registry = Self::empty();
        registry.register(METHOD_STORE, || Box::<StoreProcessor>::default());
        registry.register(METHOD_DEFLATE, || Box::new(DeflateProcessor::new()));
        registry
    }

    /// Registers (or replaces) the processor factory for a method.
    pub fn register<F>(&mut self, method: u16, factory: F)
    where
        F: Fn() -> Box<dyn DataProcessor> + 'static,
    {
        self.factories.insert(method, Box::new(factory));
    }

    pub fn contains(&self, method: u16) -> bool {
        self.factories.contains_key(&method)
    }

    /// Builds a fresh processor for the method.
    pub fn processor(&self, method: u16) -> ZipResult<Box<dyn DataProcessor>> {
        self.factories
            .get(&method)
            .map(|factory| factory())
            .ok_or(ZipError::UnsupportedMethod(method))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pump(
        compressor: &mut dyn DataProcessor,
        input: &[u8],
        chunk: usize,
    ) -> ZipResult<Vec<u8>> {
        let mut out = Vec::new();
        for piece in input.chunks(chunk.max(1)) {
            compressor.process(piece, &mut out)?;
        }
        compressor.finish(&mut out)?;
        Ok(out)
    }

    #[test]
    fn store_is_identity() {
        let mut store = StoreProcessor::default();
        let out = pump(&mut store, b"hello world", 3).unwrap();
        assert_eq!(out, b"hello world");
        assert!(store.is_finished());
    }

    #[test]
    fn deflate_then_inflate_round_trips() {
        let input: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();

        let mut deflate = DeflateProcessor::new();
        let compressed = pump(&mut deflate, &input, 7_000).unwrap();
        assert!(compressed.len() < input.len());

        let mut inflate = InflateProcessor::new();
        let output = pump(&mut inflate, &compressed, 512).unwrap();
        assert_eq!(output, input);
        assert!(inflate.is_finished());
    }

    #[test]
    fn inflate_rejects_trailing_garbage() {
        let mut deflate = DeflateProcessor::new();
        let mut compressed = pump(&mut deflate, b"short", 5).unwrap();
        compressed.extend_from_slice(b"garbage");

        let mut inflate = InflateProcessor::new();
        let mut out = Vec::new();
        let result = inflate.process(&compressed, &mut out);
        assert!(matches!(result, Err(ZipError::Malformed(_))));
    }

    #[test]
    fn inflate_reports_truncation() {
        let mut deflate = DeflateProcessor::new();
        let compressed = pump(&mut deflate, &[0xAB; 10_000], 10_000).unwrap();

        let mut inflate = InflateProcessor::new();
        let mut out = Vec::new();
        inflate.process(&compressed[..compressed.len() / 2], &mut out).unwrap();
        assert!(matches!(
            inflate.finish(&mut out),
            Err(ZipError::Malformed(_))
        ));
    }

    #[test]
    fn registry_dispatches_by_method() {
        let registry = CompressionRegistry::decompressors();
        assert!(registry.contains(METHOD_STORE));
        assert!(registry.processor(METHOD_DEFLATE).is_ok());
        assert!(matches!(
            registry.processor(99),
            Err(ZipError::UnsupportedMethod(99))
        ));
    }
}
