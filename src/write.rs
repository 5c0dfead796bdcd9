//! Tools for writing a ZIP archive.
//!
//! The writer is pull-based: it's constructed over a factory that hands out
//! [`EntrySource`]s on demand, and [`ZipWriter::next_chunk`] produces the
//! archive as a lazy sequence of byte chunks. Nothing is buffered beyond a
//! soft chunk target plus whatever the central directory snapshots cost
//! (a few dozen bytes per entry), so arbitrarily large archives can be
//! streamed to wherever the chunks go.
//!
//! Per-entry CRC-32 and sizes are computed on the fly. Entries fed from a
//! plain byte producer go through the compression registry and get their
//! real numbers in a trailing data descriptor; entries copied raw from
//! another archive (the merger's bread and butter) declare their numbers up
//! front and skip both recompression and the descriptor.

use std::io::Read;

use chrono::NaiveDateTime;
use crc32fast::Hasher;
use log::*;

use crate::compress::{CompressionMethod, CompressionRegistry, DataProcessor};
use crate::extra;
use crate::result::*;
use crate::spec;
use crate::text;

/// Soft threshold: `next_chunk` returns once this much output accumulates.
const CHUNK_TARGET: usize = 64 * 1024;
/// Default block size for [`ReadEntryData`].
const DATA_BLOCK: usize = 64 * 1024;

/// Archive-level write options.
#[derive(Default)]
pub struct WriteOptions {
    force_zip64: bool,
    comment: Vec<u8>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit Zip64 records for every entry and for the archive itself,
    /// whether or not the sizes call for them.
    pub fn force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    /// The archive comment, stored in the end of central directory record.
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// A producer of one entry's bytes, pulled in demand order.
pub trait EntryData {
    /// The next block of bytes, or `None` at the end.
    /// Blocks may be any non-zero size the producer likes.
    fn next_block(&mut self) -> ZipResult<Option<Vec<u8>>>;
}

/// Adapts any [`std::io::Read`] into an [`EntryData`].
pub struct ReadEntryData<R> {
    inner: R,
    block_size: usize,
}

impl<R: Read> ReadEntryData<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block_size: DATA_BLOCK,
        }
    }

    pub fn with_block_size(inner: R, block_size: usize) -> Self {
        Self {
            inner,
            block_size: block_size.max(1),
        }
    }
}

impl<R: Read> EntryData for ReadEntryData<R> {
    fn next_block(&mut self) -> ZipResult<Option<Vec<u8>>> {
        let mut block = vec![0u8; self.block_size];
        let count = self.inner.read(&mut block)?;
        if count == 0 {
            return Ok(None);
        }
        block.truncate(count);
        Ok(Some(block))
    }
}

/// Per-entry write options.
///
/// Everything except the file name has a sensible default; the builder
/// methods mirror the option names.
pub struct EntryOptions {
    file_name: String,
    file_comment: String,
    compression_method: CompressionMethod,
    mod_time: Option<NaiveDateTime>,
    ac_time: Option<NaiveDateTime>,
    cr_time: Option<NaiveDateTime>,
    force_zip64: bool,
    force_utf8_file_name: bool,
    unicode_file_name_field: bool,
    unicode_comment_field: bool,
    extended_timestamp_field: bool,
    min_made_by_version: u16,
    min_extraction_version: u16,
    internal_file_attributes: u16,
    external_file_attributes: u32,
    data_processors: Option<CompressionRegistry>,
}

impl EntryOptions {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_comment: String::new(),
            compression_method: CompressionMethod::Deflate,
            mod_time: None,
            ac_time: None,
            cr_time: None,
            force_zip64: false,
            force_utf8_file_name: false,
            unicode_file_name_field: false,
            unicode_comment_field: false,
            extended_timestamp_field: true,
            min_made_by_version: spec::VERSION_DEFAULT,
            min_extraction_version: spec::VERSION_DEFAULT,
            internal_file_attributes: 0,
            external_file_attributes: 0,
            data_processors: None,
        }
    }

    pub fn file_comment(mut self, comment: impl Into<String>) -> Self {
        self.file_comment = comment.into();
        self
    }

    /// Compression method for the entry's payload. Defaults to Deflate.
    /// Ignored for raw entries, which keep their stored method.
    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    /// Modification time, stored as DOS time and (by default) in an
    /// extended timestamp field. Without it the entry gets the DOS epoch,
    /// 1980-01-01.
    pub fn mod_time(mut self, moment: NaiveDateTime) -> Self {
        self.mod_time = Some(moment);
        self
    }

    /// Access time; stored only in the local header's extended timestamp.
    pub fn ac_time(mut self, moment: NaiveDateTime) -> Self {
        self.ac_time = Some(moment);
        self
    }

    /// Creation time; stored only in the local header's extended timestamp.
    pub fn cr_time(mut self, moment: NaiveDateTime) -> Self {
        self.cr_time = Some(moment);
        self
    }

    /// Emit Zip64 records for this entry regardless of its size.
    /// Required up front for streamed entries that may pass 4 GiB, since a
    /// classic data descriptor can't be widened after the fact.
    pub fn force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    /// Store the name (and comment) as UTF-8 with general purpose bit 11,
    /// instead of CP437.
    pub fn force_utf8_file_name(mut self, force: bool) -> Self {
        self.force_utf8_file_name = force;
        self
    }

    /// Also emit an Info-ZIP Unicode Path field when the name is stored
    /// as CP437 but isn't plain ASCII.
    pub fn unicode_file_name_field(mut self, emit: bool) -> Self {
        self.unicode_file_name_field = emit;
        self
    }

    /// Also emit an Info-ZIP Unicode Comment field when the comment is
    /// stored as CP437 but isn't plain ASCII.
    pub fn unicode_comment_field(mut self, emit: bool) -> Self {
        self.unicode_comment_field = emit;
        self
    }

    /// Emit an extended timestamp field carrying the times given above.
    /// On by default; does nothing when no times are set.
    pub fn extended_timestamp_field(mut self, emit: bool) -> Self {
        self.extended_timestamp_field = emit;
        self
    }

    /// Floor for the "version made by" field's version number.
    pub fn min_made_by_version(mut self, version: u16) -> Self {
        self.min_made_by_version = version;
        self
    }

    /// Floor for the "version needed to extract" field.
    pub fn min_extraction_version(mut self, version: u16) -> Self {
        self.min_extraction_version = version;
        self
    }

    pub fn internal_file_attributes(mut self, attributes: u16) -> Self {
        self.internal_file_attributes = attributes;
        self
    }

    pub fn external_file_attributes(mut self, attributes: u32) -> Self {
        self.external_file_attributes = attributes;
        self
    }

    /// Replaces the write-side compression registry for this entry
    /// (default: Store and Deflate).
    pub fn data_processors(mut self, registry: CompressionRegistry) -> Self {
        self.data_processors = Some(registry);
        self
    }
}

/// The numbers a raw (already-compressed) entry declares up front.
///
/// The writer trusts these: it copies the payload verbatim, verifies only
/// that the byte count matches `compressed_size`, and records the declared
/// CRC and sizes in the entry's headers.
#[derive(Debug, Clone)]
pub struct RawEntryInfo {
    /// The method the payload was originally compressed with.
    pub compression_method: u16,
    /// CRC-32 of the (original) uncompressed bytes.
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Extra fields to carry into the central directory record, verbatim.
    /// Strip any Zip64 field first; the writer regenerates those.
    pub extra_field: Vec<u8>,
}

/// One entry to be written: options plus a byte producer.
pub struct EntrySource<'a> {
    options: EntryOptions,
    payload: SourcePayload<'a>,
}

enum SourcePayload<'a> {
    /// Uncompressed bytes; the writer compresses and checksums them.
    Data(Box<dyn EntryData + 'a>),
    /// Already-compressed bytes copied verbatim.
    Raw {
        info: RawEntryInfo,
        data: Box<dyn EntryData + 'a>,
    },
}

impl<'a> EntrySource<'a> {
    /// An entry fed from uncompressed bytes, to be compressed with the
    /// options' method (Deflate unless told otherwise).
    pub fn from_data(options: EntryOptions, data: impl EntryData + 'a) -> Self {
        Self {
            options,
            payload: SourcePayload::Data(Box::new(data)),
        }
    }

    /// An entry whose already-compressed payload is copied verbatim.
    ///
    /// The declared method, CRC, and sizes are authoritative; any
    /// `compression_method` in the options is ignored.
    pub fn raw(options: EntryOptions, info: RawEntryInfo, data: impl EntryData + 'a) -> Self {
        Self {
            options,
            payload: SourcePayload::Raw {
                info,
                data: Box::new(data),
            },
        }
    }
}

/// The stateful producer driving a [`ZipWriter`]: called once per entry,
/// returns `None` when the archive is complete.
pub type EntryFactory<'a> = Box<dyn FnMut() -> ZipResult<Option<EntrySource<'a>>> + 'a>;

/// What the central directory will say about a completed entry.
/// Captured the moment its payload ends, before the next entry begins.
struct CentralSnapshot {
    made_by_version: u16,
    extraction_version: u16,
    flags: u16,
    compression_method: u16,
    dos_time: u16,
    dos_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    header_offset: u64,
    internal_file_attributes: u16,
    external_file_attributes: u32,
    name: Vec<u8>,
    comment: Vec<u8>,
    zip64: bool,
    timestamp: extra::ExtendedTimestamp,
    emit_timestamp: bool,
    unicode_name_field: Option<Vec<u8>>,
    unicode_comment_field: Option<Vec<u8>>,
    preserved_extra: Vec<u8>,
}

enum ActivePayload<'a> {
    Data {
        data: Box<dyn EntryData + 'a>,
        processor: Box<dyn DataProcessor>,
    },
    Raw {
        data: Box<dyn EntryData + 'a>,
        declared: RawEntryInfo,
    },
}

/// Per-entry writer state: Idle → LocalHeader → Payload → DataDescriptor →
/// Recorded, with the running counters the descriptor and snapshot need.
struct ActiveEntry<'a> {
    payload: ActivePayload<'a>,
    hasher: Hasher,
    compressed_size: u64,
    uncompressed_size: u64,
    /// Bit 3 mode: sizes unknown up front, data descriptor follows payload.
    streaming: bool,
    snapshot: CentralSnapshot,
}

enum Phase {
    Entries,
    CentralDirectory {
        next: usize,
        directory_start: u64,
    },
    Trailer {
        directory_start: u64,
        directory_size: u64,
    },
    Done,
}

/// Generator for ZIP archives.
///
/// Pull chunks until `None`:
///
/// ```no_run
/// # use zipflow::write::*;
/// # use zipflow::result::ZipResult;
/// # fn entries() -> ZipResult<Option<EntrySource<'static>>> { Ok(None) }
/// let mut writer = ZipWriter::new(Box::new(entries), WriteOptions::new())?;
/// while let Some(chunk) = writer.next_chunk()? {
///     // hand `chunk` to a file, a socket, ...
/// }
/// # Ok::<(), zipflow::result::ZipError>(())
/// ```
pub struct ZipWriter<'a> {
    factory: EntryFactory<'a>,
    force_zip64: bool,
    comment: Vec<u8>,
    /// Bytes emitted so far, counting those still sitting in `pending`.
    offset: u64,
    pending: Vec<u8>,
    central: Vec<CentralSnapshot>,
    current: Option<ActiveEntry<'a>>,
    phase: Phase,
    poisoned: bool,
}

impl<'a> ZipWriter<'a> {
    pub fn new(factory: EntryFactory<'a>, options: WriteOptions) -> ZipResult<Self> {
        if options.comment.len() > u16::MAX as usize {
            return Err(ZipError::InvalidOption(
                "archive comment is longer than 65535 bytes",
            ));
        }
        Ok(Self {
            factory,
            force_zip64: options.force_zip64,
            comment: options.comment,
            offset: 0,
            pending: Vec::with_capacity(2 * CHUNK_TARGET),
            central: Vec::new(),
            current: None,
            phase: Phase::Entries,
            poisoned: false,
        })
    }

    /// The next chunk of archive bytes, or `None` once the archive is
    /// complete. Chunks are non-empty and arrive in order; concatenating
    /// them yields the archive.
    ///
    /// An error leaves the writer unusable; bytes already returned are the
    /// caller's to keep or discard.
    pub fn next_chunk(&mut self) -> ZipResult<Option<Vec<u8>>> {
        if self.poisoned {
            return Err(ZipError::State(
                "the writer is unusable after an earlier error",
            ));
        }
        match self.pump() {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn pump(&mut self) -> ZipResult<Option<Vec<u8>>> {
        loop {
            if self.pending.len() >= CHUNK_TARGET {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            match self.phase {
                Phase::Entries => {
                    if self.current.is_some() {
                        self.step_payload()?;
                    } else if let Some(source) = (self.factory)()? {
                        self.start_entry(source)?;
                    } else {
                        debug!("All entries written; starting central directory");
                        self.phase = Phase::CentralDirectory {
                            next: 0,
                            directory_start: self.offset,
                        };
                    }
                }
                Phase::CentralDirectory {
                    next,
                    directory_start,
                } => {
                    if next < self.central.len() {
                        self.emit_central_record(next)?;
                        self.phase = Phase::CentralDirectory {
                            next: next + 1,
                            directory_start,
                        };
                    } else {
                        self.phase = Phase::Trailer {
                            directory_start,
                            directory_size: self.offset - directory_start,
                        };
                    }
                }
                Phase::Trailer {
                    directory_start,
                    directory_size,
                } => {
                    self.emit_trailer(directory_start, directory_size)?;
                    self.phase = Phase::Done;
                }
                Phase::Done => {
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
            }
        }
    }

    /// Emits the local header for the next entry and readies its payload.
    fn start_entry(&mut self, source: EntrySource<'a>) -> ZipResult<()> {
        let EntrySource { options, payload } = source;

        if options.file_name.is_empty() {
            return Err(ZipError::InvalidOption("file name must not be empty"));
        }
        let name = text::encode(&options.file_name, options.force_utf8_file_name)?;
        if name.bytes.len() > u16::MAX as usize {
            return Err(ZipError::InvalidOption(
                "file name is longer than 65535 bytes",
            ));
        }
        // The comment shares the entry's encoding: bit 11 covers both.
        let comment = text::encode(&options.file_comment, name.utf8)?;
        if comment.bytes.len() > u16::MAX as usize {
            return Err(ZipError::InvalidOption(
                "file comment is longer than 65535 bytes",
            ));
        }

        let header_offset = self.offset;
        let (raw_info, streaming) = match &payload {
            SourcePayload::Data(_) => (None, true),
            SourcePayload::Raw { info, .. } => (Some(info.clone()), false),
        };

        let zip64 = options.force_zip64
            || self.force_zip64
            || header_offset > spec::ZIP64_BYTES_LIMIT
            || raw_info.as_ref().map_or(false, |info| {
                info.compressed_size > spec::ZIP64_BYTES_LIMIT
                    || info.uncompressed_size > spec::ZIP64_BYTES_LIMIT
            });

        let extraction_version = options
            .min_extraction_version
            .max(if zip64 {
                spec::VERSION_ZIP64
            } else {
                spec::VERSION_DEFAULT
            });
        let made_by_version =
            spec::MADE_BY_UNIX | options.min_made_by_version.max(extraction_version);

        let mut flags = 0u16;
        if name.utf8 {
            flags |= spec::FLAG_UTF8;
        }
        if streaming {
            flags |= spec::FLAG_DATA_DESCRIPTOR;
        }

        let moment = options
            .mod_time
            .unwrap_or_else(|| spec::parse_msdos(0, 0));
        let (dos_time, dos_date) = spec::to_msdos(moment);

        let timestamp = extra::ExtendedTimestamp {
            mtime: options.mod_time.map(|t| t.and_utc().timestamp()),
            atime: options.ac_time.map(|t| t.and_utc().timestamp()),
            ctime: options.cr_time.map(|t| t.and_utc().timestamp()),
        };

        let unicode_name_field =
            if options.unicode_file_name_field && !name.utf8 && !options.file_name.is_ascii() {
                Some(extra::unicode_field(
                    extra::UNICODE_PATH_TAG,
                    &name.bytes,
                    &options.file_name,
                )?)
            } else {
                None
            };
        let unicode_comment_field = if options.unicode_comment_field
            && !comment.utf8
            && !options.file_comment.is_ascii()
        {
            Some(extra::unicode_field(
                extra::UNICODE_COMMENT_TAG,
                &comment.bytes,
                &options.file_comment,
            )?)
        } else {
            None
        };

        // Assemble the local header's extra fields.
        let mut local_extra = Vec::new();
        if zip64 {
            // With a data descriptor coming, the real sizes aren't known
            // yet; the field still has to exist to announce the 8-byte
            // descriptor. Raw entries know their numbers now.
            let (uncompressed, compressed) = match &raw_info {
                Some(info) => (info.uncompressed_size, info.compressed_size),
                None => (0, 0),
            };
            local_extra.extend_from_slice(&extra::zip64_field(
                Some(uncompressed),
                Some(compressed),
                None,
            )?);
        }
        if options.extended_timestamp_field {
            if let Some(field) = extra::extended_timestamp_field(timestamp, true)? {
                local_extra.extend_from_slice(&field);
            }
        }
        if let Some(field) = &unicode_name_field {
            local_extra.extend_from_slice(field);
        }
        if local_extra.len() > u16::MAX as usize {
            return Err(ZipError::InvalidOption(
                "extra fields are longer than 65535 bytes",
            ));
        }

        // Classic size/CRC fields: Zip64 entries advertise the sentinel,
        // streaming entries leave zeros for the data descriptor to fill.
        let (crc32, classic_compressed, classic_uncompressed) = match (&raw_info, zip64) {
            (Some(info), true) => (info.crc32, spec::ZIP64_SENTINEL_U32, spec::ZIP64_SENTINEL_U32),
            (Some(info), false) => (
                info.crc32,
                info.compressed_size as u32,
                info.uncompressed_size as u32,
            ),
            (None, true) => (0, spec::ZIP64_SENTINEL_U32, spec::ZIP64_SENTINEL_U32),
            (None, false) => (0, 0, 0),
        };

        let compression_method = match &raw_info {
            Some(info) => info.compression_method,
            None => options.compression_method.to_u16(),
        };

        debug!(
            "Starting entry {} at offset {header_offset} (method {compression_method}, zip64: {zip64})",
            options.file_name
        );
        let before = self.pending.len();
        spec::write_local_file_header(
            &mut self.pending,
            &spec::LocalHeaderFields {
                extraction_version,
                flags,
                compression_method,
                last_modified_time: dos_time,
                last_modified_date: dos_date,
                crc32,
                compressed_size: classic_compressed,
                uncompressed_size: classic_uncompressed,
                name: &name.bytes,
                extra_field: &local_extra,
            },
        )?;
        self.offset += (self.pending.len() - before) as u64;

        let snapshot = CentralSnapshot {
            made_by_version,
            extraction_version,
            flags,
            compression_method,
            dos_time,
            dos_date,
            crc32,
            compressed_size: raw_info.as_ref().map_or(0, |info| info.compressed_size),
            uncompressed_size: raw_info.as_ref().map_or(0, |info| info.uncompressed_size),
            header_offset,
            internal_file_attributes: options.internal_file_attributes,
            external_file_attributes: options.external_file_attributes,
            name: name.bytes,
            comment: comment.bytes,
            zip64,
            timestamp,
            emit_timestamp: options.extended_timestamp_field,
            unicode_name_field,
            unicode_comment_field,
            preserved_extra: raw_info
                .as_ref()
                .map_or_else(Vec::new, |info| info.extra_field.clone()),
        };

        let payload = match payload {
            SourcePayload::Data(data) => {
                let registry;
                let processors = match &options.data_processors {
                    Some(custom) => custom,
                    None => {
                        registry = CompressionRegistry::compressors();
                        &registry
                    }
                };
                ActivePayload::Data {
                    data,
                    processor: processors.processor(compression_method)?,
                }
            }
            SourcePayload::Raw { info, data } => ActivePayload::Raw {
                data,
                declared: info,
            },
        };

        self.current = Some(ActiveEntry {
            payload,
            hasher: Hasher::new(),
            compressed_size: 0,
            uncompressed_size: 0,
            streaming,
            snapshot,
        });
        Ok(())
    }

    /// Pumps one block of the current entry's payload, or wraps the entry
    /// up (data descriptor, central snapshot) when the producer runs dry.
    fn step_payload(&mut self) -> ZipResult<()> {
        let Some(mut entry) = self.current.take() else {
            return Ok(());
        };
        let before = self.pending.len();
        let mut finished = false;

        match &mut entry.payload {
            ActivePayload::Data { data, processor } => match data.next_block()? {
                Some(block) => {
                    entry.hasher.update(&block);
                    entry.uncompressed_size += block.len() as u64;
                    processor.process(&block, &mut self.pending)?;
                    entry.compressed_size += (self.pending.len() - before) as u64;
                }
                None => {
                    processor.finish(&mut self.pending)?;
                    entry.compressed_size += (self.pending.len() - before) as u64;
                    entry.snapshot.crc32 = entry.hasher.clone().finalize();
                    entry.snapshot.compressed_size = entry.compressed_size;
                    entry.snapshot.uncompressed_size = entry.uncompressed_size;
                    if !entry.snapshot.zip64
                        && (entry.compressed_size > spec::ZIP64_BYTES_LIMIT
                            || entry.uncompressed_size > spec::ZIP64_BYTES_LIMIT)
                    {
                        return Err(ZipError::InvalidOption(
                            "entry grew past 4 GiB; it needs force_zip64 set before writing starts",
                        ));
                    }
                    finished = true;
                }
            },
            ActivePayload::Raw { data, declared } => match data.next_block()? {
                Some(block) => {
                    entry.compressed_size += block.len() as u64;
                    if entry.compressed_size > declared.compressed_size {
                        return Err(ZipError::Malformed(
                            "Raw payload is longer than its declared compressed size",
                        ));
                    }
                    self.pending.extend_from_slice(&block);
                }
                None => {
                    if entry.compressed_size != declared.compressed_size {
                        return Err(ZipError::Malformed(
                            "Raw payload is shorter than its declared compressed size",
                        ));
                    }
                    finished = true;
                }
            },
        }
        self.offset += (self.pending.len() - before) as u64;

        if !finished {
            self.current = Some(entry);
            return Ok(());
        }

        if entry.streaming {
            let before = self.pending.len();
            spec::write_data_descriptor(
                &mut self.pending,
                entry.snapshot.crc32,
                entry.snapshot.compressed_size,
                entry.snapshot.uncompressed_size,
                entry.snapshot.zip64,
            )?;
            self.offset += (self.pending.len() - before) as u64;
        }
        trace!(
            "Recorded entry at offset {}: {} bytes compressed, {} uncompressed",
            entry.snapshot.header_offset,
            entry.snapshot.compressed_size,
            entry.snapshot.uncompressed_size,
        );
        self.central.push(entry.snapshot);
        Ok(())
    }

    /// Emits one central directory file header from its snapshot.
    fn emit_central_record(&mut self, index: usize) -> ZipResult<()> {
        let snapshot = &self.central[index];

        let mut central_extra = Vec::new();
        if snapshot.zip64 {
            central_extra.extend_from_slice(&extra::zip64_field(
                Some(snapshot.uncompressed_size),
                Some(snapshot.compressed_size),
                Some(snapshot.header_offset),
            )?);
        }
        if snapshot.emit_timestamp {
            if let Some(field) = extra::extended_timestamp_field(snapshot.timestamp, false)? {
                central_extra.extend_from_slice(&field);
            }
        }
        if let Some(field) = &snapshot.unicode_name_field {
            central_extra.extend_from_slice(field);
        }
        if let Some(field) = &snapshot.unicode_comment_field {
            central_extra.extend_from_slice(field);
        }
        central_extra.extend_from_slice(&snapshot.preserved_extra);
        if central_extra.len() > u16::MAX as usize {
            return Err(ZipError::InvalidOption(
                "extra fields are longer than 65535 bytes",
            ));
        }

        let (compressed, uncompressed, header_offset) = if snapshot.zip64 {
            (
                spec::ZIP64_SENTINEL_U32,
                spec::ZIP64_SENTINEL_U32,
                spec::ZIP64_SENTINEL_U32,
            )
        } else {
            (
                snapshot.compressed_size as u32,
                snapshot.uncompressed_size as u32,
                snapshot.header_offset as u32,
            )
        };

        let before = self.pending.len();
        spec::write_central_directory_header(
            &mut self.pending,
            &spec::CentralHeaderFields {
                made_by_version: snapshot.made_by_version,
                extraction_version: snapshot.extraction_version,
                flags: snapshot.flags,
                compression_method: snapshot.compression_method,
                last_modified_time: snapshot.dos_time,
                last_modified_date: snapshot.dos_date,
                crc32: snapshot.crc32,
                compressed_size: compressed,
                uncompressed_size: uncompressed,
                internal_file_attributes: snapshot.internal_file_attributes,
                external_file_attributes: snapshot.external_file_attributes,
                header_offset,
                name: &snapshot.name,
                extra_field: &central_extra,
                file_comment: &snapshot.comment,
            },
        )?;
        self.offset += (self.pending.len() - before) as u64;
        Ok(())
    }

    /// Emits the archive trailer: Zip64 EOCDR and locator when called for,
    /// then the classic EOCDR.
    fn emit_trailer(&mut self, directory_start: u64, directory_size: u64) -> ZipResult<()> {
        let entries = self.central.len() as u64;
        let zip64 = self.force_zip64
            || entries > spec::ZIP64_ENTRY_LIMIT
            || directory_size > spec::ZIP64_BYTES_LIMIT
            || directory_start > spec::ZIP64_BYTES_LIMIT;

        let before = self.pending.len();
        if zip64 {
            let zip64_eocdr_offset = self.offset;
            spec::write_zip64_eocdr(&mut self.pending, entries, directory_size, directory_start)?;
            spec::write_zip64_eocdr_locator(&mut self.pending, zip64_eocdr_offset)?;
        }
        spec::write_eocdr(
            &mut self.pending,
            entries,
            directory_size,
            directory_start,
            &self.comment,
        )?;
        self.offset += (self.pending.len() - before) as u64;
        debug!(
            "Archive complete: {entries} entries, {} bytes (zip64: {zip64})",
            self.offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn drain(writer: &mut ZipWriter) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(chunk) = writer.next_chunk().unwrap() {
            assert!(!chunk.is_empty(), "chunks must be non-empty");
            bytes.extend_from_slice(&chunk);
        }
        // The end sentinel is sticky.
        assert!(writer.next_chunk().unwrap().is_none());
        bytes
    }

    #[test]
    fn write_empty_zip() {
        let mut writer = ZipWriter::new(
            Box::new(|| Ok(None)),
            WriteOptions::new().comment("ZIP"),
        )
        .unwrap();
        let result = drain(&mut writer);
        assert_eq!(result.len(), 25);
        assert_eq!(
            result,
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 90, 73, 80]
        );
    }

    #[test]
    fn streaming_entry_gets_a_data_descriptor() {
        let mut served = false;
        let mut writer = ZipWriter::new(
            Box::new(move || {
                if served {
                    return Ok(None);
                }
                served = true;
                Ok(Some(EntrySource::from_data(
                    EntryOptions::new("my_test")
                        .compression_method(CompressionMethod::Store)
                        .extended_timestamp_field(false),
                    ReadEntryData::new(&b"Sedm lumpu slohlo pumpu"[..]),
                )))
            }),
            WriteOptions::new(),
        )
        .unwrap();
        let result = drain(&mut writer);

        let read_u16 = |posit: usize| u16::from_le_bytes([result[posit], result[posit + 1]]);
        let read_u32 = |posit: usize| {
            u32::from_le_bytes([
                result[posit],
                result[posit + 1],
                result[posit + 2],
                result[posit + 3],
            ])
        };
        // Bit 3 set, local sizes and CRC left zero...
        assert_ne!(read_u16(6) & 0x08, 0);
        assert_eq!(read_u32(14), 0);
        assert_eq!(read_u32(18), 0);
        assert_eq!(read_u32(22), 0);
        // ...with a signed data descriptor after the 23 payload bytes.
        let descriptor_start = 30 + 7 + 23;
        assert_eq!(&result[descriptor_start..descriptor_start + 4], b"PK\x07\x08");
        assert_ne!(read_u32(descriptor_start + 4), 0);
        assert_eq!(read_u32(descriptor_start + 8), 23);
        assert_eq!(read_u32(descriptor_start + 12), 23);
    }

    #[test]
    fn oversized_comment_is_rejected() {
        let result = ZipWriter::new(
            Box::new(|| Ok(None)),
            WriteOptions::new().comment(vec![b'x'; 70_000]),
        );
        assert!(matches!(result, Err(ZipError::InvalidOption(_))));
    }

    #[test]
    fn empty_file_name_is_rejected() {
        let mut writer = ZipWriter::new(
            Box::new(|| {
                Ok(Some(EntrySource::from_data(
                    EntryOptions::new(""),
                    ReadEntryData::new(&b""[..]),
                )))
            }),
            WriteOptions::new(),
        )
        .unwrap();
        assert!(matches!(
            writer.next_chunk(),
            Err(ZipError::InvalidOption(_))
        ));
        // A failed writer stays failed.
        assert!(matches!(writer.next_chunk(), Err(ZipError::State(_))));
    }
}
