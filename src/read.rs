//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, create a [`ZipArchive`] over a
//! [`ByteSource`]. Construction locates the End of central directory record
//! (and its Zip64 companions, if any); after that, [`ZipArchive::entries`]
//! walks the central directory lazily through a bounded sliding buffer, so
//! an archive with tens of thousands of entries never needs its whole
//! directory in memory at once.
//!
//! [`ByteSource`]: crate::source::ByteSource

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::NaiveDateTime;
use crc32fast::Hasher;
use log::*;
use memchr::memmem;

use crate::compress::{CompressionMethod, CompressionRegistry, DataProcessor};
use crate::extra;
use crate::result::*;
use crate::source::ByteSource;
use crate::spec;
use crate::text;

/// How many compressed bytes an [`EntryDataReader`] consumes per
/// `Iterator::next` call, and the default block size for full reads.
const READ_CHUNK: usize = 64 * 1024;

/// ZIP offsets and sizes are 64-bit, but buffer math happens in `usize`.
/// A size that doesn't fit the address space (only possible on 32-bit
/// targets) is an error, not a silent truncation.
fn in_memory_size(size: u64) -> ZipResult<usize> {
    usize::try_from(size).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// Options for opening an archive.
#[derive(Default)]
pub struct ReadOptions {
    cd_buffer_size: Option<usize>,
    create_entry_index: bool,
    data_processors: Option<CompressionRegistry>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the sliding buffer used to walk the central directory.
    ///
    /// Defaults to 64 KiB. The buffer grows past this only when a single
    /// record (name + extra + comment) doesn't fit. Zero is rejected.
    pub fn cd_buffer_size(mut self, bytes: usize) -> Self {
        self.cd_buffer_size = Some(bytes);
        self
    }

    /// Build a name → entry index on the first lookup, making subsequent
    /// [`ZipArchive::find`] calls O(1) on average. Costs one full directory
    /// walk plus a decoded name per entry.
    pub fn create_entry_index(mut self, create: bool) -> Self {
        self.create_entry_index = create;
        self
    }

    /// Replaces the read-side compression registry
    /// (default: Store and Deflate).
    pub fn data_processors(mut self, registry: CompressionRegistry) -> Self {
        self.data_processors = Some(registry);
        self
    }
}

/// Where the central directory lives, per the (Zip64) EOCDR.
#[derive(Debug)]
struct DirectoryLocation {
    /// Bytes of unknown data prepended to the archive (self-extracting
    /// archives put an executable here). All nominal offsets are relative
    /// to the end of it.
    archive_offset: u64,
    /// Nominal offset of the central directory.
    cd_offset: u64,
    cd_size: u64,
    entry_count: u64,
    comment: Vec<u8>,
    zip64: bool,
}

/// A ZIP archive to be read
pub struct ZipArchive<S> {
    source: S,
    location: DirectoryLocation,
    buffer_size: usize,
    indexed: bool,
    processors: CompressionRegistry,
    /// Decoded name → absolute offset of the central directory record.
    /// Built on the first `find` when indexing is enabled.
    index: RefCell<Option<HashMap<String, u64>>>,
}

impl<S: ByteSource> ZipArchive<S> {
    /// Opens an archive with default options, performing EOCDR discovery.
    pub fn new(source: S) -> ZipResult<Self> {
        Self::with_options(source, ReadOptions::default())
    }

    pub fn with_options(source: S, options: ReadOptions) -> ZipResult<Self> {
        let buffer_size = options.cd_buffer_size.unwrap_or(READ_CHUNK);
        if buffer_size == 0 {
            return Err(ZipError::InvalidOption(
                "cd_buffer_size must be a positive number of bytes",
            ));
        }
        let location = locate_directory(&source)?;
        trace!("{:?}", location);
        Ok(Self {
            source,
            location,
            buffer_size,
            indexed: options.create_entry_index,
            processors: options
                .data_processors
                .unwrap_or_else(CompressionRegistry::decompressors),
            index: RefCell::new(None),
        })
    }

    /// Total number of entries, per the end of central directory record.
    pub fn entry_count(&self) -> u64 {
        self.location.entry_count
    }

    /// The archive comment, raw. (ZIP doesn't say how it's encoded;
    /// it's usually ASCII.)
    pub fn comment(&self) -> &[u8] {
        &self.location.comment
    }

    /// True if directory location came from a Zip64 EOCDR.
    pub fn is_zip64(&self) -> bool {
        self.location.zip64
    }

    /// Bytes of unknown data found ahead of the archive proper.
    pub fn prepended_bytes(&self) -> u64 {
        self.location.archive_offset
    }

    /// Iterates the entries in central directory order.
    ///
    /// Records are parsed one at a time out of a sliding buffer;
    /// nothing is cached between iterations.
    pub fn entries(&self) -> Entries<'_, S> {
        Entries {
            records: RecordIter::new(self),
        }
    }

    /// Collects every entry into a `Vec`.
    ///
    /// Handy for small archives; for an archive with tens of thousands of
    /// entries, prefer [`entries`](Self::entries) and stream.
    pub fn all_entries(&self) -> ZipResult<Vec<Entry>> {
        self.entries().collect()
    }

    /// Finds an entry by decoded file name.
    ///
    /// With [`ReadOptions::create_entry_index`] the first call builds an
    /// index and later calls are O(1) average; without it, each call streams
    /// the directory until the first match. For duplicate names (ZIP allows
    /// them) the first occurrence wins either way.
    pub fn find(&self, name: &str) -> ZipResult<Option<Entry>> {
        if self.indexed {
            self.ensure_index()?;
            let index = self.index.borrow();
            let offset = index.as_ref().and_then(|map| map.get(name)).copied();
            return match offset {
                Some(offset) => Ok(Some(self.record_at(offset)?)),
                None => Ok(None),
            };
        }
        for entry in self.entries() {
            let entry = entry?;
            if entry.file_name()? == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Reads an entire entry into memory, decompressed.
    ///
    /// `size_cap` guards against both huge declared sizes and lying
    /// metadata: the read fails with [`ZipError::TooLarge`] rather than
    /// materialize more than `size_cap` bytes.
    pub fn read_all(&self, entry: &Entry, size_cap: u64) -> ZipResult<Vec<u8>> {
        if entry.uncompressed_size > size_cap {
            return Err(ZipError::TooLarge {
                size: entry.uncompressed_size,
                cap: size_cap,
            });
        }
        let mut reader = self.reader(entry)?;
        let mut bytes = Vec::with_capacity(in_memory_size(entry.uncompressed_size)?);
        while let Some(block) = reader.read(READ_CHUNK)? {
            bytes.extend_from_slice(&block);
            if bytes.len() as u64 > size_cap {
                return Err(ZipError::TooLarge {
                    size: bytes.len() as u64,
                    cap: size_cap,
                });
            }
        }
        Ok(bytes)
    }

    /// Opens a chunked, decompressing reader over an entry.
    pub fn reader(&self, entry: &Entry) -> ZipResult<EntryDataReader<'_>> {
        if entry.is_encrypted() {
            return Err(ZipError::UnsupportedFeature(format!(
                "Can't read encrypted file {}",
                String::from_utf8_lossy(&entry.name_raw)
            )));
        }
        let processor = self.processors.processor(entry.compression_method.to_u16())?;
        let payload_start = self.payload_start(entry)?;
        debug!(
            "Reading {} ({} bytes compressed with method {:?})",
            String::from_utf8_lossy(&entry.name_raw),
            entry.compressed_size,
            entry.compression_method,
        );
        Ok(EntryDataReader {
            source: &self.source,
            processor,
            next_offset: payload_start,
            remaining: entry.compressed_size,
            declared_crc: entry.crc32,
            hasher: Hasher::new(),
            input_done: false,
            finished: false,
        })
    }

    /// Opens a reader over an entry's compressed payload, verbatim.
    ///
    /// This is how the merger copies entries without recompressing them:
    /// the bytes come back exactly as stored, whatever the method.
    pub fn raw_reader(&self, entry: &Entry) -> ZipResult<RawEntryReader<'_>> {
        let payload_start = self.payload_start(entry)?;
        Ok(RawEntryReader {
            source: &self.source,
            next_offset: payload_start,
            remaining: entry.compressed_size,
        })
    }

    /// Parses the entry's local file header and cross-checks it against the
    /// central directory record, returning the payload's absolute offset.
    ///
    /// The central directory stays authoritative for sizes and the CRC; the
    /// local header is only trusted to locate the payload.
    fn payload_start(&self, entry: &Entry) -> ZipResult<u64> {
        let header_posit = self.location.archive_offset + entry.header_offset;
        let fixed = self
            .source
            .read_vec(header_posit, spec::LOCAL_HEADER_FIXED_SIZE)?;
        let local = spec::LocalFileHeader::parse(&fixed)?;
        trace!("{:?}", local);
        if local.name_length as usize != entry.name_raw.len() {
            return Err(ZipError::Malformed(
                "Central directory entry doesn't match local file header",
            ));
        }
        Ok(header_posit + local.payload_offset())
    }

    fn ensure_index(&self) -> ZipResult<()> {
        if self.index.borrow().is_some() {
            return Ok(());
        }
        debug!("Indexing {} entries by name", self.location.entry_count);
        let mut map = HashMap::new();
        let mut records = RecordIter::new(self);
        while let Some(record) = records.next_record() {
            let (offset, record) = record?;
            let entry = Entry::from_record(record)?;
            map.entry(entry.file_name()?).or_insert(offset);
        }
        *self.index.borrow_mut() = Some(map);
        Ok(())
    }

    /// Re-parses the single central directory record at an absolute offset.
    fn record_at(&self, offset: u64) -> ZipResult<Entry> {
        let fixed = self
            .source
            .read_vec(offset, spec::CENTRAL_HEADER_FIXED_SIZE)?;
        let total = spec::CentralDirectoryRecord::size_in_file(&fixed)?;
        let bytes = self.source.read_vec(offset, total)?;
        let mut slice = &bytes[..];
        Entry::from_record(spec::CentralDirectoryRecord::parse_and_consume(&mut slice)?)
    }
}

/// Locates the EOCDR (scanning backwards over at most the classic record
/// plus a maximal comment) and, when present, the Zip64 records.
fn locate_directory<S: ByteSource>(source: &S) -> ZipResult<DirectoryLocation> {
    let source_length = source.len();
    let window_length = source_length.min(spec::EOCDR_SEARCH_WINDOW as u64);
    let window_start = source_length - window_length;
    let window = source.read_vec(window_start, in_memory_size(window_length)?)?;

    let eocdr_posit = window_start + spec::find_eocdr(&window)? as u64;
    let eocdr = spec::EndOfCentralDirectory::parse(
        &window[in_memory_size(eocdr_posit - window_start)?..],
    )?;
    trace!("{:?}", eocdr);

    if eocdr.disk_number != eocdr.disk_with_central_directory {
        return Err(ZipError::UnsupportedFeature(format!(
            "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
            eocdr.disk_number, eocdr.disk_with_central_directory
        )));
    }
    if eocdr.entries != eocdr.entries_on_this_disk {
        return Err(ZipError::UnsupportedFeature(format!(
            "No support for multi-disk archives: entries ({}) != entries this disk ({})",
            eocdr.entries, eocdr.entries_on_this_disk
        )));
    }

    let locator = if eocdr_posit >= spec::ZIP64_EOCDR_LOCATOR_SIZE as u64 {
        let locator_bytes = source.read_vec(
            eocdr_posit - spec::ZIP64_EOCDR_LOCATOR_SIZE as u64,
            spec::ZIP64_EOCDR_LOCATOR_SIZE,
        )?;
        spec::Zip64EndOfCentralDirectoryLocator::parse(&locator_bytes)
    } else {
        None
    };

    if let Some(locator) = locator {
        trace!("{:?}", locator);
        if eocdr.disk_number as u32 != locator.disk_with_central_directory {
            return Err(ZipError::UnsupportedFeature(format!(
                "No support for multi-disk archives: disk ({}) != disk with zip64 central directory ({})",
                eocdr.disk_number, locator.disk_with_central_directory
            )));
        }
        if locator.disks != 1 {
            return Err(ZipError::UnsupportedFeature(format!(
                "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                locator.disks
            )));
        }

        // Search for the Zip64 EOCDR from its nominal offset forward;
        // anything between the two is prepended junk.
        let search_end = eocdr_posit - spec::ZIP64_EOCDR_LOCATOR_SIZE as u64;
        let zip64_eocdr_posit =
            find_zip64_eocdr(source, locator.zip64_eocdr_offset, search_end)?;
        let archive_offset = zip64_eocdr_posit - locator.zip64_eocdr_offset;
        let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(
            &source.read_vec(zip64_eocdr_posit, spec::ZIP64_EOCDR_FIXED_SIZE)?,
        )?;
        trace!("{:?}", zip64_eocdr);

        if zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk {
            return Err(ZipError::UnsupportedFeature(format!(
                "No support for multi-disk archives: entries ({}) != entries this disk ({})",
                zip64_eocdr.entries, zip64_eocdr.entries_on_this_disk
            )));
        }

        check_directory_bounds(
            archive_offset,
            zip64_eocdr.central_directory_offset,
            zip64_eocdr.central_directory_size,
            zip64_eocdr_posit,
        )?;

        Ok(DirectoryLocation {
            archive_offset,
            cd_offset: zip64_eocdr.central_directory_offset,
            cd_size: zip64_eocdr.central_directory_size,
            entry_count: zip64_eocdr.entries,
            comment: eocdr.file_comment,
            zip64: true,
        })
    } else {
        if eocdr.needs_zip64() {
            return Err(ZipError::Malformed(
                "EOCDR carries Zip64 sentinel values but no Zip64 locator precedes it",
            ));
        }
        // The archive offset is the actual central directory position
        // versus the stored one.
        let cd_size = eocdr.central_directory_size as u64;
        let cd_offset = eocdr.central_directory_offset as u64;
        let archive_offset = eocdr_posit
            .checked_sub(cd_size)
            .and_then(|posit| posit.checked_sub(cd_offset))
            .ok_or(ZipError::Malformed(
                "Invalid central directory size or offset",
            ))?;

        Ok(DirectoryLocation {
            archive_offset,
            cd_offset,
            cd_size,
            entry_count: eocdr.entries as u64,
            comment: eocdr.file_comment,
            zip64: false,
        })
    }
}

fn check_directory_bounds(
    archive_offset: u64,
    cd_offset: u64,
    cd_size: u64,
    directory_end: u64,
) -> ZipResult<()> {
    let start = archive_offset.checked_add(cd_offset);
    let end = start.and_then(|posit| posit.checked_add(cd_size));
    match end {
        Some(end) if end <= directory_end => Ok(()),
        _ => Err(ZipError::Malformed(
            "Central directory extends past the end of central directory records",
        )),
    }
}

/// Finds the Zip64 EOCDR at or after its nominal offset, scanning forward
/// in bounded chunks (archives can be prepended with arbitrary junk, which
/// shifts every stored offset).
fn find_zip64_eocdr<S: ByteSource>(source: &S, nominal: u64, end: u64) -> ZipResult<u64> {
    const SCAN_CHUNK: u64 = 64 * 1024;
    let mut posit = nominal;
    while posit < end {
        let take = in_memory_size(SCAN_CHUNK.min(end - posit))?;
        let chunk = source.read_vec(posit, take)?;
        if let Some(found) = memmem::find(&chunk, &spec::ZIP64_EOCDR_MAGIC) {
            let found = posit + found as u64;
            if found + spec::ZIP64_EOCDR_FIXED_SIZE as u64 > end {
                break;
            }
            return Ok(found);
        }
        if posit + take as u64 >= end {
            break;
        }
        // Overlap by a magic's worth so a match straddling chunks isn't lost.
        posit += take as u64 - (spec::ZIP64_EOCDR_MAGIC.len() as u64 - 1);
    }
    Err(ZipError::Malformed(
        "Couldn't find Zip64 End Of Central Directory Record",
    ))
}

/// Walks raw central directory records through a bounded sliding buffer.
struct RecordIter<'a, S> {
    archive: &'a ZipArchive<S>,
    buffer: Vec<u8>,
    /// Absolute offset of `buffer[0]`.
    buffer_start: u64,
    /// Cursor within `buffer`.
    posit: usize,
    /// Absolute offset of the next unread directory byte.
    next_fill: u64,
    /// Absolute end of the central directory region.
    directory_end: u64,
    remaining: u64,
}

impl<'a, S: ByteSource> RecordIter<'a, S> {
    fn new(archive: &'a ZipArchive<S>) -> Self {
        let location = &archive.location;
        let directory_start = location.archive_offset + location.cd_offset;
        Self {
            archive,
            buffer: Vec::with_capacity(archive.buffer_size),
            buffer_start: directory_start,
            posit: 0,
            next_fill: directory_start,
            directory_end: directory_start + location.cd_size,
            remaining: location.entry_count,
        }
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.posit
    }

    /// Makes at least `need` unconsumed bytes available at the cursor,
    /// sliding and refilling (or, for an oversized record, growing) the
    /// buffer as required.
    fn ensure(&mut self, need: usize) -> ZipResult<()> {
        if self.available() >= need {
            return Ok(());
        }
        if self.posit > 0 {
            self.buffer.copy_within(self.posit.., 0);
            let tail = self.buffer.len() - self.posit;
            self.buffer.truncate(tail);
            self.buffer_start += self.posit as u64;
            self.posit = 0;
        }
        let target = need.max(self.archive.buffer_size);
        while self.buffer.len() < need {
            let unread = self.directory_end.saturating_sub(self.next_fill);
            if unread == 0 {
                return Err(ZipError::Malformed(
                    "Central directory record runs past the directory's declared size",
                ));
            }
            let take = (target - self.buffer.len()).min(in_memory_size(unread)?);
            let old_length = self.buffer.len();
            self.buffer.resize(old_length + take, 0);
            self.archive
                .source
                .read_at(self.next_fill, &mut self.buffer[old_length..])?;
            self.next_fill += take as u64;
        }
        Ok(())
    }

    fn next_record(&mut self) -> Option<ZipResult<(u64, spec::CentralDirectoryRecord)>> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.parse_next();
        if result.is_err() {
            // A failed parse poisons the rest of the iteration.
            self.remaining = 0;
        }
        Some(result)
    }

    fn parse_next(&mut self) -> ZipResult<(u64, spec::CentralDirectoryRecord)> {
        self.ensure(spec::CENTRAL_HEADER_FIXED_SIZE)?;
        let total = spec::CentralDirectoryRecord::size_in_file(&self.buffer[self.posit..])?;
        self.ensure(total)?;
        let record_offset = self.buffer_start + self.posit as u64;
        let mut slice = &self.buffer[self.posit..self.posit + total];
        let record = spec::CentralDirectoryRecord::parse_and_consume(&mut slice)?;
        trace!("{:?}", record);
        self.posit += total;
        self.remaining -= 1;
        Ok((record_offset, record))
    }
}

/// Iterates entries lazily, in central directory order.
pub struct Entries<'a, S> {
    records: RecordIter<'a, S>,
}

impl<S: ByteSource> Iterator for Entries<'_, S> {
    type Item = ZipResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next_record()?;
        Some(record.and_then(|(_, record)| Entry::from_record(record)))
    }
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory record.
///
/// Sizes and the local header offset are already Zip64-resolved:
/// whenever the classic 32-bit fields carry the `0xFFFFFFFF` sentinel,
/// the 64-bit values come from the Zip64 extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// "Version made by": host system in the high byte, PKZIP version in
    /// the low.
    pub made_by_version: u16,
    pub extraction_version: u16,
    /// General purpose bit flags, APPNOTE 4.4.4.
    pub flags: u16,
    pub compression_method: CompressionMethod,
    /// Raw MS-DOS modification time and date. See [`modified`](Self::modified).
    pub dos_time: u16,
    pub dos_date: u16,
    /// The CRC-32 of the decompressed file
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Offset of the entry's local file header, relative to the start of
    /// the archive proper (i.e. not counting prepended data).
    pub header_offset: u64,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    /// The file name, raw. See [`file_name`](Self::file_name) for decoding.
    pub name_raw: Vec<u8>,
    /// The entry comment, raw.
    pub comment_raw: Vec<u8>,
    /// The entry's extra-field blob, verbatim.
    pub extra_field: Vec<u8>,
}

impl Entry {
    fn from_record(record: spec::CentralDirectoryRecord) -> ZipResult<Self> {
        let classic = extra::Zip64Classic {
            uncompressed_size: record.uncompressed_size,
            compressed_size: record.compressed_size,
            header_offset: record.header_offset,
            disk_number: record.disk_number,
        };
        let mut uncompressed_size = record.uncompressed_size as u64;
        let mut compressed_size = record.compressed_size as u64;
        let mut header_offset = record.header_offset as u64;
        let mut disk_number = record.disk_number as u32;

        let needs_zip64 = record.uncompressed_size == spec::ZIP64_SENTINEL_U32
            || record.compressed_size == spec::ZIP64_SENTINEL_U32
            || record.header_offset == spec::ZIP64_SENTINEL_U32
            || record.disk_number == spec::ZIP64_SENTINEL_U16;
        if needs_zip64 {
            let data = extra::find(&record.extra_field, extra::ZIP64_TAG)?.ok_or(
                ZipError::Malformed(
                    "Entry carries Zip64 sentinel values but no Zip64 extra field",
                ),
            )?;
            let parsed = extra::parse_zip64(data, classic)?;
            if let Some(size) = parsed.uncompressed_size {
                uncompressed_size = size;
            }
            if let Some(size) = parsed.compressed_size {
                compressed_size = size;
            }
            if let Some(offset) = parsed.header_offset {
                header_offset = offset;
            }
            if let Some(disk) = parsed.disk_number {
                disk_number = disk;
            }
        }

        if disk_number != 0 {
            return Err(ZipError::UnsupportedFeature(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                String::from_utf8_lossy(&record.name),
                disk_number,
            )));
        }

        Ok(Self {
            made_by_version: record.source_version,
            extraction_version: record.minimum_extract_version,
            flags: record.flags,
            compression_method: CompressionMethod::from_u16(record.compression_method),
            dos_time: record.last_modified_time,
            dos_date: record.last_modified_date,
            crc32: record.crc32,
            compressed_size,
            uncompressed_size,
            header_offset,
            internal_file_attributes: record.internal_file_attributes,
            external_file_attributes: record.external_file_attributes,
            name_raw: record.name,
            comment_raw: record.file_comment,
            extra_field: record.extra_field,
        })
    }

    /// The decoded file name.
    ///
    /// Bit 11 means UTF-8; otherwise a Unicode Path extra field wins when
    /// its CRC still matches the classic bytes, and CP437 is the fallback.
    pub fn file_name(&self) -> ZipResult<String> {
        let unicode = match extra::find(&self.extra_field, extra::UNICODE_PATH_TAG)? {
            Some(data) => extra::parse_unicode(data)?,
            None => None,
        };
        text::decode(&self.name_raw, self.is_utf8_flagged(), unicode)
    }

    /// The decoded entry comment, by the same rules as the file name.
    pub fn comment(&self) -> ZipResult<String> {
        let unicode = match extra::find(&self.extra_field, extra::UNICODE_COMMENT_TAG)? {
            Some(data) => extra::parse_unicode(data)?,
            None => None,
        };
        text::decode(&self.comment_raw, self.is_utf8_flagged(), unicode)
    }

    /// When the entry was last modified.
    ///
    /// Prefers the extended-timestamp extra field (Unix seconds) over the
    /// 2-second-granular DOS time; a malformed extra field falls back to
    /// the DOS value rather than failing the accessor.
    pub fn modified(&self) -> NaiveDateTime {
        match extra::find(&self.extra_field, extra::EXTENDED_TIMESTAMP_TAG) {
            Ok(Some(data)) => match extra::parse_extended_timestamp(data, false) {
                Ok(times) => times
                    .mtime
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .map(|moment| moment.naive_utc())
                    .unwrap_or_else(|| self.dos_modified()),
                Err(_) => {
                    warn!("Ignoring malformed extended timestamp field");
                    self.dos_modified()
                }
            },
            _ => self.dos_modified(),
        }
    }

    /// The modification time as stored in the DOS time/date fields.
    pub fn dos_modified(&self) -> NaiveDateTime {
        spec::parse_msdos(self.dos_time, self.dos_date)
    }

    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.uncompressed_size == 0 && self.name_raw.last() == Some(&b'/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// True if the entry is encrypted (decryption is unsupported).
    pub fn is_encrypted(&self) -> bool {
        // Bit 0: If set, indicates that the file is encrypted
        self.flags & spec::FLAG_ENCRYPTED != 0
    }

    /// Unix mode bits, if the file was archived on a Unix OS.
    ///
    /// This library does _not_ try to convert DOS permission bits into
    /// roughly-equivalent Unix mode bits, or do other cross-OS handwaving.
    pub fn unix_mode(&self) -> Option<u16> {
        if self.made_by_version >> 8 == 3 {
            Some((self.external_file_attributes >> 16) as u16)
        } else {
            None
        }
    }

    fn is_utf8_flagged(&self) -> bool {
        // Bit 11: Language encoding flag (EFS).  If this bit is set,
        //         the filename and comment fields for this file
        //         MUST be encoded using UTF-8. (see APPENDIX D)
        self.flags & spec::FLAG_UTF8 != 0
    }
}

/// A chunked, decompressing reader over one entry.
///
/// Each [`read`](Self::read) consumes up to the given number of
/// *compressed* bytes and returns whatever decompressed bytes emerge.
/// An empty block means the processor needs more input; `None` means
/// end-of-stream (and every later call returns `None` again). The CRC-32
/// of the decompressed stream is checked as the stream ends.
pub struct EntryDataReader<'a> {
    source: &'a dyn ByteSource,
    processor: Box<dyn DataProcessor>,
    next_offset: u64,
    remaining: u64,
    declared_crc: u32,
    hasher: Hasher,
    input_done: bool,
    finished: bool,
}

impl EntryDataReader<'_> {
    pub fn read(&mut self, max_input_bytes: usize) -> ZipResult<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if self.input_done {
            self.finished = true;
            return Ok(None);
        }
        let mut out = Vec::new();
        if self.remaining > 0 && max_input_bytes > 0 {
            let take = in_memory_size(self.remaining.min(max_input_bytes as u64))?;
            let chunk = self.source.read_vec(self.next_offset, take)?;
            self.next_offset += take as u64;
            self.remaining -= take as u64;
            self.processor.process(&chunk, &mut out)?;
        }
        if self.remaining == 0 {
            self.processor.finish(&mut out)?;
            self.input_done = true;
        }
        self.hasher.update(&out);
        if self.input_done {
            let computed = self.hasher.clone().finalize();
            if computed != self.declared_crc {
                return Err(ZipError::CrcMismatch {
                    declared: self.declared_crc,
                    computed,
                });
            }
            if out.is_empty() {
                self.finished = true;
                return Ok(None);
            }
        }
        Ok(Some(out))
    }
}

/// Convenience over [`EntryDataReader::read`]: yields non-empty
/// decompressed blocks until end-of-stream.
impl Iterator for EntryDataReader<'_> {
    type Item = ZipResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.read(READ_CHUNK) {
                Ok(None) => return None,
                Ok(Some(block)) if block.is_empty() => continue,
                Ok(Some(block)) => return Some(Ok(block)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// A chunked reader over one entry's *compressed* payload, verbatim.
pub struct RawEntryReader<'a> {
    source: &'a dyn ByteSource,
    next_offset: u64,
    remaining: u64,
}

impl RawEntryReader<'_> {
    /// Reads up to `max_bytes` of the stored payload;
    /// `None` once it's exhausted.
    pub fn read(&mut self, max_bytes: usize) -> ZipResult<Option<Vec<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = in_memory_size(self.remaining.min(max_bytes.max(1) as u64))?;
        let chunk = self.source.read_vec(self.next_offset, take)?;
        self.next_offset += take as u64;
        self.remaining -= take as u64;
        Ok(Some(chunk))
    }
}
