//! Merging entries from existing archives into a new one, without
//! recompressing anything.
//!
//! A [`ZipMerger`] takes an ordered list of [`MergeSource`]s — read archives
//! with optional path rewriting and filtering — and produces a configured
//! [`ZipWriter`] whose entries copy each source entry's compressed payload
//! verbatim. Only headers and offsets are rewritten, so merging is pure
//! byte shuffling: no inflate, no deflate, no CRC recomputation.
//!
//! Duplicate names across sources are preserved in input order; ZIP permits
//! them, and deduplication is the caller's policy call, not ours.

use log::*;

use crate::extra;
use crate::read::{Entries, Entry, RawEntryReader, ZipArchive};
use crate::result::*;
use crate::source::ByteSource;
use crate::write::{
    EntryData, EntryFactory, EntryOptions, EntrySource, RawEntryInfo, WriteOptions, ZipWriter,
};

/// How many compressed bytes to copy per pull while merging.
const COPY_CHUNK: usize = 64 * 1024;

/// One archive to merge, with optional selection and renaming rules.
pub struct MergeSource<'a, S: ByteSource> {
    archive: &'a ZipArchive<S>,
    base_path: Option<String>,
    destination_path: Option<String>,
    filter: Option<Box<dyn Fn(&Entry) -> bool + 'a>>,
}

impl<'a, S: ByteSource> MergeSource<'a, S> {
    pub fn new(archive: &'a ZipArchive<S>) -> Self {
        Self {
            archive,
            base_path: None,
            destination_path: None,
            filter: None,
        }
    }

    /// Include only entries whose decoded name starts with this prefix,
    /// and strip the prefix from the output name. An entry whose whole
    /// name equals the prefix is dropped (there'd be nothing left).
    pub fn base_path(mut self, prefix: impl Into<String>) -> Self {
        self.base_path = Some(prefix.into());
        self
    }

    /// Prefix added to every output name from this source.
    pub fn destination_path(mut self, prefix: impl Into<String>) -> Self {
        self.destination_path = Some(prefix.into());
        self
    }

    /// Keep only entries the predicate approves. Runs after the
    /// `base_path` selection, on the original entry metadata.
    pub fn filter(mut self, predicate: impl Fn(&Entry) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// The rewritten output name for an entry, or `None` to skip it.
    fn output_name(&self, name: &str) -> Option<String> {
        let stripped = match &self.base_path {
            Some(base) => name.strip_prefix(base.as_str())?,
            None => name,
        };
        if stripped.is_empty() {
            return None;
        }
        match &self.destination_path {
            Some(destination) => Some(format!("{destination}{stripped}")),
            None => Some(stripped.to_owned()),
        }
    }
}

/// Entry defaults applied to every merged entry.
///
/// Most per-entry options don't apply to raw copies (the method, CRC, and
/// sizes come from the source archive); these are the ones that do.
#[derive(Default)]
pub struct MergeEntryOptions {
    force_zip64: bool,
    force_utf8_file_name: bool,
    min_made_by_version: Option<u16>,
    min_extraction_version: Option<u16>,
}

impl MergeEntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit Zip64 records for every merged entry.
    pub fn force_zip64(mut self, force: bool) -> Self {
        self.force_zip64 = force;
        self
    }

    /// Store rewritten names as UTF-8 (bit 11) instead of CP437.
    pub fn force_utf8_file_name(mut self, force: bool) -> Self {
        self.force_utf8_file_name = force;
        self
    }

    pub fn min_made_by_version(mut self, version: u16) -> Self {
        self.min_made_by_version = Some(version);
        self
    }

    pub fn min_extraction_version(mut self, version: u16) -> Self {
        self.min_extraction_version = Some(version);
        self
    }
}

/// Options for a merge: writer-level settings plus entry defaults.
#[derive(Default)]
pub struct MergeOptions {
    entry_options: MergeEntryOptions,
    write_options: WriteOptions,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_options(mut self, options: MergeEntryOptions) -> Self {
        self.entry_options = options;
        self
    }

    pub fn write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }
}

/// Composes read archives into one output archive.
pub struct ZipMerger<'a, S: ByteSource> {
    sources: Vec<MergeSource<'a, S>>,
    options: MergeOptions,
    prepend: Option<EntryFactory<'a>>,
}

impl<'a, S: ByteSource> ZipMerger<'a, S> {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            sources: Vec::new(),
            options,
            prepend: None,
        }
    }

    /// Appends a source; output order follows call order.
    pub fn add_source(&mut self, source: MergeSource<'a, S>) {
        self.sources.push(source);
    }

    /// A factory for synthetic entries emitted *before* any archive
    /// contents — a generated manifest, say. Called until it returns
    /// `None`, in call order.
    pub fn prepending_entries(&mut self, factory: EntryFactory<'a>) {
        self.prepend = Some(factory);
    }

    /// Builds the output writer. Pull its chunks to run the merge.
    pub fn output_archive(self) -> ZipResult<ZipWriter<'a>> {
        let mut feed = MergeFeed {
            prepend: self.prepend,
            sources: self.sources.into_iter(),
            current: None,
            entry_options: self.options.entry_options,
        };
        ZipWriter::new(
            Box::new(move || feed.next_entry()),
            self.options.write_options,
        )
    }
}

/// The entry factory driving a merge: prepended entries first, then every
/// source archive in order, one entry at a time.
struct MergeFeed<'a, S: ByteSource> {
    prepend: Option<EntryFactory<'a>>,
    sources: std::vec::IntoIter<MergeSource<'a, S>>,
    current: Option<(MergeSource<'a, S>, Entries<'a, S>)>,
    entry_options: MergeEntryOptions,
}

impl<'a, S: ByteSource> MergeFeed<'a, S> {
    fn next_entry(&mut self) -> ZipResult<Option<EntrySource<'a>>> {
        if let Some(factory) = &mut self.prepend {
            match factory()? {
                Some(source) => return Ok(Some(source)),
                None => self.prepend = None,
            }
        }
        loop {
            if self.current.is_none() {
                match self.sources.next() {
                    Some(source) => {
                        let entries = source.archive.entries();
                        self.current = Some((source, entries));
                    }
                    None => return Ok(None),
                }
            }
            // Walk the current source until an entry survives its rules.
            let (source, entries) = self
                .current
                .as_mut()
                .ok_or(ZipError::State("merge feed lost its source"))?;
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name()?;
                let Some(output_name) = source.output_name(&name) else {
                    trace!("Skipping {name}: outside the base path");
                    continue;
                };
                if let Some(filter) = &source.filter {
                    if !filter(&entry) {
                        trace!("Skipping {name}: filtered out");
                        continue;
                    }
                }
                debug!("Merging {name} as {output_name}");
                return Ok(Some(raw_entry_source(
                    source.archive,
                    &entry,
                    output_name,
                    &self.entry_options,
                )?));
            }
            self.current = None;
        }
    }
}

/// Wraps one source entry into a raw [`EntrySource`] carrying the rewritten
/// name, the declared method/CRC/sizes, and the preserved extra fields.
fn raw_entry_source<'a, S: ByteSource>(
    archive: &'a ZipArchive<S>,
    entry: &Entry,
    output_name: String,
    defaults: &MergeEntryOptions,
) -> ZipResult<EntrySource<'a>> {
    let mut options = EntryOptions::new(output_name)
        .file_comment(entry.comment()?)
        // Repack the DOS time exactly; if the source carried an extended
        // timestamp, it's preserved verbatim below.
        .mod_time(entry.dos_modified())
        .force_zip64(defaults.force_zip64)
        .force_utf8_file_name(defaults.force_utf8_file_name)
        .internal_file_attributes(entry.internal_file_attributes)
        .external_file_attributes(entry.external_file_attributes)
        // The source's extra fields ride along verbatim (below), so the
        // writer must not synthesize its own timestamp field on top.
        .extended_timestamp_field(false);
    if let Some(version) = defaults.min_made_by_version {
        options = options.min_made_by_version(version);
    }
    if let Some(version) = defaults.min_extraction_version {
        options = options.min_extraction_version(version);
    }

    // Zip64 legs are regenerated by the writer as the new offsets demand;
    // everything else is preserved byte-for-byte.
    let preserved = extra::strip_tag(&entry.extra_field, extra::ZIP64_TAG)?;

    let info = RawEntryInfo {
        compression_method: entry.compression_method.to_u16(),
        crc32: entry.crc32,
        compressed_size: entry.compressed_size,
        uncompressed_size: entry.uncompressed_size,
        extra_field: preserved,
    };
    let reader = archive.raw_reader(entry)?;
    Ok(EntrySource::raw(options, info, RawPayload(reader)))
}

/// Adapts a [`RawEntryReader`] to the writer's [`EntryData`] contract.
struct RawPayload<'a>(RawEntryReader<'a>);

impl EntryData for RawPayload<'_> {
    fn next_block(&mut self) -> ZipResult<Option<Vec<u8>>> {
        self.0.read(COPY_CHUNK)
    }
}
