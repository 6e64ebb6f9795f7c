//! Archive container.
//!
//! Layout (the whole stream is gzip compressed):
//! ```text
//! "SLICEDB1"
//! repeated: name_len u32 LE | name | data_len u64 LE | data
//! name_len 0 terminates the archive
//! ```
//! Entries are `data/<table>/<part>.tsv` parts in the order they were
//! written, followed by `metadata.json` and `manifest.json`.

use super::{SliceWriter, WRITER_BUFFER_SIZE};
use crate::error::{Result, SliceError};
use crate::manifest::{
    part_entry_name, Manifest, ManifestTable, PartFormat, SliceMetadata, MANIFEST_ENTRY,
    METADATA_ENTRY,
};
use crate::restore::LoadPlan;
use ahash::AHashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use tempfile::TempDir;

const MAGIC: &[u8; 8] = b"SLICEDB1";
const MAX_NAME_LEN: u32 = 4096;

pub struct ArchiveWriter<W: Write> {
    encoder: Option<GzEncoder<BufWriter<W>>>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(out: W) -> Result<Self> {
        let mut encoder = GzEncoder::new(
            BufWriter::with_capacity(WRITER_BUFFER_SIZE, out),
            Compression::default(),
        );
        encoder.write_all(MAGIC)?;
        Ok(Self {
            encoder: Some(encoder),
        })
    }

    fn encoder(&mut self) -> Result<&mut GzEncoder<BufWriter<W>>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| SliceError::Manifest("archive already finished".to_string()))
    }

    fn entry(&mut self, name: &str, len: u64, data: &mut dyn Read) -> Result<()> {
        let encoder = self.encoder()?;
        encoder.write_all(&(name.len() as u32).to_le_bytes())?;
        encoder.write_all(name.as_bytes())?;
        encoder.write_all(&len.to_le_bytes())?;
        let copied = io::copy(&mut data.take(len), encoder)?;
        if copied != len {
            return Err(SliceError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry {name}: expected {len} bytes, got {copied}"),
            )));
        }
        Ok(())
    }
}

impl<W: Write + Send> SliceWriter for ArchiveWriter<W> {
    fn format(&self) -> PartFormat {
        PartFormat::ArchiveEntry
    }

    fn write_part(&mut self, table: &str, index: u32, len: u64, data: &mut dyn Read) -> Result<()> {
        self.entry(&part_entry_name(table, index), len, data)
    }

    fn finish(
        &mut self,
        manifest: &Manifest,
        metadata: &SliceMetadata,
        _plan: Option<&LoadPlan>,
    ) -> Result<()> {
        let metadata = metadata.to_json()?;
        self.entry(METADATA_ENTRY, metadata.len() as u64, &mut metadata.as_slice())?;
        let manifest = manifest.to_json()?;
        self.entry(MANIFEST_ENTRY, manifest.len() as u64, &mut manifest.as_slice())?;

        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| SliceError::Manifest("archive already finished".to_string()))?;
        encoder.write_all(&0u32.to_le_bytes())?;
        encoder.finish()?.flush()?;
        Ok(())
    }
}

/// An archive unpacked into a temporary directory
pub struct ArchiveReader {
    /// Holds the unpacked entries until the reader is dropped
    _dir: TempDir,
    entries: AHashMap<String, PathBuf>,
    manifest: Manifest,
    metadata: SliceMetadata,
}

fn read_exact_or_truncated(input: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SliceError::Manifest("archive is truncated".to_string())
        } else {
            SliceError::Io(e)
        }
    })
}

impl ArchiveReader {
    pub fn open<R: Read>(input: R) -> Result<Self> {
        let mut input = GzDecoder::new(input);
        let mut magic = [0u8; 8];
        read_exact_or_truncated(&mut input, &mut magic)?;
        if &magic != MAGIC {
            return Err(SliceError::Manifest("not a slice archive".to_string()));
        }

        let dir = tempfile::tempdir()?;
        let mut entries = AHashMap::new();

        loop {
            let mut len = [0u8; 4];
            read_exact_or_truncated(&mut input, &mut len)?;
            let name_len = u32::from_le_bytes(len);
            if name_len == 0 {
                break;
            }
            if name_len > MAX_NAME_LEN {
                return Err(SliceError::Manifest(format!(
                    "entry name of {name_len} bytes"
                )));
            }
            let mut name = vec![0u8; name_len as usize];
            read_exact_or_truncated(&mut input, &mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| SliceError::Manifest("entry name is not UTF-8".to_string()))?;

            let mut len = [0u8; 8];
            read_exact_or_truncated(&mut input, &mut len)?;
            let data_len = u64::from_le_bytes(len);

            let path = dir.path().join(format!("entry-{}", entries.len()));
            let mut file = BufWriter::with_capacity(WRITER_BUFFER_SIZE, File::create(&path)?);
            let copied = io::copy(&mut (&mut input).take(data_len), &mut file)?;
            if copied != data_len {
                return Err(SliceError::Manifest(format!("archive is truncated in {name}")));
            }
            file.flush()?;
            if entries.insert(name.clone(), path).is_some() {
                return Err(SliceError::Manifest(format!("entry {name} appears twice")));
            }
        }

        let read_entry = |name: &str| -> Result<Vec<u8>> {
            let path = entries
                .get(name)
                .ok_or_else(|| SliceError::Manifest(format!("archive has no {name}")))?;
            Ok(std::fs::read(path)?)
        };
        let manifest = Manifest::from_json(&read_entry(MANIFEST_ENTRY)?)?;
        let metadata = SliceMetadata::from_json(&read_entry(METADATA_ENTRY)?)?;

        for table in &manifest.tables {
            for part in &table.parts {
                let name = part_entry_name(&table.table, part.index);
                if !entries.contains_key(&name) {
                    return Err(SliceError::Manifest(format!("archive has no {name}")));
                }
            }
        }

        Ok(Self {
            _dir: dir,
            entries,
            manifest,
            metadata,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn metadata(&self) -> &SliceMetadata {
        &self.metadata
    }

    pub fn open_part(&self, table: &str, index: u32) -> Result<BufReader<File>> {
        let name = part_entry_name(table, index);
        let path = self
            .entries
            .get(&name)
            .ok_or_else(|| SliceError::Manifest(format!("archive has no {name}")))?;
        Ok(BufReader::with_capacity(WRITER_BUFFER_SIZE, File::open(path)?))
    }

    /// All parts of a table, in part order, as one stream
    pub fn open_table(&self, table: &ManifestTable) -> Result<Box<dyn BufRead + Send>> {
        let mut indexes: Vec<u32> = table.parts.iter().map(|p| p.index).collect();
        indexes.sort_unstable();

        let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
        for index in indexes {
            let part = self.open_part(&table.table, index)?;
            reader = Box::new(reader.chain(part));
        }
        Ok(Box::new(BufReader::with_capacity(WRITER_BUFFER_SIZE, reader)))
    }
}
