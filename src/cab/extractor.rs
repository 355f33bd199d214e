use byteorder::{ByteOrder, LittleEndian};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::io::VolumeSet;

use super::inflate::{ChunkInflater, inflate_chunk};
use super::parser::{ArchiveIndex, OpenOptions};
use super::reader::VolumeReader;
use super::structures::*;

/// How member bytes are turned into output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractMode {
    /// Length-framed chunks, with size and MD5 verification
    #[default]
    Current,
    /// Marker-delimited chunks, with size verification only
    Legacy,
    /// Stored bytes as-is, without decompression
    Raw,
}

/// An opened cabinet archive.
///
/// Lookups are answered from the first header of the volume set. Each
/// extraction opens its own volume files, so a shared `Catalog` can serve
/// several extractions at once.
pub struct Catalog {
    volumes: VolumeSet,
    /// Never empty
    headers: Vec<ArchiveIndex>,
}

impl Catalog {
    /// Open the archive that `path` (e.g. `data1.cab` or `data1.hdr`) belongs to.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let volumes = VolumeSet::new(path.as_ref());
        let headers = ArchiveIndex::load_all(&volumes, &options)?;
        debug!(
            "Opened {} with {} header(s), major version {}",
            path.as_ref().display(),
            headers.len(),
            headers[0].major_version()
        );
        Ok(Self { volumes, headers })
    }

    /// The header used for lookups and extraction
    pub fn index(&self) -> &ArchiveIndex {
        &self.headers[0]
    }

    /// Every header read, in volume order
    pub fn headers(&self) -> &[ArchiveIndex] {
        &self.headers
    }

    pub fn major_version(&self) -> i32 {
        self.index().major_version()
    }

    pub fn file_count(&self) -> usize {
        self.index().file_count()
    }

    pub fn directory_count(&self) -> usize {
        self.index().directory_count()
    }

    pub fn component_count(&self) -> usize {
        self.index().components().len()
    }

    pub fn file_group_count(&self) -> usize {
        self.index().file_groups().len()
    }

    pub fn components(&self) -> &[Component] {
        self.index().components()
    }

    pub fn file_groups(&self) -> &[FileGroup] {
        self.index().file_groups()
    }

    pub fn component_name(&self, index: usize) -> Option<String> {
        self.components().get(index).map(|c| c.name.clone())
    }

    pub fn directory_name(&self, index: usize) -> Option<String> {
        self.index().directory_name(index).ok()
    }

    pub fn file_name(&self, index: usize) -> Option<String> {
        self.index().file_name(index).ok()
    }

    pub fn file_group_name(&self, index: usize) -> Option<String> {
        self.file_group(index).map(|g| g.name.clone())
    }

    pub fn file_group(&self, index: usize) -> Option<&FileGroup> {
        self.file_groups().get(index)
    }

    /// Find a file group by exact name.
    pub fn file_group_find(&self, name: &str) -> Option<&FileGroup> {
        self.file_groups().iter().find(|g| g.name == name)
    }

    pub fn file_descriptor(&self, index: usize) -> Result<FileDescriptor> {
        self.index().file_descriptor(index)
    }

    /// Whether member `index` exists and has a name and data.
    pub fn file_is_valid(&self, index: usize) -> bool {
        match self.file_descriptor(index) {
            Ok(fd) => !fd.is_invalid() && fd.name_offset != 0 && fd.data_offset != 0,
            Err(_) => false,
        }
    }

    /// Expanded size of member `index`
    pub fn file_size(&self, index: usize) -> Option<u32> {
        self.file_descriptor(index).ok().map(|fd| fd.expanded_size)
    }

    /// Directory index of member `index`
    pub fn file_directory(&self, index: usize) -> Option<u32> {
        self.file_descriptor(index).ok().map(|fd| fd.directory_index)
    }

    /// Relative path of member `index`, with `/` separators.
    pub fn file_path(&self, index: usize) -> Option<String> {
        let name = self.file_name(index)?;
        let directory = self
            .file_directory(index)
            .and_then(|d| self.directory_name(d as usize))
            .unwrap_or_default();

        let path = if directory.is_empty() {
            name
        } else {
            format!("{directory}\\{name}")
        };
        Some(path.replace('\\', "/"))
    }

    /// Follow `LINK_PREV` redirections to the member that holds the data.
    fn resolve_member(&self, index: usize) -> Result<(usize, FileDescriptor)> {
        let mut visited = HashSet::new();
        let mut current = index;

        loop {
            let descriptor = self.file_descriptor(current)?;
            if descriptor.is_invalid() || descriptor.data_offset == 0 {
                return Err(Error::InvalidFile(current));
            }
            if !descriptor.links_previous() {
                return Ok((current, descriptor));
            }

            visited.insert(current);
            let previous = descriptor.link_previous as usize;
            if visited.contains(&previous) {
                return Err(Error::LinkCycle(index));
            }
            debug!("File {} links to file {}", current, previous);
            current = previous;
        }
    }

    fn open_reader(&self, index: usize) -> Result<VolumeReader<'_>> {
        let (member, descriptor) = self.resolve_member(index)?;
        VolumeReader::open(&self.volumes, self.index(), member, descriptor)
    }

    /// Extract member `index` into `sink` using the given mode.
    pub fn extract_with<W: Write>(&self, index: usize, sink: &mut W, mode: ExtractMode) -> Result<u64> {
        match mode {
            ExtractMode::Current => self.extract(index, sink),
            ExtractMode::Legacy => self.extract_legacy(index, sink),
            ExtractMode::Raw => self.extract_raw(index, sink),
        }
    }

    /// Extract member `index` into `sink`, decoding length-framed chunks.
    ///
    /// Verifies the number of bytes written and, from major version 6, the
    /// stored MD5 digest. Returns the number of bytes written.
    pub fn extract<W: Write>(&self, index: usize, sink: &mut W) -> Result<u64> {
        let mut reader = self.open_reader(index)?;
        let descriptor = reader.descriptor().clone();

        let mut bytes_left = descriptor.stored_size() as u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut hasher = Md5::new();
        let mut total_written = 0u64;

        while bytes_left > 0 {
            if descriptor.is_compressed() {
                let mut length = [0u8; 2];
                reader.read(&mut length)?;
                let length = LittleEndian::read_u16(&length) as usize;
                if length == 0 {
                    return Err(Error::ZeroLengthChunk);
                }

                let chunk = reader.read_vec(length)?;
                let output = inflate_chunk(&chunk).inspect_err(|e| {
                    if e.hints_legacy_format() {
                        warn!(
                            "File {} (volume {}, {} bytes left there) may use the legacy compression",
                            index,
                            reader.volume(),
                            reader.volume_bytes_left()
                        );
                    }
                })?;
                bytes_left = bytes_left.saturating_sub(2 + length as u64);

                hasher.update(&output);
                sink.write_all(&output)?;
                total_written += output.len() as u64;
            } else {
                let n = bytes_left.min(BUFFER_SIZE as u64) as usize;
                reader.read(&mut buffer[..n])?;
                bytes_left -= n as u64;

                hasher.update(&buffer[..n]);
                sink.write_all(&buffer[..n])?;
                total_written += n as u64;
            }
        }

        verify_size(&descriptor, total_written)?;

        if self.major_version() >= 6 {
            let digest = hasher.finalize();
            if digest.as_slice() != descriptor.md5 {
                let mut actual = [0u8; 16];
                actual.copy_from_slice(&digest);
                return Err(Error::ChecksumMismatch {
                    expected: descriptor.md5,
                    actual,
                });
            }
        }

        Ok(total_written)
    }

    /// Extract member `index` into `sink`, decoding marker-delimited chunks.
    ///
    /// Members of this vintage carry no digest; only the size is verified.
    pub fn extract_legacy<W: Write>(&self, index: usize, sink: &mut W) -> Result<u64> {
        let mut reader = self.open_reader(index)?;
        let descriptor = reader.descriptor().clone();

        let mut bytes_left = descriptor.stored_size() as u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total_written = 0u64;

        while bytes_left > 0 {
            if descriptor.is_compressed() {
                let run = reader.read_volume_run()?;
                bytes_left = bytes_left.saturating_sub(run.len() as u64);

                ChunkInflater::new().inflate_run(&run, reader.volume(), |output| {
                    sink.write_all(output)?;
                    total_written += output.len() as u64;
                    Ok(())
                })?;
            } else {
                let n = bytes_left.min(BUFFER_SIZE as u64) as usize;
                reader.read(&mut buffer[..n])?;
                bytes_left -= n as u64;
                sink.write_all(&buffer[..n])?;
                total_written += n as u64;
            }
        }

        verify_size(&descriptor, total_written)?;
        Ok(total_written)
    }

    /// Copy member `index`'s stored bytes into `sink` without decompressing.
    pub fn extract_raw<W: Write>(&self, index: usize, sink: &mut W) -> Result<u64> {
        let mut reader = self.open_reader(index)?;
        let mut bytes_left = reader.descriptor().stored_size() as u64;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total_written = 0u64;

        while bytes_left > 0 {
            let n = bytes_left.min(BUFFER_SIZE as u64) as usize;
            reader.read(&mut buffer[..n])?;
            sink.write_all(&buffer[..n])?;
            bytes_left -= n as u64;
            total_written += n as u64;
        }

        Ok(total_written)
    }

    /// Extract member `index` to a file, creating parent directories.
    ///
    /// A partially written file is removed if extraction fails.
    pub fn extract_to_file(&self, index: usize, output_path: &Path, mode: ExtractMode) -> Result<u64> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(output_path)?);
        let result = self
            .extract_with(index, &mut writer, mode)
            .and_then(|written| {
                writer.flush()?;
                Ok(written)
            });

        if result.is_err() {
            drop(writer);
            let _ = fs::remove_file(output_path);
        }
        result
    }
}

fn verify_size(descriptor: &FileDescriptor, total_written: u64) -> Result<()> {
    if total_written != descriptor.expanded_size as u64 {
        return Err(Error::SizeVerificationFailed {
            expected: descriptor.expanded_size as u64,
            actual: total_written,
        });
    }
    Ok(())
}
