//! Sequential reader over one member's bytes across volume files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::io::{CABINET_SUFFIX, VolumeFile, VolumeSet};

use super::parser::ArchiveIndex;
use super::structures::*;

/// Undo the byte scramble applied to obfuscated members.
///
/// `seed` counts bytes since the start of the member and carries over
/// between calls, so a buffer may be processed in any number of pieces.
pub fn deobfuscate(buf: &mut [u8], seed: &mut u32) {
    for byte in buf.iter_mut() {
        *byte = (*byte ^ 0xd5)
            .rotate_right(2)
            .wrapping_sub((*seed % 0x47) as u8);
        *seed = seed.wrapping_add(1);
    }
}

/// Inverse of [`deobfuscate`].
pub fn obfuscate(buf: &mut [u8], seed: &mut u32) {
    for byte in buf.iter_mut() {
        *byte = byte.wrapping_add((*seed % 0x47) as u8).rotate_left(2) ^ 0xd5;
        *seed = seed.wrapping_add(1);
    }
}

/// Reader session for a single member.
///
/// Tracks the open volume file and how many of the member's bytes remain
/// in it, moving on to the next volume when a read runs past the end of a
/// segment.
pub struct VolumeReader<'a> {
    volumes: &'a VolumeSet,
    index: &'a ArchiveIndex,
    member: usize,
    descriptor: FileDescriptor,
    file: Option<File>,
    volume: u32,
    volume_bytes_left: u64,
    seed: u32,
}

impl<'a> VolumeReader<'a> {
    /// Open the first volume holding data for `member`.
    pub fn open(
        volumes: &'a VolumeSet,
        index: &'a ArchiveIndex,
        member: usize,
        descriptor: FileDescriptor,
    ) -> Result<Self> {
        let mut reader = Self {
            volumes,
            index,
            member,
            volume: descriptor.volume as u32,
            descriptor,
            file: None,
            volume_bytes_left: 0,
            seed: 0,
        };

        let mut volume = reader.volume;
        let mut skipped = 0;
        loop {
            let (opened, header) = reader.read_volume_header(volume)?;

            // Old archives index members globally; find the volume whose
            // range covers this one
            if index.major_version() <= 5 && member > header.last_file_index as usize {
                skipped += 1;
                if skipped > volumes.volume_count().max(1) {
                    return Err(Error::VolumeOpenFailure {
                        volume: volume + 1,
                        reason: format!("no volume contains file {member}"),
                    });
                }
                trace!("File {} is past volume {}, trying the next one", member, volume);
                volume += 1;
                continue;
            }
            reader.enter_volume(volume, opened, header)?;
            break;
        }

        Ok(reader)
    }

    /// The member's descriptor, including any inferred split flag
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Volume currently open
    pub fn volume(&self) -> u32 {
        self.volume
    }

    /// Member bytes left in the current volume
    pub fn volume_bytes_left(&self) -> u64 {
        self.volume_bytes_left
    }

    fn open_volume(&mut self, volume: u32) -> Result<()> {
        let (opened, header) = self.read_volume_header(volume)?;
        self.enter_volume(volume, opened, header)
    }

    /// Open volume `volume` and decode its volume header.
    fn read_volume_header(&self, volume: u32) -> Result<(VolumeFile, VolumeHeader)> {
        let major_version = self.index.major_version();
        let mut opened = self
            .volumes
            .open(volume, CABINET_SUFFIX)
            .map_err(|e| Error::VolumeOpenFailure {
                volume,
                reason: e.to_string(),
            })?;

        let mut head = vec![0u8; CommonHeader::SIZE + VolumeHeader::size_for(major_version)];
        if (opened.size as usize) < head.len() {
            return Err(Error::TruncatedHeader {
                what: "volume header",
                offset: 0,
                needed: head.len(),
                available: opened.size as usize,
            });
        }
        opened.file.read_exact(&mut head)?;
        CommonHeader::from_bytes(&head)?;
        let header = VolumeHeader::from_bytes(&head[CommonHeader::SIZE..], major_version)?;
        Ok((opened, header))
    }

    /// Make `opened` the current volume, positioned at the member's segment.
    fn enter_volume(
        &mut self,
        volume: u32,
        mut opened: VolumeFile,
        header: VolumeHeader,
    ) -> Result<()> {
        let major_version = self.index.major_version();
        let member = self.member;
        let is_first = member == header.first_file_index as usize;
        let is_last = member == header.last_file_index as usize
            && header.last_file_offset != VolumeHeader::NO_LAST_FILE;

        if major_version == 5
            && !self.descriptor.is_split()
            && ((is_first && header.first_file_size_compressed != self.descriptor.compressed_size)
                || (is_last && header.last_file_size_compressed != self.descriptor.compressed_size))
        {
            debug!("File {} is split across volumes", member);
            self.descriptor.flags |= FILE_SPLIT;
            self.index.mark_split(member);
        }

        let segment = if self.descriptor.is_split() {
            if is_last {
                Some((
                    header.last_file_offset,
                    header.last_file_size_expanded,
                    header.last_file_size_compressed,
                ))
            } else if is_first {
                Some((
                    header.first_file_offset,
                    header.first_file_size_expanded,
                    header.first_file_size_compressed,
                ))
            } else {
                None
            }
        } else {
            Some((
                self.descriptor.data_offset,
                self.descriptor.expanded_size,
                self.descriptor.compressed_size,
            ))
        };

        self.volume_bytes_left = match segment {
            Some((offset, expanded, compressed)) => {
                let len = if self.descriptor.is_compressed() {
                    compressed as u64
                } else {
                    expanded as u64
                };
                // The segment must lie inside the volume file
                let available = opened.size.saturating_sub(offset as u64);
                if len > available {
                    return Err(Error::TruncatedHeader {
                        what: "member data",
                        offset: offset as usize,
                        needed: len as usize,
                        available: available as usize,
                    });
                }
                opened.file.seek(SeekFrom::Start(offset as u64))?;
                len
            }
            None => 0,
        };

        debug!(
            "Opened volume {} ({}) for file {}: {} bytes",
            volume,
            opened.path.display(),
            member,
            self.volume_bytes_left
        );

        self.file = Some(opened.file);
        self.volume = volume;
        Ok(())
    }

    /// Fill `buf` with the member's next bytes, crossing into following
    /// volumes as needed. Obfuscated members are descrambled once the whole
    /// buffer has been read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;

        loop {
            let wanted = (buf.len() - filled).min(self.volume_bytes_left as usize);
            if wanted > 0 {
                let volume = self.volume;
                let file = self.file.as_mut().ok_or_else(|| Error::VolumeOpenFailure {
                    volume,
                    reason: "volume is not open".into(),
                })?;
                file.read_exact(&mut buf[filled..filled + wanted])?;
                filled += wanted;
                self.volume_bytes_left -= wanted as u64;
            }
            if filled == buf.len() {
                break;
            }
            self.open_volume(self.volume + 1)?;
        }

        if self.descriptor.is_obfuscated() {
            deobfuscate(buf, &mut self.seed);
        }
        Ok(())
    }

    /// Read exactly `n` bytes into a new buffer.
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read(&mut buf)?;
        Ok(buf)
    }

    /// Read everything left of the member in the current volume, first
    /// moving to the next volume if the current one is used up.
    pub fn read_volume_run(&mut self) -> Result<Vec<u8>> {
        if self.volume_bytes_left == 0 {
            self.open_volume(self.volume + 1)?;
        }
        self.read_vec(self.volume_bytes_left as usize)
    }
}
