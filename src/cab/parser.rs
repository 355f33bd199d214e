//! Archive header index.
//!
//! A header file (`data1.hdr`, or `data1.cab` when there is no `.hdr`) holds
//! the metadata for the whole archive:
//!
//! 1. The common header, whose version word selects the on-disk layouts
//! 2. The cabinet descriptor, at `cab_descriptor_offset`
//! 3. The file table: one offset per directory name, followed (up to major
//!    version 5) by one offset per file descriptor
//! 4. Component and file group lists, reached through hashed slot tables
//!    whose entries are singly linked `(name, descriptor, next)` nodes
//!
//! Every offset stored in the cabinet descriptor and the tables it points
//! to is relative to `cab_descriptor_offset`. A relative offset of zero
//! means "absent".

use encoding_rs::Encoding;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::io::{ByteCursor, CABINET_SUFFIX, HEADER_SUFFIX, VolumeSet};

use super::structures::*;

/// Upper bound on nodes followed in one linked list of the header
const MAX_LIST_NODES: usize = 4096;

/// Major version from which names are stored as UTF-16LE
const UTF16_NAMES_VERSION: i32 = 17;

/// Options controlling how an archive is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Explicit major version, overriding detection from the header
    pub version: Option<i32>,
    /// Code page for 8-bit names; UTF-8 (lossy) when unset
    pub encoding: Option<&'static Encoding>,
}

/// The parsed metadata of one header file.
///
/// Owns the raw header bytes and every table derived from them. File
/// descriptors are decoded on first access and cached for the lifetime of
/// the index; the cache is safe to fill from several threads.
pub struct ArchiveIndex {
    /// Volume number of the file this header was read from
    volume: u32,
    data: Vec<u8>,
    major_version: i32,
    encoding: Option<&'static Encoding>,
    common: CommonHeader,
    cab: CabDescriptor,
    file_table: Vec<u32>,
    descriptors: Vec<OnceLock<FileDescriptor>>,
    /// Members found to be split although their flags did not say so
    inferred_split: Vec<AtomicBool>,
    components: Vec<Component>,
    file_groups: Vec<FileGroup>,
}

impl ArchiveIndex {
    /// Load every header of a volume set, in volume order.
    ///
    /// `N.hdr` is preferred; once one is found it carries the metadata for
    /// the whole set and iteration stops. Otherwise each `N.cab` is read as
    /// a header until the first missing volume. Any failure aborts the load.
    pub fn load_all(volumes: &VolumeSet, options: &OpenOptions) -> Result<Vec<ArchiveIndex>> {
        let mut headers = Vec::new();

        for index in 1.. {
            let (path, last) = match volumes.find(index, HEADER_SUFFIX) {
                Some(path) => (path, true),
                None => match volumes.find(index, CABINET_SUFFIX) {
                    Some(path) => (path, false),
                    None => break,
                },
            };

            debug!("Reading header from {}", path.display());
            let data = std::fs::read(&path)?;
            headers.push(Self::from_bytes(data, index, options)?);

            if last {
                break;
            }
        }

        if headers.is_empty() {
            return Err(Error::VolumeOpenFailure {
                volume: 1,
                reason: format!("no {}1.{} or .{} found", volumes.prefix(), HEADER_SUFFIX, CABINET_SUFFIX),
            });
        }
        Ok(headers)
    }

    /// Parse one header file already read into memory.
    pub fn from_bytes(data: Vec<u8>, volume: u32, options: &OpenOptions) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::TruncatedHeader {
                what: "header file",
                offset: 0,
                needed: 4,
                available: data.len(),
            });
        }

        let common = CommonHeader::from_bytes(&data)?;

        let major_version = match options.version {
            Some(version) => version,
            None => match common.major_version() {
                Some(version) => version,
                None => {
                    warn!(
                        "Unknown version encoding {:#010x}, assuming the oldest layout",
                        common.version
                    );
                    0
                }
            },
        };
        debug!(
            "Version {:#010x} handled as major version {}",
            common.version, major_version
        );

        if common.cab_descriptor_size == 0 {
            return Err(Error::MissingCabDescriptor);
        }
        let cab = CabDescriptor::from_bytes(&data, common.cab_descriptor_offset as usize)?;
        if cab.file_table_size != cab.file_table_size2 {
            warn!(
                "{}",
                Error::TableSizeMismatch {
                    first: cab.file_table_size,
                    second: cab.file_table_size2,
                }
            );
        }
        trace!(
            "Cabinet descriptor: {} directories, {} files, file table at {:#x}",
            cab.directory_count, cab.file_count, cab.file_table_offset
        );

        let mut index = Self {
            volume,
            data,
            major_version,
            encoding: options.encoding,
            common,
            cab,
            file_table: Vec::new(),
            descriptors: Vec::new(),
            inferred_split: Vec::new(),
            components: Vec::new(),
            file_groups: Vec::new(),
        };

        index.file_table = index.read_file_table()?;
        let file_count = index.cab.file_count as usize;
        index.descriptors = (0..file_count).map(|_| OnceLock::new()).collect();
        index.inferred_split = (0..file_count).map(|_| AtomicBool::new(false)).collect();
        index.components = index.read_components()?;
        index.file_groups = index.read_file_groups()?;

        debug!(
            "Loaded header {}: {} components, {} file groups",
            volume,
            index.components.len(),
            index.file_groups.len()
        );
        Ok(index)
    }

    /// Resolve an offset relative to the cabinet descriptor into a position
    /// in the header buffer. Zero means "absent" and is rejected.
    pub fn resolve_offset(&self, offset: u32) -> Result<usize> {
        if offset == 0 {
            return Err(Error::InvalidOffset(offset));
        }
        Ok(self.common.cab_descriptor_offset as usize + offset as usize)
    }

    fn read_file_table(&self) -> Result<Vec<u32>> {
        let count = self.cab.directory_count as usize + self.cab.file_count as usize;
        let start = self.file_table_base();
        let mut cursor = ByteCursor::at(&self.data, start, "file table")?;
        cursor.read_u32_table(count)
    }

    /// Position of the file table, which also anchors name offsets
    fn file_table_base(&self) -> usize {
        self.common.cab_descriptor_offset as usize + self.cab.file_table_offset as usize
    }

    /// Walk the linked lists hanging off a slot table, returning the
    /// descriptor offset of every node in slot order.
    fn walk_offset_list(&self, slots: &[u32], what: &'static str) -> Result<Vec<u32>> {
        let mut descriptors = Vec::new();

        for &head in slots.iter().filter(|&&head| head != 0) {
            let mut next = head;
            while next != 0 {
                if descriptors.len() >= MAX_LIST_NODES {
                    warn!("Stopped following {} list after {} nodes", what, MAX_LIST_NODES);
                    return Ok(descriptors);
                }
                let mut cursor = ByteCursor::at(&self.data, self.resolve_offset(next)?, what)?;
                let _name_offset = cursor.read_u32()?;
                let descriptor_offset = cursor.read_u32()?;
                next = cursor.read_u32()?;
                descriptors.push(descriptor_offset);
            }
        }

        Ok(descriptors)
    }

    fn read_components(&self) -> Result<Vec<Component>> {
        self.walk_offset_list(&self.cab.component_offsets, "component list")?
            .into_iter()
            .map(|offset| self.read_component(offset))
            .collect()
    }

    fn read_component(&self, offset: u32) -> Result<Component> {
        let mut cursor = ByteCursor::at(&self.data, self.resolve_offset(offset)?, "component")?;

        let name = self.string_at_offset(cursor.read_u32()?)?;
        cursor.skip(if self.major_version <= 5 { 0x6c } else { 0x6b })?;
        let file_group_count = cursor.read_u16()? as usize;
        if file_group_count > MAX_FILE_GROUP_COUNT {
            return Err(Error::TableOverflow {
                what: "Component file group",
                count: file_group_count,
                max: MAX_FILE_GROUP_COUNT,
            });
        }
        let table_offset = cursor.read_u32()?;

        let file_group_names = if file_group_count == 0 {
            Vec::new()
        } else {
            let mut table =
                ByteCursor::at(&self.data, self.resolve_offset(table_offset)?, "component")?;
            table
                .read_u32_table(file_group_count)?
                .into_iter()
                .map(|name| self.string_at_offset(name))
                .collect::<Result<_>>()?
        };

        Ok(Component {
            name,
            file_group_names,
        })
    }

    fn read_file_groups(&self) -> Result<Vec<FileGroup>> {
        self.walk_offset_list(&self.cab.file_group_offsets, "file group list")?
            .into_iter()
            .map(|offset| self.read_file_group(offset))
            .collect()
    }

    fn read_file_group(&self, offset: u32) -> Result<FileGroup> {
        let mut cursor = ByteCursor::at(&self.data, self.resolve_offset(offset)?, "file group")?;

        let name = self.string_at_offset(cursor.read_u32()?)?;
        cursor.skip(if self.major_version <= 5 { 0x48 } else { 0x12 })?;

        Ok(FileGroup {
            name,
            first_file: cursor.read_u32()?,
            last_file: cursor.read_u32()?,
        })
    }

    /// Decode the string at a descriptor-relative offset.
    fn string_at_offset(&self, offset: u32) -> Result<String> {
        let position = self.resolve_offset(offset)?;
        self.string_at(position)
    }

    /// Decode a NUL-terminated name at an absolute buffer position.
    fn string_at(&self, position: usize) -> Result<String> {
        if self.major_version >= UTF16_NAMES_VERSION {
            let mut cursor = ByteCursor::at(&self.data, position, "name")?;
            let units: Vec<u16> = cursor
                .read_until_nul(2)
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            return Ok(String::from_utf16_lossy(&units));
        }

        let mut cursor = ByteCursor::at(&self.data, position, "name")?;
        let bytes = cursor.read_until_nul(1);
        Ok(match self.encoding {
            Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        })
    }

    /// Volume number of the file this header was read from
    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn major_version(&self) -> i32 {
        self.major_version
    }

    pub fn common_header(&self) -> &CommonHeader {
        &self.common
    }

    pub fn cab_descriptor(&self) -> &CabDescriptor {
        &self.cab
    }

    pub fn file_count(&self) -> usize {
        self.cab.file_count as usize
    }

    pub fn directory_count(&self) -> usize {
        self.cab.directory_count as usize
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn file_groups(&self) -> &[FileGroup] {
        &self.file_groups
    }

    /// Name of directory `index`.
    pub fn directory_name(&self, index: usize) -> Result<String> {
        if index >= self.directory_count() {
            return Err(Error::InvalidIndex {
                what: "Directory",
                index,
                count: self.directory_count(),
            });
        }
        self.string_at(self.file_table_base() + self.file_table[index] as usize)
    }

    /// Name of file `index`, as stored (without its directory).
    pub fn file_name(&self, index: usize) -> Result<String> {
        let descriptor = self.file_descriptor(index)?;
        self.string_at(self.file_table_base() + descriptor.name_offset as usize)
    }

    /// Descriptor of file `index`, decoding and caching it on first use.
    ///
    /// The returned copy has [`FILE_SPLIT`] set if a volume header showed
    /// the member to be split.
    pub fn file_descriptor(&self, index: usize) -> Result<FileDescriptor> {
        let slot = self.descriptors.get(index).ok_or_else(|| Error::InvalidIndex {
            what: "File",
            index,
            count: self.file_count(),
        })?;

        let cached = match slot.get() {
            Some(descriptor) => descriptor,
            None => {
                let descriptor = self.read_file_descriptor(index)?;
                slot.get_or_init(|| descriptor)
            }
        };

        let mut descriptor = cached.clone();
        if self.inferred_split[index].load(Ordering::Relaxed) {
            descriptor.flags |= FILE_SPLIT;
        }
        Ok(descriptor)
    }

    /// Record that member `index` spans volumes.
    pub fn mark_split(&self, index: usize) {
        if let Some(flag) = self.inferred_split.get(index) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    fn read_file_descriptor(&self, index: usize) -> Result<FileDescriptor> {
        let descriptor = if self.major_version <= 5 {
            let entry = self.file_table[self.directory_count() + index];
            FileDescriptor::from_legacy_bytes(
                &self.data,
                self.file_table_base() + entry as usize,
                self.volume as u16,
            )?
        } else {
            let position = self.file_table_base()
                + self.cab.file_table_offset2 as usize
                + index * FileDescriptor::SIZE;
            FileDescriptor::from_bytes(&self.data, position)?
        };

        if !descriptor.is_compressed() && descriptor.compressed_size != descriptor.expanded_size {
            warn!(
                "File {} is not compressed but compressed size is {:#010x} and expanded size is {:#010x}",
                index, descriptor.compressed_size, descriptor.expanded_size
            );
        }
        Ok(descriptor)
    }
}
