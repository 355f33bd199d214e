use crate::error::{Error, Result, Signature};
use crate::io::ByteCursor;

/// Installer cabinet magic ("ISc(")
pub const CAB_SIGNATURE: u32 = 0x2863_5349;
/// Microsoft cabinet magic ("MSCF"), a different format with a different tool
pub const MSCF_SIGNATURE: u32 = 0x4643_534D;

/// Slots in the component and file group offset tables
pub const MAX_COMPONENT_COUNT: usize = 71;
pub const MAX_FILE_GROUP_COUNT: usize = 71;

/// I/O and inflate buffer size
pub const BUFFER_SIZE: usize = 64 * 1024;

/// File descriptor flags
pub const FILE_SPLIT: u16 = 0x0001;
pub const FILE_OBFUSCATED: u16 = 0x0002;
pub const FILE_COMPRESSED: u16 = 0x0004;
pub const FILE_INVALID: u16 = 0x0008;

/// File descriptor link flags
pub const LINK_NONE: u8 = 0;
pub const LINK_PREV: u8 = 1;
pub const LINK_NEXT: u8 = 2;

/// Header present at the start of every header and volume file - 20 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub signature: u32,
    pub version: u32,
    pub volume_info: u32,
    pub cab_descriptor_offset: u32,
    pub cab_descriptor_size: u32,
}

impl CommonHeader {
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data, "common header");

        let signature = cursor.read_u32()?;
        match signature {
            CAB_SIGNATURE => {}
            MSCF_SIGNATURE => return Err(Error::BadSignature(Signature::MicrosoftCabinet)),
            other => return Err(Error::BadSignature(Signature::Unknown(other))),
        }

        Ok(Self {
            signature,
            version: cursor.read_u32()?,
            volume_info: cursor.read_u32()?,
            cab_descriptor_offset: cursor.read_u32()?,
            cab_descriptor_size: cursor.read_u32()?,
        })
    }

    /// Derive the major version from the packed version word.
    ///
    /// Returns `None` when the encoding is not recognised.
    pub fn major_version(&self) -> Option<i32> {
        let version = self.version;
        match version >> 24 {
            1 => Some(((version >> 12) & 0xf) as i32),
            2 | 4 => {
                let packed = (version & 0xffff) as i32;
                Some(if packed != 0 { packed / 100 } else { packed })
            }
            _ => None,
        }
    }
}

/// Cabinet descriptor, located at `cab_descriptor_offset` in the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabDescriptor {
    pub file_table_offset: u32,
    pub file_table_size: u32,
    pub file_table_size2: u32,
    pub directory_count: u32,
    pub file_count: u32,
    pub file_table_offset2: u32,
    pub file_group_offsets: [u32; MAX_FILE_GROUP_COUNT],
    pub component_offsets: [u32; MAX_COMPONENT_COUNT],
}

impl CabDescriptor {
    /// Fixed part before the two offset tables
    const FIXED_SIZE: usize = 0x3e;
    pub const SIZE: usize = Self::FIXED_SIZE + 4 * (MAX_FILE_GROUP_COUNT + MAX_COMPONENT_COUNT);

    pub fn from_bytes(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = ByteCursor::at(data, offset, "cabinet descriptor")?;

        cursor.skip(0xc)?;
        let file_table_offset = cursor.read_u32()?;
        cursor.skip(4)?;
        let file_table_size = cursor.read_u32()?;
        let file_table_size2 = cursor.read_u32()?;
        let directory_count = cursor.read_u32()?;
        cursor.skip(8)?;
        let file_count = cursor.read_u32()?;
        let file_table_offset2 = cursor.read_u32()?;
        cursor.skip(Self::FIXED_SIZE - 0x30)?;

        let mut file_group_offsets = [0u32; MAX_FILE_GROUP_COUNT];
        for slot in file_group_offsets.iter_mut() {
            *slot = cursor.read_u32()?;
        }
        let mut component_offsets = [0u32; MAX_COMPONENT_COUNT];
        for slot in component_offsets.iter_mut() {
            *slot = cursor.read_u32()?;
        }

        Ok(Self {
            file_table_offset,
            file_table_size,
            file_table_size2,
            directory_count,
            file_count,
            file_table_offset2,
            file_group_offsets,
            component_offsets,
        })
    }
}

/// Metadata for one member file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name_offset: u32,
    pub directory_index: u32,
    pub flags: u16,
    pub expanded_size: u32,
    pub compressed_size: u32,
    pub data_offset: u32,
    /// Only meaningful for major version 5 and later
    pub md5: [u8; 16],
    pub volume: u16,
    pub link_previous: u32,
    pub link_next: u32,
    pub link_flags: u8,
}

impl FileDescriptor {
    /// On-disk size of the layout used up to major version 5
    pub const LEGACY_SIZE: usize = 0x3a;
    /// On-disk size of the layout used from major version 6
    pub const SIZE: usize = 0x57;

    /// Decode the layout used up to major version 5. These archives record
    /// no volume or links; `volume` is the index of the header file.
    pub fn from_legacy_bytes(data: &[u8], offset: usize, volume: u16) -> Result<Self> {
        let mut cursor = ByteCursor::at(data, offset, "file descriptor")?;

        let name_offset = cursor.read_u32()?;
        let directory_index = cursor.read_u32()?;
        let flags = cursor.read_u16()?;
        let expanded_size = cursor.read_u32()?;
        let compressed_size = cursor.read_u32()?;
        cursor.skip(0x14)?;
        let data_offset = cursor.read_u32()?;
        let md5 = cursor.read_array::<16>()?;

        Ok(Self {
            name_offset,
            directory_index,
            flags,
            expanded_size,
            compressed_size,
            data_offset,
            md5,
            volume,
            link_previous: 0,
            link_next: 0,
            link_flags: LINK_NONE,
        })
    }

    /// Decode the layout used from major version 6.
    pub fn from_bytes(data: &[u8], offset: usize) -> Result<Self> {
        let mut cursor = ByteCursor::at(data, offset, "file descriptor")?;

        let flags = cursor.read_u16()?;
        let expanded_size = cursor.read_u32()?;
        cursor.skip(4)?;
        let compressed_size = cursor.read_u32()?;
        cursor.skip(4)?;
        let data_offset = cursor.read_u32()?;
        cursor.skip(4)?;
        let md5 = cursor.read_array::<16>()?;
        cursor.skip(0x10)?;
        let name_offset = cursor.read_u32()?;
        let directory_index = cursor.read_u16()? as u32;
        cursor.skip(0xc)?;
        let link_previous = cursor.read_u32()?;
        let link_next = cursor.read_u32()?;
        let link_flags = cursor.read_u8()?;
        let volume = cursor.read_u16()?;

        Ok(Self {
            name_offset,
            directory_index,
            flags,
            expanded_size,
            compressed_size,
            data_offset,
            md5,
            volume,
            link_previous,
            link_next,
            link_flags,
        })
    }

    pub fn is_split(&self) -> bool {
        self.flags & FILE_SPLIT != 0
    }

    pub fn is_obfuscated(&self) -> bool {
        self.flags & FILE_OBFUSCATED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FILE_COMPRESSED != 0
    }

    pub fn is_invalid(&self) -> bool {
        self.flags & FILE_INVALID != 0
    }

    pub fn links_previous(&self) -> bool {
        self.link_flags & LINK_PREV != 0
    }

    /// Bytes stored in the volumes for this member
    pub fn stored_size(&self) -> u32 {
        if self.is_compressed() {
            self.compressed_size
        } else {
            self.expanded_size
        }
    }
}

/// A named component and the file groups it installs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub file_group_names: Vec<String>,
}

/// A named, contiguous range of member indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub name: String,
    pub first_file: u32,
    pub last_file: u32,
}

impl FileGroup {
    /// Member indices in this group, inclusive of both ends
    pub fn files(&self) -> std::ops::RangeInclusive<usize> {
        self.first_file as usize..=self.last_file as usize
    }
}

/// Per-volume data boundaries, stored right after the common header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeHeader {
    pub data_offset: u32,
    pub first_file_index: u32,
    pub last_file_index: u32,
    pub first_file_offset: u32,
    pub first_file_size_expanded: u32,
    pub first_file_size_compressed: u32,
    pub last_file_offset: u32,
    pub last_file_size_expanded: u32,
    pub last_file_size_compressed: u32,
}

impl VolumeHeader {
    /// Layout used up to major version 5
    pub const LEGACY_SIZE: usize = 40;
    /// Layout used from major version 6, with 64-bit fields
    pub const SIZE: usize = 64;

    /// `last_file_offset` value meaning the volume ends on no member boundary
    pub const NO_LAST_FILE: u32 = i32::MAX as u32;

    /// On-disk size for the given major version
    pub fn size_for(major_version: i32) -> usize {
        if major_version <= 5 {
            Self::LEGACY_SIZE
        } else {
            Self::SIZE
        }
    }

    pub fn from_bytes(data: &[u8], major_version: i32) -> Result<Self> {
        let mut cursor = ByteCursor::new(data, "volume header");

        if major_version <= 5 {
            let data_offset = cursor.read_u32()?;
            cursor.skip(4)?;
            let mut header = Self {
                data_offset,
                first_file_index: cursor.read_u32()?,
                last_file_index: cursor.read_u32()?,
                first_file_offset: cursor.read_u32()?,
                first_file_size_expanded: cursor.read_u32()?,
                first_file_size_compressed: cursor.read_u32()?,
                last_file_offset: cursor.read_u32()?,
                last_file_size_expanded: cursor.read_u32()?,
                last_file_size_compressed: cursor.read_u32()?,
            };
            if header.last_file_offset == 0 {
                header.last_file_offset = Self::NO_LAST_FILE;
            }
            Ok(header)
        } else {
            Ok(Self {
                data_offset: read_low_word(&mut cursor)?,
                first_file_index: cursor.read_u32()?,
                last_file_index: cursor.read_u32()?,
                first_file_offset: read_low_word(&mut cursor)?,
                first_file_size_expanded: read_low_word(&mut cursor)?,
                first_file_size_compressed: read_low_word(&mut cursor)?,
                last_file_offset: read_low_word(&mut cursor)?,
                last_file_size_expanded: read_low_word(&mut cursor)?,
                last_file_size_compressed: read_low_word(&mut cursor)?,
            })
        }
    }
}

/// Read a 64-bit low/high pair, keeping only the low half.
fn read_low_word(cursor: &mut ByteCursor<'_>) -> Result<u32> {
    let low = cursor.read_u32()?;
    cursor.skip(4)?;
    Ok(low)
}
