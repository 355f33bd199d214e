//! Writes small synthetic cabinet archives for the integration tests.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::{Compress, Compression, FlushCompress};
use md5::{Digest, Md5};
use std::io::Write;
use std::path::{Path, PathBuf};

use iscab::cab::{
    CAB_SIGNATURE, CabDescriptor, FILE_COMPRESSED, FILE_INVALID, FILE_OBFUSCATED, FILE_SPLIT,
    LINK_PREV, MAX_FILE_GROUP_COUNT, obfuscate,
};

/// Start of member data in volume files without an embedded header
pub const DATA_START: usize = 0x100;
/// Cabinet descriptor offset in header files
pub const CDO: usize = 0x200;
/// File table offset, relative to the cabinet descriptor
const FILE_TABLE: usize = 0x280;

#[derive(Clone)]
pub struct Member {
    pub name: String,
    pub directory: u32,
    pub content: Vec<u8>,
    /// Bytes as written to the volumes
    pub stored: Vec<u8>,
    pub flags: u16,
    pub volume: u16,
    pub link_previous: u32,
    pub link_flags: u8,
    /// Bytes of `stored` kept on `volume`; the rest go to the next volume
    pub split_at: Option<usize>,
    pub md5: Option<[u8; 16]>,
}

impl Member {
    pub fn stored(name: &str, content: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            directory: 0,
            content: content.to_vec(),
            stored: content.to_vec(),
            flags: 0,
            volume: 1,
            link_previous: 0,
            link_flags: 0,
            split_at: None,
            md5: None,
        }
    }

    /// Length-framed raw deflate chunks of at most 32 KiB input each.
    pub fn compressed(name: &str, content: &[u8]) -> Self {
        Self::compressed_in_chunks(name, content, 0x8000)
    }

    /// Length-framed raw deflate chunks of at most `chunk_len` input each.
    /// Each compressed chunk must fit the `u16` length.
    pub fn compressed_in_chunks(name: &str, content: &[u8], chunk_len: usize) -> Self {
        let mut stored = Vec::new();
        for piece in content.chunks(chunk_len) {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(piece).unwrap();
            let chunk = encoder.finish().unwrap();
            assert!(chunk.len() <= u16::MAX as usize);
            stored.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
            stored.extend_from_slice(&chunk);
        }
        Self {
            stored,
            flags: FILE_COMPRESSED,
            ..Self::stored(name, content)
        }
    }

    /// Sync-flushed deflate chunks from one compressor, each ending in
    /// `00 00 FF FF`.
    pub fn legacy_compressed(name: &str, content: &[u8]) -> Self {
        let mut compress = Compress::new(Compression::default(), false);
        let mut stored = Vec::new();
        for piece in content.chunks(0x1000) {
            let mut out = Vec::with_capacity(piece.len() * 2 + 128);
            compress
                .compress_vec(piece, &mut out, FlushCompress::Sync)
                .unwrap();
            assert!(out.ends_with(&[0x00, 0x00, 0xff, 0xff]));
            stored.extend_from_slice(&out);
        }
        Self {
            stored,
            flags: FILE_COMPRESSED,
            ..Self::stored(name, content)
        }
    }

    /// A member whose data is that of `previous`.
    pub fn linked(name: &str, previous: u32, content: &[u8]) -> Self {
        Self {
            stored: Vec::new(),
            link_previous: previous,
            link_flags: LINK_PREV,
            ..Self::stored(name, content)
        }
    }

    pub fn in_directory(mut self, directory: u32) -> Self {
        self.directory = directory;
        self
    }

    pub fn obfuscated(mut self) -> Self {
        let mut seed = 0;
        obfuscate(&mut self.stored, &mut seed);
        self.flags |= FILE_OBFUSCATED;
        self
    }

    pub fn on_volume(mut self, volume: u16) -> Self {
        self.volume = volume;
        self
    }

    /// Keep `bytes` on this member's volume and continue on the next one.
    pub fn split_at(mut self, bytes: usize, flagged: bool) -> Self {
        self.split_at = Some(bytes);
        if flagged {
            self.flags |= FILE_SPLIT;
        }
        self
    }

    pub fn invalid(mut self) -> Self {
        self.flags |= FILE_INVALID;
        self
    }

    pub fn with_md5(mut self, md5: [u8; 16]) -> Self {
        self.md5 = Some(md5);
        self
    }

    fn digest(&self) -> [u8; 16] {
        self.md5.unwrap_or_else(|| {
            let mut out = [0u8; 16];
            out.copy_from_slice(&Md5::digest(&self.content));
            out
        })
    }
}

/// One member's bytes within one volume
#[derive(Clone, Copy)]
struct Segment {
    member: usize,
    offset: usize,
    len: usize,
    expanded: usize,
}

pub struct ArchiveBuilder {
    major_version: i32,
    directories: Vec<String>,
    members: Vec<Member>,
    file_groups: Vec<(String, u32, u32)>,
    components: Vec<(String, Vec<String>)>,
    header_in_cab: bool,
}

impl ArchiveBuilder {
    pub fn new(major_version: i32) -> Self {
        Self {
            major_version,
            directories: Vec::new(),
            members: Vec::new(),
            file_groups: Vec::new(),
            components: Vec::new(),
            header_in_cab: false,
        }
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.directories.push(name.to_string());
        self
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn file_group(mut self, name: &str, first: u32, last: u32) -> Self {
        self.file_groups.push((name.to_string(), first, last));
        self
    }

    pub fn component(mut self, name: &str, groups: &[&str]) -> Self {
        self.components
            .push((name.to_string(), groups.iter().map(|g| g.to_string()).collect()));
        self
    }

    /// Store the header in `data1.cab` instead of a separate `data1.hdr`.
    pub fn header_in_cab(mut self) -> Self {
        self.header_in_cab = true;
        self
    }

    fn version_word(&self) -> u32 {
        if self.major_version < 16 {
            0x0100_0000 | ((self.major_version as u32) << 12)
        } else {
            0x0400_0000 | (self.major_version as u32 * 100)
        }
    }

    fn encode_name(&self, name: &str) -> Vec<u8> {
        if self.major_version >= 17 {
            let mut out: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            out.extend_from_slice(&[0, 0]);
            out
        } else {
            let mut out = name.as_bytes().to_vec();
            out.push(0);
            out
        }
    }

    /// Write the archive into `dir`, returning the path of `data1.cab`.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let header_len = self.header(&vec![0; self.members.len()]).len();
        let volume_one_start = if self.header_in_cab {
            (header_len + 0xf) & !0xf
        } else {
            DATA_START
        };

        // Lay out member data across volumes
        let volume_count = self
            .members
            .iter()
            .map(|m| m.volume as usize + m.split_at.is_some() as usize)
            .max()
            .unwrap_or(1);
        let mut volumes: Vec<Vec<u8>> = vec![Vec::new(); volume_count + 1];
        let mut segments: Vec<Vec<Segment>> = vec![Vec::new(); volume_count + 1];
        let start = |v: usize| if v == 1 { volume_one_start } else { DATA_START };
        let mut data_offsets = Vec::new();

        for (index, member) in self.members.iter().enumerate() {
            let v = member.volume as usize;
            let offset = start(v) + volumes[v].len();
            data_offsets.push(offset as u32);

            match member.split_at {
                Some(n) => {
                    volumes[v].extend_from_slice(&member.stored[..n]);
                    segments[v].push(Segment {
                        member: index,
                        offset,
                        len: n,
                        expanded: n,
                    });
                    let next_offset = start(v + 1) + volumes[v + 1].len();
                    volumes[v + 1].extend_from_slice(&member.stored[n..]);
                    segments[v + 1].push(Segment {
                        member: index,
                        offset: next_offset,
                        len: member.stored.len() - n,
                        expanded: member.stored.len() - n,
                    });
                }
                None => {
                    volumes[v].extend_from_slice(&member.stored);
                    segments[v].push(Segment {
                        member: index,
                        offset,
                        len: member.stored.len(),
                        expanded: member.content.len(),
                    });
                }
            }
        }

        let header = self.header(&data_offsets);
        if !self.header_in_cab {
            std::fs::write(dir.join("data1.hdr"), &header).unwrap();
        }

        for v in 1..=volume_count {
            let mut file = if self.header_in_cab && v == 1 {
                header.clone()
            } else {
                let mut head = Vec::new();
                put_u32(&mut head, CAB_SIGNATURE);
                put_u32(&mut head, self.version_word());
                head.resize(20, 0);
                head
            };
            file.resize(file.len().max(DATA_START), 0);
            let volume_header = self.volume_header(&segments[v]);
            file[20..20 + volume_header.len()].copy_from_slice(&volume_header);
            file.resize(start(v), 0);
            file.extend_from_slice(&volumes[v]);
            std::fs::write(dir.join(format!("data{v}.cab")), file).unwrap();
        }

        dir.join("data1.cab")
    }

    fn volume_header(&self, segments: &[Segment]) -> Vec<u8> {
        let empty = Segment {
            member: 0,
            offset: 0,
            len: 0,
            expanded: 0,
        };
        let first = segments.first().copied().unwrap_or(empty);
        let last = segments.last().copied().unwrap_or(empty);

        let mut out = Vec::new();
        if self.major_version <= 5 {
            for value in [
                DATA_START,
                0,
                first.member,
                last.member,
                first.offset,
                first.expanded,
                first.len,
                last.offset,
                last.expanded,
                last.len,
            ] {
                put_u32(&mut out, value as u32);
            }
        } else {
            put_u64(&mut out, DATA_START as u64);
            put_u32(&mut out, first.member as u32);
            put_u32(&mut out, last.member as u32);
            for value in [
                first.offset,
                first.expanded,
                first.len,
                last.offset,
                last.expanded,
                last.len,
            ] {
                put_u64(&mut out, value as u64);
            }
        }
        out
    }

    fn header(&self, data_offsets: &[u32]) -> Vec<u8> {
        let legacy = self.major_version <= 5;
        let entries = self.directories.len() + self.members.len();

        // File table: entries, names, then descriptors
        let mut ft = vec![0u8; 4 * entries];
        let mut table = Vec::new();
        for directory in &self.directories {
            table.push(ft.len() as u32);
            ft.extend_from_slice(&self.encode_name(directory));
        }
        let mut name_offsets = Vec::new();
        for member in &self.members {
            name_offsets.push(ft.len() as u32);
            ft.extend_from_slice(&self.encode_name(&member.name));
        }

        let descriptors_start = ft.len();
        for (index, member) in self.members.iter().enumerate() {
            let mut fd = Vec::new();
            let stored = member.stored.len() as u32;
            let expanded = member.content.len() as u32;
            if legacy {
                table.push(ft.len() as u32);
                put_u32(&mut fd, name_offsets[index]);
                put_u32(&mut fd, member.directory);
                put_u16(&mut fd, member.flags);
                put_u32(&mut fd, expanded);
                put_u32(&mut fd, stored);
                fd.resize(fd.len() + 0x14, 0);
                put_u32(&mut fd, data_offsets[index]);
                fd.extend_from_slice(&member.digest());
                assert_eq!(fd.len(), 0x3a);
            } else {
                put_u16(&mut fd, member.flags);
                put_u32(&mut fd, expanded);
                put_u32(&mut fd, 0);
                put_u32(&mut fd, stored);
                put_u32(&mut fd, 0);
                put_u32(&mut fd, data_offsets[index]);
                put_u32(&mut fd, 0);
                fd.extend_from_slice(&member.digest());
                fd.resize(fd.len() + 0x10, 0);
                put_u32(&mut fd, name_offsets[index]);
                put_u16(&mut fd, member.directory as u16);
                fd.resize(fd.len() + 0xc, 0);
                put_u32(&mut fd, member.link_previous);
                put_u32(&mut fd, 0);
                fd.push(member.link_flags);
                put_u16(&mut fd, member.volume);
                assert_eq!(fd.len(), 0x57);
            }
            ft.extend_from_slice(&fd);
        }
        for (slot, value) in table.iter().enumerate() {
            ft[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }

        // Everything below is addressed relative to the cabinet descriptor
        let mut rel = vec![0u8; FILE_TABLE];
        rel.extend_from_slice(&ft);

        let mut group_head = 0u32;
        let mut previous_node: Option<usize> = None;
        for (name, first, last) in &self.file_groups {
            let name_offset = self.alloc_name(&mut rel, name);
            let descriptor = rel.len() as u32;
            put_u32(&mut rel, name_offset);
            rel.resize(rel.len() + if legacy { 0x48 } else { 0x12 }, 0);
            put_u32(&mut rel, *first);
            put_u32(&mut rel, *last);

            // Chain every group from slot 0
            let node = rel.len();
            put_u32(&mut rel, name_offset);
            put_u32(&mut rel, descriptor);
            put_u32(&mut rel, 0);
            match previous_node {
                Some(previous) => {
                    rel[previous + 8..previous + 12].copy_from_slice(&(node as u32).to_le_bytes())
                }
                None => group_head = node as u32,
            }
            previous_node = Some(node);
        }

        let mut component_heads = Vec::new();
        for (name, groups) in &self.components {
            let name_offset = self.alloc_name(&mut rel, name);
            let group_names: Vec<u32> = groups.iter().map(|g| self.alloc_name(&mut rel, g)).collect();
            let table_offset = if group_names.is_empty() { 0 } else { rel.len() as u32 };
            for offset in &group_names {
                put_u32(&mut rel, *offset);
            }
            let descriptor = rel.len() as u32;
            put_u32(&mut rel, name_offset);
            rel.resize(rel.len() + if legacy { 0x6c } else { 0x6b }, 0);
            put_u16(&mut rel, group_names.len() as u16);
            put_u32(&mut rel, table_offset);

            // One slot per component
            let node = rel.len() as u32;
            put_u32(&mut rel, name_offset);
            put_u32(&mut rel, descriptor);
            put_u32(&mut rel, 0);
            component_heads.push(node);
        }

        let mut cab = Vec::new();
        cab.resize(0x0c, 0);
        put_u32(&mut cab, FILE_TABLE as u32);
        put_u32(&mut cab, 0);
        put_u32(&mut cab, ft.len() as u32);
        put_u32(&mut cab, ft.len() as u32);
        put_u32(&mut cab, self.directories.len() as u32);
        cab.resize(0x28, 0);
        put_u32(&mut cab, self.members.len() as u32);
        put_u32(&mut cab, descriptors_start as u32);
        cab.resize(0x3e, 0);
        put_u32(&mut cab, group_head);
        cab.resize(0x3e + 4 * MAX_FILE_GROUP_COUNT, 0);
        for head in &component_heads {
            put_u32(&mut cab, *head);
        }
        cab.resize(CabDescriptor::SIZE, 0);
        rel[..cab.len()].copy_from_slice(&cab);

        let mut out = Vec::new();
        put_u32(&mut out, CAB_SIGNATURE);
        put_u32(&mut out, self.version_word());
        put_u32(&mut out, 0);
        put_u32(&mut out, CDO as u32);
        put_u32(&mut out, CabDescriptor::SIZE as u32);
        out.resize(CDO, 0);
        out.extend_from_slice(&rel);
        out
    }

    fn alloc_name(&self, rel: &mut Vec<u8>, name: &str) -> u32 {
        let offset = rel.len() as u32;
        rel.extend_from_slice(&self.encode_name(name));
        offset
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Printable sample content of `len` bytes.
pub fn text(len: usize, seed: u8) -> Vec<u8> {
    let words = ["cabinet ", "volume ", "member ", "chunk ", "deflate ", "header "];
    let mut out = Vec::with_capacity(len);
    let mut i = seed as usize;
    while out.len() < len {
        out.extend_from_slice(words[i % words.len()].as_bytes());
        i = i.wrapping_mul(7).wrapping_add(3);
    }
    out.truncate(len);
    out
}

/// Pseudo-random content that does not compress well.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
