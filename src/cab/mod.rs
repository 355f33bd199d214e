//! Installer cabinet parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk structures, flags and constants
//! - [`parser`]: the header index (descriptor, file table, components, groups)
//! - [`reader`]: a member's byte stream across volume files, with deobfuscation
//! - [`inflate`]: the two compressed chunk framings
//! - [`extractor`]: the [`Catalog`] API tying the above together
//!
//! ## Format Overview
//!
//! An archive is a numbered set of files sharing a base name:
//!
//! ```text
//! data1.hdr   metadata only (optional; otherwise data1.cab carries it)
//! data1.cab   common header, volume header, member data
//! data2.cab   ...
//! ```
//!
//! Members are stored raw or as raw deflate, optionally scrambled, and may
//! continue from the end of one volume into the start of the next.
//!
//! ## Limitations
//!
//! - Only the first header's tables are used for lookups
//! - No writing or repacking of archives

pub mod extractor;
pub mod inflate;
pub mod parser;
pub mod reader;
pub mod structures;

pub use extractor::{Catalog, ExtractMode};
pub use parser::{ArchiveIndex, OpenOptions};
pub use reader::{VolumeReader, deobfuscate, obfuscate};
pub use structures::*;
