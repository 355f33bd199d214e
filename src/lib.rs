//! # iscab
//!
//! A Rust reader for legacy installer cabinet archives.
//!
//! These archives are sets of numbered volume files (`data1.hdr`,
//! `data1.cab`, `data2.cab`, ...) holding a header index of directories,
//! files, components and file groups, followed by member data that may be
//! deflate-compressed, byte-scrambled and split across volumes.
//!
//! ## Features
//!
//! - Header layouts from the oldest format through UTF-16 names (version 17+)
//! - Both compressed chunk framings: length-prefixed, and the older
//!   end-of-chunk marker framing
//! - Members spanning several volumes, including split detection for
//!   version 5 archives that do not flag it
//! - Size and MD5 verification of extracted members
//! - Raw extraction of stored bytes for recovery
//!
//! ## Example
//!
//! ```no_run
//! use iscab::Catalog;
//!
//! fn main() -> iscab::Result<()> {
//!     let catalog = Catalog::open("disk1/data1.cab")?;
//!
//!     for index in 0..catalog.file_count() {
//!         if !catalog.file_is_valid(index) {
//!             continue;
//!         }
//!         let path = catalog.file_path(index).unwrap_or_default();
//!         let mut data = Vec::new();
//!         catalog.extract(index, &mut data)?;
//!         println!("{path}: {} bytes", data.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cab;
pub mod cli;
pub mod error;
pub mod io;

pub use cab::{Catalog, ExtractMode, OpenOptions};
pub use cli::Cli;
pub use error::{Error, InflateFailure, Result, Signature};
pub use io::{ByteCursor, VolumeSet};
