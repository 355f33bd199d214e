use anyhow::{Result, anyhow};
use clap::Parser;

use crate::cab::{ExtractMode, OpenOptions};

#[derive(Parser, Debug)]
#[command(name = "iscab")]
#[command(version)]
#[command(about = "Extract files from legacy installer cabinet archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  iscab disk1/data1.cab               extract all files from the archive\n  \
  iscab -l data1.hdr                  list files, reading metadata from the header file\n  \
  iscab -g \"Program Files\" data1.cab  extract one file group\n  \
  iscab -O -d out data1.cab '*.dll'   extract DLLs from an old archive")]
pub struct Cli {
    /// Cabinet or header file, e.g. data1.cab
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely, with sizes, flags and volume
    #[arg(short = 'v')]
    pub verbose: bool,

    /// List components
    #[arg(short = 'c')]
    pub components: bool,

    /// List file groups
    #[arg(short = 'G')]
    pub file_groups: bool,

    /// Only handle files in this file group
    #[arg(short = 'g', value_name = "GROUP")]
    pub group: Option<String>,

    /// Test files: extract and verify without writing anything
    #[arg(short = 't')]
    pub test: bool,

    /// Use the old chunk framing for compressed files
    #[arg(short = 'O')]
    pub old_compression: bool,

    /// Extract stored bytes without decompressing
    #[arg(short = 'r', conflicts_with = "old_compression")]
    pub raw: bool,

    /// Force the archive major version instead of detecting it
    #[arg(short = 'M', long = "major-version", value_name = "VERSION")]
    pub major_version: Option<i32>,

    /// Code page of file names in old archives, e.g. windows-1252
    #[arg(short = 'e', value_name = "ENCODING")]
    pub encoding: Option<String>,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Log debug details to stderr
    #[arg(short = 'D', long = "debug")]
    pub debug: bool,
}

impl Cli {
    pub fn is_listing(&self) -> bool {
        self.list || self.verbose || self.components || self.file_groups
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn extract_mode(&self) -> ExtractMode {
        if self.raw {
            ExtractMode::Raw
        } else if self.old_compression {
            ExtractMode::Legacy
        } else {
            ExtractMode::Current
        }
    }

    pub fn open_options(&self) -> Result<OpenOptions> {
        let encoding = match &self.encoding {
            Some(label) => Some(
                encoding_rs::Encoding::for_label(label.as_bytes())
                    .ok_or_else(|| anyhow!("Unknown encoding: {label}"))?,
            ),
            None => None,
        };
        Ok(OpenOptions {
            version: self.major_version,
            encoding,
        })
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "iscab=debug"
        } else if self.is_very_quiet() {
            "off"
        } else if self.is_quiet() {
            "error"
        } else {
            "warn"
        }
    }
}
