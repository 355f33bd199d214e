use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::trace;

/// Suffix of metadata-only header files
pub const HEADER_SUFFIX: &str = "hdr";
/// Suffix of volume files carrying member data
pub const CABINET_SUFFIX: &str = "cab";

/// Upper bound on volumes probed when counting a volume set
const MAX_VOLUMES: u32 = 1000;

/// A numbered set of volume files on the local filesystem.
///
/// Given `disk1/data1.cab`, volume `n` with suffix `s` is `disk1/data<n>.<s>`.
/// Names are matched exactly first and then case-insensitively against the
/// directory listing, since archives copied off discs are often upper-case.
#[derive(Debug, Clone)]
pub struct VolumeSet {
    directory: PathBuf,
    prefix: String,
    volume_count: u32,
}

/// An opened volume file and its length.
pub struct VolumeFile {
    pub file: File,
    pub path: PathBuf,
    pub size: u64,
}

impl VolumeSet {
    /// Derive the volume set from any member path, e.g. `data1.cab`.
    pub fn new(path: &Path) -> Self {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit()).to_string();

        let mut set = Self {
            directory,
            prefix,
            volume_count: 0,
        };
        set.volume_count = (1..=MAX_VOLUMES)
            .take_while(|&n| set.find(n, CABINET_SUFFIX).is_some())
            .count() as u32;
        trace!(
            "Volume set {}/{}<n> has {} cabinet volumes",
            set.directory.display(),
            set.prefix,
            set.volume_count
        );
        set
    }

    /// Base name shared by every volume, without number or suffix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of contiguous `.cab` volumes present when the set was created
    pub fn volume_count(&self) -> u32 {
        self.volume_count
    }

    /// Locate volume `index` with the given suffix, if it exists.
    pub fn find(&self, index: u32, suffix: &str) -> Option<PathBuf> {
        let name = format!("{}{}.{}", self.prefix, index, suffix);
        let exact = self.directory.join(&name);
        if exact.is_file() {
            return Some(exact);
        }

        std::fs::read_dir(&self.directory)
            .ok()?
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(&name))
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
    }

    /// Open volume `index` with the given suffix.
    pub fn open(&self, index: u32, suffix: &str) -> std::io::Result<VolumeFile> {
        let path = self.find(index, suffix).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}{}.{} not found", self.prefix, index, suffix),
            )
        })?;
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(VolumeFile { file, path, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_strips_trailing_digits_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let set = VolumeSet::new(&dir.path().join("data12.cab"));
        assert_eq!(set.prefix(), "data");
        assert_eq!(set.volume_count(), 0);
    }

    #[test]
    fn finds_volumes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DATA1.CAB"), b"one").unwrap();
        std::fs::write(dir.path().join("data2.cab"), b"two").unwrap();
        std::fs::write(dir.path().join("data4.cab"), b"gap").unwrap();

        let set = VolumeSet::new(&dir.path().join("data1.cab"));
        assert_eq!(set.volume_count(), 2);

        let volume = set.open(1, CABINET_SUFFIX).unwrap();
        assert_eq!(volume.size, 3);
        assert!(set.find(1, HEADER_SUFFIX).is_none());
        assert!(set.open(3, CABINET_SUFFIX).is_err());
    }
}
