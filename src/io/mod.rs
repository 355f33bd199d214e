mod cursor;
mod local;

pub use cursor::ByteCursor;
pub use local::{CABINET_SUFFIX, HEADER_SUFFIX, VolumeFile, VolumeSet};
