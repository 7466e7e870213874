//! A fragment is the unit of write visibility (§3): an immutable, on-disk
//! directory produced by exactly one successful write query. `writer`
//! assembles one, `reader` opens one for random tile access, `metadata`
//! (de)serializes its footer.

pub mod metadata;
pub mod reader;
pub mod writer;

pub use metadata::FragmentMetadata;
pub use reader::FragmentReader;
pub use writer::FragmentWriter;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::vfs::Vfs;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Reads and parses a committed fragment's metadata footer without opening
/// a reader over it; used by `crate::storage::StorageManager::refresh` to
/// build the visible-fragments snapshot without holding every fragment open.
pub fn read_footer(vfs: &dyn Vfs, fragment_dir: &str) -> Result<FragmentMetadata> {
    let footer_path = format!("{}/__fragment_metadata.tdb", fragment_dir);
    let footer_size = vfs.file_size(&footer_path)?;
    let footer_bytes = vfs.read(&footer_path, 0, footer_size)?;
    FragmentMetadata::read(&footer_bytes)
}

/// Names one fragment (§3: "embedding the creating array URI, a host
/// identifier, a thread identifier, a millisecond timestamp"). The array
/// URI is the parent directory, not part of the name itself; the
/// lexicographic order over the remaining `(timestamp, host, thread)`
/// components is the fragment's insertion rank used to resolve duplicate
/// coordinates across fragments (§4.4 step 3).
///
/// A monotonic counter is appended after the thread id: plain
/// `(timestamp, host, thread)` collides when the same thread commits two
/// fragments within one millisecond, which a tight write-then-read test
/// loop does routinely. See DESIGN.md for the open question this resolves
/// (§9: "fragment identity ... note and defer").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(String);

impl FragmentId {
    /// Wraps an already-known fragment directory basename, e.g. one read
    /// back from `Vfs::ls_dirs` when reopening an array.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn generate(host: &str) -> Self {
        let timestamp_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is set before the unix epoch")
            .as_millis();

        let thread = format!("{:?}", std::thread::current().id());
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

        Self(format!("{:020}_{}_{}_{:020}", timestamp_millis, host, thread, sequence))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for FragmentId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_strictly_increasing() {
        let a = FragmentId::generate("host-1");
        let b = FragmentId::generate("host-1");
        assert!(a < b);
    }
}
