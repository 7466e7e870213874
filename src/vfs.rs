//! The `Vfs` collaborator (§6.1): every on-disk byte the engine touches goes
//! through this trait. Fragment commit relies on `move_dir` being atomic
//! within a backend. Two concrete backends ship here — `LocalVfs` (POSIX-
//! style, via `std::fs`) and `MemVfs` (in-memory, used by tests and by the
//! fault-injection harness for Property 5) — plus a `SchemeRouter` that
//! dispatches a URI's scheme prefix to the right backend, matching the
//! scheme-dispatch rule in §6.1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result, VfsErrorKind};

/// Timeouts a networked `Vfs` backend may enforce (§5, §6.4). `LocalVfs` and
/// `MemVfs` ignore these; they exist so a real networked backend has
/// somewhere to plug in without changing the trait.
#[derive(Debug, Clone, Copy)]
pub struct VfsParams {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for VfsParams {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// The exact operation set the engine consumes from a file system (§6.1).
pub trait Vfs: Send + Sync {
    fn is_dir(&self, path: &str) -> Result<bool>;
    fn is_file(&self, path: &str) -> Result<bool>;
    fn create_dir(&self, path: &str) -> Result<()>;
    fn delete_dir(&self, path: &str) -> Result<()>;

    /// Must be atomic: this is how a fragment becomes visible (§4.2, §5).
    fn move_dir(&self, from: &str, to: &str) -> Result<()>;

    fn create_file(&self, path: &str) -> Result<()>;
    fn delete_file(&self, path: &str) -> Result<()>;

    fn read(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>>;
    fn write(&self, path: &str, bytes: &[u8], append: bool) -> Result<()>;

    fn file_size(&self, path: &str) -> Result<u64>;

    fn ls(&self, dir: &str) -> Result<Vec<String>>;
    fn ls_dirs(&self, dir: &str) -> Result<Vec<String>>;
    fn ls_files(&self, dir: &str) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------
// LocalVfs
// ---------------------------------------------------------------------

/// A thin wrapper over `std::fs`. `move_dir`/`move_file` use `std::fs::rename`,
/// atomic as long as source and destination share a filesystem.
pub struct LocalVfs;

fn io_err(error: std::io::Error, path: &str) -> Error {
    let kind = match error.kind() {
        std::io::ErrorKind::NotFound => VfsErrorKind::NotFound,
        std::io::ErrorKind::AlreadyExists => VfsErrorKind::AlreadyExists,
        std::io::ErrorKind::PermissionDenied => VfsErrorKind::PermissionDenied,
        _ => VfsErrorKind::Other,
    };
    Error::vfs(kind, format!("{} ({})", error, path))
}

impl Vfs for LocalVfs {
    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(Path::new(path).is_dir())
    }

    fn is_file(&self, path: &str) -> Result<bool> {
        Ok(Path::new(path).is_file())
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|error| io_err(error, path))
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        std::fs::remove_dir_all(path).map_err(|error| io_err(error, path))
    }

    fn move_dir(&self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(from, to).map_err(|error| io_err(error, from))
    }

    fn create_file(&self, path: &str) -> Result<()> {
        std::fs::File::create(path).map(|_| ()).map_err(|error| io_err(error, path))
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        std::fs::remove_file(path).map_err(|error| io_err(error, path))
    }

    fn read(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = std::fs::File::open(path).map_err(|error| io_err(error, path))?;
        file.seek(SeekFrom::Start(offset)).map_err(|error| io_err(error, path))?;

        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer).map_err(|error| io_err(error, path))?;
        Ok(buffer)
    }

    fn write(&self, path: &str, bytes: &[u8], append: bool) -> Result<()> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|error| io_err(error, path))?;

        file.write_all(bytes).map_err(|error| io_err(error, path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        std::fs::metadata(path).map(|metadata| metadata.len()).map_err(|error| io_err(error, path))
    }

    fn ls(&self, dir: &str) -> Result<Vec<String>> {
        list(dir, |_| true)
    }

    fn ls_dirs(&self, dir: &str) -> Result<Vec<String>> {
        list(dir, |entry| entry.path().is_dir())
    }

    fn ls_files(&self, dir: &str) -> Result<Vec<String>> {
        list(dir, |entry| entry.path().is_file())
    }
}

fn list(dir: &str, keep: impl Fn(&std::fs::DirEntry) -> bool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|error| io_err(error, dir))? {
        let entry = entry.map_err(|error| io_err(error, dir))?;
        if keep(&entry) {
            names.push(entry.path().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------
// MemVfs
// ---------------------------------------------------------------------

#[derive(Clone)]
enum Entry {
    File(Vec<u8>),
    Dir,
}

/// An in-memory file system, used by tests and by the VFS-call-counting
/// mock needed for S6 (sparse MBR pruning asserts I/O touched only the
/// intersecting fragment's files).
#[derive(Default)]
pub struct MemVfs {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    pub read_calls: Mutex<Vec<String>>,
}

impl MemVfs {
    pub fn new() -> Self { Self::default() }

    pub fn reset_call_log(&self) {
        self.read_calls.lock().unwrap().clear();
    }

    pub fn read_call_count_for(&self, path_suffix: &str) -> usize {
        self.read_calls.lock().unwrap().iter().filter(|p| p.ends_with(path_suffix)).count()
    }
}

impl Vfs for MemVfs {
    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(matches!(self.entries.lock().unwrap().get(Path::new(path)), Some(Entry::Dir)))
    }

    fn is_file(&self, path: &str) -> Result<bool> {
        Ok(matches!(self.entries.lock().unwrap().get(Path::new(path)), Some(Entry::File(_))))
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(PathBuf::from(path), Entry::Dir);
        Ok(())
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let prefix = PathBuf::from(path);
        entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    fn move_dir(&self, from: &str, to: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let from_prefix = PathBuf::from(from);
        let to_prefix = PathBuf::from(to);

        let moved: Vec<(PathBuf, Entry)> = entries.iter()
            .filter(|(key, _)| key.starts_with(&from_prefix))
            .map(|(key, value)| {
                let relative = key.strip_prefix(&from_prefix).unwrap();
                (to_prefix.join(relative), value.clone())
            })
            .collect();

        if moved.is_empty() {
            return Err(Error::vfs(VfsErrorKind::NotFound, from));
        }

        entries.retain(|key, _| !key.starts_with(&from_prefix));
        for (key, value) in moved {
            entries.insert(key, value);
        }

        Ok(())
    }

    fn create_file(&self, path: &str) -> Result<()> {
        self.entries.lock().unwrap().entry(PathBuf::from(path)).or_insert(Entry::File(Vec::new()));
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(Path::new(path))
            .map(|_| ()).ok_or_else(|| Error::vfs(VfsErrorKind::NotFound, path))
    }

    fn read(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.read_calls.lock().unwrap().push(path.to_string());

        let entries = self.entries.lock().unwrap();
        match entries.get(Path::new(path)) {
            Some(Entry::File(bytes)) => {
                let start = offset as usize;
                let end = start + len as usize;
                if end > bytes.len() {
                    return Err(Error::vfs(VfsErrorKind::Other, format!("read past end of file {}", path)));
                }
                Ok(bytes[start..end].to_vec())
            }
            _ => Err(Error::vfs(VfsErrorKind::NotFound, path)),
        }
    }

    fn write(&self, path: &str, bytes: &[u8], append: bool) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(PathBuf::from(path)).or_insert_with(|| Entry::File(Vec::new()));

        match entry {
            Entry::File(existing) => {
                if append { existing.extend_from_slice(bytes); }
                else { *existing = bytes.to_vec(); }
                Ok(())
            }
            Entry::Dir => Err(Error::vfs(VfsErrorKind::Other, format!("{} is a directory", path))),
        }
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        match self.entries.lock().unwrap().get(Path::new(path)) {
            Some(Entry::File(bytes)) => Ok(bytes.len() as u64),
            _ => Err(Error::vfs(VfsErrorKind::NotFound, path)),
        }
    }

    fn ls(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = PathBuf::from(dir);
        let entries = self.entries.lock().unwrap();
        let mut names: Vec<String> = entries.keys()
            .filter(|key| key.parent() == Some(prefix.as_path()))
            .map(|key| key.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn ls_dirs(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = PathBuf::from(dir);
        let entries = self.entries.lock().unwrap();
        let mut names: Vec<String> = entries.iter()
            .filter(|(key, value)| key.parent() == Some(prefix.as_path()) && matches!(value, Entry::Dir))
            .map(|(key, _)| key.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn ls_files(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = PathBuf::from(dir);
        let entries = self.entries.lock().unwrap();
        let mut names: Vec<String> = entries.iter()
            .filter(|(key, value)| key.parent() == Some(prefix.as_path()) && matches!(value, Entry::File(_)))
            .map(|(key, _)| key.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------
// Fault injection, for Property 5 (fragment isolation under crash)
// ---------------------------------------------------------------------

/// Wraps a `Vfs` and fails the Nth call made to it (across all methods),
/// then behaves normally again. Used to simulate "errors injected at every
/// I/O call once" (§8 Property 5) without needing a real unreliable backend.
pub struct FaultyVfs<V> {
    inner: V,
    fail_at_call: usize,
    call_count: Mutex<usize>,
}

impl<V: Vfs> FaultyVfs<V> {
    pub fn new(inner: V, fail_at_call: usize) -> Self {
        Self { inner, fail_at_call, call_count: Mutex::new(0) }
    }

    fn tick(&self) -> Result<()> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;
        if *count == self.fail_at_call {
            return Err(Error::vfs(VfsErrorKind::Other, "injected fault"));
        }
        Ok(())
    }
}

macro_rules! faulty_passthrough {
    ($self:ident, $body:expr) => {{
        $self.tick()?;
        $body
    }};
}

impl<V: Vfs> Vfs for FaultyVfs<V> {
    fn is_dir(&self, path: &str) -> Result<bool> { faulty_passthrough!(self, self.inner.is_dir(path)) }
    fn is_file(&self, path: &str) -> Result<bool> { faulty_passthrough!(self, self.inner.is_file(path)) }
    fn create_dir(&self, path: &str) -> Result<()> { faulty_passthrough!(self, self.inner.create_dir(path)) }
    fn delete_dir(&self, path: &str) -> Result<()> { faulty_passthrough!(self, self.inner.delete_dir(path)) }
    fn move_dir(&self, from: &str, to: &str) -> Result<()> { faulty_passthrough!(self, self.inner.move_dir(from, to)) }
    fn create_file(&self, path: &str) -> Result<()> { faulty_passthrough!(self, self.inner.create_file(path)) }
    fn delete_file(&self, path: &str) -> Result<()> { faulty_passthrough!(self, self.inner.delete_file(path)) }
    fn read(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> { faulty_passthrough!(self, self.inner.read(path, offset, len)) }
    fn write(&self, path: &str, bytes: &[u8], append: bool) -> Result<()> { faulty_passthrough!(self, self.inner.write(path, bytes, append)) }
    fn file_size(&self, path: &str) -> Result<u64> { faulty_passthrough!(self, self.inner.file_size(path)) }
    fn ls(&self, dir: &str) -> Result<Vec<String>> { faulty_passthrough!(self, self.inner.ls(dir)) }
    fn ls_dirs(&self, dir: &str) -> Result<Vec<String>> { faulty_passthrough!(self, self.inner.ls_dirs(dir)) }
    fn ls_files(&self, dir: &str) -> Result<Vec<String>> { faulty_passthrough!(self, self.inner.ls_files(dir)) }
}

// ---------------------------------------------------------------------
// Scheme dispatch
// ---------------------------------------------------------------------

/// Dispatches a URI's scheme prefix (`file://`, `mem://`, ...) to the
/// registered backend and strips the prefix before delegating (§6.1).
pub struct SchemeRouter {
    backends: HashMap<String, Arc<dyn Vfs>>,
}

impl SchemeRouter {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register(&mut self, scheme: impl Into<String>, backend: Arc<dyn Vfs>) {
        self.backends.insert(scheme.into(), backend);
    }

    fn split(&self, uri: &str) -> Result<(&dyn Vfs, &str)> {
        let (scheme, rest) = uri.split_once("://")
            .ok_or_else(|| Error::vfs(VfsErrorKind::Other, format!("uri '{}' has no scheme", uri)))?;

        let backend = self.backends.get(scheme)
            .ok_or_else(|| Error::vfs(VfsErrorKind::Other, format!("no vfs registered for scheme '{}'", scheme)))?;

        Ok((backend.as_ref(), rest))
    }
}

impl Vfs for SchemeRouter {
    fn is_dir(&self, path: &str) -> Result<bool> { let (b, p) = self.split(path)?; b.is_dir(p) }
    fn is_file(&self, path: &str) -> Result<bool> { let (b, p) = self.split(path)?; b.is_file(p) }
    fn create_dir(&self, path: &str) -> Result<()> { let (b, p) = self.split(path)?; b.create_dir(p) }
    fn delete_dir(&self, path: &str) -> Result<()> { let (b, p) = self.split(path)?; b.delete_dir(p) }

    fn move_dir(&self, from: &str, to: &str) -> Result<()> {
        let (backend, from_rest) = self.split(from)?;
        let (_, to_rest) = self.split(to)?;
        backend.move_dir(from_rest, to_rest)
    }

    fn create_file(&self, path: &str) -> Result<()> { let (b, p) = self.split(path)?; b.create_file(p) }
    fn delete_file(&self, path: &str) -> Result<()> { let (b, p) = self.split(path)?; b.delete_file(p) }
    fn read(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> { let (b, p) = self.split(path)?; b.read(p, offset, len) }
    fn write(&self, path: &str, bytes: &[u8], append: bool) -> Result<()> { let (b, p) = self.split(path)?; b.write(p, bytes, append) }
    fn file_size(&self, path: &str) -> Result<u64> { let (b, p) = self.split(path)?; b.file_size(p) }
    fn ls(&self, dir: &str) -> Result<Vec<String>> { let (b, p) = self.split(dir)?; b.ls(p) }
    fn ls_dirs(&self, dir: &str) -> Result<Vec<String>> { let (b, p) = self.split(dir)?; b.ls_dirs(p) }
    fn ls_files(&self, dir: &str) -> Result<Vec<String>> { let (b, p) = self.split(dir)?; b.ls_files(p) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_vfs_roundtrips_a_file() {
        let vfs = MemVfs::new();
        vfs.create_file("a.tdb").unwrap();
        vfs.write("a.tdb", b"hello", false).unwrap();
        assert_eq!(vfs.read("a.tdb", 0, 5).unwrap(), b"hello");
        assert_eq!(vfs.file_size("a.tdb").unwrap(), 5);
    }

    #[test]
    fn mem_vfs_append_extends_file() {
        let vfs = MemVfs::new();
        vfs.write("a.tdb", b"foo", false).unwrap();
        vfs.write("a.tdb", b"bar", true).unwrap();
        assert_eq!(vfs.read("a.tdb", 0, 6).unwrap(), b"foobar");
    }

    #[test]
    fn mem_vfs_move_dir_is_atomic_rename() {
        let vfs = MemVfs::new();
        vfs.create_dir("__tmp").unwrap();
        vfs.write("__tmp/x.tdb", b"x", false).unwrap();
        vfs.move_dir("__tmp", "committed").unwrap();

        assert!(!vfs.is_file("__tmp/x.tdb").unwrap());
        assert_eq!(vfs.read("committed/x.tdb", 0, 1).unwrap(), b"x");
    }

    #[test]
    fn faulty_vfs_fails_exactly_the_nth_call() {
        let vfs = FaultyVfs::new(MemVfs::new(), 2);
        vfs.create_dir("d").unwrap(); // call 1
        assert!(vfs.create_file("d/a.tdb").is_err()); // call 2
        assert!(vfs.create_file("d/b.tdb").is_ok()); // call 3
    }

    #[test]
    fn scheme_router_dispatches_by_prefix() {
        let mut router = SchemeRouter::new();
        router.register("mem", Arc::new(MemVfs::new()));

        router.create_file("mem://a.tdb").unwrap();
        router.write("mem://a.tdb", b"hi", false).unwrap();
        assert_eq!(router.read("mem://a.tdb", 0, 2).unwrap(), b"hi");

        assert!(router.read("unknownscheme://a.tdb", 0, 1).is_err());
    }
}
