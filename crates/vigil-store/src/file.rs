//! Locked JSON state files
//!
//! Every state file is rewritten whole. To keep concurrent sessions from
//! clobbering each other, an update:
//! 1. takes an exclusive lock on a sidecar `<file>.lock` (bounded wait),
//! 2. reads the current content,
//! 3. applies the mutation,
//! 4. writes a temp file in the same directory and renames it over the
//!    original, so readers never observe a half-written file.
//!
//! Readers do not lock; the rename makes each read see either the old or
//! the new content.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vigil_core::{Result, VigilError};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Content read from a state file
#[derive(Debug)]
pub enum Loaded<T> {
    /// The file does not exist yet
    Missing,
    /// Parsed content
    Present(T),
    /// The file exists but does not parse
    Corrupt(String),
}

/// A JSON document on disk with locked read-modify-write
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
    lock_timeout: Duration,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        sidecar(&self.path, "lock")
    }

    /// Read without locking
    ///
    /// Content that is not valid UTF-8 JSON is `Corrupt`, never an error, so
    /// `update` can always move it aside.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Loaded<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = std::str::from_utf8(&bytes) {
            return Ok(Loaded::Corrupt(format!("not UTF-8: {}", e)));
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Loaded::Present(value)),
            Err(e) => Ok(Loaded::Corrupt(e.to_string())),
        }
    }

    /// Read, treating missing and corrupt files as the default value
    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> T {
        match self.load() {
            Ok(Loaded::Present(value)) => value,
            Ok(Loaded::Missing) => T::default(),
            Ok(Loaded::Corrupt(reason)) => {
                warn!(path = %self.path.display(), %reason, "State file is corrupt, using defaults");
                T::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file unreadable, using defaults");
                T::default()
            }
        }
    }

    /// Locked read-modify-write
    ///
    /// A corrupt file is moved aside to `<file>.corrupt` and the mutation
    /// starts from the default value.
    pub fn update<T, R, F>(&self, mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock()?;

        let mut value = match self.load::<T>()? {
            Loaded::Present(value) => value,
            Loaded::Missing => T::default(),
            Loaded::Corrupt(reason) => {
                let aside = sidecar(&self.path, "corrupt");
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    %reason,
                    "Corrupt state file moved aside"
                );
                fs::rename(&self.path, &aside).map_err(|e| {
                    VigilError::Store(format!(
                        "Failed to move corrupt {} aside: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                T::default()
            }
        };

        let out = mutate(&mut value);
        self.write_atomic(&value)?;
        Ok(out)
    }

    fn lock(&self) -> Result<LockGuard> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %lock_path.display(), "Acquired state lock");
                    return Ok(LockGuard { file });
                }
                Err(e) if started.elapsed() < self.lock_timeout => {
                    debug!(path = %lock_path.display(), error = %e, "State lock busy, retrying");
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(_) => {
                    return Err(VigilError::LockTimeout {
                        path: lock_path.display().to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }

    fn write_atomic<T: Serialize>(&self, value: &T) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let data = serde_json::to_vec_pretty(value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| VigilError::Io(e.error))?;
        Ok(())
    }
}

/// Holds the exclusive lock until dropped
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release state lock");
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn file(dir: &Path) -> JsonFile {
        JsonFile::new(dir.join("state.json"), Duration::from_millis(200))
    }

    #[test]
    fn test_update_creates_file() {
        let dir = tempdir().unwrap();
        let f = file(dir.path());

        f.update(|m: &mut BTreeMap<String, u32>| {
            m.insert("a".to_string(), 1);
        })
        .unwrap();

        match f.load::<BTreeMap<String, u32>>().unwrap() {
            Loaded::Present(m) => assert_eq!(m.get("a"), Some(&1)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let m: BTreeMap<String, u32> = file(dir.path()).load_or_default();
        assert!(m.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_moved_aside_on_update() {
        let dir = tempdir().unwrap();
        let f = file(dir.path());
        fs::write(f.path(), "{not json").unwrap();

        let m: BTreeMap<String, u32> = f.load_or_default();
        assert!(m.is_empty());

        f.update(|m: &mut BTreeMap<String, u32>| {
            m.insert("b".to_string(), 2);
        })
        .unwrap();

        assert!(dir.path().join("state.json.corrupt").exists());
        let m: BTreeMap<String, u32> = f.load_or_default();
        assert_eq!(m.get("b"), Some(&2));
    }

    #[test]
    fn test_non_utf8_file_is_moved_aside_on_update() {
        let dir = tempdir().unwrap();
        let f = file(dir.path());
        fs::write(f.path(), [0xffu8, 0xfe, 0x00, 0x7b]).unwrap();

        assert!(matches!(
            f.load::<BTreeMap<String, u32>>().unwrap(),
            Loaded::Corrupt(_)
        ));

        for _ in 0..3 {
            f.update(|m: &mut BTreeMap<String, u32>| {
                *m.entry("n".to_string()).or_insert(0) += 1;
            })
            .unwrap();
        }

        assert_eq!(
            fs::read(dir.path().join("state.json.corrupt")).unwrap(),
            vec![0xff, 0xfe, 0x00, 0x7b]
        );
        let m: BTreeMap<String, u32> = f.load_or_default();
        assert_eq!(m.get("n"), Some(&3));
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = tempdir().unwrap();
        let f = file(dir.path());
        let _held = f.lock().unwrap();

        let err = f
            .update(|m: &mut BTreeMap<String, u32>| m.clear())
            .unwrap_err();
        assert!(matches!(err, VigilError::LockTimeout { .. }));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempdir().unwrap();
        let f = JsonFile::new(dir.path().join("state.json"), Duration::from_secs(10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        f.update(|m: &mut BTreeMap<String, u32>| {
                            *m.entry("n".to_string()).or_insert(0) += 1;
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let m: BTreeMap<String, u32> = f.load_or_default();
        assert_eq!(m.get("n"), Some(&80));
    }
}
