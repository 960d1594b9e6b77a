//! Persisted mapping from object id to [`Manifest`].
//!
//! The catalog file has two lines: the session record (channel credentials,
//! never rewritten here) and a JSON object mapping id to manifest record.
//! Every mutation reads the whole file, changes the map and writes it back.
//! Writes from other processes race and the last writer wins.

mod manifest;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, StoreError};
use crate::utils::write_atomic;

pub use manifest::{Manifest, ManifestVersion};

/// Upper bound of the short id range.
const SHORT_ID_MAX: u32 = 4098;
/// Draws in the short range before falling back to the full `u32` range.
const SHORT_ID_ATTEMPTS: usize = 64;

/// Raw contents of the catalog file.
struct Document {
    session_line: String,
    objects: Map<String, Value>,
}

/// Catalog backed by a two-line file.
#[derive(Debug)]
pub struct ObjectCatalog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ObjectCatalog {
    /// Open an existing catalog file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::NotFound(format!("catalog {}", path.display())));
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Create a new, empty catalog holding `session` as its first record.
    ///
    /// Refuses to overwrite an existing file.
    pub fn create<P: AsRef<Path>>(path: P, session: &SessionConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StoreError::InvalidRequest(format!(
                "catalog {} already exists",
                path.display()
            )));
        }
        let contents = format!("{}\n{{}}", serde_json::to_string(session)?);
        write_atomic(&path, contents.as_bytes())?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Channel credentials from the first record.
    pub fn session(&self) -> Result<SessionConfig> {
        let doc = self.read()?;
        serde_json::from_str(doc.session_line.trim())
            .map_err(|e| StoreError::corrupt(&self.path, format!("session record: {}", e)))
    }

    fn read(&self) -> Result<Document> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StoreError::NotFound(format!("catalog {}", self.path.display()))
            }
            _ => StoreError::Io(e),
        })?;
        let mut lines = text.splitn(2, '\n');
        let session_line = lines.next().unwrap_or_default().trim_end_matches('\r').to_string();
        let rest = lines.next().unwrap_or_default().trim();

        let objects = if rest.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(StoreError::corrupt(
                        &self.path,
                        format!("manifest map is not an object: {}", other),
                    ))
                }
                Err(e) => return Err(StoreError::corrupt(&self.path, e)),
            }
        };
        Ok(Document {
            session_line,
            objects,
        })
    }

    fn write(&self, doc: &Document) -> Result<()> {
        let contents = format!(
            "{}\n{}",
            doc.session_line,
            serde_json::to_string(&doc.objects)?
        );
        write_atomic(&self.path, contents.as_bytes())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Map<String, Value>) -> (T, bool)) -> Result<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.read()?;
        let (out, changed) = f(&mut doc.objects);
        if changed {
            self.write(&doc)?;
        }
        Ok(out)
    }

    /// Insert or replace the entry for `manifest.id`.
    pub fn put(&self, manifest: &Manifest) -> Result<()> {
        self.mutate(|objects| {
            objects.insert(manifest.id.clone(), manifest.to_record());
            ((), true)
        })?;
        debug!(id = %manifest.id, name = %manifest.display_name, "catalog entry written");
        Ok(())
    }

    /// Insert `manifest` unless its id already names a different object.
    ///
    /// Returns `false`, leaving the catalog untouched, when the id is taken.
    pub fn insert_new(&self, manifest: &Manifest) -> Result<bool> {
        let record = manifest.to_record();
        let inserted = self.mutate(|objects| match objects.get(&manifest.id) {
            Some(existing) if *existing == record => (true, false),
            Some(_) => (false, false),
            None => {
                objects.insert(manifest.id.clone(), record);
                (true, true)
            }
        })?;
        if inserted {
            debug!(id = %manifest.id, name = %manifest.display_name, "catalog entry written");
        }
        Ok(inserted)
    }

    /// Look up one object. Invalid entries read as missing.
    pub fn get(&self, id: &str) -> Result<Manifest> {
        let doc = self.read()?;
        doc.objects
            .get(id)
            .and_then(|record| Manifest::from_record(id, record).ok())
            .ok_or_else(|| StoreError::NotFound(format!("object {}", id)))
    }

    /// Remove an entry. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.mutate(|objects| {
            let removed = objects.remove(id).is_some();
            (removed, removed)
        })
    }

    /// Every valid entry, in id order.
    ///
    /// Invalid entries are pruned from the file as a side effect.
    pub fn list(&self) -> Result<Vec<Manifest>> {
        self.mutate(|objects| {
            let mut valid = Vec::with_capacity(objects.len());
            let mut invalid = Vec::new();
            for (id, record) in objects.iter() {
                match Manifest::from_record(id, record) {
                    Ok(manifest) => valid.push(manifest),
                    Err(reason) => invalid.push((id.clone(), reason)),
                }
            }
            for (id, reason) in &invalid {
                warn!(id = %id, reason = %reason, "pruning invalid catalog entry");
                objects.remove(id);
            }
            (valid, !invalid.is_empty())
        })
    }

    /// First valid entry whose display name is `name`.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Manifest>> {
        Ok(self
            .find_all_by_name(name)?
            .into_iter()
            .next())
    }

    /// Every valid entry whose display name is `name`.
    pub fn find_all_by_name(&self, name: &str) -> Result<Vec<Manifest>> {
        let doc = self.read()?;
        Ok(doc
            .objects
            .iter()
            .filter_map(|(id, record)| Manifest::from_record(id, record).ok())
            .filter(|m| m.display_name == name)
            .collect())
    }

    /// Draw a fresh object id not present in the catalog.
    pub fn issue_id(&self) -> Result<String> {
        self.issue_id_excluding(&HashSet::new())
    }

    /// Draw a fresh object id that is neither in the catalog nor in `reserved`.
    pub fn issue_id_excluding(&self, reserved: &HashSet<String>) -> Result<String> {
        let doc = self.read()?;
        let taken = |id: &String| doc.objects.contains_key(id) || reserved.contains(id);
        let mut rng = rand::thread_rng();
        for _ in 0..SHORT_ID_ATTEMPTS {
            let id = rng.gen_range(0..=SHORT_ID_MAX).to_string();
            if !taken(&id) {
                return Ok(id);
            }
        }
        loop {
            let id = rng.gen::<u32>().to_string();
            if !taken(&id) {
                return Ok(id);
            }
        }
    }
}
