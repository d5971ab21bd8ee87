use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};

use crate::error::Result;

/// Keyed store of per-image descriptors, one slot per image identity.
///
/// `has` followed by `put` is not atomic: two writers racing on the same
/// identity both compute it and the last rename wins. Slots are never
/// observed half-written.
pub trait ResultStore: Send + Sync {
    fn has(&self, identity: &str) -> bool;
    fn put(&self, identity: &str, descriptor: &Array1<f64>) -> Result<()>;
    fn get(&self, identity: &str) -> Result<Array1<f64>>;
}

/// Filesystem-safe identity of an image: its file name without extension.
pub fn identity_of(path: &Path) -> String {
    match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => path
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect(),
    }
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Descriptors as `<identity>.npy` files in one directory.
#[derive(Debug, Clone)]
pub struct NpyStore {
    root: PathBuf,
}

impl NpyStore {
    /// Opens the store, creating the directory if needed.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{}.npy", identity))
    }

    fn temp_slot(&self, identity: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{}.{}.{}.tmp", identity, std::process::id(), n))
    }
}

impl ResultStore for NpyStore {
    fn has(&self, identity: &str) -> bool {
        self.slot(identity).is_file()
    }

    fn put(&self, identity: &str, descriptor: &Array1<f64>) -> Result<()> {
        let temp = self.temp_slot(identity);
        if let Err(err) = write_npy(&temp, descriptor) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&temp, self.slot(identity)) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Array1<f64>> {
        Ok(read_npy(self.slot(identity))?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    use crate::error::ExtractionError;

    #[test]
    fn test_identity_of() {
        assert_eq!(identity_of(Path::new("/data/cats/tabby.final.jpg")), "tabby.final");
        assert_eq!(identity_of(Path::new("photo")), "photo");
    }

    #[test]
    fn test_put_get_has() {
        let dir = tempfile::tempdir().unwrap();
        let store = NpyStore::create(dir.path().join("out")).unwrap();

        assert!(!store.has("a"));
        store.put("a", &array![0.5, -1.0, 2.0]).unwrap();
        assert!(store.has("a"));
        assert_eq!(store.get("a").unwrap(), array![0.5, -1.0, 2.0]);

        store.put("a", &array![1.0]).unwrap();
        assert_eq!(store.get("a").unwrap(), array![1.0]);

        let leftovers = fs::read_dir(store.root())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = NpyStore::create(dir.path()).unwrap();
        // a directory in the slot's place makes the final rename fail
        fs::create_dir(store.slot("blocked")).unwrap();

        assert!(matches!(
            store.put("blocked", &array![1.0, 2.0]),
            Err(ExtractionError::Io(_))
        ));
        assert!(!store.has("blocked"));
        let leftovers = fs::read_dir(store.root())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = NpyStore::create(dir.path()).unwrap();
        assert!(matches!(store.get("nope"), Err(ExtractionError::Persistence(_))));
    }
}
