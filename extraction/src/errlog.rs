use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Append-only log of failed images, one `identity<TAB>message` line each.
///
/// Every record goes out as a single write on a file opened in append mode,
/// so concurrent writers never interleave within a line.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    file: File,
}

impl ErrorLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, identity: &str, detail: &str) -> Result<()> {
        let line = format_record(identity, detail);
        (&self.file).write_all(line.as_bytes())?;
        Ok(())
    }
}

fn format_record(identity: &str, detail: &str) -> String {
    let flatten = |s: &str| s.replace(['\n', '\r', '\t'], " ");
    format!("{}\t{}\n", flatten(identity), flatten(detail))
}

/// Parses the records of an error log back into `(identity, message)` pairs.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<(String, String)>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(identity, detail)| (identity.to_string(), detail.to_string()))
        .collect())
}
