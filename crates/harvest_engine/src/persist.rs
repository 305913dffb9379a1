use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot use {path} as an artifact directory: {reason}")]
    OutputDir { path: PathBuf, reason: String },
    #[error("artifact io: {0}")]
    Io(#[from] io::Error),
}

/// Creates `dir` and its parents unless it is already a directory.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let unusable = |reason: String| PersistError::OutputDir {
        path: dir.to_path_buf(),
        reason,
    };
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(unusable("not a directory".to_string())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|err| unusable(err.to_string()))
        }
        Err(err) => Err(unusable(err.to_string())),
    }
}

/// Write `content` to `target` through a temp file in the same directory and
/// a rename, replacing any previous file. Readers never see a partial file.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<(), PersistError> {
    let dir = parent_dir(target);
    ensure_output_dir(dir)?;
    let tmp = staged(dir, content)?;
    tmp.persist(target).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

/// Like [`write_atomic`] but never replaces an existing file.
/// Returns `false` when `target` already existed.
pub fn write_new(target: &Path, content: &[u8]) -> Result<bool, PersistError> {
    let dir = parent_dir(target);
    ensure_output_dir(dir)?;
    let tmp = staged(dir, content)?;
    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(PersistError::Io(e.error)),
    }
}

fn parent_dir(target: &Path) -> &Path {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn staged(dir: &Path, content: &[u8]) -> Result<NamedTempFile, PersistError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    Ok(tmp)
}

/// Data directory holding every artifact at its deterministic relative path.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path_of(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn exists(&self, relative: &Path) -> bool {
        self.path_of(relative).is_file()
    }

    pub fn read(&self, relative: &Path) -> Result<Vec<u8>, PersistError> {
        Ok(fs::read(self.path_of(relative))?)
    }

    pub fn write(&self, relative: &Path, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.path_of(relative);
        write_atomic(&target, content)?;
        Ok(target)
    }

    pub fn write_new(&self, relative: &Path, content: &[u8]) -> Result<bool, PersistError> {
        write_new(&self.path_of(relative), content)
    }
}
