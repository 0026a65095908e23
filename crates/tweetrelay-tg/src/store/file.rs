use crate::store::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A JSON document on disk that is replaced atomically on every save, so a
/// crash in the middle of writing never leaves a partially written file.
pub(crate) struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` if the file doesn't exist yet
    pub(crate) fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let json = match fs_err::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    pub(crate) fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        self.try_save(value).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn try_save<T: Serialize>(&self, value: &T) -> io::Result<()> {
        // The temp file must be on the same file system for the rename to be atomic
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir)?;

        serde_json::to_writer_pretty(&mut file, value)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;

        file.persist(&self.path).map_err(|err| err.error)?;

        Ok(())
    }

    /// Moves the file out of the way, so that a fresh one can be created
    /// instead, and returns the new location of the old file.
    pub(crate) fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        let destination = PathBuf::from(name);

        fs_err::rename(&self.path, &destination).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(destination)
    }
}
