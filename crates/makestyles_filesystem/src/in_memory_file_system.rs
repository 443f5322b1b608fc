use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::{normalize_path, FileSystem};

#[cfg(not(target_os = "windows"))]
fn root_dir() -> PathBuf {
  PathBuf::from("/")
}

#[cfg(target_os = "windows")]
fn root_dir() -> PathBuf {
  PathBuf::from("C:/")
}

/// In memory implementation of a file-system entry
#[derive(Debug)]
enum InMemoryFileSystemEntry {
  File { contents: String },
  Directory,
}

/// In memory implementation of the `FileSystem` trait, for testing purposes.
#[derive(Debug)]
pub struct InMemoryFileSystem {
  files: RwLock<HashMap<PathBuf, InMemoryFileSystemEntry>>,
  current_working_directory: RwLock<PathBuf>,
}

impl Default for InMemoryFileSystem {
  fn default() -> Self {
    Self {
      files: Default::default(),
      current_working_directory: RwLock::new(root_dir()),
    }
  }
}

impl InMemoryFileSystem {
  /// Change the current working directory. Used for resolving relative paths.
  pub fn set_current_working_directory(&self, cwd: &Path) {
    let cwd = self.normalize(cwd);
    *self.current_working_directory.write() = cwd;
  }

  /// Write a file, creating its parent directories.
  pub fn write_file(&self, path: &Path, contents: impl Into<String>) {
    let path = self.normalize(path);
    let mut files = self.files.write();

    let mut dir = path.parent();
    while let Some(parent) = dir {
      files.insert(parent.to_path_buf(), InMemoryFileSystemEntry::Directory);
      dir = parent.parent();
    }

    files.insert(
      path,
      InMemoryFileSystemEntry::File {
        contents: contents.into(),
      },
    );
  }

  fn normalize(&self, path: &Path) -> PathBuf {
    normalize_path(&self.current_working_directory.read(), path)
  }
}

impl FileSystem for InMemoryFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    Ok(self.current_working_directory.read().clone())
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let path = self.normalize(path);
    let files = self.files.read();
    match files.get(&path) {
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
      Some(InMemoryFileSystemEntry::File { contents }) => Ok(contents.clone()),
      Some(InMemoryFileSystemEntry::Directory) => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Path is a directory",
      )),
    }
  }

  fn is_file(&self, path: &Path) -> bool {
    let path = self.normalize(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::File { .. })
    )
  }

  fn is_dir(&self, path: &Path) -> bool {
    let path = self.normalize(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::Directory)
    )
  }
}
