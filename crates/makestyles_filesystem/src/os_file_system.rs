use std::path::Path;
use std::path::PathBuf;

use crate::FileSystem;

#[derive(Default, Debug)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
  fn cwd(&self) -> std::io::Result<PathBuf> {
    std::env::current_dir()
  }

  fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn is_dir(&self, path: &Path) -> bool {
    path.is_dir()
  }
}

#[cfg(test)]
mod tests {
  use assert_fs::prelude::*;

  use super::*;

  #[test]
  fn test_reads_files_from_disk() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("tokens.js");
    file.write_str("export const red = 'red';").unwrap();

    let fs = OsFileSystem;
    assert!(fs.is_file(file.path()));
    assert!(fs.is_dir(temp.path()));
    assert_eq!(
      fs.read_to_string(file.path()).unwrap(),
      "export const red = 'red';"
    );
    assert!(!fs.is_file(&temp.path().join("missing.js")));
  }
}
