use std::path::{Path, PathBuf};
use std::sync::Arc;

/// In-memory file-system for testing
pub mod in_memory_file_system;

/// File-system implementation using std::fs
pub mod os_file_system;

pub use in_memory_file_system::InMemoryFileSystem;
pub use os_file_system::OsFileSystem;

/// FileSystem abstraction instance
///
/// This should be `OsFileSystem` for non-testing environments and `InMemoryFileSystem` for testing.
pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

/// Trait abstracting the file-system reads needed to load dependency modules.
#[mockall::automock]
pub trait FileSystem: std::fmt::Debug {
  fn cwd(&self) -> std::io::Result<PathBuf> {
    Err(std::io::Error::new(
      std::io::ErrorKind::Other,
      "Not implemented: FileSystem::cwd",
    ))
  }

  fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
  fn is_file(&self, path: &Path) -> bool;
  fn is_dir(&self, path: &Path) -> bool;
}

/// Lexically normalize `path` against `cwd`, resolving `.` and `..` without touching the disk.
pub fn normalize_path(cwd: &Path, path: &Path) -> PathBuf {
  use std::path::Component;

  let mut result: Vec<Component<'_>> = if path.is_absolute() {
    vec![]
  } else {
    cwd.components().collect()
  };

  for component in path.components() {
    match component {
      Component::Prefix(prefix) => {
        result = vec![Component::Prefix(prefix)];
      }
      Component::RootDir => {
        result.push(Component::RootDir);
      }
      Component::CurDir => {}
      Component::ParentDir => {
        if !matches!(result.last(), Some(Component::RootDir) | None) {
          result.pop();
        }
      }
      Component::Normal(part) => {
        result.push(Component::Normal(part));
      }
    }
  }

  PathBuf::from_iter(result)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_path_resolves_parent_components() {
    assert_eq!(
      normalize_path(Path::new("/app"), Path::new("src/../tokens/./colors.ts")),
      PathBuf::from("/app/tokens/colors.ts")
    );
  }

  #[test]
  fn test_normalize_path_keeps_absolute_paths() {
    assert_eq!(
      normalize_path(Path::new("/app"), Path::new("/lib/theme.js")),
      PathBuf::from("/lib/theme.js")
    );
  }

  #[test]
  fn test_normalize_path_does_not_escape_root() {
    assert_eq!(
      normalize_path(Path::new("/"), Path::new("../../a.js")),
      PathBuf::from("/a.js")
    );
  }

  #[test]
  fn test_mock_file_system() {
    let mut fs = MockFileSystem::new();
    fs.expect_read_to_string()
      .returning(|_| Ok(String::from("export const a = 1;")));

    assert_eq!(
      fs.read_to_string(Path::new("/a.js")).unwrap(),
      "export const a = 1;"
    );
  }
}
