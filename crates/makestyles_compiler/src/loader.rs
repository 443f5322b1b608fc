use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use makestyles_filesystem::{normalize_path, FileSystemRef};
use serde::{Deserialize, Serialize};

/// Stable identifier of a module, usually its absolute path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
  pub fn new(id: impl AsRef<str>) -> Self {
    Self(Arc::from(id.as_ref()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn as_path(&self) -> &Path {
    Path::new(&*self.0)
  }
}

impl fmt::Display for ModuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ModuleId {
  fn from(id: &str) -> Self {
    ModuleId::new(id)
  }
}

impl From<PathBuf> for ModuleId {
  fn from(path: PathBuf) -> Self {
    ModuleId::new(path.to_string_lossy())
  }
}

/// Host collaborator that locates and reads dependency modules.
///
/// Both calls may be made from several threads at once when units are transformed in parallel.
#[mockall::automock]
pub trait ModuleLoader: Send + Sync {
  /// Resolve `specifier` as written in an import of `from`.
  fn resolve(&self, from: &ModuleId, specifier: &str) -> anyhow::Result<ModuleId>;

  /// Source text of a resolved module.
  fn read(&self, module_id: &ModuleId) -> anyhow::Result<String>;
}

pub type ModuleLoaderRef = Arc<dyn ModuleLoader>;

/// Resolves relative and absolute specifiers against a [`FileSystem`](makestyles_filesystem::FileSystem).
///
/// Bare package specifiers are not resolved; hosts with package resolution provide their own
/// loader or pre-resolve imports of the unit being transformed.
#[derive(Debug)]
pub struct FileSystemModuleLoader {
  fs: FileSystemRef,
  extensions: Vec<String>,
}

impl FileSystemModuleLoader {
  pub fn new(fs: FileSystemRef, extensions: Vec<String>) -> Self {
    Self { fs, extensions }
  }

  fn candidates(&self, base: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    let base = base.to_path_buf();
    let with_extension = {
      let base = base.clone();
      self.extensions.iter().map(move |extension| {
        let mut path = base.clone().into_os_string();
        path.push(extension);
        PathBuf::from(path)
      })
    };
    let index = {
      let base = base.clone();
      self
        .extensions
        .iter()
        .map(move |extension| base.join(format!("index{extension}")))
    };

    std::iter::once(base).chain(with_extension).chain(index)
  }
}

impl ModuleLoader for FileSystemModuleLoader {
  fn resolve(&self, from: &ModuleId, specifier: &str) -> anyhow::Result<ModuleId> {
    let is_relative = specifier.starts_with("./") || specifier.starts_with("../");
    if !is_relative && !Path::new(specifier).is_absolute() {
      bail!("'{specifier}' is a bare specifier and cannot be resolved from the file system");
    }

    let directory = from
      .as_path()
      .parent()
      .ok_or_else(|| anyhow!("{from} has no parent directory"))?;
    let base = normalize_path(directory, Path::new(specifier));

    self
      .candidates(&base)
      .find(|candidate| self.fs.is_file(candidate))
      .map(ModuleId::from)
      .ok_or_else(|| anyhow!("no file matches '{specifier}' from {from}"))
  }

  fn read(&self, module_id: &ModuleId) -> anyhow::Result<String> {
    self
      .fs
      .read_to_string(module_id.as_path())
      .map_err(|error| anyhow!("failed to read {module_id}: {error}"))
  }
}
