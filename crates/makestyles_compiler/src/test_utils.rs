use std::path::Path;
use std::sync::Arc;

use makestyles_filesystem::InMemoryFileSystem;
use makestyles_swc_runner::{run_with_resolver, ParseOptions};

use crate::call_site::StyleCallSite;
use crate::config::StyleCompilerConfig;
use crate::detector::detect_style_calls;
use crate::loader::{FileSystemModuleLoader, ModuleId, ModuleLoader};
use crate::module_graph::{ModuleGraph, ModuleGraphCache, ModuleGraphNode};

pub fn test_parse_options() -> ParseOptions {
  ParseOptions {
    jsx: true,
    typescript: true,
    decorators: false,
  }
}

pub struct AnalyzedUnit {
  pub entry: Arc<ModuleGraphNode>,
  pub call_sites: Vec<StyleCallSite>,
}

/// An in-memory project with a shared module cache.
pub struct TestProject {
  pub loader: FileSystemModuleLoader,
  pub cache: ModuleGraphCache,
}

impl TestProject {
  pub fn new(files: &[(&str, &str)]) -> Self {
    let fs = InMemoryFileSystem::default();
    for (path, contents) in files {
      fs.write_file(Path::new(path), *contents);
    }
    TestProject {
      loader: FileSystemModuleLoader::new(Arc::new(fs), StyleCompilerConfig::default().extensions),
      cache: ModuleGraphCache::default(),
    }
  }

  pub fn analyze(&self, path: &str, code: &str) -> AnalyzedUnit {
    let module_id = ModuleId::from(path);
    run_with_resolver(path, code, test_parse_options(), |context, module| {
      let call_sites =
        detect_style_calls(module, &context, &StyleCompilerConfig::default(), &module_id);
      let entry = ModuleGraphNode::build(module_id.clone(), module.clone(), |specifier| {
        self
          .loader
          .resolve(&module_id, specifier)
          .map_err(|error| error.to_string())
      });
      AnalyzedUnit {
        entry: Arc::new(entry),
        call_sites,
      }
    })
    .unwrap()
  }

  pub fn graph(&self, entry: Arc<ModuleGraphNode>) -> ModuleGraph<'_> {
    ModuleGraph::new(&self.cache, &self.loader, test_parse_options(), entry)
  }
}
