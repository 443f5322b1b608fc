use std::path::Path;
use std::sync::Arc;

use makestyles_compiler::{
  FileSystemModuleLoader, StyleCompilerConfig, StyleTransformer, TransformInput, TransformOutput,
};
use makestyles_filesystem::InMemoryFileSystem;

/// A transformer over an in-memory project.
pub fn transformer(files: &[(&str, &str)], config: StyleCompilerConfig) -> StyleTransformer {
  let fs = InMemoryFileSystem::default();
  for (path, contents) in files {
    fs.write_file(Path::new(path), *contents);
  }
  let loader = FileSystemModuleLoader::new(Arc::new(fs), config.extensions.clone());
  StyleTransformer::new(config, Arc::new(loader)).unwrap()
}

pub fn transform(transformer: &StyleTransformer, path: &str, source: &str) -> TransformOutput {
  transformer
    .transform(TransformInput::new(path, source))
    .unwrap()
}

/// Class tokens of a space-joined class string, sorted.
pub fn tokens(class_names: &str) -> Vec<&str> {
  let mut tokens: Vec<&str> = class_names.split_whitespace().collect();
  tokens.sort_unstable();
  tokens
}
