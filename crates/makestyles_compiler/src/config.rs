use makestyles_swc_runner::ParseOptions;
use serde::Deserialize;

/// A `(moduleSource, importName)` pair identifying a style-definition function.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StyleFunctionImport {
  pub module_source: String,
  pub import_name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ParserFeature {
  Jsx,
  Typescript,
  Decorators,
}

/// How generated CSS reaches the page.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CssEmission {
  /// Rule text is embedded in the rewritten call and inserted by the runtime primitive.
  #[default]
  Inline,
  /// Rule text is returned to the host as a side-channel artifact and the rewritten call
  /// carries empty rule groups.
  Extract,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
  #[error("Invalid style compiler configuration: {0}")]
  Invalid(String),
  #[error("Option '{0}' must not be empty")]
  EmptyOption(&'static str),
  #[error("Class name prefix '{0}' must start with a letter, '_' or '-' and contain only [A-Za-z0-9_-]")]
  InvalidClassNamePrefix(String),
  #[error("Option '{0}' must be greater than zero")]
  ZeroLimit(&'static str),
  #[error(
    "{module_id} needs the parser features [{}], which 'parserFeatures' does not enable",
    .features.join(", ")
  )]
  MissingParserFeature {
    module_id: String,
    features: Vec<&'static str>,
  },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StyleCompilerConfig {
  /// Module the style-definition function is imported from.
  ///
  /// Defaults to `@griffel/react`.
  pub module_source: String,

  /// Exported name of the style-definition function.
  ///
  /// Defaults to `makeStyles`.
  pub import_name: String,

  /// Additional `(moduleSource, importName)` pairs recognised as the style-definition function,
  /// for projects that re-export it from their own packages.
  pub aliases: Vec<StyleFunctionImport>,

  /// Syntax the parser accepts on top of plain ECMAScript.
  pub parser_features: Vec<ParserFeature>,

  /// Module the runtime primitive is imported from.
  ///
  /// Defaults to `module_source`.
  pub runtime_source: Option<String>,

  /// Exported name of the runtime primitive.
  ///
  /// Defaults to `__styles`.
  pub runtime_import_name: String,

  pub css_emission: CssEmission,

  /// Prefix prepended to every generated class name.
  ///
  /// Defaults to `f`. The hash alone may start with a digit, which is not a valid
  /// class selector.
  pub class_name_prefix: String,

  /// Step budget for a single call site's evaluation.
  pub max_evaluation_steps: u64,

  /// Maximum nesting of function calls inside the evaluation sandbox.
  pub max_call_depth: usize,

  /// Emit a warning for every call site left on the runtime fallback path.
  ///
  /// Defaults to `true`.
  pub warn_on_unresolved: bool,

  /// File extensions tried, in order, when a relative import omits one.
  pub extensions: Vec<String>,
}

impl Default for StyleCompilerConfig {
  fn default() -> Self {
    Self {
      module_source: String::from("@griffel/react"),
      import_name: String::from("makeStyles"),
      aliases: Vec::new(),
      parser_features: Vec::new(),
      runtime_source: None,
      runtime_import_name: String::from("__styles"),
      css_emission: CssEmission::default(),
      class_name_prefix: String::from("f"),
      max_evaluation_steps: 100_000,
      max_call_depth: 64,
      warn_on_unresolved: true,
      extensions: [".ts", ".tsx", ".js", ".jsx", ".mjs"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }
}

impl StyleCompilerConfig {
  /// Parse and validate a camelCase JSON configuration object.
  pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
    let config: StyleCompilerConfig =
      serde_json::from_str(json).map_err(|error| ConfigurationError::Invalid(error.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.module_source.is_empty() {
      return Err(ConfigurationError::EmptyOption("moduleSource"));
    }
    if self.import_name.is_empty() {
      return Err(ConfigurationError::EmptyOption("importName"));
    }
    if self.runtime_import_name.is_empty() {
      return Err(ConfigurationError::EmptyOption("runtimeImportName"));
    }
    if matches!(&self.runtime_source, Some(source) if source.is_empty()) {
      return Err(ConfigurationError::EmptyOption("runtimeSource"));
    }
    for alias in &self.aliases {
      if alias.module_source.is_empty() || alias.import_name.is_empty() {
        return Err(ConfigurationError::EmptyOption("aliases"));
      }
    }
    if !is_valid_class_name_prefix(&self.class_name_prefix) {
      return Err(ConfigurationError::InvalidClassNamePrefix(
        self.class_name_prefix.clone(),
      ));
    }
    if self.max_evaluation_steps == 0 {
      return Err(ConfigurationError::ZeroLimit("maxEvaluationSteps"));
    }
    if self.max_call_depth == 0 {
      return Err(ConfigurationError::ZeroLimit("maxCallDepth"));
    }
    Ok(())
  }

  /// Every recognised style-definition function, the primary one first.
  pub fn style_functions(&self) -> impl Iterator<Item = (&str, &str)> {
    std::iter::once((self.module_source.as_str(), self.import_name.as_str())).chain(
      self
        .aliases
        .iter()
        .map(|alias| (alias.module_source.as_str(), alias.import_name.as_str())),
    )
  }

  pub fn runtime_source(&self) -> &str {
    self
      .runtime_source
      .as_deref()
      .unwrap_or(self.module_source.as_str())
  }

  pub fn parse_options(&self) -> ParseOptions {
    ParseOptions {
      jsx: self.parser_features.contains(&ParserFeature::Jsx),
      typescript: self.parser_features.contains(&ParserFeature::Typescript),
      decorators: self.parser_features.contains(&ParserFeature::Decorators),
    }
  }
}

fn is_valid_class_name_prefix(prefix: &str) -> bool {
  let mut chars = prefix.chars();
  match chars.next() {
    Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '-' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
