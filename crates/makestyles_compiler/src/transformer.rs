use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use makestyles_swc_runner::{run_with_resolver, RunContext, RunWithTransformationError};
use rayon::prelude::*;
use serde::Serialize;
use swc_core::ecma::ast::Module;

use crate::call_site::{CallSiteFailure, CallSiteState, StyleCallSite};
use crate::config::{ConfigurationError, CssEmission, StyleCompilerConfig};
use crate::dependency_resolver::{DependencyResolver, UnresolvableDependency};
use crate::detector::detect_style_calls;
use crate::diagnostic::{Diagnostic, FailureKind, Severity};
use crate::loader::{ModuleId, ModuleLoaderRef};
use crate::module_graph::{LoadError, ModuleGraph, ModuleGraphCache, ModuleGraphNode};
use crate::rewriter::{import_statement, plan_runtime_import, runtime_call, splice, RuntimeImport};
use crate::sandbox::{
  evaluate_batch, EvaluationError, EvaluationJob, ExecutionReport, SandboxLimits,
};
use crate::style_compiler::{compile_styles, CompiledStyles, CssRegistry, RuleGroup};

/// One compilation unit handed over by the host build tool.
#[derive(Debug, Clone)]
pub struct TransformInput {
  pub module_id: ModuleId,
  pub source_text: String,
  /// Specifiers of the unit's imports that the host already resolved.
  pub resolved_import_map: HashMap<String, ModuleId>,
}

impl TransformInput {
  pub fn new(module_id: impl Into<ModuleId>, source_text: impl Into<String>) -> Self {
    Self {
      module_id: module_id.into(),
      source_text: source_text.into(),
      resolved_import_map: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "state")]
pub enum CallSiteOutcome {
  Rewritten {
    class_mapping: IndexMap<String, Vec<String>>,
    rule_groups: IndexMap<String, Vec<String>>,
  },
  Skipped {
    kind: FailureKind,
    message: String,
    failed_keys: Vec<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSiteReport {
  pub source_range: Range<usize>,
  pub outcome: CallSiteOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
  /// The rewritten source, or the input unchanged when nothing was rewritten.
  pub code: String,
  /// Rules of the unit's rewritten calls when CSS is extracted, in cascade order.
  pub css_artifacts: Vec<String>,
  pub diagnostics: Vec<Diagnostic>,
  pub call_sites: Vec<CallSiteReport>,
  pub execution_report: ExecutionReport,
}

impl TransformOutput {
  fn unchanged(source_text: &str) -> Self {
    Self {
      code: source_text.to_string(),
      ..Default::default()
    }
  }
}

/// Fatal errors. They halt the transformation of the unit instead of degrading a single call
/// site.
#[derive(Debug, thiserror::Error)]
pub enum StyleTransformError {
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),
  #[error("Failed to parse {module_id}: {source}")]
  Parse {
    module_id: ModuleId,
    source: RunWithTransformationError,
  },
  #[error("Failed to print the rewritten call in {module_id}: {source}")]
  Codegen {
    module_id: ModuleId,
    source: RunWithTransformationError,
  },
}

impl StyleTransformError {
  /// Dependencies the configured parser cannot read are a configuration problem of the build,
  /// not of a single call site.
  fn from_load_error(error: &LoadError) -> Option<Self> {
    match error {
      LoadError::MissingParserFeature {
        module_id,
        features,
      } => Some(StyleTransformError::Configuration(
        ConfigurationError::MissingParserFeature {
          module_id: module_id.to_string(),
          features: features.clone(),
        },
      )),
      LoadError::Read { .. } | LoadError::Parse { .. } => None,
    }
  }
}

/// Entry point used by the host build tool.
///
/// One transformer serves a whole build: the module-graph cache and the CSS registry are shared
/// by every unit it transforms, including units transformed in parallel.
pub struct StyleTransformer {
  config: StyleCompilerConfig,
  loader: ModuleLoaderRef,
  cache: ModuleGraphCache,
  registry: CssRegistry,
}

impl StyleTransformer {
  pub fn new(
    config: StyleCompilerConfig,
    loader: ModuleLoaderRef,
  ) -> Result<Self, StyleTransformError> {
    config.validate()?;
    Ok(Self {
      config,
      loader,
      cache: ModuleGraphCache::default(),
      registry: CssRegistry::new(),
    })
  }

  pub fn config(&self) -> &StyleCompilerConfig {
    &self.config
  }

  /// Rules extracted so far by every unit of the build.
  pub fn registry(&self) -> &CssRegistry {
    &self.registry
  }

  pub fn module_cache(&self) -> &ModuleGraphCache {
    &self.cache
  }

  /// Transform several units in parallel. Results are in input order.
  pub fn transform_all(
    &self,
    inputs: Vec<TransformInput>,
  ) -> Vec<Result<TransformOutput, StyleTransformError>> {
    inputs
      .into_par_iter()
      .map(|input| self.transform(input))
      .collect()
  }

  #[tracing::instrument(level = "debug", skip_all, fields(module_id = %input.module_id))]
  pub fn transform(&self, input: TransformInput) -> Result<TransformOutput, StyleTransformError> {
    let mentions_style_function = self
      .config
      .style_functions()
      .any(|(_, import_name)| input.source_text.contains(import_name));
    if !mentions_style_function {
      return Ok(TransformOutput::unchanged(&input.source_text));
    }

    let parse_options = self.config.parse_options();
    run_with_resolver(
      input.module_id.as_str(),
      &input.source_text,
      parse_options,
      |context, module| self.transform_module(&input, &context, module),
    )
    .map_err(|source| StyleTransformError::Parse {
      module_id: input.module_id.clone(),
      source,
    })?
  }

  fn transform_module(
    &self,
    input: &TransformInput,
    context: &RunContext,
    module: &Module,
  ) -> Result<TransformOutput, StyleTransformError> {
    let mut call_sites = detect_style_calls(module, context, &self.config, &input.module_id);
    if call_sites.is_empty() {
      return Ok(TransformOutput::unchanged(&input.source_text));
    }

    let entry = ModuleGraphNode::build(input.module_id.clone(), module.clone(), |specifier| {
      if let Some(module_id) = input.resolved_import_map.get(specifier) {
        return Ok(module_id.clone());
      }
      self
        .loader
        .resolve(&input.module_id, specifier)
        .map_err(|error| format!("{error:#}"))
    });
    let graph = ModuleGraph::new(
      &self.cache,
      self.loader.as_ref(),
      self.config.parse_options(),
      Arc::new(entry),
    );

    let execution_report = self.evaluate(&graph, &mut call_sites)?;
    self.compile(&mut call_sites);

    let rewrite = self.rewrite(input, context, module, &mut call_sites)?;
    Ok(self.finish(input, call_sites, rewrite, execution_report))
  }

  /// Resolve the closure of every call site, then evaluate all resolvable ones in one batch.
  fn evaluate(
    &self,
    graph: &ModuleGraph<'_>,
    call_sites: &mut [StyleCallSite],
  ) -> Result<ExecutionReport, StyleTransformError> {
    let mut resolver = DependencyResolver::new(graph)
      .with_style_calls(call_sites.iter().map(|call_site| call_site.span));
    for call_site in call_sites.iter_mut() {
      match resolver.resolve(call_site) {
        Ok(closure) => {
          call_site.advance(CallSiteState::Resolving(closure));
        }
        Err(error) => {
          if let UnresolvableDependency::Load(load_error) = &error {
            if let Some(fatal) = StyleTransformError::from_load_error(load_error) {
              return Err(fatal);
            }
          }
          call_site.skip(CallSiteFailure::new(
            FailureKind::UnresolvableDependency,
            error.to_string(),
          ));
        }
      }
    }

    let pending: Vec<usize> = call_sites
      .iter()
      .enumerate()
      .filter(|(_, call_site)| call_site.closure().is_some())
      .map(|(index, _)| index)
      .collect();
    tracing::debug!(
      detected = call_sites.len(),
      resolved = pending.len(),
      "Resolved style call dependencies"
    );
    if pending.is_empty() {
      return Ok(ExecutionReport::default());
    }

    let limits = SandboxLimits {
      max_steps: self.config.max_evaluation_steps,
      max_call_depth: self.config.max_call_depth,
    };
    let outcome = {
      let jobs: Vec<EvaluationJob<'_>> = pending
        .iter()
        .filter_map(|index| {
          let call_site = &call_sites[*index];
          Some(EvaluationJob {
            argument: &call_site.argument,
            closure: call_site.closure()?,
          })
        })
        .collect();
      evaluate_batch(graph, limits, &jobs)
    };

    for (job, result) in outcome.results.into_iter().enumerate() {
      let call_site = &mut call_sites[pending[job]];
      match result {
        Ok(value) => {
          call_site.advance(CallSiteState::Resolved(value));
        }
        Err(error) => {
          if let EvaluationError::Load(load_error) = &error.error {
            if let Some(fatal) = StyleTransformError::from_load_error(load_error) {
              return Err(fatal);
            }
          }
          let mut failure = CallSiteFailure::new(error.error.failure_kind(), error.to_string());
          failure.failed_keys = error.failed_keys;
          if outcome.poisoned.contains(&job) {
            failure.message.push_str(" (after changing shared module state)");
          }
          call_site.skip(failure);
        }
      }
    }

    Ok(outcome.report)
  }

  fn compile(&self, call_sites: &mut [StyleCallSite]) {
    for call_site in call_sites.iter_mut() {
      let CallSiteState::Resolved(value) = &call_site.state else {
        continue;
      };
      match compile_styles(value, &self.config.class_name_prefix) {
        Ok(compiled) => {
          call_site.advance(CallSiteState::Compiled(compiled));
        }
        Err(error) => call_site.skip(CallSiteFailure::new(
          FailureKind::MalformedStyleObject,
          error.to_string(),
        )),
      }
    }
  }

  /// Build the replacement text of every compiled call site, and the runtime import they
  /// need.
  fn rewrite(
    &self,
    input: &TransformInput,
    context: &RunContext,
    module: &Module,
    call_sites: &mut [StyleCallSite],
  ) -> Result<Rewrite, StyleTransformError> {
    let compiled_count = call_sites
      .iter()
      .filter(|call_site| matches!(call_site.state, CallSiteState::Compiled(_)))
      .count();
    if compiled_count == 0 {
      return Ok(Rewrite::default());
    }

    let runtime_source = self.config.runtime_source();
    let import_name = &self.config.runtime_import_name;
    let import = plan_runtime_import(module, context, &input.source_text, runtime_source, import_name);
    let statement = import_statement(import.local(), import_name, runtime_source);

    let empty_groups = IndexMap::new();
    let mut replacements = Vec::with_capacity(compiled_count);
    for call_site in call_sites.iter_mut() {
      let CallSiteState::Compiled(compiled) = &call_site.state else {
        continue;
      };
      let rule_groups = match self.config.css_emission {
        CssEmission::Inline => &compiled.rule_groups,
        CssEmission::Extract => &empty_groups,
      };
      let text = runtime_call(import.local(), &compiled.class_mapping, rule_groups).map_err(
        |source| StyleTransformError::Codegen {
          module_id: input.module_id.clone(),
          source,
        },
      )?;
      replacements.push((call_site.source_range.clone(), text));

      let compiled = compiled.clone();
      call_site.advance(CallSiteState::Rewritten(compiled));
    }

    Ok(Rewrite {
      replacements,
      import: Some((import, statement)),
    })
  }

  fn finish(
    &self,
    input: &TransformInput,
    call_sites: Vec<StyleCallSite>,
    rewrite: Rewrite,
    execution_report: ExecutionReport,
  ) -> TransformOutput {
    let code = splice(
      &input.source_text,
      &rewrite.replacements,
      rewrite
        .import
        .as_ref()
        .map(|(import, statement)| (import, statement.as_str())),
    );

    let mut artifacts: BTreeMap<RuleGroup, IndexSet<String>> = BTreeMap::new();
    let mut diagnostics = Vec::new();
    let mut reports = Vec::with_capacity(call_sites.len());

    for call_site in call_sites {
      let outcome = match call_site.state {
        CallSiteState::Rewritten(compiled) => {
          if self.config.css_emission == CssEmission::Extract {
            self.extract(&compiled, &mut artifacts);
          }
          CallSiteOutcome::Rewritten {
            class_mapping: compiled.class_mapping,
            rule_groups: compiled.rule_groups,
          }
        }
        CallSiteState::Skipped(failure) => {
          diagnostics.push(self.diagnostic(&input.module_id, &call_site.source_range, &failure));
          CallSiteOutcome::Skipped {
            kind: failure.kind,
            message: failure.message,
            failed_keys: failure.failed_keys,
          }
        }
        // Every call site reaches a terminal state above; anything else was not rewritten
        _ => CallSiteOutcome::Skipped {
          kind: FailureKind::EvaluationRuntimeFailure,
          message: String::from("Call site did not complete compilation"),
          failed_keys: Vec::new(),
        },
      };
      reports.push(CallSiteReport {
        source_range: call_site.source_range,
        outcome,
      });
    }

    TransformOutput {
      code,
      css_artifacts: artifacts.into_values().flatten().collect(),
      diagnostics,
      call_sites: reports,
      execution_report,
    }
  }

  fn extract(&self, compiled: &CompiledStyles, artifacts: &mut BTreeMap<RuleGroup, IndexSet<String>>) {
    self.registry.add(compiled);
    for (key, rules) in &compiled.rule_groups {
      let group = RuleGroup::from_key(key).unwrap_or(RuleGroup::Default);
      artifacts
        .entry(group)
        .or_default()
        .extend(rules.iter().cloned());
    }
  }

  fn diagnostic(
    &self,
    module_id: &ModuleId,
    source_range: &Range<usize>,
    failure: &CallSiteFailure,
  ) -> Diagnostic {
    let severity = if self.config.warn_on_unresolved {
      tracing::warn!(
        module_id = %module_id,
        range = ?source_range,
        kind = failure.kind.as_str(),
        "Style call left for the runtime: {}",
        failure.message
      );
      Severity::Warning
    } else {
      tracing::debug!(
        module_id = %module_id,
        range = ?source_range,
        kind = failure.kind.as_str(),
        "Style call left for the runtime: {}",
        failure.message
      );
      Severity::Info
    };

    let mut diagnostic = Diagnostic::new(
      severity,
      failure.kind,
      format!(
        "makeStyles call is not compiled ({}): {}",
        failure.kind.as_str(),
        failure.message
      ),
      source_range.clone(),
    );
    if !failure.failed_keys.is_empty() {
      diagnostic = diagnostic.with_hint(format!(
        "These style keys could not be evaluated: {}",
        failure.failed_keys.join(", ")
      ));
    }
    diagnostic
  }
}

#[derive(Default)]
struct Rewrite {
  replacements: Vec<(Range<usize>, String)>,
  import: Option<(RuntimeImport, String)>,
}
