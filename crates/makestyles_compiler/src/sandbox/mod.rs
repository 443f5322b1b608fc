//! Isolated evaluation of style expressions.
//!
//! Evaluated code runs in a small interpreter over the parsed modules: it has no access to
//! the file system, the network, timers or any host object, only to the bindings of the
//! module graph and an allow-listed standard library. All call sites of a compilation unit
//! are evaluated in one batch that shares module instances, so a dependency needed by several
//! call sites is evaluated once.

use indexmap::IndexMap;
use serde::Serialize;
use swc_core::ecma::ast::Expr;

use crate::dependency_resolver::{BindingKey, EvaluationClosure};
use crate::diagnostic::FailureKind;
use crate::loader::ModuleId;
use crate::module_graph::{LoadError, ModuleGraph};

mod builtins;
mod interpreter;
mod scope;
mod value;

use interpreter::Interpreter;
pub(crate) use value::number_to_string;

/// Deepest nesting of objects and arrays a style value may have.
pub const MAX_VALUE_DEPTH: usize = 64;

/// A fully evaluated style value, detached from the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvaluatedValue {
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(String),
  Array(Vec<EvaluatedValue>),
  Object(IndexMap<String, EvaluatedValue>),
  /// Functions cannot be compiled to CSS; the style compiler rejects them.
  Function,
}

impl EvaluatedValue {
  pub fn as_object(&self) -> Option<&IndexMap<String, EvaluatedValue>> {
    match self {
      EvaluatedValue::Object(properties) => Some(properties),
      _ => None,
    }
  }

  pub fn kind_name(&self) -> &'static str {
    match self {
      EvaluatedValue::Undefined => "undefined",
      EvaluatedValue::Null => "null",
      EvaluatedValue::Bool(_) => "boolean",
      EvaluatedValue::Number(_) => "number",
      EvaluatedValue::String(_) => "string",
      EvaluatedValue::Array(_) => "array",
      EvaluatedValue::Object(_) => "object",
      EvaluatedValue::Function => "function",
    }
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
  #[error("Unsupported in evaluated code: {0}")]
  Unsupported(String),
  #[error("Unavailable at build time: {0}")]
  UnavailableGlobal(String),
  #[error("'{0}' is read before it is initialized")]
  Uninitialized(String),
  #[error("TypeError: {0}")]
  Type(String),
  #[error("Uncaught {0}")]
  Thrown(String),
  #[error("Cannot resolve '{specifier}' imported by {from}: {message}")]
  UnresolvedImport {
    from: ModuleId,
    specifier: String,
    message: String,
  },
  #[error("{module_id} does not export '{name}'")]
  MissingExport { module_id: String, name: String },
  #[error(transparent)]
  Load(#[from] LoadError),
  #[error("Circular evaluation of {0}")]
  Circular(String),
  #[error("Evaluation exceeded the budget of {0} steps")]
  StepBudgetExceeded(u64),
  #[error("Evaluation exceeded the maximum call depth of {0}")]
  CallDepthExceeded(usize),
}

impl EvaluationError {
  pub fn failure_kind(&self) -> FailureKind {
    match self {
      EvaluationError::UnresolvedImport { .. }
      | EvaluationError::MissingExport { .. }
      | EvaluationError::Load(_)
      | EvaluationError::Circular(_)
      | EvaluationError::Uninitialized(_) => FailureKind::UnresolvableDependency,
      _ => FailureKind::EvaluationRuntimeFailure,
    }
  }

  /// Errors evaluated code can observe with `try`/`catch`.
  pub fn is_catchable(&self) -> bool {
    matches!(self, EvaluationError::Type(_) | EvaluationError::Thrown(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
  /// Statements, loop iterations and calls one call site may execute.
  pub max_steps: u64,
  pub max_call_depth: usize,
}

impl Default for SandboxLimits {
  fn default() -> Self {
    Self {
      max_steps: 100_000,
      max_call_depth: 64,
    }
  }
}

/// A style argument to evaluate and the bindings it needs.
pub struct EvaluationJob<'a> {
  pub argument: &'a Expr,
  pub closure: &'a EvaluationClosure,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct CallSiteEvaluationError {
  pub error: EvaluationError,
  /// Top-level keys of the style object whose values failed.
  pub failed_keys: Vec<String>,
}

impl From<EvaluationError> for CallSiteEvaluationError {
  fn from(error: EvaluationError) -> Self {
    Self {
      error,
      failed_keys: Vec::new(),
    }
  }
}

/// How often each module and binding was evaluated by the batch whose results were kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
  pub module_executions: IndexMap<ModuleId, usize>,
  pub binding_evaluations: IndexMap<BindingKey, usize>,
  /// A call site failed after changing shared state and the rest of the batch was evaluated
  /// again from scratch.
  pub retried: bool,
}

#[derive(Debug)]
pub struct BatchOutcome {
  /// One result per job, in job order.
  pub results: Vec<Result<EvaluatedValue, CallSiteEvaluationError>>,
  pub report: ExecutionReport,
  /// Indices of jobs that failed after writing to state shared with other jobs.
  pub poisoned: Vec<usize>,
}

/// Evaluate every job of a compilation unit in one shared sandbox.
///
/// A job that fails after writing to shared state may have left it inconsistent for the jobs
/// that follow. In that case the remaining jobs are evaluated once more in a fresh sandbox;
/// the poisoned jobs keep their original errors.
#[tracing::instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
pub fn evaluate_batch(
  graph: &ModuleGraph<'_>,
  limits: SandboxLimits,
  jobs: &[EvaluationJob<'_>],
) -> BatchOutcome {
  let (mut results, report, poisoned) = run_jobs(graph, limits, jobs.iter().enumerate());
  if poisoned.is_empty() {
    return BatchOutcome {
      results,
      report,
      poisoned,
    };
  }

  tracing::debug!(
    poisoned = ?poisoned,
    "Call sites failed after mutating shared state, evaluating the batch again"
  );
  let clean = jobs
    .iter()
    .enumerate()
    .filter(|(index, _)| !poisoned.contains(index));
  let (retried_results, mut report, _) = run_jobs(graph, limits, clean);

  let mut retried_results = retried_results.into_iter();
  for (index, result) in results.iter_mut().enumerate() {
    if poisoned.contains(&index) {
      continue;
    }
    if let Some(retried) = retried_results.next() {
      *result = retried;
    }
  }
  report.retried = true;

  BatchOutcome {
    results,
    report,
    poisoned,
  }
}

type JobResults = Vec<Result<EvaluatedValue, CallSiteEvaluationError>>;

fn run_jobs<'j>(
  graph: &ModuleGraph<'_>,
  limits: SandboxLimits,
  jobs: impl Iterator<Item = (usize, &'j EvaluationJob<'j>)>,
) -> (JobResults, ExecutionReport, Vec<usize>) {
  let mut interpreter = Interpreter::new(graph, limits);
  let mut results = Vec::new();
  let mut poisoned = Vec::new();

  for (index, job) in jobs {
    let mutations_before = interpreter.mutations();
    let result = interpreter.run_call_site(job.argument, job.closure);
    if let Err(error) = &result {
      tracing::debug!(job = index, %error, "Call site evaluation failed");
      if interpreter.mutations() > mutations_before {
        poisoned.push(index);
      }
    }
    results.push(result);
  }

  (results, interpreter.into_report(), poisoned)
}
