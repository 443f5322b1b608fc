use std::ops::Range;

use serde::Serialize;

/// Why a call site was left on the runtime fallback path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
  DetectionAmbiguity,
  UnresolvableDependency,
  EvaluationRuntimeFailure,
  MalformedStyleObject,
}

impl FailureKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      FailureKind::DetectionAmbiguity => "detection ambiguity",
      FailureKind::UnresolvableDependency => "unresolvable dependency",
      FailureKind::EvaluationRuntimeFailure => "evaluation failure",
      FailureKind::MalformedStyleObject => "malformed style object",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
  Warning,
  Info,
}

/// A non-fatal message about one call site of a compilation unit.
///
/// Diagnostics never fail the build; they explain why a call site kept its runtime behaviour.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  pub severity: Severity,
  pub kind: FailureKind,
  pub message: String,
  /// Byte offsets of the call expression in the unit's source text.
  pub source_range: Range<usize>,
  pub hints: Vec<String>,
}

impl Diagnostic {
  pub fn new(severity: Severity, kind: FailureKind, message: String, source_range: Range<usize>) -> Self {
    Self {
      severity,
      kind,
      message,
      source_range,
      hints: Vec::new(),
    }
  }

  pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
    self.hints.push(hint.into());
    self
  }
}
