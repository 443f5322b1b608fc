use std::ops::Range;

use swc_core::atoms::Atom;
use swc_core::common::Span;
use swc_core::ecma::ast::Expr;

use crate::dependency_resolver::EvaluationClosure;
use crate::diagnostic::FailureKind;
use crate::loader::ModuleId;
use crate::module_graph::FreeIdentifiers;
use crate::sandbox::EvaluatedValue;
use crate::style_compiler::CompiledStyles;

/// One invocation of the style-definition function found in a compilation unit.
#[derive(Debug)]
pub struct StyleCallSite {
  pub module_id: ModuleId,
  /// Byte offsets of the whole call expression in the unit's source text.
  pub source_range: Range<usize>,
  pub span: Span,
  pub argument: Box<Expr>,
  /// Module-level and global names the argument reads.
  pub references: FreeIdentifiers,
  /// Names the argument reads that are bound by an enclosing function.
  pub enclosing_locals: Vec<Atom>,
  pub state: CallSiteState,
}

/// Lifecycle of a call site.
///
/// ```text
/// Detected -> Resolving -> Resolved -> Compiled -> Rewritten
///     \           \           \
///      `-----------`-----------`--> Skipped
/// ```
///
/// `Rewritten` and `Skipped` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSiteState {
  Detected,
  Resolving(EvaluationClosure),
  Resolved(EvaluatedValue),
  Compiled(CompiledStyles),
  Rewritten(CompiledStyles),
  Skipped(CallSiteFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSiteFailure {
  pub kind: FailureKind,
  pub message: String,
  /// Top-level keys of the style object that could not be evaluated, when known.
  pub failed_keys: Vec<String>,
}

impl CallSiteFailure {
  pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      failed_keys: Vec::new(),
    }
  }
}

impl StyleCallSite {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self.state,
      CallSiteState::Rewritten(_) | CallSiteState::Skipped(_)
    )
  }

  pub fn skip(&mut self, failure: CallSiteFailure) {
    if !self.is_terminal() {
      self.state = CallSiteState::Skipped(failure);
    }
  }

  /// Move to the next state. Transitions that do not follow the lifecycle are ignored and
  /// reported as `false`.
  pub fn advance(&mut self, next: CallSiteState) -> bool {
    let allowed = matches!(
      (&self.state, &next),
      (CallSiteState::Detected, CallSiteState::Resolving(_))
        | (CallSiteState::Resolving(_), CallSiteState::Resolved(_))
        | (CallSiteState::Resolved(_), CallSiteState::Compiled(_))
        | (CallSiteState::Compiled(_), CallSiteState::Rewritten(_))
    ) || matches!(next, CallSiteState::Skipped(_)) && !self.is_terminal();

    if allowed {
      self.state = next;
    }
    allowed
  }

  pub fn closure(&self) -> Option<&EvaluationClosure> {
    match &self.state {
      CallSiteState::Resolving(closure) => Some(closure),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use swc_core::common::DUMMY_SP;
  use swc_core::ecma::ast::{Expr, Invalid};

  use super::*;

  fn call_site() -> StyleCallSite {
    StyleCallSite {
      module_id: ModuleId::from("/src/Button.tsx"),
      source_range: 0..10,
      span: DUMMY_SP,
      argument: Box::new(Expr::Invalid(Invalid { span: DUMMY_SP })),
      references: FreeIdentifiers::default(),
      enclosing_locals: Vec::new(),
      state: CallSiteState::Detected,
    }
  }

  #[test]
  fn test_happy_path() {
    let mut site = call_site();
    assert!(site.advance(CallSiteState::Resolving(EvaluationClosure::default())));
    assert!(site.closure().is_some());
    assert!(site.advance(CallSiteState::Resolved(EvaluatedValue::Null)));
    assert!(site.advance(CallSiteState::Compiled(CompiledStyles::default())));
    assert!(site.advance(CallSiteState::Rewritten(CompiledStyles::default())));
    assert!(site.is_terminal());
  }

  #[test]
  fn test_states_cannot_be_skipped_over() {
    let mut site = call_site();
    assert!(!site.advance(CallSiteState::Compiled(CompiledStyles::default())));
    assert_eq!(site.state, CallSiteState::Detected);
  }

  #[test]
  fn test_skipped_is_terminal() {
    let mut site = call_site();
    site.skip(CallSiteFailure::new(FailureKind::UnresolvableDependency, "missing"));
    assert!(site.is_terminal());
    assert!(!site.advance(CallSiteState::Resolving(EvaluationClosure::default())));
    assert!(!site.advance(CallSiteState::Skipped(CallSiteFailure::new(
      FailureKind::MalformedStyleObject,
      "again"
    ))));
  }
}
