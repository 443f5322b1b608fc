//! Splices runtime-primitive calls into the unit's source text.
//!
//! Only the byte ranges of rewritten calls change; everything else, including the calls that
//! were skipped, is copied through untouched.

use std::collections::HashSet;
use std::ops::Range;

use indexmap::IndexMap;
use makestyles_swc_runner::{emit_expr, RunContext, RunWithTransformationError};
use swc_core::atoms::Atom;
use swc_core::common::{SyntaxContext, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

/// How rewritten calls reach the runtime primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeImport {
  /// The unit already imports the primitive under this local name.
  Existing(String),
  /// An import must be added at byte offset `at`.
  Insert { local: String, at: usize },
}

impl RuntimeImport {
  pub fn local(&self) -> &str {
    match self {
      RuntimeImport::Existing(local) => local,
      RuntimeImport::Insert { local, .. } => local,
    }
  }
}

/// Work out how the unit refers to `import_name` from `runtime_source`.
pub fn plan_runtime_import(
  module: &Module,
  context: &RunContext,
  source_text: &str,
  runtime_source: &str,
  import_name: &str,
) -> RuntimeImport {
  if let Some(local) = existing_import(module, runtime_source, import_name) {
    return RuntimeImport::Existing(local);
  }

  let mut names = NameCollector::default();
  module.visit_with(&mut names);
  let local = std::iter::once(import_name.to_string())
    .chain((2..).map(|suffix| format!("{import_name}{suffix}")))
    .find(|candidate| !names.names.contains(&Atom::from(candidate.as_str())))
    .unwrap_or_else(|| import_name.to_string());

  RuntimeImport::Insert {
    local,
    at: import_insertion_point(module, context, source_text),
  }
}

fn existing_import(module: &Module, runtime_source: &str, import_name: &str) -> Option<String> {
  module.body.iter().find_map(|item| {
    let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = item else {
      return None;
    };
    if import.type_only || &*import.src.value != runtime_source {
      return None;
    }
    import.specifiers.iter().find_map(|specifier| match specifier {
      ImportSpecifier::Named(named) if !named.is_type_only => {
        let imported = match &named.imported {
          Some(ModuleExportName::Ident(ident)) => &*ident.sym,
          Some(ModuleExportName::Str(value)) => &*value.value,
          None => &*named.local.sym,
        };
        (imported == import_name).then(|| named.local.sym.to_string())
      }
      _ => None,
    })
  })
}

/// Offset after the leading directives (`'use client'`), or after a shebang line.
fn import_insertion_point(module: &Module, context: &RunContext, source_text: &str) -> usize {
  let directives_end = module
    .body
    .iter()
    .map_while(|item| match item {
      ModuleItem::Stmt(Stmt::Expr(ExprStmt { expr, span }))
        if matches!(&**expr, Expr::Lit(Lit::Str(_))) =>
      {
        Some(context.byte_range(*span).end)
      }
      _ => None,
    })
    .last();

  if let Some(end) = directives_end {
    return end;
  }
  if source_text.starts_with("#!") {
    return source_text.find('\n').map_or(source_text.len(), |index| index + 1);
  }
  0
}

#[derive(Default)]
struct NameCollector {
  names: HashSet<Atom>,
}

impl Visit for NameCollector {
  fn visit_ident(&mut self, ident: &Ident) {
    self.names.insert(ident.sym.clone());
  }
}

/// Text of the import statement for an inserted runtime import.
pub fn import_statement(local: &str, import_name: &str, runtime_source: &str) -> String {
  let source = serde_json::to_string(runtime_source)
    .unwrap_or_else(|_| format!("\"{runtime_source}\""));
  if local == import_name {
    format!("import {{ {import_name} }} from {source};")
  } else {
    format!("import {{ {import_name} as {local} }} from {source};")
  }
}

/// Emit `local(classMapping, ruleGroups)`. Slots with a single class map to a string, others
/// to an array.
pub fn runtime_call(
  local: &str,
  class_mapping: &IndexMap<String, Vec<String>>,
  rule_groups: &IndexMap<String, Vec<String>>,
) -> Result<String, RunWithTransformationError> {
  let classes = object(class_mapping.iter().map(|(slot, classes)| {
    let value = match classes.as_slice() {
      [single] => string(single),
      many => array(many),
    };
    (slot.as_str(), value)
  }));
  let rules = object(
    rule_groups
      .iter()
      .map(|(group, rules)| (group.as_str(), array(rules))),
  );

  let call = Expr::Call(CallExpr {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    callee: Callee::Expr(Box::new(Expr::Ident(Ident::new_no_ctxt(
      Atom::from(local),
      DUMMY_SP,
    )))),
    args: vec![
      ExprOrSpread {
        spread: None,
        expr: Box::new(classes),
      },
      ExprOrSpread {
        spread: None,
        expr: Box::new(rules),
      },
    ],
    type_args: None,
  });
  emit_expr(&call)
}

fn string(value: &str) -> Expr {
  Expr::Lit(Lit::Str(Str {
    span: DUMMY_SP,
    value: value.into(),
    raw: None,
  }))
}

fn array(values: &[String]) -> Expr {
  Expr::Array(ArrayLit {
    span: DUMMY_SP,
    elems: values
      .iter()
      .map(|value| {
        Some(ExprOrSpread {
          spread: None,
          expr: Box::new(string(value)),
        })
      })
      .collect(),
  })
}

fn object<'a>(entries: impl Iterator<Item = (&'a str, Expr)>) -> Expr {
  Expr::Object(ObjectLit {
    span: DUMMY_SP,
    props: entries
      .map(|(key, value)| {
        PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
          key: prop_name(key),
          value: Box::new(value),
        })))
      })
      .collect(),
  })
}

fn prop_name(key: &str) -> PropName {
  let mut chars = key.chars();
  let is_identifier = chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
  if is_identifier {
    PropName::Ident(IdentName::new(Atom::from(key), DUMMY_SP))
  } else {
    PropName::Str(Str {
      span: DUMMY_SP,
      value: key.into(),
      raw: None,
    })
  }
}

/// Replace `replacements` (sorted or not, never overlapping) in `source_text` and add the
/// runtime import when one is needed. Without replacements the source is returned unchanged.
pub fn splice(
  source_text: &str,
  replacements: &[(Range<usize>, String)],
  import: Option<(&RuntimeImport, &str)>,
) -> String {
  if replacements.is_empty() {
    return source_text.to_string();
  }

  let mut edits: Vec<(Range<usize>, String)> = replacements.to_vec();
  if let Some((RuntimeImport::Insert { at, .. }, statement)) = import {
    let text = if *at == 0 || source_text[..*at].ends_with('\n') {
      format!("{statement}\n")
    } else {
      format!("\n{statement}")
    };
    edits.push((*at..*at, text));
  }
  edits.sort_by_key(|(range, _)| (range.start, range.end));

  let added: usize = edits.iter().map(|(_, text)| text.len()).sum();
  let mut output = String::with_capacity(source_text.len() + added);
  let mut cursor = 0;
  for (range, text) in &edits {
    if range.start < cursor {
      continue;
    }
    output.push_str(&source_text[cursor..range.start]);
    output.push_str(text);
    cursor = range.end;
  }
  output.push_str(&source_text[cursor..]);
  output
}
