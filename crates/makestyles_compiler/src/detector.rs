use std::collections::{HashMap, HashSet};

use makestyles_swc_runner::RunContext;
use swc_core::atoms::Atom;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::call_site::{CallSiteState, StyleCallSite};
use crate::config::StyleCompilerConfig;
use crate::loader::ModuleId;
use crate::module_graph::FreeIdentifiers;

/// Find every call to the configured style-definition function in `module`.
///
/// Calls are matched by binding, not by name: a local variable that shadows the import is not
/// a style call. Calls whose shape is ambiguous (no argument, several arguments or a spread)
/// are left alone. Returns an empty list when the module does not import the function.
pub fn detect_style_calls(
  module: &Module,
  context: &RunContext,
  config: &StyleCompilerConfig,
  module_id: &ModuleId,
) -> Vec<StyleCallSite> {
  let imports = StyleFunctionImports::collect(module, config);
  if imports.is_empty() {
    return Vec::new();
  }

  let mut detector = StyleCallDetector {
    imports,
    context,
    module_id,
    call_sites: Vec::new(),
  };
  module.visit_with(&mut detector);

  tracing::debug!(
    module_id = %module_id,
    count = detector.call_sites.len(),
    "Detected style calls"
  );
  detector.call_sites
}

/// Local bindings of the style-definition function.
#[derive(Debug, Default)]
struct StyleFunctionImports {
  direct: HashSet<Id>,
  /// Namespace imports, with the member names that refer to the function.
  namespaces: HashMap<Id, HashSet<Atom>>,
}

impl StyleFunctionImports {
  fn collect(module: &Module, config: &StyleCompilerConfig) -> Self {
    let mut imports = StyleFunctionImports::default();

    for item in &module.body {
      let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = item else {
        continue;
      };
      if import.type_only {
        continue;
      }

      let source = import.src.value.as_ref();
      for (module_source, import_name) in config.style_functions() {
        if source != module_source {
          continue;
        }

        for specifier in &import.specifiers {
          match specifier {
            ImportSpecifier::Named(named) if !named.is_type_only => {
              let imported = match &named.imported {
                Some(ModuleExportName::Ident(ident)) => ident.sym.as_ref(),
                Some(ModuleExportName::Str(value)) => value.value.as_ref(),
                None => named.local.sym.as_ref(),
              };
              if imported == import_name {
                imports.direct.insert(named.local.to_id());
              }
            }
            ImportSpecifier::Namespace(namespace) => {
              imports
                .namespaces
                .entry(namespace.local.to_id())
                .or_default()
                .insert(Atom::from(import_name));
            }
            _ => {}
          }
        }
      }
    }

    imports
  }

  fn is_empty(&self) -> bool {
    self.direct.is_empty() && self.namespaces.is_empty()
  }

  fn matches(&self, callee: &Expr) -> bool {
    match callee {
      Expr::Ident(ident) => self.direct.contains(&ident.to_id()),
      Expr::Member(MemberExpr { obj, prop, .. }) => {
        let Expr::Ident(object) = &**obj else {
          return false;
        };
        let Some(names) = self.namespaces.get(&object.to_id()) else {
          return false;
        };
        match prop {
          MemberProp::Ident(name) => names.contains(&name.sym),
          MemberProp::Computed(ComputedPropName { expr, .. }) => match &**expr {
            Expr::Lit(Lit::Str(value)) => names.contains(&Atom::from(value.value.as_ref())),
            _ => false,
          },
          MemberProp::PrivateName(_) => false,
        }
      }
      Expr::Paren(paren) => self.matches(&paren.expr),
      _ => false,
    }
  }
}

struct StyleCallDetector<'a> {
  imports: StyleFunctionImports,
  context: &'a RunContext,
  module_id: &'a ModuleId,
  call_sites: Vec<StyleCallSite>,
}

impl StyleCallDetector<'_> {
  fn record(&mut self, call: &CallExpr, argument: &Expr) {
    let references = FreeIdentifiers::of_expr(argument);
    let enclosing_locals = references
      .iter()
      .filter(|(_, ctxt, _)| {
        let mark = ctxt.outer();
        mark != self.context.global_mark && mark != self.context.unresolved_mark
      })
      .map(|(name, _, _)| name.clone())
      .collect();

    self.call_sites.push(StyleCallSite {
      module_id: self.module_id.clone(),
      source_range: self.context.byte_range(call.span),
      span: call.span,
      argument: Box::new(argument.clone()),
      references,
      enclosing_locals,
      state: CallSiteState::Detected,
    });
  }
}

impl Visit for StyleCallDetector<'_> {
  fn visit_call_expr(&mut self, call: &CallExpr) {
    let Callee::Expr(callee) = &call.callee else {
      call.visit_children_with(self);
      return;
    };
    if !self.imports.matches(callee) {
      call.visit_children_with(self);
      return;
    }

    match call.args.as_slice() {
      [ExprOrSpread { spread: None, expr }] => self.record(call, expr),
      _ => {
        tracing::debug!(
          module_id = %self.module_id,
          range = ?self.context.byte_range(call.span),
          "Ignoring style call without exactly one plain argument"
        );
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use makestyles_swc_runner::{run_with_resolver, ParseOptions};
  use pretty_assertions::assert_eq;

  use super::*;

  struct Detected {
    ranges: Vec<String>,
    locals: Vec<Vec<String>>,
  }

  fn detect_with(code: &str, config: &StyleCompilerConfig) -> Detected {
    let options = ParseOptions {
      jsx: true,
      typescript: true,
      ..Default::default()
    };
    let sites = run_with_resolver("/src/test.tsx", code, options, |context, module| {
      detect_style_calls(module, &context, config, &ModuleId::from("/src/test.tsx"))
    })
    .unwrap();

    Detected {
      ranges: sites
        .iter()
        .map(|site| code[site.source_range.clone()].to_string())
        .collect(),
      locals: sites
        .iter()
        .map(|site| {
          site
            .enclosing_locals
            .iter()
            .map(|name| name.to_string())
            .collect()
        })
        .collect(),
    }
  }

  fn detect(code: &str) -> Detected {
    detect_with(code, &StyleCompilerConfig::default())
  }

  #[test]
  fn test_detects_named_import() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from '@griffel/react';
      export const useStyles = makeStyles({ root: { color: 'red' } });
    "#});
    assert_eq!(
      detected.ranges,
      vec!["makeStyles({ root: { color: 'red' } })"]
    );
  }

  #[test]
  fn test_detects_renamed_and_namespace_imports() {
    let detected = detect(indoc! {r#"
      import { makeStyles as ms } from '@griffel/react';
      import * as griffel from '@griffel/react';
      const a = ms({ a: {} });
      const b = griffel.makeStyles({ b: {} });
      const c = griffel['makeStyles']({ c: {} });
      const d = griffel.mergeClasses('x');
    "#});
    assert_eq!(
      detected.ranges,
      vec![
        "ms({ a: {} })",
        "griffel.makeStyles({ b: {} })",
        "griffel['makeStyles']({ c: {} })"
      ]
    );
  }

  #[test]
  fn test_no_import_no_call_sites() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from 'other-library';
      const useStyles = makeStyles({ root: {} });
    "#});
    assert!(detected.ranges.is_empty());
  }

  #[test]
  fn test_shadowed_binding_is_not_a_call_site() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from '@griffel/react';
      function factory(makeStyles) {
        return makeStyles({ root: {} });
      }
    "#});
    assert!(detected.ranges.is_empty());
  }

  #[test]
  fn test_ambiguous_calls_are_ignored() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from '@griffel/react';
      const a = makeStyles();
      const b = makeStyles({}, {});
      const c = makeStyles(...args);
      const d = makeStyles({ ok: {} });
    "#});
    assert_eq!(detected.ranges, vec!["makeStyles({ ok: {} })"]);
  }

  #[test]
  fn test_aliases() {
    let config = StyleCompilerConfig {
      aliases: vec![crate::config::StyleFunctionImport {
        module_source: String::from("@acme/design"),
        import_name: String::from("createStyles"),
      }],
      ..Default::default()
    };
    let detected = detect_with(
      indoc! {r#"
        import { createStyles } from '@acme/design';
        const useStyles = createStyles({ root: {} });
      "#},
      &config,
    );
    assert_eq!(detected.ranges, vec!["createStyles({ root: {} })"]);
  }

  #[test]
  fn test_enclosing_function_locals_are_reported() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from '@griffel/react';
      import { tokens } from './tokens';
      const gap = 4;
      export function Component({ color }) {
        const useStyles = makeStyles({
          root: { color, gap, padding: tokens.padding, width: window.innerWidth },
          fn: { margin: ((m) => m)(1) },
        });
        return useStyles;
      }
    "#});
    assert_eq!(detected.locals, vec![vec![String::from("color")]]);
  }

  #[test]
  fn test_nested_calls_inside_arguments_are_not_detected_twice() {
    let detected = detect(indoc! {r#"
      import { makeStyles } from '@griffel/react';
      wrap(makeStyles({ root: {} }));
    "#});
    assert_eq!(detected.ranges, vec!["makeStyles({ root: {} })"]);
  }
}
