//! Import/export/declaration tables of the modules a compilation unit depends on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use makestyles_shared_map::MemoizedHashMap;
use makestyles_swc_runner::{parse_module, ParseOptions};
use swc_core::atoms::Atom;
use swc_core::common::util::take::Take;
use swc_core::common::Span;
use swc_core::ecma::ast::*;

use crate::loader::{ModuleId, ModuleLoader};

mod free_identifiers;

pub use free_identifiers::{pat_binding_names, FreeIdentifiers};

/// Local name under which an anonymous `export default` value is stored.
pub const DEFAULT_EXPORT_BINDING: &str = "*default*";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
  #[error("Failed to read {module_id}: {message}")]
  Read { module_id: ModuleId, message: String },
  #[error("Failed to parse {module_id}: {message}")]
  Parse { module_id: ModuleId, message: String },
  #[error("{module_id} only parses with the parser features [{}] enabled", .features.join(", "))]
  MissingParserFeature {
    module_id: ModuleId,
    features: Vec<&'static str>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportedName {
  Named(Atom),
  Default,
  Namespace,
}

impl ImportedName {
  fn from_export_name(name: &ModuleExportName) -> Self {
    let name = export_name(name);
    if &*name == "default" {
      ImportedName::Default
    } else {
      ImportedName::Named(name)
    }
  }

  /// The export this import reads, `None` for namespace imports.
  pub fn export_name(&self) -> Option<Atom> {
    match self {
      ImportedName::Named(name) => Some(name.clone()),
      ImportedName::Default => Some(Atom::from("default")),
      ImportedName::Namespace => None,
    }
  }
}

/// Where an import or re-export points. `source` carries the resolver's error message when
/// the specifier could not be resolved; the failure only matters if the binding is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBinding {
  pub specifier: Atom,
  pub imported: ImportedName,
  pub source: Result<ModuleId, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportTarget {
  /// Exported from a module-level binding (a declaration or an import) of this module.
  Local(Atom),
  ReExport(ImportBinding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StarExport {
  pub specifier: Atom,
  pub source: Result<ModuleId, String>,
}

/// Position of a module-level declaration in the module body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
  Var { item: usize, declarator: usize },
  Function { item: usize },
  Class { item: usize },
  Enum { item: usize },
  /// `export default <expression>`
  Expression { item: usize },
}

impl Declaration {
  /// Index of the declaring item in the module body.
  pub fn item(&self) -> usize {
    match self {
      Declaration::Var { item, .. }
      | Declaration::Function { item }
      | Declaration::Class { item }
      | Declaration::Enum { item }
      | Declaration::Expression { item } => *item,
    }
  }
}

/// Borrowed AST of a declaration.
pub enum DeclarationSource<'a> {
  Var(&'a VarDeclarator, VarDeclKind),
  Function(Option<&'a Ident>, &'a Function),
  Class(&'a Class),
  Enum(&'a TsEnumDecl),
  Expression(&'a Expr),
}

pub struct ModuleGraphNode {
  pub module_id: ModuleId,
  pub module: Module,
  pub imported_bindings: IndexMap<Atom, ImportBinding>,
  pub exported_bindings: IndexMap<Atom, ExportTarget>,
  pub star_exports: Vec<StarExport>,
  pub declarations: IndexMap<Atom, Declaration>,
  /// Top-level code other than declarations runs when the module is imported, or a
  /// declaration's initializer may modify another module-level binding.
  pub has_side_effects: bool,
}

impl std::fmt::Debug for ModuleGraphNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleGraphNode")
      .field("module_id", &self.module_id)
      .field("imported_bindings", &self.imported_bindings)
      .field("exported_bindings", &self.exported_bindings)
      .field("star_exports", &self.star_exports)
      .field("declarations", &self.declarations)
      .field("has_side_effects", &self.has_side_effects)
      .finish()
  }
}

impl ModuleGraphNode {
  /// Build the tables of `module`, resolving each distinct specifier once through `resolve`.
  pub fn build(
    module_id: ModuleId,
    module: Module,
    mut resolve: impl FnMut(&str) -> Result<ModuleId, String>,
  ) -> Self {
    let mut resolved: HashMap<Atom, Result<ModuleId, String>> = HashMap::new();
    let mut resolve_source = |specifier: &Atom| {
      resolved
        .entry(specifier.clone())
        .or_insert_with(|| resolve(specifier))
        .clone()
    };

    let mut node = ModuleGraphNode {
      module_id,
      module: Module::dummy(),
      imported_bindings: IndexMap::new(),
      exported_bindings: IndexMap::new(),
      star_exports: Vec::new(),
      declarations: IndexMap::new(),
      has_side_effects: false,
    };

    for (item, module_item) in module.body.iter().enumerate() {
      match module_item {
        ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
          if import.type_only || import.specifiers.is_empty() {
            continue;
          }
          let specifier = str_atom(&import.src);
          let source = resolve_source(&specifier);
          for import_specifier in &import.specifiers {
            let (local, imported) = match import_specifier {
              ImportSpecifier::Named(named) if named.is_type_only => continue,
              ImportSpecifier::Named(named) => (
                named.local.sym.clone(),
                named
                  .imported
                  .as_ref()
                  .map(ImportedName::from_export_name)
                  .unwrap_or_else(|| ImportedName::Named(named.local.sym.clone())),
              ),
              ImportSpecifier::Default(default) => (default.local.sym.clone(), ImportedName::Default),
              ImportSpecifier::Namespace(namespace) => {
                (namespace.local.sym.clone(), ImportedName::Namespace)
              }
            };
            node.imported_bindings.insert(
              local,
              ImportBinding {
                specifier: specifier.clone(),
                imported,
                source: source.clone(),
              },
            );
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
          for name in node.add_decl(item, &export.decl) {
            node
              .exported_bindings
              .insert(name.clone(), ExportTarget::Local(name));
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(export)) => {
          if export.type_only {
            continue;
          }
          match &export.src {
            Some(src) => {
              let specifier = str_atom(src);
              let source = resolve_source(&specifier);
              for export_specifier in &export.specifiers {
                let (exported, imported) = match export_specifier {
                  ExportSpecifier::Named(named) if named.is_type_only => continue,
                  ExportSpecifier::Named(named) => (
                    export_name(named.exported.as_ref().unwrap_or(&named.orig)),
                    ImportedName::from_export_name(&named.orig),
                  ),
                  ExportSpecifier::Namespace(namespace) => {
                    (export_name(&namespace.name), ImportedName::Namespace)
                  }
                  ExportSpecifier::Default(default) => {
                    (default.exported.sym.clone(), ImportedName::Default)
                  }
                };
                node.exported_bindings.insert(
                  exported,
                  ExportTarget::ReExport(ImportBinding {
                    specifier: specifier.clone(),
                    imported,
                    source: source.clone(),
                  }),
                );
              }
            }
            None => {
              for export_specifier in &export.specifiers {
                if let ExportSpecifier::Named(named) = export_specifier {
                  if named.is_type_only {
                    continue;
                  }
                  let local = export_name(&named.orig);
                  let exported = named
                    .exported
                    .as_ref()
                    .map(export_name)
                    .unwrap_or_else(|| local.clone());
                  node
                    .exported_bindings
                    .insert(exported, ExportTarget::Local(local));
                }
              }
            }
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
          let (name, declaration) = match &export.decl {
            DefaultDecl::Fn(function) => (
              function.ident.as_ref().map(|ident| ident.sym.clone()),
              Declaration::Function { item },
            ),
            DefaultDecl::Class(class) => (
              class.ident.as_ref().map(|ident| ident.sym.clone()),
              Declaration::Class { item },
            ),
            DefaultDecl::TsInterfaceDecl(_) => continue,
          };
          let name = name.unwrap_or_else(|| Atom::from(DEFAULT_EXPORT_BINDING));
          node.declarations.insert(name.clone(), declaration);
          node
            .exported_bindings
            .insert(Atom::from("default"), ExportTarget::Local(name));
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(_)) => {
          let name = Atom::from(DEFAULT_EXPORT_BINDING);
          node
            .declarations
            .insert(name.clone(), Declaration::Expression { item });
          node
            .exported_bindings
            .insert(Atom::from("default"), ExportTarget::Local(name));
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
          if export.type_only {
            continue;
          }
          let specifier = str_atom(&export.src);
          node.star_exports.push(StarExport {
            source: resolve_source(&specifier),
            specifier,
          });
        }
        ModuleItem::ModuleDecl(_) => node.has_side_effects = true,
        ModuleItem::Stmt(Stmt::Decl(decl)) => {
          node.add_decl(item, decl);
        }
        ModuleItem::Stmt(Stmt::Empty(_)) => {}
        ModuleItem::Stmt(stmt) if is_directive(stmt) => {}
        ModuleItem::Stmt(_) => node.has_side_effects = true,
      }
    }

    node.module = module;
    if !node.has_side_effects {
      let no_skipped_calls = HashSet::new();
      node.has_side_effects = (0..node.module.body.len())
        .any(|item| !node.top_level_writes(item, &no_skipped_calls).is_empty());
    }
    node
  }

  /// Record the names declared by `decl`, returning them in source order.
  fn add_decl(&mut self, item: usize, decl: &Decl) -> Vec<Atom> {
    let mut names = Vec::new();
    match decl {
      Decl::Var(var) if var.declare => {}
      Decl::Var(var) => {
        for (declarator, var_declarator) in var.decls.iter().enumerate() {
          let mut declared = Vec::new();
          pat_binding_names(&var_declarator.name, &mut declared);
          for name in declared {
            self
              .declarations
              .insert(name.clone(), Declaration::Var { item, declarator });
            names.push(name);
          }
        }
      }
      Decl::Fn(function) if function.declare => {}
      Decl::Fn(function) => {
        self
          .declarations
          .insert(function.ident.sym.clone(), Declaration::Function { item });
        names.push(function.ident.sym.clone());
      }
      Decl::Class(class) if class.declare => {}
      Decl::Class(class) => {
        self
          .declarations
          .insert(class.ident.sym.clone(), Declaration::Class { item });
        names.push(class.ident.sym.clone());
      }
      Decl::TsEnum(ts_enum) if ts_enum.declare => {}
      Decl::TsEnum(ts_enum) => {
        self
          .declarations
          .insert(ts_enum.id.sym.clone(), Declaration::Enum { item });
        names.push(ts_enum.id.sym.clone());
      }
      Decl::TsInterface(_) | Decl::TsTypeAlias(_) | Decl::TsModule(_) => {}
      Decl::Using(_) => self.has_side_effects = true,
    }
    names
  }

  /// AST of the declaration behind a module-level name.
  pub fn declaration_source(&self, name: &Atom) -> Option<DeclarationSource<'_>> {
    let declaration = self.declarations.get(name)?;
    let decl = match self.module.body.get(declaration.item())? {
      ModuleItem::Stmt(Stmt::Decl(decl)) => decl,
      ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => &export.decl,
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
        return match &export.decl {
          DefaultDecl::Fn(function) => Some(DeclarationSource::Function(
            function.ident.as_ref(),
            &function.function,
          )),
          DefaultDecl::Class(class) => Some(DeclarationSource::Class(&class.class)),
          DefaultDecl::TsInterfaceDecl(_) => None,
        };
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
        return Some(DeclarationSource::Expression(&export.expr));
      }
      _ => return None,
    };

    match (declaration, decl) {
      (Declaration::Var { declarator, .. }, Decl::Var(var)) => var
        .decls
        .get(*declarator)
        .map(|var_declarator| DeclarationSource::Var(var_declarator, var.kind)),
      (Declaration::Function { .. }, Decl::Fn(function)) => Some(DeclarationSource::Function(
        Some(&function.ident),
        &function.function,
      )),
      (Declaration::Class { .. }, Decl::Class(class)) => Some(DeclarationSource::Class(&class.class)),
      (Declaration::Enum { .. }, Decl::TsEnum(ts_enum)) => Some(DeclarationSource::Enum(ts_enum)),
      _ => None,
    }
  }

  /// Module-level names read by the declaration of `name`.
  pub fn declaration_references(&self, name: &Atom) -> FreeIdentifiers {
    match self.declaration_source(name) {
      Some(DeclarationSource::Var(declarator, _)) => FreeIdentifiers::of_var_declarator(declarator),
      Some(DeclarationSource::Function(ident, function)) => {
        FreeIdentifiers::of_function(ident.map(|ident| &ident.sym), function)
      }
      Some(DeclarationSource::Enum(ts_enum)) => FreeIdentifiers::of_enum(ts_enum),
      Some(DeclarationSource::Expression(expr)) => FreeIdentifiers::of_expr(expr),
      Some(DeclarationSource::Class(_)) | None => FreeIdentifiers::default(),
    }
  }

  /// Module-level bindings that top-level item `item` may modify while the module initializes,
  /// either directly or through an object they hold.
  ///
  /// When the item runs a call, the writes of every function it can reach through the module's
  /// own declarations count too. Calls whose span is in `skipped_calls` are ignored.
  pub fn top_level_writes(&self, item: usize, skipped_calls: &HashSet<Span>) -> IndexSet<Atom> {
    let Some(module_item) = self.module.body.get(item) else {
      return IndexSet::new();
    };
    let effects = FreeIdentifiers::of_module_item(module_item, skipped_calls);
    let mut writes = effects.writes;
    if effects.calls {
      writes.extend(effects.lazy_writes);
      let mut visited = HashSet::from([item]);
      let mut pending: Vec<Atom> =
        effects.eager.into_keys().chain(effects.lazy.into_keys()).collect();
      while let Some(name) = pending.pop() {
        let Some(declaration) = self.declarations.get(&name) else {
          continue;
        };
        if !visited.insert(declaration.item()) {
          continue;
        }
        let Some(declaring_item) = self.module.body.get(declaration.item()) else {
          continue;
        };
        let reached = FreeIdentifiers::of_module_item(declaring_item, skipped_calls);
        writes.extend(reached.writes);
        writes.extend(reached.lazy_writes);
        pending.extend(reached.eager.into_keys().chain(reached.lazy.into_keys()));
      }
    }

    writes.retain(|name| {
      self.declarations.contains_key(name) || self.imported_bindings.contains_key(name)
    });
    writes
  }

  /// Module-level names read by the whole top-level code of the module.
  pub fn body_references(&self) -> FreeIdentifiers {
    FreeIdentifiers::of_module_body(&self.module, self.declarations.keys().cloned())
  }
}

fn str_atom(value: &Str) -> Atom {
  Atom::from(value.value.as_ref())
}

fn export_name(name: &ModuleExportName) -> Atom {
  match name {
    ModuleExportName::Ident(ident) => ident.sym.clone(),
    ModuleExportName::Str(value) => str_atom(value),
  }
}

fn is_directive(stmt: &Stmt) -> bool {
  matches!(
    stmt,
    Stmt::Expr(ExprStmt { expr, .. }) if matches!(&**expr, Expr::Lit(Lit::Str(_)))
  )
}

/// Smallest set of parser features, beyond `options`, with which `source` parses.
fn missing_parser_features(
  module_id: &ModuleId,
  source: &str,
  options: ParseOptions,
) -> Option<Vec<&'static str>> {
  let disabled: Vec<&'static str> = [
    ("typescript", options.typescript),
    ("jsx", options.jsx),
    ("decorators", options.decorators),
  ]
  .into_iter()
  .filter(|(_, enabled)| !enabled)
  .map(|(feature, _)| feature)
  .collect();

  // Subsets of the disabled features, smallest first.
  let mut subsets: Vec<Vec<&'static str>> = (1..1usize << disabled.len())
    .map(|mask| {
      disabled
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, feature)| *feature)
        .collect()
    })
    .collect();
  subsets.sort_by_key(Vec::len);

  subsets.into_iter().find(|features| {
    let retry = ParseOptions {
      typescript: options.typescript || features.contains(&"typescript"),
      jsx: options.jsx || features.contains(&"jsx"),
      decorators: options.decorators || features.contains(&"decorators"),
    };
    parse_module(module_id.as_str(), source, retry).is_ok()
  })
}

/// Memoized parse results of dependency modules, shared by every unit of a build.
///
/// Load failures are memoized too, so a broken dependency is read and parsed once.
#[derive(Default)]
pub struct ModuleGraphCache {
  nodes: MemoizedHashMap<ModuleId, Result<Arc<ModuleGraphNode>, LoadError>>,
}

impl ModuleGraphCache {
  pub fn load(
    &self,
    module_id: &ModuleId,
    loader: &dyn ModuleLoader,
    options: ParseOptions,
  ) -> Result<Arc<ModuleGraphNode>, LoadError> {
    self.nodes.get_or_init(module_id.clone(), || {
      tracing::trace!(module_id = %module_id, "Loading dependency module");

      let source = loader.read(module_id).map_err(|error| LoadError::Read {
        module_id: module_id.clone(),
        message: format!("{error:#}"),
      })?;

      let parsed = parse_module(module_id.as_str(), &source, options).map_err(|error| {
        match missing_parser_features(module_id, &source, options) {
          Some(features) => LoadError::MissingParserFeature {
            module_id: module_id.clone(),
            features,
          },
          None => LoadError::Parse {
            module_id: module_id.clone(),
            message: error.to_string(),
          },
        }
      })?;

      Ok(Arc::new(ModuleGraphNode::build(
        module_id.clone(),
        parsed.module,
        |specifier| {
          loader
            .resolve(module_id, specifier)
            .map_err(|error| format!("{error:#}"))
        },
      )))
    })
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

/// The module graph as seen from one compilation unit.
///
/// The unit itself is never cached: its source is the one being transformed and it may differ
/// from what is on disk.
pub struct ModuleGraph<'a> {
  cache: &'a ModuleGraphCache,
  loader: &'a dyn ModuleLoader,
  options: ParseOptions,
  entry: Arc<ModuleGraphNode>,
}

impl<'a> ModuleGraph<'a> {
  pub fn new(
    cache: &'a ModuleGraphCache,
    loader: &'a dyn ModuleLoader,
    options: ParseOptions,
    entry: Arc<ModuleGraphNode>,
  ) -> Self {
    Self {
      cache,
      loader,
      options,
      entry,
    }
  }

  pub fn entry(&self) -> &Arc<ModuleGraphNode> {
    &self.entry
  }

  pub fn node(&self, module_id: &ModuleId) -> Result<Arc<ModuleGraphNode>, LoadError> {
    if *module_id == self.entry.module_id {
      return Ok(self.entry.clone());
    }
    self.cache.load(module_id, self.loader, self.options)
  }

  /// Modules with top-level side effects are executed as a whole; every other module, and
  /// always the unit itself, evaluates one binding at a time.
  pub fn executes_whole_module(&self, node: &ModuleGraphNode) -> bool {
    node.has_side_effects && node.module_id != self.entry.module_id
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::loader::MockModuleLoader;

  fn build(code: &str) -> ModuleGraphNode {
    let options = ParseOptions {
      typescript: true,
      ..Default::default()
    };
    let parsed = parse_module("/src/module.ts", code, options).unwrap();
    ModuleGraphNode::build(ModuleId::from("/src/module.ts"), parsed.module, |specifier| {
      if specifier.starts_with("./") {
        Ok(ModuleId::new(format!("/src/{}.ts", &specifier[2..])))
      } else {
        Err(format!("cannot resolve {specifier}"))
      }
    })
  }

  #[test]
  fn test_import_table() {
    let node = build(indoc! {r#"
      import React from 'react';
      import { red, blue as primary } from './tokens';
      import * as spacing from './spacing';
      import type { Theme } from './theme';
      import './global.css';
    "#});

    assert_eq!(
      node.imported_bindings.get(&Atom::from("React")).unwrap(),
      &ImportBinding {
        specifier: Atom::from("react"),
        imported: ImportedName::Default,
        source: Err(String::from("cannot resolve react")),
      }
    );
    assert_eq!(
      node.imported_bindings.get(&Atom::from("primary")).unwrap(),
      &ImportBinding {
        specifier: Atom::from("./tokens"),
        imported: ImportedName::Named(Atom::from("blue")),
        source: Ok(ModuleId::from("/src/tokens.ts")),
      }
    );
    assert_eq!(
      node.imported_bindings.get(&Atom::from("spacing")).unwrap().imported,
      ImportedName::Namespace
    );
    assert_eq!(
      node.imported_bindings.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
      vec!["React", "red", "primary", "spacing"]
    );
    assert!(!node.has_side_effects);
  }

  #[test]
  fn test_export_table() {
    let node = build(indoc! {r#"
      export const red = '#f00', blue = '#00f';
      const local = 1;
      export { local as renamed };
      export { green as default } from './palette';
      export * from './more';
      export * as sizes from './sizes';
      export enum Size { Small = 1 }
      export interface Props {}
    "#});

    assert_eq!(
      node.exported_bindings.get(&Atom::from("blue")),
      Some(&ExportTarget::Local(Atom::from("blue")))
    );
    assert_eq!(
      node.exported_bindings.get(&Atom::from("renamed")),
      Some(&ExportTarget::Local(Atom::from("local")))
    );
    assert_eq!(
      node.exported_bindings.get(&Atom::from("default")),
      Some(&ExportTarget::ReExport(ImportBinding {
        specifier: Atom::from("./palette"),
        imported: ImportedName::Named(Atom::from("green")),
        source: Ok(ModuleId::from("/src/palette.ts")),
      }))
    );
    assert!(matches!(
      node.exported_bindings.get(&Atom::from("sizes")),
      Some(ExportTarget::ReExport(ImportBinding {
        imported: ImportedName::Namespace,
        ..
      }))
    ));
    assert_eq!(node.star_exports.len(), 1);
    assert_eq!(
      node.declarations.get(&Atom::from("blue")),
      Some(&Declaration::Var {
        item: 0,
        declarator: 1
      })
    );
    assert_eq!(node.declarations.get(&Atom::from("Size")), Some(&Declaration::Enum { item: 6 }));
    assert!(!node.exported_bindings.contains_key(&Atom::from("Props")));
  }

  #[test]
  fn test_default_exports() {
    let node = build("export default { color: 'red' };");
    assert_eq!(
      node.exported_bindings.get(&Atom::from("default")),
      Some(&ExportTarget::Local(Atom::from(DEFAULT_EXPORT_BINDING)))
    );
    assert!(matches!(
      node.declaration_source(&Atom::from(DEFAULT_EXPORT_BINDING)),
      Some(DeclarationSource::Expression(_))
    ));

    let node = build("export default function theme() { return base; }");
    assert_eq!(
      node.exported_bindings.get(&Atom::from("default")),
      Some(&ExportTarget::Local(Atom::from("theme")))
    );
    let references = node.declaration_references(&Atom::from("theme"));
    assert!(references.eager.is_empty());
    assert!(references.lazy.contains_key(&Atom::from("base")));
  }

  #[test]
  fn test_side_effects() {
    let node = build(indoc! {r#"
      'use strict';
      export const registry = [];
      registry.push('a');
    "#});
    assert!(node.has_side_effects);

    let node = build("'use strict'; export const a = compute();");
    assert!(!node.has_side_effects);
  }

  #[test]
  fn test_initializers_that_modify_other_bindings_are_side_effects() {
    let node = build(indoc! {r#"
      export const palette = {};
      function add(key, value) {
        palette[key] = value;
        return value;
      }
      export const red = add('brand', 'red');
    "#});
    assert!(node.has_side_effects);

    let node = build(indoc! {r#"
      import { theme } from './theme';
      export const merged = Object.assign(theme, { color: 'red' });
    "#});
    assert!(node.has_side_effects);

    let node = build(indoc! {r#"
      const unit = 'px';
      export function px(value) {
        const scratch = {};
        scratch.value = value;
        return value + unit;
      }
      export const small = px(4);
    "#});
    assert!(!node.has_side_effects);
  }

  #[test]
  fn test_top_level_writes() {
    let node = build(indoc! {r#"
      const theme = {};
      let count = 0;
      function bump() { count += 1; }
      theme.color = 'red';
      bump();
      console.log(theme);
    "#});
    let none = HashSet::new();
    let writes = |item| {
      node
        .top_level_writes(item, &none)
        .into_iter()
        .map(|name| name.to_string())
        .collect::<Vec<_>>()
    };

    assert!(writes(0).is_empty());
    assert!(writes(2).is_empty());
    assert_eq!(writes(3), vec!["theme"]);
    assert_eq!(writes(4), vec!["count"]);
    assert_eq!(writes(5), vec!["theme"]);
  }

  #[test]
  fn test_missing_parser_features_are_diagnosed() {
    let mut loader = MockModuleLoader::new();
    loader
      .expect_read()
      .returning(|_| Ok(String::from("export const size: number = 4;")));

    let cache = ModuleGraphCache::default();
    let error = cache
      .load(&ModuleId::from("/src/size.ts"), &loader, ParseOptions::default())
      .unwrap_err();
    assert_eq!(
      error,
      LoadError::MissingParserFeature {
        module_id: ModuleId::from("/src/size.ts"),
        features: vec!["typescript"],
      }
    );
  }

  #[test]
  fn test_cache_loads_each_module_once() {
    let mut loader = MockModuleLoader::new();
    loader
      .expect_read()
      .times(1)
      .returning(|_| Ok(String::from("export const red = 'red';")));
    loader.expect_resolve().never();

    let cache = ModuleGraphCache::default();
    let module_id = ModuleId::from("/src/tokens.js");
    let first = cache.load(&module_id, &loader, ParseOptions::default()).unwrap();
    let second = cache.load(&module_id, &loader, ParseOptions::default()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_cache_memoizes_failures() {
    let mut loader = MockModuleLoader::new();
    loader
      .expect_read()
      .times(1)
      .returning(|_| Ok(String::from("export const = ;")));

    let cache = ModuleGraphCache::default();
    let module_id = ModuleId::from("/src/broken.js");
    for _ in 0..2 {
      let error = cache
        .load(&module_id, &loader, ParseOptions::default())
        .unwrap_err();
      assert!(matches!(error, LoadError::Parse { .. }));
    }
  }
}
