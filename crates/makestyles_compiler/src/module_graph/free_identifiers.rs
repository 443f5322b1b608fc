use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use swc_core::atoms::Atom;
use swc_core::common::{Span, SyntaxContext};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

/// Identifiers an expression or declaration reads from its enclosing module.
///
/// `eager` references are read as soon as the code runs. `lazy` references only appear inside
/// function bodies and are read when (and if) the function is called.
///
/// `writes` are free names that are assigned, updated, deleted from, or handed to a call (which
/// may mutate the object they hold). `lazy_writes` are the same inside function bodies.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FreeIdentifiers {
  pub eager: IndexMap<Atom, SyntaxContext>,
  pub lazy: IndexMap<Atom, SyntaxContext>,
  pub writes: IndexSet<Atom>,
  pub lazy_writes: IndexSet<Atom>,
  /// Whether a call, `new` or tagged template runs outside any function body.
  pub calls: bool,
}

impl FreeIdentifiers {
  pub fn of_expr(expr: &Expr) -> Self {
    let mut collector = FreeIdentifierCollector::default();
    expr.visit_with(&mut collector);
    collector.finish()
  }

  /// References of a variable declarator, excluding the names it binds.
  pub fn of_var_declarator(declarator: &VarDeclarator) -> Self {
    let mut collector = FreeIdentifierCollector::default();
    let mut names = Vec::new();
    pat_binding_names(&declarator.name, &mut names);
    collector.scopes.push(names.into_iter().collect());
    declarator.visit_with(&mut collector);
    collector.finish()
  }

  /// References of a function declaration; every one of them is lazy.
  pub fn of_function(name: Option<&Atom>, function: &Function) -> Self {
    let mut collector = FreeIdentifierCollector::default();
    collector.scopes.push(name.into_iter().cloned().collect());
    function.visit_with(&mut collector);
    collector.finish()
  }

  pub fn of_enum(decl: &TsEnumDecl) -> Self {
    let mut collector = FreeIdentifierCollector::default();
    decl.visit_with(&mut collector);
    collector.finish()
  }

  /// References the top-level code of `module` makes to names it does not declare itself.
  pub fn of_module_body(module: &Module, own_declarations: impl IntoIterator<Item = Atom>) -> Self {
    let mut collector = FreeIdentifierCollector::default();
    collector.scopes.push(own_declarations.into_iter().collect());
    module.visit_with(&mut collector);
    collector.finish()
  }

  /// References and effects of one top-level item. Calls whose span is in `skipped_calls` are
  /// left out together with their callee and arguments.
  pub fn of_module_item(item: &ModuleItem, skipped_calls: &HashSet<Span>) -> Self {
    let mut collector = FreeIdentifierCollector {
      skipped_calls: skipped_calls.clone(),
      ..Default::default()
    };
    item.visit_with(&mut collector);
    collector.finish()
  }

  pub fn is_empty(&self) -> bool {
    self.eager.is_empty() && self.lazy.is_empty()
  }

  /// Eager references followed by lazy ones, each paired with its laziness.
  pub fn iter(&self) -> impl Iterator<Item = (&Atom, &SyntaxContext, bool)> {
    self
      .eager
      .iter()
      .map(|(name, ctxt)| (name, ctxt, false))
      .chain(self.lazy.iter().map(|(name, ctxt)| (name, ctxt, true)))
  }
}

/// Collect every name bound by a binding pattern.
pub fn pat_binding_names(pat: &Pat, names: &mut Vec<Atom>) {
  match pat {
    Pat::Ident(binding) => names.push(binding.id.sym.clone()),
    Pat::Array(array) => {
      for element in array.elems.iter().flatten() {
        pat_binding_names(element, names);
      }
    }
    Pat::Rest(rest) => pat_binding_names(&rest.arg, names),
    Pat::Object(object) => {
      for prop in &object.props {
        match prop {
          ObjectPatProp::KeyValue(key_value) => pat_binding_names(&key_value.value, names),
          ObjectPatProp::Assign(assign) => names.push(assign.key.id.sym.clone()),
          ObjectPatProp::Rest(rest) => pat_binding_names(&rest.arg, names),
        }
      }
    }
    Pat::Assign(assign) => pat_binding_names(&assign.left, names),
    Pat::Expr(_) | Pat::Invalid(_) => {}
  }
}

/// The identifier an expression such as `a.b[c].d` or `(a as T).b` reads its object from.
fn root_ident(expr: &Expr) -> Option<&Ident> {
  match expr {
    Expr::Ident(ident) => Some(ident),
    Expr::Member(member) => root_ident(&member.obj),
    Expr::OptChain(chain) => chain_root(chain),
    Expr::Paren(ParenExpr { expr, .. })
    | Expr::TsAs(TsAsExpr { expr, .. })
    | Expr::TsSatisfies(TsSatisfiesExpr { expr, .. })
    | Expr::TsNonNull(TsNonNullExpr { expr, .. })
    | Expr::TsConstAssertion(TsConstAssertion { expr, .. })
    | Expr::TsTypeAssertion(TsTypeAssertion { expr, .. }) => root_ident(expr),
    _ => None,
  }
}

fn chain_root(chain: &OptChainExpr) -> Option<&Ident> {
  match &*chain.base {
    OptChainBase::Member(member) => root_ident(&member.obj),
    OptChainBase::Call(_) => None,
  }
}

fn assign_target_roots<'a>(target: &'a AssignTarget, roots: &mut Vec<&'a Ident>) {
  match target {
    AssignTarget::Simple(simple) => match simple {
      SimpleAssignTarget::Ident(binding) => roots.push(&binding.id),
      SimpleAssignTarget::Member(member) => roots.extend(root_ident(&member.obj)),
      SimpleAssignTarget::OptChain(chain) => roots.extend(chain_root(chain)),
      SimpleAssignTarget::Paren(ParenExpr { expr, .. })
      | SimpleAssignTarget::TsAs(TsAsExpr { expr, .. })
      | SimpleAssignTarget::TsSatisfies(TsSatisfiesExpr { expr, .. })
      | SimpleAssignTarget::TsNonNull(TsNonNullExpr { expr, .. })
      | SimpleAssignTarget::TsTypeAssertion(TsTypeAssertion { expr, .. }) => {
        roots.extend(root_ident(expr))
      }
      _ => {}
    },
    AssignTarget::Pat(AssignTargetPat::Array(array)) => {
      for element in array.elems.iter().flatten() {
        pat_roots(element, roots);
      }
    }
    AssignTarget::Pat(AssignTargetPat::Object(object)) => object_pat_roots(object, roots),
    AssignTarget::Pat(AssignTargetPat::Invalid(_)) => {}
  }
}

/// Identifiers a destructuring assignment pattern writes to, directly or through a member.
fn pat_roots<'a>(pat: &'a Pat, roots: &mut Vec<&'a Ident>) {
  match pat {
    Pat::Ident(binding) => roots.push(&binding.id),
    Pat::Array(array) => {
      for element in array.elems.iter().flatten() {
        pat_roots(element, roots);
      }
    }
    Pat::Object(object) => object_pat_roots(object, roots),
    Pat::Rest(rest) => pat_roots(&rest.arg, roots),
    Pat::Assign(assign) => pat_roots(&assign.left, roots),
    Pat::Expr(expr) => roots.extend(root_ident(expr)),
    Pat::Invalid(_) => {}
  }
}

fn object_pat_roots<'a>(object: &'a ObjectPat, roots: &mut Vec<&'a Ident>) {
  for prop in &object.props {
    match prop {
      ObjectPatProp::KeyValue(key_value) => pat_roots(&key_value.value, roots),
      ObjectPatProp::Assign(assign) => roots.push(&assign.key.id),
      ObjectPatProp::Rest(rest) => pat_roots(&rest.arg, roots),
    }
  }
}

/// Names declared anywhere in a function body, not descending into nested functions.
fn declared_names(body: &impl VisitWith<DeclaredNameCollector>) -> HashSet<Atom> {
  let mut collector = DeclaredNameCollector::default();
  body.visit_with(&mut collector);
  collector.names
}

#[derive(Default)]
struct DeclaredNameCollector {
  names: HashSet<Atom>,
}

impl Visit for DeclaredNameCollector {
  fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
    let mut names = Vec::new();
    pat_binding_names(&declarator.name, &mut names);
    self.names.extend(names);
  }

  fn visit_fn_decl(&mut self, decl: &FnDecl) {
    self.names.insert(decl.ident.sym.clone());
  }

  fn visit_class_decl(&mut self, decl: &ClassDecl) {
    self.names.insert(decl.ident.sym.clone());
  }

  fn visit_function(&mut self, _: &Function) {}
  fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
  fn visit_class(&mut self, _: &Class) {}
}

#[derive(Default)]
struct FreeIdentifierCollector {
  scopes: Vec<HashSet<Atom>>,
  function_depth: usize,
  eager: IndexMap<Atom, SyntaxContext>,
  lazy: IndexMap<Atom, SyntaxContext>,
  skipped_calls: HashSet<Span>,
  writes: IndexSet<Atom>,
  lazy_writes: IndexSet<Atom>,
  calls: bool,
}

impl FreeIdentifierCollector {
  fn finish(mut self) -> FreeIdentifiers {
    self.lazy.retain(|name, _| !self.eager.contains_key(name));
    self.lazy_writes.retain(|name| !self.writes.contains(name));
    FreeIdentifiers {
      eager: self.eager,
      lazy: self.lazy,
      writes: self.writes,
      lazy_writes: self.lazy_writes,
      calls: self.calls,
    }
  }

  fn record_write(&mut self, ident: &Ident) {
    if self.is_bound(&ident.sym) {
      return;
    }

    let target = if self.function_depth == 0 {
      &mut self.writes
    } else {
      &mut self.lazy_writes
    };
    target.insert(ident.sym.clone());
  }

  /// A call may mutate its receiver and any object passed to it.
  fn record_call(&mut self, callee: Option<&Expr>, args: &[ExprOrSpread]) {
    if self.function_depth == 0 {
      self.calls = true;
    }
    if let Some(Expr::Member(member)) = callee {
      if let Some(receiver) = root_ident(&member.obj) {
        self.record_write(receiver);
      }
    }
    for arg in args {
      if let Some(root) = root_ident(&arg.expr) {
        self.record_write(root);
      }
    }
  }

  fn is_bound(&self, name: &Atom) -> bool {
    self.scopes.iter().any(|scope| scope.contains(name))
  }

  fn with_function_scope(&mut self, names: HashSet<Atom>, visit: impl FnOnce(&mut Self)) {
    self.scopes.push(names);
    self.function_depth += 1;
    visit(self);
    self.function_depth -= 1;
    self.scopes.pop();
  }

  fn param_names<'a>(params: impl Iterator<Item = &'a Pat>) -> HashSet<Atom> {
    let mut names = Vec::new();
    for param in params {
      pat_binding_names(param, &mut names);
    }
    names.into_iter().collect()
  }
}

impl Visit for FreeIdentifierCollector {
  fn visit_ident(&mut self, ident: &Ident) {
    if self.is_bound(&ident.sym) {
      return;
    }

    let target = if self.function_depth == 0 {
      &mut self.eager
    } else {
      &mut self.lazy
    };
    target.entry(ident.sym.clone()).or_insert(ident.ctxt);
  }

  fn visit_function(&mut self, function: &Function) {
    let mut names = Self::param_names(function.params.iter().map(|param| &param.pat));
    if let Some(body) = &function.body {
      names.extend(declared_names(body));
    }
    self.with_function_scope(names, |this| {
      function.params.visit_with(this);
      function.body.visit_with(this);
    });
  }

  fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
    let mut names = Self::param_names(arrow.params.iter());
    if let BlockStmtOrExpr::BlockStmt(body) = &*arrow.body {
      names.extend(declared_names(body));
    }
    self.with_function_scope(names, |this| {
      arrow.params.visit_with(this);
      arrow.body.visit_with(this);
    });
  }

  fn visit_fn_expr(&mut self, fn_expr: &FnExpr) {
    let own_name: HashSet<Atom> = fn_expr.ident.iter().map(|ident| ident.sym.clone()).collect();
    self.scopes.push(own_name);
    fn_expr.function.visit_with(self);
    self.scopes.pop();
  }

  fn visit_fn_decl(&mut self, decl: &FnDecl) {
    decl.function.visit_with(self);
  }

  fn visit_getter_prop(&mut self, getter: &GetterProp) {
    getter.key.visit_with(self);
    let names = getter.body.as_ref().map(declared_names).unwrap_or_default();
    self.with_function_scope(names, |this| getter.body.visit_with(this));
  }

  fn visit_setter_prop(&mut self, setter: &SetterProp) {
    setter.key.visit_with(self);
    let mut names = Self::param_names(std::iter::once(&*setter.param));
    if let Some(body) = &setter.body {
      names.extend(declared_names(body));
    }
    self.with_function_scope(names, |this| {
      setter.param.visit_with(this);
      setter.body.visit_with(this);
    });
  }

  fn visit_catch_clause(&mut self, clause: &CatchClause) {
    let names = clause
      .param
      .iter()
      .flat_map(|param| {
        let mut names = Vec::new();
        pat_binding_names(param, &mut names);
        names
      })
      .collect();
    self.scopes.push(names);
    clause.body.visit_with(self);
    self.scopes.pop();
  }

  fn visit_class_decl(&mut self, decl: &ClassDecl) {
    self.scopes.push(HashSet::from([decl.ident.sym.clone()]));
    decl.class.visit_with(self);
    self.scopes.pop();
  }

  fn visit_ts_enum_decl(&mut self, decl: &TsEnumDecl) {
    let members = decl
      .members
      .iter()
      .filter_map(|member| match &member.id {
        TsEnumMemberId::Ident(ident) => Some(ident.sym.clone()),
        TsEnumMemberId::Str(_) => None,
      })
      .chain(std::iter::once(decl.id.sym.clone()))
      .collect();
    self.scopes.push(members);
    for member in &decl.members {
      member.init.visit_with(self);
    }
    self.scopes.pop();
  }

  fn visit_call_expr(&mut self, call: &CallExpr) {
    if self.skipped_calls.contains(&call.span) {
      return;
    }
    let callee = match &call.callee {
      Callee::Expr(callee) => Some(&**callee),
      Callee::Super(_) | Callee::Import(_) => None,
    };
    self.record_call(callee, &call.args);
    call.visit_children_with(self);
  }

  fn visit_opt_call(&mut self, call: &OptCall) {
    self.record_call(Some(&*call.callee), &call.args);
    call.visit_children_with(self);
  }

  fn visit_new_expr(&mut self, new: &NewExpr) {
    self.record_call(None, new.args.as_deref().unwrap_or(&[]));
    new.visit_children_with(self);
  }

  fn visit_tagged_tpl(&mut self, tagged: &TaggedTpl) {
    self.record_call(Some(&*tagged.tag), &[]);
    tagged.visit_children_with(self);
  }

  fn visit_assign_expr(&mut self, assign: &AssignExpr) {
    let mut roots = Vec::new();
    assign_target_roots(&assign.left, &mut roots);
    for root in roots {
      self.record_write(root);
    }
    assign.visit_children_with(self);
  }

  fn visit_update_expr(&mut self, update: &UpdateExpr) {
    if let Some(root) = root_ident(&update.arg) {
      self.record_write(root);
    }
    update.visit_children_with(self);
  }

  fn visit_unary_expr(&mut self, unary: &UnaryExpr) {
    if unary.op == UnaryOp::Delete {
      if let Some(root) = root_ident(&unary.arg) {
        self.record_write(root);
      }
    }
    unary.visit_children_with(self);
  }

  fn visit_labeled_stmt(&mut self, stmt: &LabeledStmt) {
    stmt.body.visit_with(self);
  }

  fn visit_break_stmt(&mut self, _: &BreakStmt) {}
  fn visit_continue_stmt(&mut self, _: &ContinueStmt) {}

  fn visit_import_decl(&mut self, _: &ImportDecl) {}

  fn visit_named_export(&mut self, export: &NamedExport) {
    if export.src.is_none() && !export.type_only {
      export.specifiers.visit_with(self);
    }
  }

  fn visit_export_named_specifier(&mut self, specifier: &ExportNamedSpecifier) {
    specifier.orig.visit_with(self);
  }

  fn visit_ts_type(&mut self, _: &TsType) {}
  fn visit_ts_type_ann(&mut self, _: &TsTypeAnn) {}
  fn visit_ts_type_param_decl(&mut self, _: &TsTypeParamDecl) {}
  fn visit_ts_type_param_instantiation(&mut self, _: &TsTypeParamInstantiation) {}
  fn visit_ts_interface_decl(&mut self, _: &TsInterfaceDecl) {}
  fn visit_ts_type_alias_decl(&mut self, _: &TsTypeAliasDecl) {}
  fn visit_ts_module_decl(&mut self, _: &TsModuleDecl) {}
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use makestyles_swc_runner::{parse_module, ParseOptions};
  use pretty_assertions::assert_eq;
  use swc_core::ecma::ast::{Decl, ModuleItem, Stmt};

  use super::*;

  fn declarator_of(code: &str) -> FreeIdentifiers {
    let parsed = parse_module("test.js", code, ParseOptions::default()).unwrap();
    match &parsed.module.body[0] {
      ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => FreeIdentifiers::of_var_declarator(&var.decls[0]),
      _ => panic!("expected a variable declaration"),
    }
  }

  fn names(map: &IndexMap<Atom, SyntaxContext>) -> Vec<&str> {
    map.keys().map(|name| name.as_str()).collect()
  }

  #[test]
  fn test_eager_references() {
    let free = declarator_of("const root = { color: tokens.red, padding: `${space}px`, size };");
    assert_eq!(names(&free.eager), vec!["tokens", "space", "size"]);
    assert!(free.lazy.is_empty());
  }

  #[test]
  fn test_function_bodies_are_lazy() {
    let free = declarator_of(indoc! {r#"
      const mixin = (size) => {
        const half = size / 2;
        return { padding: half + unit, margin: scale(size) };
      };
    "#});
    assert!(free.eager.is_empty());
    assert_eq!(names(&free.lazy), vec!["unit", "scale"]);
  }

  #[test]
  fn test_eager_reference_wins_over_lazy() {
    let free = declarator_of("const value = [tokens.a, () => tokens.b, () => other];");
    assert_eq!(names(&free.eager), vec!["tokens"]);
    assert_eq!(names(&free.lazy), vec!["other"]);
  }

  #[test]
  fn test_declared_name_and_member_properties_are_not_references() {
    let free = declarator_of("const { a, b: [c = fallback] } = source.nested.a;");
    assert_eq!(names(&free.eager), vec!["fallback", "source"]);
  }

  #[test]
  fn test_module_body_skips_own_declarations_and_types() {
    let options = ParseOptions {
      typescript: true,
      ..Default::default()
    };
    let parsed = parse_module(
      "test.ts",
      indoc! {r#"
        import { base } from './base';
        type Size = number;
        export const local: Size = 1;
        registry.push(local, base);
        export { other } from './other';
      "#},
      options,
    )
    .unwrap();

    let free = FreeIdentifiers::of_module_body(&parsed.module, [Atom::from("local")]);
    assert_eq!(names(&free.eager), vec!["registry", "base"]);
  }

  fn item_of(code: &str) -> FreeIdentifiers {
    let parsed = parse_module("test.js", code, ParseOptions::default()).unwrap();
    FreeIdentifiers::of_module_item(&parsed.module.body[0], &HashSet::new())
  }

  fn written(set: &IndexSet<Atom>) -> Vec<&str> {
    set.iter().map(|name| name.as_str()).collect()
  }

  #[test]
  fn test_assignments_updates_and_deletes_are_writes() {
    let free =
      item_of("theme.color = (counter++, delete cache[key], [first, { a: rest.b }] = pair);");
    assert_eq!(written(&free.writes), vec!["theme", "counter", "cache", "first", "rest"]);
    assert!(!free.calls);
  }

  #[test]
  fn test_call_receivers_and_arguments_are_writes() {
    let free = item_of("const merged = Object.assign(target, extra.nested, 'literal');");
    assert_eq!(written(&free.writes), vec!["Object", "target", "extra"]);
    assert!(free.calls);
  }

  #[test]
  fn test_writes_inside_functions_are_lazy() {
    let free = item_of(indoc! {r#"
      function register(key, value) {
        const local = {};
        local.key = key;
        palette[key] = value;
      }
    "#});
    assert!(free.writes.is_empty());
    assert_eq!(written(&free.lazy_writes), vec!["palette"]);
    assert!(!free.calls);
  }

  #[test]
  fn test_skipped_calls_are_ignored() {
    let parsed =
      parse_module("test.js", "const styles = makeStyles(base);", ParseOptions::default()).unwrap();
    let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = &parsed.module.body[0] else {
      panic!("expected a variable declaration");
    };
    let Some(Expr::Call(call)) = var.decls[0].init.as_deref() else {
      panic!("expected a call");
    };

    let free = FreeIdentifiers::of_module_item(&parsed.module.body[0], &HashSet::from([call.span]));
    assert!(free.writes.is_empty());
    assert!(!free.calls);
    assert_eq!(names(&free.eager), vec!["styles"]);
  }
}
