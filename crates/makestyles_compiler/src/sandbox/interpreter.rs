use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use swc_core::atoms::Atom;
use swc_core::ecma::ast::*;

use super::builtins::{static_property, Builtin, ErrorKind, Method};
use super::scope::{Assignment, Lookup, Scope};
use super::value::{
  number_to_string, to_int32, Closure, ClosureBody, JsArray, JsFunction, JsObject, JsValue,
};
use super::{
  CallSiteEvaluationError, EvaluatedValue, EvaluationError, ExecutionReport, SandboxLimits,
  MAX_VALUE_DEPTH,
};
use crate::dependency_resolver::{BindingKey, EvaluationClosure};
use crate::loader::ModuleId;
use crate::module_graph::{
  pat_binding_names, DeclarationSource, ExportTarget, ImportBinding, ModuleGraph,
  ModuleGraphNode, DEFAULT_EXPORT_BINDING,
};

#[derive(Clone)]
enum ModuleStatus {
  Pending,
  Running,
  Done,
  Failed(EvaluationError),
}

#[derive(Clone)]
enum BindingStatus {
  Evaluating,
  Ready,
  Failed(EvaluationError),
}

struct ModuleInstance {
  node: Arc<ModuleGraphNode>,
  scope: Scope,
  /// Top-level code runs as a whole instead of one declaration at a time.
  whole: bool,
  status: ModuleStatus,
  bindings: HashMap<Atom, BindingStatus>,
}

#[derive(Clone)]
struct InstanceHandle {
  node: Arc<ModuleGraphNode>,
  scope: Scope,
  whole: bool,
}

enum Completion {
  Normal,
  Return(JsValue),
  Break,
  Continue,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BindingKind {
  Var,
  Let,
  Const,
}

impl From<VarDeclKind> for BindingKind {
  fn from(kind: VarDeclKind) -> Self {
    match kind {
      VarDeclKind::Var => BindingKind::Var,
      VarDeclKind::Let => BindingKind::Let,
      VarDeclKind::Const => BindingKind::Const,
    }
  }
}

/// A place an assignment writes to.
enum Reference {
  Identifier(Atom),
  Property(JsValue, Rc<str>),
}

/// Tree-walking evaluator shared by every call site of one batch.
///
/// Module instances live as long as the interpreter, so a binding needed by several call
/// sites is evaluated once.
pub(crate) struct Interpreter<'a> {
  graph: &'a ModuleGraph<'a>,
  limits: SandboxLimits,
  instances: HashMap<ModuleId, ModuleInstance>,
  pub(super) globals: HashMap<String, JsValue>,
  /// Value of the exception currently propagating as `EvaluationError::Thrown`.
  pub(super) pending_exception: Option<JsValue>,
  next_object_id: u64,
  steps_remaining: u64,
  call_depth: usize,
  /// Objects allocated before this id existed before the current call site started.
  mutation_floor: u64,
  /// Objects allocated while a module initialized. They outlive the call site that forced it.
  shared_objects: HashSet<u64>,
  /// Nesting of module initialization currently in progress.
  module_init_depth: usize,
  mutations: u64,
  report: ExecutionReport,
}

impl<'a> Interpreter<'a> {
  pub fn new(graph: &'a ModuleGraph<'a>, limits: SandboxLimits) -> Self {
    Self {
      graph,
      limits,
      instances: HashMap::new(),
      globals: HashMap::new(),
      pending_exception: None,
      next_object_id: 0,
      steps_remaining: limits.max_steps,
      call_depth: 0,
      mutation_floor: 0,
      shared_objects: HashSet::new(),
      module_init_depth: 0,
      mutations: 0,
      report: ExecutionReport::default(),
    }
  }

  /// Writes to state that outlives a call site: module-level bindings and objects allocated
  /// by an earlier call site.
  pub fn mutations(&self) -> u64 {
    self.mutations
  }

  pub fn into_report(self) -> ExecutionReport {
    self.report
  }

  pub fn run_call_site(
    &mut self,
    argument: &Expr,
    closure: &EvaluationClosure,
  ) -> Result<EvaluatedValue, CallSiteEvaluationError> {
    self.steps_remaining = self.limits.max_steps;
    self.call_depth = 0;
    self.mutation_floor = self.next_object_id;
    self.pending_exception = None;

    // Failures surface again, with the right attribution, when the argument reads the binding.
    for key in &closure.order {
      if let Err(error) = self.force(key) {
        tracing::trace!(binding = %key, %error, "Binding failed while preparing call site");
      }
    }

    let entry_id = self.graph.entry().module_id.clone();
    let scope = self.instance(&entry_id)?.scope;
    let value = self.evaluate_style_argument(argument, &scope)?;
    Ok(self.to_evaluated(&value, 0)?)
  }

  /// Evaluate the argument. Object literals with static keys are evaluated key by key so that
  /// every failing key is reported.
  fn evaluate_style_argument(
    &mut self,
    argument: &Expr,
    scope: &Scope,
  ) -> Result<JsValue, CallSiteEvaluationError> {
    let Expr::Object(object) = strip_type_wrappers(argument) else {
      return Ok(self.eval_expr(argument, scope)?);
    };
    if !object.props.iter().all(is_static_prop) {
      return Ok(self.eval_expr(argument, scope)?);
    }

    let mut properties = IndexMap::new();
    let mut failed_keys = Vec::new();
    let mut first_error = None;
    for prop in &object.props {
      let PropOrSpread::Prop(prop) = prop else {
        continue;
      };
      let (key, result) = match &**prop {
        Prop::KeyValue(key_value) => (
          self.prop_name_key(&key_value.key, scope)?,
          self.eval_expr(&key_value.value, scope),
        ),
        Prop::Shorthand(ident) => (
          Rc::from(&*ident.sym),
          self.read_identifier(&ident.sym, scope),
        ),
        _ => continue,
      };
      match result {
        Ok(value) => {
          properties.insert(key, value);
        }
        Err(error) => {
          failed_keys.push(key.to_string());
          let exhausted = matches!(
            error,
            EvaluationError::StepBudgetExceeded(_) | EvaluationError::CallDepthExceeded(_)
          );
          first_error.get_or_insert(error);
          if exhausted {
            break;
          }
        }
      }
    }

    match first_error {
      Some(error) => Err(CallSiteEvaluationError { error, failed_keys }),
      None => Ok(self.new_object(properties)),
    }
  }

  fn to_evaluated(&mut self, value: &JsValue, depth: usize) -> Result<EvaluatedValue, EvaluationError> {
    if depth > MAX_VALUE_DEPTH {
      return Err(EvaluationError::Type(String::from(
        "Style value is nested too deeply or contains a cycle",
      )));
    }
    Ok(match value {
      JsValue::Undefined => EvaluatedValue::Undefined,
      JsValue::Null => EvaluatedValue::Null,
      JsValue::Bool(value) => EvaluatedValue::Bool(*value),
      JsValue::Number(value) => EvaluatedValue::Number(*value),
      JsValue::String(value) => EvaluatedValue::String(value.to_string()),
      JsValue::Function(_) => EvaluatedValue::Function,
      JsValue::Array(array) => {
        let elements = array.borrow().elements.clone();
        let mut output = Vec::with_capacity(elements.len());
        for element in &elements {
          output.push(self.to_evaluated(element, depth + 1)?);
        }
        EvaluatedValue::Array(output)
      }
      JsValue::Object(_) | JsValue::Namespace(_) => {
        let mut output = IndexMap::new();
        for (key, property) in self.own_entries(value)? {
          output.insert(key.to_string(), self.to_evaluated(&property, depth + 1)?);
        }
        EvaluatedValue::Object(output)
      }
    })
  }

  fn tick(&mut self) -> Result<(), EvaluationError> {
    if self.steps_remaining == 0 {
      return Err(EvaluationError::StepBudgetExceeded(self.limits.max_steps));
    }
    self.steps_remaining -= 1;
    Ok(())
  }

  fn allocate_id(&mut self) -> u64 {
    let id = self.next_object_id;
    self.next_object_id += 1;
    if self.module_init_depth > 0 {
      self.shared_objects.insert(id);
    }
    id
  }

  /// Count a write that a later call site could observe. `object_id` is `None` for writes to
  /// module-level bindings.
  fn record_mutation(&mut self, object_id: Option<u64>) {
    if self.module_init_depth > 0 {
      return;
    }
    let shared = match object_id {
      None => true,
      Some(id) => id < self.mutation_floor || self.shared_objects.contains(&id),
    };
    if shared {
      self.mutations += 1;
    }
  }

  pub(super) fn new_object(&mut self, properties: IndexMap<Rc<str>, JsValue>) -> JsValue {
    let id = self.allocate_id();
    JsValue::Object(Rc::new(RefCell::new(JsObject {
      id,
      properties,
      frozen: false,
    })))
  }

  pub(super) fn new_array(&mut self, elements: Vec<JsValue>) -> JsValue {
    let id = self.allocate_id();
    JsValue::Array(Rc::new(RefCell::new(JsArray {
      id,
      elements,
      frozen: false,
    })))
  }

  // Module instances

  fn instance(&mut self, module_id: &ModuleId) -> Result<InstanceHandle, EvaluationError> {
    if let Some(instance) = self.instances.get(module_id) {
      return Ok(InstanceHandle {
        node: instance.node.clone(),
        scope: instance.scope.clone(),
        whole: instance.whole,
      });
    }

    let node = self.graph.node(module_id).map_err(EvaluationError::Load)?;
    let handle = InstanceHandle {
      whole: self.graph.executes_whole_module(&node),
      scope: Scope::module_root(module_id.clone()),
      node,
    };
    self.instances.insert(
      module_id.clone(),
      ModuleInstance {
        node: handle.node.clone(),
        scope: handle.scope.clone(),
        whole: handle.whole,
        status: ModuleStatus::Pending,
        bindings: HashMap::new(),
      },
    );
    Ok(handle)
  }

  fn force(&mut self, key: &BindingKey) -> Result<(), EvaluationError> {
    match key {
      BindingKey::Local { module_id, name } => self.module_binding(module_id, name).map(drop),
      BindingKey::ModuleBody(module_id) => self.execute_module(module_id),
      BindingKey::Namespace(module_id) => self.instance(module_id).map(drop),
    }
  }

  /// Value of a module-level name: a declaration, an import, or a global.
  fn module_binding(&mut self, module_id: &ModuleId, name: &Atom) -> Result<JsValue, EvaluationError> {
    let handle = self.instance(module_id)?;

    if handle.node.declarations.contains_key(name) {
      if handle.whole {
        self.execute_module(module_id)?;
      } else {
        self.force_declaration(module_id, &handle, name)?;
      }
      return match handle.scope.get(name) {
        Lookup::Found(value) => Ok(value),
        Lookup::Uninitialized | Lookup::Missing => {
          Err(EvaluationError::Uninitialized(name.to_string()))
        }
      };
    }

    if let Some(import) = handle.node.imported_bindings.get(name) {
      return self.import_value(module_id, import);
    }

    self.global(name)
  }

  fn force_declaration(
    &mut self,
    module_id: &ModuleId,
    handle: &InstanceHandle,
    name: &Atom,
  ) -> Result<(), EvaluationError> {
    let status = self
      .instances
      .get(module_id)
      .and_then(|instance| instance.bindings.get(name))
      .cloned();
    match status {
      Some(BindingStatus::Ready) => return Ok(()),
      Some(BindingStatus::Evaluating) => {
        return Err(EvaluationError::Circular(format!("{module_id}#{name}")))
      }
      Some(BindingStatus::Failed(error)) => return Err(error),
      None => {}
    }

    self.set_binding_status(module_id, name.clone(), BindingStatus::Evaluating);
    tracing::trace!(module_id = %module_id, binding = %name, "Evaluating binding");

    self.module_init_depth += 1;
    let result = self.evaluate_declaration(&handle.node, &handle.scope, name);
    self.module_init_depth -= 1;
    match result {
      Ok(names) => {
        for bound in names {
          self.set_binding_status(module_id, bound, BindingStatus::Ready);
        }
        self.set_binding_status(module_id, name.clone(), BindingStatus::Ready);
        *self
          .report
          .binding_evaluations
          .entry(BindingKey::Local {
            module_id: module_id.clone(),
            name: name.clone(),
          })
          .or_insert(0) += 1;
        Ok(())
      }
      Err(error) => {
        self.set_binding_status(module_id, name.clone(), BindingStatus::Failed(error.clone()));
        Err(error)
      }
    }
  }

  fn set_binding_status(&mut self, module_id: &ModuleId, name: Atom, status: BindingStatus) {
    if let Some(instance) = self.instances.get_mut(module_id) {
      instance.bindings.insert(name, status);
    }
  }

  fn set_module_status(&mut self, module_id: &ModuleId, status: ModuleStatus) {
    if let Some(instance) = self.instances.get_mut(module_id) {
      instance.status = status;
    }
  }

  /// Run one module-level declaration. Returns every name the declaration bound.
  fn evaluate_declaration(
    &mut self,
    node: &ModuleGraphNode,
    scope: &Scope,
    name: &Atom,
  ) -> Result<Vec<Atom>, EvaluationError> {
    match node.declaration_source(name) {
      Some(DeclarationSource::Var(declarator, kind)) => {
        let value = match &declarator.init {
          Some(init) => self.eval_expr(init, scope)?,
          None => JsValue::Undefined,
        };
        let kind = match BindingKind::from(kind) {
          // Module-level `var`s have no hoisted slot when evaluated one at a time.
          BindingKind::Var => BindingKind::Let,
          other => other,
        };
        self.bind_pattern(&declarator.name, value, scope, kind)?;
        let mut names = Vec::new();
        pat_binding_names(&declarator.name, &mut names);
        Ok(names)
      }
      Some(DeclarationSource::Function(ident, function)) => {
        let value = self.create_function(ident.map(|ident| ident.sym.clone()), function, scope);
        scope.declare(name.clone(), Some(value), true);
        Ok(vec![name.clone()])
      }
      Some(DeclarationSource::Enum(ts_enum)) => {
        let value = self.eval_enum(ts_enum, scope)?;
        scope.declare(name.clone(), Some(value), false);
        Ok(vec![name.clone()])
      }
      Some(DeclarationSource::Expression(expr)) => {
        let value = self.eval_expr(expr, scope)?;
        scope.declare(name.clone(), Some(value), false);
        Ok(vec![name.clone()])
      }
      Some(DeclarationSource::Class(_)) => Err(unsupported("class declarations")),
      None => Err(EvaluationError::Uninitialized(name.to_string())),
    }
  }

  fn execute_module(&mut self, module_id: &ModuleId) -> Result<(), EvaluationError> {
    let handle = self.instance(module_id)?;
    let status = self
      .instances
      .get(module_id)
      .map(|instance| instance.status.clone());
    match status {
      // A module reached again while it runs sees the bindings initialized so far.
      Some(ModuleStatus::Done | ModuleStatus::Running) => return Ok(()),
      Some(ModuleStatus::Failed(error)) => return Err(error),
      Some(ModuleStatus::Pending) | None => {}
    }

    self.set_module_status(module_id, ModuleStatus::Running);
    *self
      .report
      .module_executions
      .entry(module_id.clone())
      .or_insert(0) += 1;
    tracing::trace!(module_id = %module_id, "Executing module top-level code");

    self.module_init_depth += 1;
    let result = self.run_module_body(&handle.node, &handle.scope);
    self.module_init_depth -= 1;
    self.set_module_status(
      module_id,
      match &result {
        Ok(()) => ModuleStatus::Done,
        Err(error) => ModuleStatus::Failed(error.clone()),
      },
    );
    result
  }

  fn run_module_body(&mut self, node: &ModuleGraphNode, scope: &Scope) -> Result<(), EvaluationError> {
    let mut var_names = Vec::new();
    for item in &node.module.body {
      match item {
        ModuleItem::Stmt(stmt) => collect_var_names(stmt, &mut var_names),
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
          decl: Decl::Var(var),
          ..
        })) if var.kind == VarDeclKind::Var => {
          for declarator in &var.decls {
            pat_binding_names(&declarator.name, &mut var_names);
          }
        }
        _ => {}
      }
    }
    self.declare_vars(var_names, scope);

    for item in &node.module.body {
      match item {
        ModuleItem::Stmt(Stmt::Decl(decl)) => self.hoist_lexical_decl(decl, scope),
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
          self.hoist_lexical_decl(&export.decl, scope)
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
          if let DefaultDecl::Fn(function) = &export.decl {
            let name = function
              .ident
              .as_ref()
              .map(|ident| ident.sym.clone())
              .unwrap_or_else(|| Atom::from(DEFAULT_EXPORT_BINDING));
            let value = self.create_function(
              function.ident.as_ref().map(|ident| ident.sym.clone()),
              &function.function,
              scope,
            );
            scope.declare(name, Some(value), true);
          }
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(_)) => {
          scope.declare(Atom::from(DEFAULT_EXPORT_BINDING), None, false);
        }
        _ => {}
      }
    }

    for item in &node.module.body {
      match item {
        ModuleItem::Stmt(stmt) => match self.exec_stmt(stmt, scope)? {
          Completion::Normal => {}
          _ => return Err(unsupported("top-level return, break or continue")),
        },
        ModuleItem::ModuleDecl(decl) => match decl {
          ModuleDecl::Import(_) | ModuleDecl::ExportNamed(_) | ModuleDecl::ExportAll(_) => {}
          ModuleDecl::ExportDecl(export) => self.exec_decl(&export.decl, scope)?,
          ModuleDecl::ExportDefaultDecl(export) => {
            if let DefaultDecl::Class(_) = &export.decl {
              return Err(unsupported("class declarations"));
            }
          }
          ModuleDecl::ExportDefaultExpr(export) => {
            let value = self.eval_expr(&export.expr, scope)?;
            scope.declare(Atom::from(DEFAULT_EXPORT_BINDING), Some(value), false);
          }
          ModuleDecl::TsImportEquals(_)
          | ModuleDecl::TsExportAssignment(_)
          | ModuleDecl::TsNamespaceExport(_) => {
            return Err(unsupported("TypeScript module syntax"));
          }
        },
      }
    }
    Ok(())
  }

  fn import_value(
    &mut self,
    from: &ModuleId,
    import: &ImportBinding,
  ) -> Result<JsValue, EvaluationError> {
    let target = import
      .source
      .clone()
      .map_err(|message| EvaluationError::UnresolvedImport {
        from: from.clone(),
        specifier: import.specifier.to_string(),
        message,
      })?;
    match import.imported.export_name() {
      None => {
        self.instance(&target)?;
        Ok(JsValue::Namespace(target))
      }
      Some(name) => self.export_value(&target, &name),
    }
  }

  fn export_value(&mut self, module_id: &ModuleId, name: &Atom) -> Result<JsValue, EvaluationError> {
    self.export_value_from(module_id, name, &mut HashSet::new())
  }

  fn export_value_from(
    &mut self,
    module_id: &ModuleId,
    name: &Atom,
    visited: &mut HashSet<ModuleId>,
  ) -> Result<JsValue, EvaluationError> {
    let missing = || EvaluationError::MissingExport {
      module_id: module_id.to_string(),
      name: name.to_string(),
    };
    if !visited.insert(module_id.clone()) {
      return Err(missing());
    }

    let handle = self.instance(module_id)?;
    match handle.node.exported_bindings.get(name) {
      Some(ExportTarget::Local(local)) => self.module_binding(module_id, local),
      Some(ExportTarget::ReExport(import)) => self.import_value(module_id, import),
      None if &**name == "default" => Err(missing()),
      None => {
        let mut first_error = None;
        for star in &handle.node.star_exports {
          let found = match &star.source {
            Ok(source) => self.export_value_from(source, name, visited),
            Err(message) => Err(EvaluationError::UnresolvedImport {
              from: module_id.clone(),
              specifier: star.specifier.to_string(),
              message: message.clone(),
            }),
          };
          match found {
            Ok(value) => return Ok(value),
            Err(EvaluationError::MissingExport { .. }) => {}
            Err(error @ (EvaluationError::UnresolvedImport { .. } | EvaluationError::Load(_))) => {
              first_error.get_or_insert(error);
            }
            Err(error) => return Err(error),
          }
        }
        Err(first_error.unwrap_or_else(missing))
      }
    }
  }

  /// Export names of a module namespace, sorted like a namespace object's keys.
  fn namespace_export_names(
    &mut self,
    module_id: &ModuleId,
    visited: &mut HashSet<ModuleId>,
    names: &mut Vec<Atom>,
  ) -> Result<(), EvaluationError> {
    if !visited.insert(module_id.clone()) {
      return Ok(());
    }
    let handle = self.instance(module_id)?;
    let is_root = visited.len() == 1;
    for name in handle.node.exported_bindings.keys() {
      if (is_root || &**name != "default") && !names.contains(name) {
        names.push(name.clone());
      }
    }
    for star in &handle.node.star_exports {
      if let Ok(source) = &star.source {
        self.namespace_export_names(source, visited, names)?;
      }
    }
    Ok(())
  }

  // Identifiers

  fn read_identifier(&mut self, name: &Atom, scope: &Scope) -> Result<JsValue, EvaluationError> {
    match scope.get(name) {
      Lookup::Found(value) => Ok(value),
      Lookup::Uninitialized => Err(EvaluationError::Uninitialized(name.to_string())),
      Lookup::Missing => self.module_binding(scope.module_id(), name),
    }
  }

  fn assign_identifier(
    &mut self,
    name: &Atom,
    value: JsValue,
    scope: &Scope,
  ) -> Result<(), EvaluationError> {
    match scope.set(name, value.clone()) {
      Assignment::Assigned { module_level } => {
        if module_level {
          self.record_mutation(None);
        }
        Ok(())
      }
      Assignment::Constant => Err(self.throw_error(
        ErrorKind::TypeError,
        format!("Assignment to constant variable '{name}'"),
      )),
      Assignment::Uninitialized => Err(EvaluationError::Uninitialized(name.to_string())),
      Assignment::Missing => {
        let module_id = scope.module_id().clone();
        let handle = self.instance(&module_id)?;
        if handle.node.declarations.contains_key(name) {
          // Declared but not evaluated yet in per-binding mode.
          self.module_binding(&module_id, name)?;
          return self.assign_identifier(name, value, &handle.scope);
        }
        if handle.node.imported_bindings.contains_key(name) {
          return Err(self.throw_error(
            ErrorKind::TypeError,
            format!("Assignment to imported binding '{name}'"),
          ));
        }
        Err(EvaluationError::UnavailableGlobal(format!(
          "assignment to undeclared '{name}'"
        )))
      }
    }
  }

  // Properties

  pub(super) fn get_property(&mut self, object: &JsValue, key: &str) -> Result<JsValue, EvaluationError> {
    let method = |method: Method| {
      JsValue::Function(Rc::new(JsFunction::Method {
        receiver: object.clone(),
        method,
      }))
    };
    match object {
      JsValue::Undefined | JsValue::Null => Err(self.throw_error(
        ErrorKind::TypeError,
        format!(
          "Cannot read properties of {} (reading '{key}')",
          object.to_js_string()
        ),
      )),
      JsValue::Object(properties) => {
        if let Some(value) = properties.borrow().properties.get(key) {
          return Ok(value.clone());
        }
        Ok(Method::for_object(key).map(method).unwrap_or(JsValue::Undefined))
      }
      JsValue::Array(array) => {
        if key == "length" {
          return Ok(JsValue::Number(array.borrow().elements.len() as f64));
        }
        if let Some(index) = array_index(key) {
          return Ok(
            array
              .borrow()
              .elements
              .get(index)
              .cloned()
              .unwrap_or(JsValue::Undefined),
          );
        }
        Ok(Method::for_array(key).map(method).unwrap_or(JsValue::Undefined))
      }
      JsValue::String(value) => {
        if key == "length" {
          return Ok(JsValue::Number(value.encode_utf16().count() as f64));
        }
        if let Some(index) = array_index(key) {
          return Ok(
            value
              .encode_utf16()
              .nth(index)
              .map(|unit| JsValue::string(String::from_utf16_lossy(&[unit])))
              .unwrap_or(JsValue::Undefined),
          );
        }
        Ok(Method::for_string(key).map(method).unwrap_or(JsValue::Undefined))
      }
      JsValue::Number(_) => Ok(Method::for_number(key).map(method).unwrap_or(JsValue::Undefined)),
      JsValue::Bool(_) if key == "toString" => Ok(method(Method::ToString)),
      JsValue::Bool(_) => Ok(JsValue::Undefined),
      JsValue::Function(function) => Ok(match &**function {
        JsFunction::Builtin(builtin) => static_property(*builtin, key),
        JsFunction::Closure(Closure { name, .. }) if key == "name" => Some(JsValue::string(
          name.as_ref().map(|name| &**name).unwrap_or(""),
        )),
        _ => None,
      }
      .unwrap_or(JsValue::Undefined)),
      JsValue::Namespace(module_id) => match self.export_value(module_id, &Atom::from(key)) {
        Err(EvaluationError::MissingExport { .. }) => Ok(JsValue::Undefined),
        other => other,
      },
    }
  }

  pub(super) fn set_property(
    &mut self,
    object: &JsValue,
    key: Rc<str>,
    value: JsValue,
  ) -> Result<(), EvaluationError> {
    match object {
      JsValue::Object(target) => {
        let (id, frozen) = {
          let target = target.borrow();
          (target.id, target.frozen)
        };
        if frozen {
          return Err(self.throw_error(
            ErrorKind::TypeError,
            format!("Cannot assign to read only property '{key}' of object"),
          ));
        }
        self.record_mutation(Some(id));
        target.borrow_mut().properties.insert(key, value);
        Ok(())
      }
      JsValue::Array(array) => {
        self.before_array_write(object)?;
        if &*key == "length" {
          let length = value.to_number();
          if length < 0.0 || length.trunc() != length || length > 1e6 {
            return Err(self.throw_error(
              ErrorKind::RangeError,
              String::from("Invalid array length"),
            ));
          }
          array
            .borrow_mut()
            .elements
            .resize(length as usize, JsValue::Undefined);
          return Ok(());
        }
        let Some(index) = array_index(&key) else {
          return Err(unsupported("named properties on arrays"));
        };
        let mut array = array.borrow_mut();
        if index >= array.elements.len() + 10_000 {
          return Err(unsupported("sparse arrays"));
        }
        if index >= array.elements.len() {
          array.elements.resize(index + 1, JsValue::Undefined);
        }
        array.elements[index] = value;
        Ok(())
      }
      JsValue::Undefined | JsValue::Null => Err(self.throw_error(
        ErrorKind::TypeError,
        format!(
          "Cannot set properties of {} (setting '{key}')",
          object.to_js_string()
        ),
      )),
      JsValue::Namespace(_) => Err(self.throw_error(
        ErrorKind::TypeError,
        format!("Cannot assign to read only property '{key}' of module namespace"),
      )),
      JsValue::Function(_) => Err(unsupported("properties on functions")),
      // Silently ignored, as in sloppy mode.
      JsValue::Bool(_) | JsValue::Number(_) | JsValue::String(_) => Ok(()),
    }
  }

  /// Called before an array is changed in place.
  pub(super) fn before_array_write(&mut self, value: &JsValue) -> Result<(), EvaluationError> {
    if let JsValue::Array(array) = value {
      let (id, frozen) = {
        let array = array.borrow();
        (array.id, array.frozen)
      };
      if frozen {
        return Err(self.throw_error(
          ErrorKind::TypeError,
          String::from("Cannot modify a frozen array"),
        ));
      }
      self.record_mutation(Some(id));
    }
    Ok(())
  }

  fn delete_property(&mut self, object: &JsValue, key: &str) -> Result<JsValue, EvaluationError> {
    match object {
      JsValue::Object(target) => {
        let (id, frozen) = {
          let target = target.borrow();
          (target.id, target.frozen)
        };
        if frozen {
          return Err(self.throw_error(
            ErrorKind::TypeError,
            format!("Cannot delete property '{key}' of a frozen object"),
          ));
        }
        self.record_mutation(Some(id));
        target.borrow_mut().properties.shift_remove(key);
        Ok(JsValue::Bool(true))
      }
      JsValue::Array(array) => {
        if let Some(index) = array_index(key) {
          self.before_array_write(object)?;
          if let Some(element) = array.borrow_mut().elements.get_mut(index) {
            *element = JsValue::Undefined;
          }
        }
        Ok(JsValue::Bool(true))
      }
      JsValue::Undefined | JsValue::Null => Err(self.throw_error(
        ErrorKind::TypeError,
        format!("Cannot convert {} to object", object.to_js_string()),
      )),
      _ => Ok(JsValue::Bool(true)),
    }
  }

  /// Own enumerable string-keyed properties, in insertion order.
  pub(super) fn own_entries(&mut self, value: &JsValue) -> Result<Vec<(Rc<str>, JsValue)>, EvaluationError> {
    Ok(match value {
      JsValue::Object(object) => object
        .borrow()
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect(),
      JsValue::Array(array) => array
        .borrow()
        .elements
        .iter()
        .enumerate()
        .map(|(index, value)| (Rc::from(index.to_string()), value.clone()))
        .collect(),
      JsValue::String(value) => value
        .encode_utf16()
        .enumerate()
        .map(|(index, unit)| {
          (
            Rc::from(index.to_string()),
            JsValue::string(String::from_utf16_lossy(&[unit])),
          )
        })
        .collect(),
      JsValue::Namespace(module_id) => {
        let mut names = Vec::new();
        self.namespace_export_names(module_id, &mut HashSet::new(), &mut names)?;
        names.sort_by(|a, b| (**a).cmp(&**b));
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
          let value = self.export_value(module_id, &name)?;
          entries.push((Rc::from(&*name), value));
        }
        entries
      }
      JsValue::Undefined
      | JsValue::Null
      | JsValue::Bool(_)
      | JsValue::Number(_)
      | JsValue::Function(_) => Vec::new(),
    })
  }

  fn iterate(&mut self, value: &JsValue) -> Result<Vec<JsValue>, EvaluationError> {
    match value {
      JsValue::Array(array) => Ok(array.borrow().elements.clone()),
      JsValue::String(value) => Ok(value.chars().map(|c| JsValue::string(c.to_string())).collect()),
      other => Err(self.throw_error(
        ErrorKind::TypeError,
        format!("{} is not iterable", other.to_js_string()),
      )),
    }
  }

  // Functions

  fn create_function(&mut self, name: Option<Atom>, function: &Function, scope: &Scope) -> JsValue {
    let body = if function.is_async {
      ClosureBody::Unsupported("async functions")
    } else if function.is_generator {
      ClosureBody::Unsupported("generator functions")
    } else {
      match &function.body {
        Some(body) => ClosureBody::Block(body.clone()),
        None => ClosureBody::Unsupported("functions without a body"),
      }
    };
    let params: Vec<Pat> = function.params.iter().map(|param| param.pat.clone()).collect();
    JsValue::Function(Rc::new(JsFunction::Closure(Closure {
      name,
      params: params.into(),
      body: Rc::new(body),
      scope: scope.clone(),
    })))
  }

  fn create_arrow(&mut self, arrow: &ArrowExpr, scope: &Scope) -> JsValue {
    let body = if arrow.is_async {
      ClosureBody::Unsupported("async functions")
    } else {
      match &*arrow.body {
        BlockStmtOrExpr::BlockStmt(block) => ClosureBody::Block(block.clone()),
        BlockStmtOrExpr::Expr(expr) => ClosureBody::Expr(expr.clone()),
      }
    };
    JsValue::Function(Rc::new(JsFunction::Closure(Closure {
      name: None,
      params: arrow.params.clone().into(),
      body: Rc::new(body),
      scope: scope.clone(),
    })))
  }

  pub(super) fn call_function(
    &mut self,
    callee: &JsValue,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    self.tick()?;
    let JsValue::Function(function) = callee else {
      return Err(self.throw_error(
        ErrorKind::TypeError,
        format!("{} is not a function", callee.to_js_string()),
      ));
    };
    match &**function {
      JsFunction::Builtin(builtin) => self.call_builtin(*builtin, args),
      JsFunction::Method { receiver, method } => self.call_method(receiver, *method, args),
      JsFunction::Closure(closure) => {
        if self.call_depth >= self.limits.max_call_depth {
          return Err(EvaluationError::CallDepthExceeded(self.limits.max_call_depth));
        }
        self.call_depth += 1;
        let result = self.invoke_closure(function, closure, args);
        self.call_depth -= 1;
        result
      }
    }
  }

  fn invoke_closure(
    &mut self,
    function: &Rc<JsFunction>,
    closure: &Closure,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    let scope = closure.scope.child();
    if let Some(name) = &closure.name {
      scope.declare(name.clone(), Some(JsValue::Function(function.clone())), true);
    }

    for (index, param) in closure.params.iter().enumerate() {
      match param {
        Pat::Rest(rest) => {
          let rest_values = args.get(index..).map(<[JsValue]>::to_vec).unwrap_or_default();
          let value = self.new_array(rest_values);
          self.bind_pattern(&rest.arg, value, &scope, BindingKind::Let)?;
        }
        _ => {
          let value = args.get(index).cloned().unwrap_or(JsValue::Undefined);
          self.bind_pattern(param, value, &scope, BindingKind::Let)?;
        }
      }
    }

    match &*closure.body {
      ClosureBody::Expr(expr) => self.eval_expr(expr, &scope),
      ClosureBody::Block(block) => {
        let mut var_names = Vec::new();
        for stmt in &block.stmts {
          collect_var_names(stmt, &mut var_names);
        }
        self.declare_vars(var_names, &scope);
        self.hoist_lexical(&block.stmts, &scope);
        match self.exec_stmts(&block.stmts, &scope)? {
          Completion::Return(value) => Ok(value),
          _ => Ok(JsValue::Undefined),
        }
      }
      ClosureBody::Unsupported(what) => Err(unsupported(what)),
    }
  }

  // Declarations and patterns

  fn declare_vars(&mut self, names: Vec<Atom>, scope: &Scope) {
    for name in names {
      if !scope.has_own(&name) {
        scope.declare(name, Some(JsValue::Undefined), true);
      }
    }
  }

  fn hoist_lexical(&mut self, stmts: &[Stmt], scope: &Scope) {
    for stmt in stmts {
      if let Stmt::Decl(decl) = stmt {
        self.hoist_lexical_decl(decl, scope);
      }
    }
  }

  fn hoist_lexical_decl(&mut self, decl: &Decl, scope: &Scope) {
    match decl {
      Decl::Fn(function) if !function.declare => {
        let value = self.create_function(Some(function.ident.sym.clone()), &function.function, scope);
        scope.declare(function.ident.sym.clone(), Some(value), true);
      }
      Decl::Var(var) if !var.declare && var.kind != VarDeclKind::Var => {
        let mut names = Vec::new();
        for declarator in &var.decls {
          pat_binding_names(&declarator.name, &mut names);
        }
        for name in names {
          scope.declare(name, None, var.kind != VarDeclKind::Const);
        }
      }
      Decl::Class(class) if !class.declare => scope.declare(class.ident.sym.clone(), None, true),
      Decl::TsEnum(ts_enum) if !ts_enum.declare => {
        scope.declare(ts_enum.id.sym.clone(), None, false)
      }
      _ => {}
    }
  }

  fn exec_decl(&mut self, decl: &Decl, scope: &Scope) -> Result<(), EvaluationError> {
    match decl {
      Decl::Var(var) => self.exec_var_decl(var, scope),
      Decl::Fn(_) => Ok(()),
      Decl::TsEnum(ts_enum) if !ts_enum.declare => {
        let value = self.eval_enum(ts_enum, scope)?;
        scope.declare(ts_enum.id.sym.clone(), Some(value), false);
        Ok(())
      }
      Decl::Class(class) if !class.declare => Err(unsupported("class declarations")),
      Decl::Using(_) => Err(unsupported("using declarations")),
      _ => Ok(()),
    }
  }

  fn exec_var_decl(&mut self, var: &VarDecl, scope: &Scope) -> Result<(), EvaluationError> {
    if var.declare {
      return Ok(());
    }
    let kind = BindingKind::from(var.kind);
    for declarator in &var.decls {
      let value = match (&declarator.init, kind) {
        (Some(init), _) => self.eval_expr(init, scope)?,
        (None, BindingKind::Var) => continue,
        (None, _) => JsValue::Undefined,
      };
      self.bind_pattern(&declarator.name, value, scope, kind)?;
    }
    Ok(())
  }

  fn bind_name(&mut self, name: &Atom, value: JsValue, scope: &Scope, kind: BindingKind) {
    match kind {
      BindingKind::Var => {
        if !matches!(scope.set(name, value.clone()), Assignment::Assigned { .. }) {
          scope.declare(name.clone(), Some(value), true);
        }
      }
      BindingKind::Let => scope.declare(name.clone(), Some(value), true),
      BindingKind::Const => scope.declare(name.clone(), Some(value), false),
    }
  }

  fn bind_pattern(
    &mut self,
    pat: &Pat,
    value: JsValue,
    scope: &Scope,
    kind: BindingKind,
  ) -> Result<(), EvaluationError> {
    match pat {
      Pat::Ident(binding) => {
        self.bind_name(&binding.id.sym, value, scope, kind);
        Ok(())
      }
      Pat::Assign(assign) => {
        let value = match value {
          JsValue::Undefined => self.eval_expr(&assign.right, scope)?,
          other => other,
        };
        self.bind_pattern(&assign.left, value, scope, kind)
      }
      Pat::Array(array) => {
        let elements = self.iterate(&value)?;
        for (index, element) in array.elems.iter().enumerate() {
          match element {
            None => {}
            Some(Pat::Rest(rest)) => {
              let rest_values = elements.get(index..).map(<[JsValue]>::to_vec).unwrap_or_default();
              let rest_value = self.new_array(rest_values);
              self.bind_pattern(&rest.arg, rest_value, scope, kind)?;
              break;
            }
            Some(pat) => {
              let element = elements.get(index).cloned().unwrap_or(JsValue::Undefined);
              self.bind_pattern(pat, element, scope, kind)?;
            }
          }
        }
        Ok(())
      }
      Pat::Object(object) => {
        if value.is_nullish() {
          return Err(self.throw_error(
            ErrorKind::TypeError,
            format!("Cannot destructure '{}'", value.to_js_string()),
          ));
        }
        let mut used: Vec<Rc<str>> = Vec::new();
        for prop in &object.props {
          match prop {
            ObjectPatProp::KeyValue(key_value) => {
              let key = self.prop_name_key(&key_value.key, scope)?;
              let property = self.get_property(&value, &key)?;
              used.push(key);
              self.bind_pattern(&key_value.value, property, scope, kind)?;
            }
            ObjectPatProp::Assign(assign) => {
              let name = &assign.key.id.sym;
              let mut property = self.get_property(&value, name)?;
              if let (JsValue::Undefined, Some(default)) = (&property, &assign.value) {
                property = self.eval_expr(default, scope)?;
              }
              used.push(Rc::from(&**name));
              self.bind_name(name, property, scope, kind);
            }
            ObjectPatProp::Rest(rest) => {
              let remaining = self
                .own_entries(&value)?
                .into_iter()
                .filter(|(key, _)| !used.contains(key))
                .collect();
              let rest_value = self.new_object(remaining);
              self.bind_pattern(&rest.arg, rest_value, scope, kind)?;
            }
          }
        }
        Ok(())
      }
      Pat::Rest(rest) => self.bind_pattern(&rest.arg, value, scope, kind),
      Pat::Expr(_) | Pat::Invalid(_) => Err(unsupported("expression patterns in declarations")),
    }
  }

  fn eval_enum(&mut self, ts_enum: &TsEnumDecl, scope: &Scope) -> Result<JsValue, EvaluationError> {
    let enum_scope = scope.child();
    let mut properties = IndexMap::new();
    let mut next_value = Some(0.0);
    for member in &ts_enum.members {
      let name: Rc<str> = match &member.id {
        TsEnumMemberId::Ident(ident) => Rc::from(&*ident.sym),
        TsEnumMemberId::Str(value) => Rc::from(&*value.value),
      };
      let value = match (&member.init, next_value) {
        (Some(init), _) => self.eval_expr(init, &enum_scope)?,
        (None, Some(next)) => JsValue::Number(next),
        (None, None) => return Err(unsupported("enum members after a string member without an initializer")),
      };
      next_value = match &value {
        JsValue::Number(number) => Some(number + 1.0),
        _ => None,
      };
      enum_scope.declare(Atom::from(&*name), Some(value.clone()), false);
      properties.insert(name.clone(), value.clone());
      if let JsValue::Number(number) = value {
        properties.insert(Rc::from(number_to_string(number)), JsValue::String(name));
      }
    }
    Ok(self.new_object(properties))
  }

  // Statements

  fn exec_stmts(&mut self, stmts: &[Stmt], scope: &Scope) -> Result<Completion, EvaluationError> {
    for stmt in stmts {
      match self.exec_stmt(stmt, scope)? {
        Completion::Normal => {}
        other => return Ok(other),
      }
    }
    Ok(Completion::Normal)
  }

  fn exec_block(&mut self, stmts: &[Stmt], parent: &Scope) -> Result<Completion, EvaluationError> {
    let scope = parent.child();
    self.hoist_lexical(stmts, &scope);
    self.exec_stmts(stmts, &scope)
  }

  fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Completion, EvaluationError> {
    self.tick()?;
    match stmt {
      Stmt::Expr(expr) => {
        self.eval_expr(&expr.expr, scope)?;
        Ok(Completion::Normal)
      }
      Stmt::Decl(decl) => {
        self.exec_decl(decl, scope)?;
        Ok(Completion::Normal)
      }
      Stmt::Block(block) => self.exec_block(&block.stmts, scope),
      Stmt::Empty(_) | Stmt::Debugger(_) => Ok(Completion::Normal),
      Stmt::Return(ret) => Ok(Completion::Return(match &ret.arg {
        Some(arg) => self.eval_expr(arg, scope)?,
        None => JsValue::Undefined,
      })),
      Stmt::If(if_stmt) => {
        if self.eval_expr(&if_stmt.test, scope)?.truthy() {
          self.exec_stmt(&if_stmt.cons, scope)
        } else if let Some(alt) = &if_stmt.alt {
          self.exec_stmt(alt, scope)
        } else {
          Ok(Completion::Normal)
        }
      }
      Stmt::Break(BreakStmt { label: None, .. }) => Ok(Completion::Break),
      Stmt::Continue(ContinueStmt { label: None, .. }) => Ok(Completion::Continue),
      Stmt::Break(_) | Stmt::Continue(_) | Stmt::Labeled(_) => Err(unsupported("labeled statements")),
      Stmt::Throw(throw) => {
        let value = self.eval_expr(&throw.arg, scope)?;
        let message = self.describe_exception(&value);
        self.pending_exception = Some(value);
        Err(EvaluationError::Thrown(message))
      }
      Stmt::Try(try_stmt) => self.exec_try(try_stmt, scope),
      Stmt::While(while_stmt) => {
        loop {
          self.tick()?;
          if !self.eval_expr(&while_stmt.test, scope)?.truthy() {
            break;
          }
          match self.exec_stmt(&while_stmt.body, scope)? {
            Completion::Break => break,
            Completion::Return(value) => return Ok(Completion::Return(value)),
            Completion::Normal | Completion::Continue => {}
          }
        }
        Ok(Completion::Normal)
      }
      Stmt::DoWhile(do_while) => {
        loop {
          self.tick()?;
          match self.exec_stmt(&do_while.body, scope)? {
            Completion::Break => break,
            Completion::Return(value) => return Ok(Completion::Return(value)),
            Completion::Normal | Completion::Continue => {}
          }
          if !self.eval_expr(&do_while.test, scope)?.truthy() {
            break;
          }
        }
        Ok(Completion::Normal)
      }
      Stmt::For(for_stmt) => self.exec_for(for_stmt, scope),
      Stmt::ForOf(for_of) => {
        if for_of.is_await {
          return Err(unsupported("for await"));
        }
        let iterable = self.eval_expr(&for_of.right, scope)?;
        let items = self.iterate(&iterable)?;
        self.exec_for_each(&for_of.left, items, &for_of.body, scope)
      }
      Stmt::ForIn(for_in) => {
        let object = self.eval_expr(&for_in.right, scope)?;
        let keys = if object.is_nullish() {
          Vec::new()
        } else {
          self
            .own_entries(&object)?
            .into_iter()
            .map(|(key, _)| JsValue::String(key))
            .collect()
        };
        self.exec_for_each(&for_in.left, keys, &for_in.body, scope)
      }
      Stmt::Switch(switch) => self.exec_switch(switch, scope),
      Stmt::With(_) => Err(unsupported("with statements")),
    }
  }

  fn exec_try(&mut self, try_stmt: &TryStmt, scope: &Scope) -> Result<Completion, EvaluationError> {
    let result = match (self.exec_block(&try_stmt.block.stmts, scope), &try_stmt.handler) {
      (Err(error), Some(handler)) if error.is_catchable() => {
        let exception = match &error {
          EvaluationError::Thrown(_) => self.pending_exception.take(),
          _ => None,
        };
        let exception = exception.unwrap_or_else(|| {
          let kind = match &error {
            EvaluationError::Type(_) => ErrorKind::TypeError,
            _ => ErrorKind::Error,
          };
          self.create_error(kind, error.to_string())
        });
        let catch_scope = scope.child();
        if let Some(param) = &handler.param {
          self.bind_pattern(param, exception, &catch_scope, BindingKind::Let)?;
        }
        self.exec_block(&handler.body.stmts, &catch_scope)
      }
      (result, _) => result,
    };

    if let Some(finalizer) = &try_stmt.finalizer {
      match self.exec_block(&finalizer.stmts, scope)? {
        Completion::Normal => {}
        other => return Ok(other),
      }
    }
    result
  }

  fn exec_for(&mut self, for_stmt: &ForStmt, scope: &Scope) -> Result<Completion, EvaluationError> {
    let loop_scope = scope.child();
    let mut per_iteration = Vec::new();
    match &for_stmt.init {
      Some(VarDeclOrExpr::VarDecl(var)) => {
        if var.kind != VarDeclKind::Var {
          for declarator in &var.decls {
            pat_binding_names(&declarator.name, &mut per_iteration);
          }
        }
        self.exec_var_decl(var, &loop_scope)?;
      }
      Some(VarDeclOrExpr::Expr(expr)) => {
        self.eval_expr(expr, &loop_scope)?;
      }
      None => {}
    }

    let mut iteration_scope = loop_scope;
    loop {
      self.tick()?;
      if let Some(test) = &for_stmt.test {
        if !self.eval_expr(test, &iteration_scope)?.truthy() {
          break;
        }
      }
      match self.exec_stmt(&for_stmt.body, &iteration_scope)? {
        Completion::Break => break,
        Completion::Return(value) => return Ok(Completion::Return(value)),
        Completion::Normal | Completion::Continue => {}
      }
      if !per_iteration.is_empty() {
        // Closures created in the body keep the bindings of their own iteration.
        let next = scope.child();
        for (name, value, mutable) in iteration_scope.own_values(&per_iteration) {
          next.declare(name, value, mutable);
        }
        iteration_scope = next;
      }
      if let Some(update) = &for_stmt.update {
        self.eval_expr(update, &iteration_scope)?;
      }
    }
    Ok(Completion::Normal)
  }

  fn exec_for_each(
    &mut self,
    head: &ForHead,
    items: Vec<JsValue>,
    body: &Stmt,
    scope: &Scope,
  ) -> Result<Completion, EvaluationError> {
    for item in items {
      self.tick()?;
      let body_scope = scope.child();
      match head {
        ForHead::VarDecl(var) => {
          let Some(declarator) = var.decls.first() else {
            return Err(unsupported("empty loop declarations"));
          };
          self.bind_pattern(&declarator.name, item, &body_scope, BindingKind::from(var.kind))?;
        }
        ForHead::Pat(pat) => match &**pat {
          Pat::Ident(binding) => self.assign_identifier(&binding.id.sym, item, &body_scope)?,
          Pat::Expr(expr) => {
            let reference = self.resolve_reference(expr, &body_scope)?;
            self.put_reference(&reference, item, &body_scope)?;
          }
          _ => return Err(unsupported("destructuring assignment in loop heads")),
        },
        ForHead::UsingDecl(_) => return Err(unsupported("using declarations")),
      }
      match self.exec_stmt(body, &body_scope)? {
        Completion::Break => break,
        Completion::Return(value) => return Ok(Completion::Return(value)),
        Completion::Normal | Completion::Continue => {}
      }
    }
    Ok(Completion::Normal)
  }

  fn exec_switch(&mut self, switch: &SwitchStmt, scope: &Scope) -> Result<Completion, EvaluationError> {
    let discriminant = self.eval_expr(&switch.discriminant, scope)?;
    let mut start = None;
    for (index, case) in switch.cases.iter().enumerate() {
      if let Some(test) = &case.test {
        if self.eval_expr(test, scope)?.strict_equals(&discriminant) {
          start = Some(index);
          break;
        }
      }
    }
    let start = start.or_else(|| switch.cases.iter().position(|case| case.test.is_none()));
    let Some(start) = start else {
      return Ok(Completion::Normal);
    };

    let block = scope.child();
    for case in &switch.cases {
      self.hoist_lexical(&case.cons, &block);
    }
    for case in &switch.cases[start..] {
      match self.exec_stmts(&case.cons, &block)? {
        Completion::Normal => {}
        Completion::Break => return Ok(Completion::Normal),
        other => return Ok(other),
      }
    }
    Ok(Completion::Normal)
  }

  fn describe_exception(&self, value: &JsValue) -> String {
    if let JsValue::Object(object) = value {
      let object = object.borrow();
      if let Some(message) = object.properties.get("message") {
        let name = object
          .properties
          .get("name")
          .map(JsValue::to_js_string)
          .unwrap_or_else(|| String::from("Error"));
        return format!("{name}: {}", message.to_js_string());
      }
    }
    value.to_js_string()
  }

  // Expressions

  fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> Result<JsValue, EvaluationError> {
    match expr {
      Expr::Lit(lit) => match lit {
        Lit::Str(value) => Ok(JsValue::string(&*value.value)),
        Lit::Num(number) => Ok(JsValue::Number(number.value)),
        Lit::Bool(value) => Ok(JsValue::Bool(value.value)),
        Lit::Null(_) => Ok(JsValue::Null),
        Lit::BigInt(_) => Err(unsupported("BigInt literals")),
        Lit::Regex(_) => Err(unsupported("regular expressions")),
        Lit::JSXText(_) => Err(unsupported("JSX")),
      },
      Expr::Ident(ident) => self.read_identifier(&ident.sym, scope),
      Expr::Tpl(tpl) => {
        let mut output = String::new();
        for (index, quasi) in tpl.quasis.iter().enumerate() {
          let Some(cooked) = &quasi.cooked else {
            return Err(unsupported("invalid escape sequences in template literals"));
          };
          output.push_str(cooked);
          if let Some(expr) = tpl.exprs.get(index) {
            let value = self.eval_expr(expr, scope)?;
            output.push_str(&value.to_js_string());
          }
        }
        Ok(JsValue::string(output))
      }
      Expr::Array(array) => {
        let mut elements = Vec::with_capacity(array.elems.len());
        for element in &array.elems {
          match element {
            None => elements.push(JsValue::Undefined),
            Some(ExprOrSpread {
              spread: Some(_),
              expr,
            }) => {
              let value = self.eval_expr(expr, scope)?;
              elements.extend(self.iterate(&value)?);
            }
            Some(ExprOrSpread { expr, .. }) => elements.push(self.eval_expr(expr, scope)?),
          }
        }
        Ok(self.new_array(elements))
      }
      Expr::Object(object) => self.eval_object(object, scope),
      Expr::Paren(paren) => self.eval_expr(&paren.expr, scope),
      Expr::Seq(seq) => {
        let mut value = JsValue::Undefined;
        for expr in &seq.exprs {
          value = self.eval_expr(expr, scope)?;
        }
        Ok(value)
      }
      Expr::Cond(cond) => {
        if self.eval_expr(&cond.test, scope)?.truthy() {
          self.eval_expr(&cond.cons, scope)
        } else {
          self.eval_expr(&cond.alt, scope)
        }
      }
      Expr::Unary(unary) => self.eval_unary(unary, scope),
      Expr::Update(update) => {
        let reference = self.resolve_reference(&update.arg, scope)?;
        let old = self.get_reference(&reference, scope)?.to_number();
        let new = match update.op {
          UpdateOp::PlusPlus => old + 1.0,
          UpdateOp::MinusMinus => old - 1.0,
        };
        self.put_reference(&reference, JsValue::Number(new), scope)?;
        Ok(JsValue::Number(if update.prefix { new } else { old }))
      }
      Expr::Bin(bin) => match bin.op {
        BinaryOp::LogicalAnd => {
          let left = self.eval_expr(&bin.left, scope)?;
          if !left.truthy() {
            return Ok(left);
          }
          self.eval_expr(&bin.right, scope)
        }
        BinaryOp::LogicalOr => {
          let left = self.eval_expr(&bin.left, scope)?;
          if left.truthy() {
            return Ok(left);
          }
          self.eval_expr(&bin.right, scope)
        }
        BinaryOp::NullishCoalescing => {
          let left = self.eval_expr(&bin.left, scope)?;
          if !left.is_nullish() {
            return Ok(left);
          }
          self.eval_expr(&bin.right, scope)
        }
        op => {
          let left = self.eval_expr(&bin.left, scope)?;
          let right = self.eval_expr(&bin.right, scope)?;
          self.binary(op, &left, &right)
        }
      },
      Expr::Assign(assign) => self.eval_assign(assign, scope),
      Expr::Member(member) => {
        let object = self.eval_expr(&member.obj, scope)?;
        let key = self.member_key(&member.prop, scope)?;
        self.get_property(&object, &key)
      }
      Expr::OptChain(_) => Ok(self.eval_chain(expr, scope)?.unwrap_or(JsValue::Undefined)),
      Expr::Call(call) => {
        let Callee::Expr(callee) = &call.callee else {
          return Err(unsupported("super and dynamic import calls"));
        };
        let function = self.eval_expr(callee, scope)?;
        let args = self.eval_args(&call.args, scope)?;
        self.call_function(&function, args)
      }
      Expr::New(new) => {
        let callee = self.eval_expr(&new.callee, scope)?;
        let args = match &new.args {
          Some(args) => self.eval_args(args, scope)?,
          None => Vec::new(),
        };
        match &callee {
          JsValue::Function(function) => match &**function {
            JsFunction::Builtin(builtin @ Builtin::Error(_)) => self.call_builtin(*builtin, args),
            _ => Err(unsupported("constructors other than Error")),
          },
          _ => Err(self.throw_error(
            ErrorKind::TypeError,
            format!("{} is not a constructor", callee.to_js_string()),
          )),
        }
      }
      Expr::Fn(function) => Ok(self.create_function(
        function.ident.as_ref().map(|ident| ident.sym.clone()),
        &function.function,
        scope,
      )),
      Expr::Arrow(arrow) => Ok(self.create_arrow(arrow, scope)),
      Expr::TsAs(TsAsExpr { expr, .. })
      | Expr::TsSatisfies(TsSatisfiesExpr { expr, .. })
      | Expr::TsConstAssertion(TsConstAssertion { expr, .. })
      | Expr::TsNonNull(TsNonNullExpr { expr, .. })
      | Expr::TsTypeAssertion(TsTypeAssertion { expr, .. })
      | Expr::TsInstantiation(TsInstantiation { expr, .. }) => self.eval_expr(expr, scope),
      Expr::This(_) => Err(unsupported("this")),
      Expr::Class(_) => Err(unsupported("class expressions")),
      Expr::TaggedTpl(_) => Err(unsupported("tagged templates")),
      Expr::Await(_) | Expr::Yield(_) => Err(unsupported("await and yield")),
      Expr::JSXElement(_)
      | Expr::JSXFragment(_)
      | Expr::JSXMember(_)
      | Expr::JSXNamespacedName(_)
      | Expr::JSXEmpty(_) => Err(unsupported("JSX")),
      _ => Err(unsupported("this kind of expression")),
    }
  }

  fn eval_object(&mut self, object: &ObjectLit, scope: &Scope) -> Result<JsValue, EvaluationError> {
    let mut properties = IndexMap::new();
    for prop in &object.props {
      match prop {
        PropOrSpread::Spread(spread) => {
          let value = self.eval_expr(&spread.expr, scope)?;
          for (key, property) in self.own_entries(&value)? {
            properties.insert(key, property);
          }
        }
        PropOrSpread::Prop(prop) => match &**prop {
          Prop::Shorthand(ident) => {
            let value = self.read_identifier(&ident.sym, scope)?;
            properties.insert(Rc::from(&*ident.sym), value);
          }
          Prop::KeyValue(key_value) => {
            let key = self.prop_name_key(&key_value.key, scope)?;
            let value = self.eval_expr(&key_value.value, scope)?;
            properties.insert(key, value);
          }
          Prop::Method(method) => {
            let key = self.prop_name_key(&method.key, scope)?;
            let value = self.create_function(Some(Atom::from(&*key)), &method.function, scope);
            properties.insert(key, value);
          }
          Prop::Getter(_) | Prop::Setter(_) => return Err(unsupported("getters and setters")),
          Prop::Assign(_) => return Err(unsupported("shorthand defaults outside patterns")),
        },
      }
    }
    Ok(self.new_object(properties))
  }

  fn eval_unary(&mut self, unary: &UnaryExpr, scope: &Scope) -> Result<JsValue, EvaluationError> {
    match unary.op {
      UnaryOp::TypeOf => {
        let value = match &*unary.arg {
          Expr::Ident(ident) => match self.read_identifier(&ident.sym, scope) {
            Err(EvaluationError::UnavailableGlobal(_)) => JsValue::Undefined,
            other => other?,
          },
          arg => self.eval_expr(arg, scope)?,
        };
        Ok(JsValue::string(value.type_of()))
      }
      UnaryOp::Delete => match strip_type_wrappers(&unary.arg) {
        Expr::Member(member) => {
          let object = self.eval_expr(&member.obj, scope)?;
          let key = self.member_key(&member.prop, scope)?;
          self.delete_property(&object, &key)
        }
        _ => Ok(JsValue::Bool(true)),
      },
      op => {
        let value = self.eval_expr(&unary.arg, scope)?;
        Ok(match op {
          UnaryOp::Minus => JsValue::Number(-value.to_number()),
          UnaryOp::Plus => JsValue::Number(value.to_number()),
          UnaryOp::Bang => JsValue::Bool(!value.truthy()),
          UnaryOp::Tilde => JsValue::Number(f64::from(!to_int32(value.to_number()))),
          _ => JsValue::Undefined,
        })
      }
    }
  }

  fn eval_assign(&mut self, assign: &AssignExpr, scope: &Scope) -> Result<JsValue, EvaluationError> {
    let reference = match &assign.left {
      AssignTarget::Simple(target) => self.resolve_simple_target(target, scope)?,
      AssignTarget::Pat(_) => return Err(unsupported("destructuring assignment")),
    };

    let value = match assign.op {
      AssignOp::Assign => self.eval_expr(&assign.right, scope)?,
      AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::NullishAssign => {
        let current = self.get_reference(&reference, scope)?;
        let keep = match assign.op {
          AssignOp::AndAssign => !current.truthy(),
          AssignOp::OrAssign => current.truthy(),
          _ => !current.is_nullish(),
        };
        if keep {
          return Ok(current);
        }
        self.eval_expr(&assign.right, scope)?
      }
      op => {
        let current = self.get_reference(&reference, scope)?;
        let right = self.eval_expr(&assign.right, scope)?;
        self.binary(compound_operator(op), &current, &right)?
      }
    };
    self.put_reference(&reference, value.clone(), scope)?;
    Ok(value)
  }

  fn resolve_simple_target(
    &mut self,
    target: &SimpleAssignTarget,
    scope: &Scope,
  ) -> Result<Reference, EvaluationError> {
    match target {
      SimpleAssignTarget::Ident(binding) => Ok(Reference::Identifier(binding.id.sym.clone())),
      SimpleAssignTarget::Member(member) => {
        let object = self.eval_expr(&member.obj, scope)?;
        let key = self.member_key(&member.prop, scope)?;
        Ok(Reference::Property(object, key))
      }
      SimpleAssignTarget::Paren(ParenExpr { expr, .. })
      | SimpleAssignTarget::TsAs(TsAsExpr { expr, .. })
      | SimpleAssignTarget::TsSatisfies(TsSatisfiesExpr { expr, .. })
      | SimpleAssignTarget::TsNonNull(TsNonNullExpr { expr, .. })
      | SimpleAssignTarget::TsTypeAssertion(TsTypeAssertion { expr, .. }) => {
        self.resolve_reference(expr, scope)
      }
      _ => Err(unsupported("this assignment target")),
    }
  }

  fn resolve_reference(&mut self, expr: &Expr, scope: &Scope) -> Result<Reference, EvaluationError> {
    match strip_type_wrappers(expr) {
      Expr::Ident(ident) => Ok(Reference::Identifier(ident.sym.clone())),
      Expr::Member(member) => {
        let object = self.eval_expr(&member.obj, scope)?;
        let key = self.member_key(&member.prop, scope)?;
        Ok(Reference::Property(object, key))
      }
      _ => Err(unsupported("this assignment target")),
    }
  }

  fn get_reference(&mut self, reference: &Reference, scope: &Scope) -> Result<JsValue, EvaluationError> {
    match reference {
      Reference::Identifier(name) => self.read_identifier(name, scope),
      Reference::Property(object, key) => self.get_property(object, key),
    }
  }

  fn put_reference(
    &mut self,
    reference: &Reference,
    value: JsValue,
    scope: &Scope,
  ) -> Result<(), EvaluationError> {
    match reference {
      Reference::Identifier(name) => self.assign_identifier(name, value, scope),
      Reference::Property(object, key) => self.set_property(object, key.clone(), value),
    }
  }

  /// Evaluate an optional chain. `None` means the chain short-circuited.
  fn eval_chain(&mut self, expr: &Expr, scope: &Scope) -> Result<Option<JsValue>, EvaluationError> {
    let Expr::OptChain(chain) = expr else {
      return Ok(Some(self.eval_expr(expr, scope)?));
    };
    match &*chain.base {
      OptChainBase::Member(member) => {
        let Some(object) = self.eval_chain(&member.obj, scope)? else {
          return Ok(None);
        };
        if chain.optional && object.is_nullish() {
          return Ok(None);
        }
        let key = self.member_key(&member.prop, scope)?;
        Ok(Some(self.get_property(&object, &key)?))
      }
      OptChainBase::Call(call) => {
        let Some(callee) = self.eval_chain(&call.callee, scope)? else {
          return Ok(None);
        };
        if chain.optional && callee.is_nullish() {
          return Ok(None);
        }
        let args = self.eval_args(&call.args, scope)?;
        Ok(Some(self.call_function(&callee, args)?))
      }
    }
  }

  fn eval_args(&mut self, args: &[ExprOrSpread], scope: &Scope) -> Result<Vec<JsValue>, EvaluationError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
      let value = self.eval_expr(&arg.expr, scope)?;
      if arg.spread.is_some() {
        values.extend(self.iterate(&value)?);
      } else {
        values.push(value);
      }
    }
    Ok(values)
  }

  fn member_key(&mut self, prop: &MemberProp, scope: &Scope) -> Result<Rc<str>, EvaluationError> {
    match prop {
      MemberProp::Ident(ident) => Ok(Rc::from(&*ident.sym)),
      MemberProp::Computed(computed) => Ok(self.eval_expr(&computed.expr, scope)?.to_property_key()),
      MemberProp::PrivateName(_) => Err(unsupported("private names")),
    }
  }

  fn prop_name_key(&mut self, name: &PropName, scope: &Scope) -> Result<Rc<str>, EvaluationError> {
    match name {
      PropName::Ident(ident) => Ok(Rc::from(&*ident.sym)),
      PropName::Str(value) => Ok(Rc::from(&*value.value)),
      PropName::Num(number) => Ok(Rc::from(number_to_string(number.value))),
      PropName::Computed(computed) => Ok(self.eval_expr(&computed.expr, scope)?.to_property_key()),
      PropName::BigInt(_) => Err(unsupported("BigInt property names")),
    }
  }

  fn binary(&mut self, op: BinaryOp, left: &JsValue, right: &JsValue) -> Result<JsValue, EvaluationError> {
    let number = |f: fn(f64, f64) -> f64| JsValue::Number(f(left.to_number(), right.to_number()));
    let int32 = |f: fn(i32, i32) -> i32| {
      JsValue::Number(f64::from(f(
        to_int32(left.to_number()),
        to_int32(right.to_number()),
      )))
    };
    Ok(match op {
      BinaryOp::Add => {
        let left = to_primitive(left);
        let right = to_primitive(right);
        if matches!(left, JsValue::String(_)) || matches!(right, JsValue::String(_)) {
          JsValue::string(format!("{}{}", left.to_js_string(), right.to_js_string()))
        } else {
          JsValue::Number(left.to_number() + right.to_number())
        }
      }
      BinaryOp::Sub => number(|a, b| a - b),
      BinaryOp::Mul => number(|a, b| a * b),
      BinaryOp::Div => number(|a, b| a / b),
      BinaryOp::Mod => number(|a, b| a % b),
      BinaryOp::Exp => number(f64::powf),
      BinaryOp::EqEq => JsValue::Bool(left.loose_equals(right)),
      BinaryOp::NotEq => JsValue::Bool(!left.loose_equals(right)),
      BinaryOp::EqEqEq => JsValue::Bool(left.strict_equals(right)),
      BinaryOp::NotEqEq => JsValue::Bool(!left.strict_equals(right)),
      BinaryOp::Lt => JsValue::Bool(compare(left, right, |o| o.is_lt())),
      BinaryOp::LtEq => JsValue::Bool(compare(left, right, |o| o.is_le())),
      BinaryOp::Gt => JsValue::Bool(compare(left, right, |o| o.is_gt())),
      BinaryOp::GtEq => JsValue::Bool(compare(left, right, |o| o.is_ge())),
      BinaryOp::BitAnd => int32(|a, b| a & b),
      BinaryOp::BitOr => int32(|a, b| a | b),
      BinaryOp::BitXor => int32(|a, b| a ^ b),
      BinaryOp::LShift => int32(|a, b| a.wrapping_shl(b as u32 & 31)),
      BinaryOp::RShift => int32(|a, b| a >> (b as u32 & 31)),
      BinaryOp::ZeroFillRShift => {
        let shift = to_int32(right.to_number()) as u32 & 31;
        JsValue::Number(f64::from(to_int32(left.to_number()) as u32 >> shift))
      }
      BinaryOp::In => {
        let key = left.to_property_key();
        match right {
          JsValue::Object(object) => JsValue::Bool(object.borrow().properties.contains_key(&key)),
          JsValue::Array(array) => JsValue::Bool(
            &*key == "length"
              || array_index(&key).is_some_and(|index| index < array.borrow().elements.len()),
          ),
          JsValue::Namespace(module_id) => {
            let mut names = Vec::new();
            self.namespace_export_names(module_id, &mut HashSet::new(), &mut names)?;
            JsValue::Bool(names.iter().any(|name| **name == *key))
          }
          other => {
            return Err(self.throw_error(
              ErrorKind::TypeError,
              format!("Cannot use 'in' operator to search for '{key}' in {}", other.to_js_string()),
            ))
          }
        }
      }
      BinaryOp::InstanceOf => return Err(unsupported("instanceof")),
      BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullishCoalescing => {
        return Err(unsupported("logical operators outside expressions"))
      }
    })
  }
}

fn unsupported(what: &str) -> EvaluationError {
  EvaluationError::Unsupported(what.to_string())
}

fn is_static_prop(prop: &PropOrSpread) -> bool {
  match prop {
    PropOrSpread::Prop(prop) => match &**prop {
      Prop::KeyValue(key_value) => matches!(
        key_value.key,
        PropName::Ident(_) | PropName::Str(_) | PropName::Num(_)
      ),
      Prop::Shorthand(_) => true,
      _ => false,
    },
    PropOrSpread::Spread(_) => false,
  }
}

fn strip_type_wrappers(expr: &Expr) -> &Expr {
  match expr {
    Expr::Paren(ParenExpr { expr, .. })
    | Expr::TsAs(TsAsExpr { expr, .. })
    | Expr::TsSatisfies(TsSatisfiesExpr { expr, .. })
    | Expr::TsConstAssertion(TsConstAssertion { expr, .. })
    | Expr::TsNonNull(TsNonNullExpr { expr, .. })
    | Expr::TsTypeAssertion(TsTypeAssertion { expr, .. }) => strip_type_wrappers(expr),
    other => other,
  }
}

/// Canonical array index, so that `"01"` is not read as `1`.
fn array_index(key: &str) -> Option<usize> {
  let index: usize = key.parse().ok()?;
  (index.to_string() == key).then_some(index)
}

fn to_primitive(value: &JsValue) -> JsValue {
  match value {
    JsValue::Object(_) | JsValue::Array(_) | JsValue::Function(_) | JsValue::Namespace(_) => {
      JsValue::string(value.to_js_string())
    }
    primitive => primitive.clone(),
  }
}

/// Relational comparison. Strings compare by UTF-16 code units, everything else numerically;
/// any comparison involving `NaN` is false.
fn compare(left: &JsValue, right: &JsValue, test: fn(std::cmp::Ordering) -> bool) -> bool {
  let left = to_primitive(left);
  let right = to_primitive(right);
  if let (JsValue::String(a), JsValue::String(b)) = (&left, &right) {
    return test(a.encode_utf16().cmp(b.encode_utf16()));
  }
  left
    .to_number()
    .partial_cmp(&right.to_number())
    .is_some_and(test)
}

fn compound_operator(op: AssignOp) -> BinaryOp {
  match op {
    AssignOp::AddAssign => BinaryOp::Add,
    AssignOp::SubAssign => BinaryOp::Sub,
    AssignOp::MulAssign => BinaryOp::Mul,
    AssignOp::DivAssign => BinaryOp::Div,
    AssignOp::ModAssign => BinaryOp::Mod,
    AssignOp::ExpAssign => BinaryOp::Exp,
    AssignOp::LShiftAssign => BinaryOp::LShift,
    AssignOp::RShiftAssign => BinaryOp::RShift,
    AssignOp::ZeroFillRShiftAssign => BinaryOp::ZeroFillRShift,
    AssignOp::BitAndAssign => BinaryOp::BitAnd,
    AssignOp::BitOrAssign => BinaryOp::BitOr,
    AssignOp::BitXorAssign => BinaryOp::BitXor,
    AssignOp::Assign => BinaryOp::Add,
    AssignOp::AndAssign => BinaryOp::LogicalAnd,
    AssignOp::OrAssign => BinaryOp::LogicalOr,
    AssignOp::NullishAssign => BinaryOp::NullishCoalescing,
  }
}

/// Names declared with `var` anywhere in a function body, outside nested functions.
fn collect_var_names(stmt: &Stmt, names: &mut Vec<Atom>) {
  fn var_decl(var: &VarDecl, names: &mut Vec<Atom>) {
    if var.kind == VarDeclKind::Var && !var.declare {
      for declarator in &var.decls {
        pat_binding_names(&declarator.name, names);
      }
    }
  }
  match stmt {
    Stmt::Decl(Decl::Var(var)) => var_decl(var, names),
    Stmt::Block(block) => block.stmts.iter().for_each(|stmt| collect_var_names(stmt, names)),
    Stmt::If(if_stmt) => {
      collect_var_names(&if_stmt.cons, names);
      if let Some(alt) = &if_stmt.alt {
        collect_var_names(alt, names);
      }
    }
    Stmt::For(for_stmt) => {
      if let Some(VarDeclOrExpr::VarDecl(var)) = &for_stmt.init {
        var_decl(var, names);
      }
      collect_var_names(&for_stmt.body, names);
    }
    Stmt::ForIn(ForInStmt { left, body, .. }) | Stmt::ForOf(ForOfStmt { left, body, .. }) => {
      if let ForHead::VarDecl(var) = left {
        var_decl(var, names);
      }
      collect_var_names(body, names);
    }
    Stmt::While(WhileStmt { body, .. })
    | Stmt::DoWhile(DoWhileStmt { body, .. })
    | Stmt::Labeled(LabeledStmt { body, .. }) => collect_var_names(body, names),
    Stmt::Try(try_stmt) => {
      try_stmt.block.stmts.iter().for_each(|stmt| collect_var_names(stmt, names));
      if let Some(handler) = &try_stmt.handler {
        handler.body.stmts.iter().for_each(|stmt| collect_var_names(stmt, names));
      }
      if let Some(finalizer) = &try_stmt.finalizer {
        finalizer.stmts.iter().for_each(|stmt| collect_var_names(stmt, names));
      }
    }
    Stmt::Switch(switch) => {
      for case in &switch.cases {
        case.cons.iter().for_each(|stmt| collect_var_names(stmt, names));
      }
    }
    _ => {}
  }
}
