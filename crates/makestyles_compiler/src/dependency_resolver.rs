use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use swc_core::atoms::Atom;
use swc_core::common::Span;

use crate::call_site::StyleCallSite;
use crate::loader::ModuleId;
use crate::module_graph::{
  ExportTarget, FreeIdentifiers, ImportBinding, LoadError, ModuleGraph, ModuleGraphNode,
};

/// A unit of evaluation: one module-level binding, the whole top-level code of a module, or
/// the namespace object of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKey {
  Local { module_id: ModuleId, name: Atom },
  ModuleBody(ModuleId),
  Namespace(ModuleId),
}

impl BindingKey {
  pub fn module_id(&self) -> &ModuleId {
    match self {
      BindingKey::Local { module_id, .. }
      | BindingKey::ModuleBody(module_id)
      | BindingKey::Namespace(module_id) => module_id,
    }
  }
}

impl fmt::Display for BindingKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BindingKey::Local { module_id, name } => write!(f, "{module_id}#{name}"),
      BindingKey::ModuleBody(module_id) => write!(f, "{module_id}"),
      BindingKey::Namespace(module_id) => write!(f, "* as {module_id}"),
    }
  }
}

/// Everything a call site's argument needs before it can be evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationClosure {
  /// Bindings read as soon as the argument is evaluated, dependencies first.
  pub order: Vec<BindingKey>,
  /// Bindings only reachable through function bodies, forced on demand.
  pub lazy: Vec<BindingKey>,
  /// Every module the closure touches.
  pub modules: Vec<ModuleId>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnresolvableDependency {
  #[error("Cannot resolve '{specifier}' imported by {from}: {message}")]
  UnresolvedImport {
    from: ModuleId,
    specifier: Atom,
    message: String,
  },
  #[error(transparent)]
  Load(#[from] LoadError),
  #[error("{module_id} does not export '{name}'")]
  MissingExport { module_id: ModuleId, name: Atom },
  #[error(
    "Circular dependency: {}",
    .chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
  )]
  Circular { chain: Vec<BindingKey> },
  #[error("'{name}' is bound inside an enclosing function and is only known at runtime")]
  LocalBinding { name: Atom },
  #[error("'{name}' is modified by top-level code of the unit that is not evaluated at build time")]
  ModifiedAtTopLevel { name: Atom },
}

#[derive(Debug, Clone, Default)]
struct Edges {
  eager: Vec<BindingKey>,
  lazy: Vec<BindingKey>,
}

/// A top-level item of the unit that may modify module-level bindings when it runs.
struct UnitItemWrites {
  declares: Vec<Atom>,
  writes: IndexSet<Atom>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Done,
}

/// Computes evaluation closures for the call sites of one compilation unit.
///
/// Edges are memoized, so call sites sharing dependencies only analyze them once.
pub struct DependencyResolver<'a> {
  graph: &'a ModuleGraph<'a>,
  edges: HashMap<BindingKey, Result<Edges, UnresolvableDependency>>,
  style_calls: HashSet<Span>,
  unit_writes: Option<Rc<Vec<UnitItemWrites>>>,
}

impl<'a> DependencyResolver<'a> {
  pub fn new(graph: &'a ModuleGraph<'a>) -> Self {
    Self {
      graph,
      edges: HashMap::new(),
      style_calls: HashSet::new(),
      unit_writes: None,
    }
  }

  /// Spans of the unit's style calls. Their arguments are evaluated by the compiler rather
  /// than as top-level code, so they are not counted as modifying anything.
  pub fn with_style_calls(mut self, spans: impl IntoIterator<Item = Span>) -> Self {
    self.style_calls = spans.into_iter().collect();
    self.unit_writes = None;
    self
  }

  #[tracing::instrument(level = "trace", skip_all, fields(range = ?call_site.source_range))]
  pub fn resolve(
    &mut self,
    call_site: &StyleCallSite,
  ) -> Result<EvaluationClosure, UnresolvableDependency> {
    if let Some(name) = call_site.enclosing_locals.first() {
      return Err(UnresolvableDependency::LocalBinding { name: name.clone() });
    }

    let entry = self.graph.entry().clone();
    let (eager_roots, lazy_roots) = self.bind_references(&entry, &call_site.references)?;

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::new();
    for root in &eager_roots {
      self.visit(root, &mut marks, &mut stack, &mut order)?;
    }

    let ordered: HashSet<&BindingKey> = order.iter().collect();
    let lazy: Vec<BindingKey> = self
      .reachable(eager_roots.iter().chain(&lazy_roots))
      .into_iter()
      .filter(|key| !ordered.contains(key))
      .collect();

    let modules: IndexSet<ModuleId> = order
      .iter()
      .chain(&lazy)
      .map(|key| key.module_id().clone())
      .collect();

    let closure = EvaluationClosure {
      order,
      lazy,
      modules: modules.into_iter().collect(),
    };
    self.check_unit_writes(&entry, &closure)?;
    Ok(closure)
  }

  /// Only the unit's bindings in the closure are evaluated, so the closure must not read
  /// anything that the unit's remaining top-level code modifies.
  fn check_unit_writes(
    &mut self,
    entry: &ModuleGraphNode,
    closure: &EvaluationClosure,
  ) -> Result<(), UnresolvableDependency> {
    let needed: HashSet<&BindingKey> = closure.order.iter().chain(&closure.lazy).collect();
    let evaluated = |name: &Atom| {
      needed.contains(&BindingKey::Local {
        module_id: entry.module_id.clone(),
        name: name.clone(),
      })
    };

    for item in self.unit_writes(entry).iter() {
      if item.declares.iter().any(evaluated) {
        continue;
      }
      for name in &item.writes {
        if let Ok(Some(key)) = self.bind_reference(entry, name) {
          if needed.contains(&key) {
            return Err(UnresolvableDependency::ModifiedAtTopLevel { name: name.clone() });
          }
        }
      }
    }
    Ok(())
  }

  fn unit_writes(&mut self, entry: &ModuleGraphNode) -> Rc<Vec<UnitItemWrites>> {
    if let Some(unit_writes) = &self.unit_writes {
      return unit_writes.clone();
    }

    let mut declares: HashMap<usize, Vec<Atom>> = HashMap::new();
    for (name, declaration) in &entry.declarations {
      declares.entry(declaration.item()).or_default().push(name.clone());
    }
    let unit_writes: Vec<UnitItemWrites> = (0..entry.module.body.len())
      .filter_map(|item| {
        let writes = entry.top_level_writes(item, &self.style_calls);
        (!writes.is_empty()).then(|| UnitItemWrites {
          declares: declares.remove(&item).unwrap_or_default(),
          writes,
        })
      })
      .collect();

    let unit_writes = Rc::new(unit_writes);
    self.unit_writes = Some(unit_writes.clone());
    unit_writes
  }

  /// Post-order walk over eager edges. Reaching a binding that is still being visited means
  /// its value depends on itself.
  fn visit(
    &mut self,
    key: &BindingKey,
    marks: &mut HashMap<BindingKey, Mark>,
    stack: &mut Vec<BindingKey>,
    order: &mut Vec<BindingKey>,
  ) -> Result<(), UnresolvableDependency> {
    match marks.get(key) {
      Some(Mark::Done) => return Ok(()),
      Some(Mark::Visiting) => {
        let start = stack.iter().position(|entry| entry == key).unwrap_or(0);
        let mut chain = stack[start..].to_vec();
        chain.push(key.clone());
        return Err(UnresolvableDependency::Circular { chain });
      }
      None => {}
    }

    marks.insert(key.clone(), Mark::Visiting);
    stack.push(key.clone());

    let edges = self.edges(key)?;
    for dependency in &edges.eager {
      self.visit(dependency, marks, stack, order)?;
    }

    stack.pop();
    marks.insert(key.clone(), Mark::Done);
    order.push(key.clone());
    Ok(())
  }

  fn reachable<'k>(&mut self, roots: impl Iterator<Item = &'k BindingKey>) -> IndexSet<BindingKey> {
    let mut seen = IndexSet::new();
    let mut queue: VecDeque<BindingKey> = roots.cloned().collect();
    while let Some(key) = queue.pop_front() {
      if !seen.insert(key.clone()) {
        continue;
      }
      if let Ok(edges) = self.edges(&key) {
        queue.extend(edges.eager.into_iter().chain(edges.lazy));
      }
    }
    seen
  }

  fn edges(&mut self, key: &BindingKey) -> Result<Edges, UnresolvableDependency> {
    if let Some(edges) = self.edges.get(key) {
      return edges.clone();
    }
    let edges = self.compute_edges(key);
    self.edges.insert(key.clone(), edges.clone());
    edges
  }

  fn compute_edges(&mut self, key: &BindingKey) -> Result<Edges, UnresolvableDependency> {
    let node = self.graph.node(key.module_id())?;
    match key {
      BindingKey::Local { module_id, name } => {
        if self.graph.executes_whole_module(&node) {
          return Ok(Edges {
            eager: vec![BindingKey::ModuleBody(module_id.clone())],
            lazy: Vec::new(),
          });
        }
        let references = node.declaration_references(name);
        let (eager, lazy) = self.bind_references(&node, &references)?;
        Ok(Edges { eager, lazy })
      }
      BindingKey::ModuleBody(_) => {
        let references = node.body_references();
        let (eager, lazy) = self.bind_references(&node, &references)?;
        Ok(Edges { eager, lazy })
      }
      BindingKey::Namespace(_) => {
        // Members are read one at a time, so a broken member only fails code that reads it.
        let mut eager = Vec::new();
        for name in node.exported_bindings.keys() {
          match self.resolve_export(&node, name, &mut HashSet::new()) {
            Ok(key) => eager.push(key),
            Err(error) => {
              tracing::trace!(
                module_id = %node.module_id,
                name = %name,
                %error,
                "Skipping unresolvable namespace member"
              );
            }
          }
        }
        for star in &node.star_exports {
          match &star.source {
            Ok(source) if self.graph.node(source).is_ok() => {
              eager.push(BindingKey::Namespace(source.clone()));
            }
            _ => {
              tracing::trace!(
                module_id = %node.module_id,
                specifier = %star.specifier,
                "Skipping unresolvable star export"
              );
            }
          }
        }
        Ok(Edges {
          eager,
          lazy: Vec::new(),
        })
      }
    }
  }

  /// Map free identifiers of code in `node` to binding keys. Globals have no key. Lazy
  /// references that cannot be resolved are dropped; they only fail if the function reading
  /// them is actually called.
  fn bind_references(
    &mut self,
    node: &ModuleGraphNode,
    references: &FreeIdentifiers,
  ) -> Result<(Vec<BindingKey>, Vec<BindingKey>), UnresolvableDependency> {
    let mut eager = Vec::new();
    let mut lazy = Vec::new();
    for (name, _, is_lazy) in references.iter() {
      match self.bind_reference(node, name) {
        Ok(Some(key)) if is_lazy => lazy.push(key),
        Ok(Some(key)) => eager.push(key),
        Ok(None) => {}
        Err(error) if is_lazy => {
          tracing::trace!(name = %name, %error, "Ignoring unresolvable lazy reference");
        }
        Err(error) => return Err(error),
      }
    }
    Ok((eager, lazy))
  }

  fn bind_reference(
    &mut self,
    node: &ModuleGraphNode,
    name: &Atom,
  ) -> Result<Option<BindingKey>, UnresolvableDependency> {
    if node.declarations.contains_key(name) {
      return Ok(Some(BindingKey::Local {
        module_id: node.module_id.clone(),
        name: name.clone(),
      }));
    }
    match node.imported_bindings.get(name) {
      Some(import) => self.resolve_import(&node.module_id, import).map(Some),
      None => Ok(None),
    }
  }

  fn resolve_import(
    &mut self,
    from: &ModuleId,
    import: &ImportBinding,
  ) -> Result<BindingKey, UnresolvableDependency> {
    let target = import
      .source
      .clone()
      .map_err(|message| UnresolvableDependency::UnresolvedImport {
        from: from.clone(),
        specifier: import.specifier.clone(),
        message,
      })?;

    match import.imported.export_name() {
      None => Ok(BindingKey::Namespace(target)),
      Some(name) => {
        let node = self.graph.node(&target)?;
        self.resolve_export(&node, &name, &mut HashSet::new())
      }
    }
  }

  fn resolve_export(
    &mut self,
    node: &ModuleGraphNode,
    name: &Atom,
    visited: &mut HashSet<ModuleId>,
  ) -> Result<BindingKey, UnresolvableDependency> {
    let missing = || UnresolvableDependency::MissingExport {
      module_id: node.module_id.clone(),
      name: name.clone(),
    };
    if !visited.insert(node.module_id.clone()) {
      return Err(missing());
    }

    match node.exported_bindings.get(name) {
      Some(ExportTarget::Local(local)) => self.bind_reference(node, local)?.ok_or_else(missing),
      Some(ExportTarget::ReExport(import)) => self.resolve_import(&node.module_id, import),
      None if &**name == "default" => Err(missing()),
      None => {
        // Another star source may still provide the name, so failures only count when none does.
        let mut first_error = None;
        for star in &node.star_exports {
          let found = match &star.source {
            Ok(source) => self
              .graph
              .node(source)
              .map_err(UnresolvableDependency::from)
              .and_then(|target| self.resolve_export(&target, name, visited)),
            Err(message) => Err(UnresolvableDependency::UnresolvedImport {
              from: node.module_id.clone(),
              specifier: star.specifier.clone(),
              message: message.clone(),
            }),
          };
          match found {
            Ok(key) => return Ok(key),
            Err(UnresolvableDependency::MissingExport { .. }) => {}
            Err(error) => {
              first_error.get_or_insert(error);
            }
          }
        }
        Err(first_error.unwrap_or_else(missing))
      }
    }
  }
}
