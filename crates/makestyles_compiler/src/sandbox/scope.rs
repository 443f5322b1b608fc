use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use swc_core::atoms::Atom;

use super::value::JsValue;
use crate::loader::ModuleId;

struct Binding {
  /// `None` until a `let`/`const`/`class` declaration has run.
  value: Option<JsValue>,
  mutable: bool,
}

struct ScopeData {
  bindings: RefCell<HashMap<Atom, Binding>>,
  parent: Option<Scope>,
  module_id: ModuleId,
}

/// A lexical environment. Cloning shares the environment.
#[derive(Clone)]
pub(crate) struct Scope(Rc<ScopeData>);

pub(crate) enum Lookup {
  Found(JsValue),
  Uninitialized,
  Missing,
}

pub(crate) enum Assignment {
  /// Assigned; `module_level` is set when the binding lives in a module's top-level scope.
  Assigned { module_level: bool },
  Constant,
  Uninitialized,
  Missing,
}

impl fmt::Debug for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scope")
      .field("module_id", &self.0.module_id)
      .field("is_module_root", &self.is_module_root())
      .finish()
  }
}

impl Scope {
  pub fn module_root(module_id: ModuleId) -> Self {
    Scope(Rc::new(ScopeData {
      bindings: RefCell::new(HashMap::new()),
      parent: None,
      module_id,
    }))
  }

  pub fn child(&self) -> Self {
    Scope(Rc::new(ScopeData {
      bindings: RefCell::new(HashMap::new()),
      parent: Some(self.clone()),
      module_id: self.0.module_id.clone(),
    }))
  }

  pub fn module_id(&self) -> &ModuleId {
    &self.0.module_id
  }

  pub fn is_module_root(&self) -> bool {
    self.0.parent.is_none()
  }

  /// Create or overwrite a binding in this scope. `None` leaves it uninitialized.
  pub fn declare(&self, name: Atom, value: Option<JsValue>, mutable: bool) {
    self
      .0
      .bindings
      .borrow_mut()
      .insert(name, Binding { value, mutable });
  }

  pub fn has_own(&self, name: &Atom) -> bool {
    self.0.bindings.borrow().contains_key(name)
  }

  pub fn get(&self, name: &Atom) -> Lookup {
    let mut scope = Some(self);
    while let Some(current) = scope {
      if let Some(binding) = current.0.bindings.borrow().get(name) {
        return match &binding.value {
          Some(value) => Lookup::Found(value.clone()),
          None => Lookup::Uninitialized,
        };
      }
      scope = current.0.parent.as_ref();
    }
    Lookup::Missing
  }

  pub fn set(&self, name: &Atom, value: JsValue) -> Assignment {
    let mut scope = Some(self);
    while let Some(current) = scope {
      if let Some(binding) = current.0.bindings.borrow_mut().get_mut(name) {
        if binding.value.is_none() {
          return Assignment::Uninitialized;
        }
        if !binding.mutable {
          return Assignment::Constant;
        }
        binding.value = Some(value);
        return Assignment::Assigned {
          module_level: current.is_module_root(),
        };
      }
      scope = current.0.parent.as_ref();
    }
    Assignment::Missing
  }

  /// Values of this scope's own bindings, used to copy per-iteration `for (let ...)` bindings.
  pub fn own_values(&self, names: &[Atom]) -> Vec<(Atom, Option<JsValue>, bool)> {
    let bindings = self.0.bindings.borrow();
    names
      .iter()
      .filter_map(|name| {
        bindings
          .get(name)
          .map(|binding| (name.clone(), binding.value.clone(), binding.mutable))
      })
      .collect()
  }
}
