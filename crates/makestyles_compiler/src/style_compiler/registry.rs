use std::collections::BTreeMap;

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::{CompiledStyles, RuleGroup};

/// Build-wide set of extracted rules.
///
/// Compilation units running in parallel add their rules here; a rule shared by several units
/// is stored once, and the stylesheet lists groups in cascade order.
#[derive(Debug, Default)]
pub struct CssRegistry {
  groups: Mutex<BTreeMap<RuleGroup, IndexSet<String>>>,
}

impl CssRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the rules of `compiled`, returning those not seen before.
  pub fn add(&self, compiled: &CompiledStyles) -> Vec<String> {
    let mut groups = self.groups.lock();
    let mut added = Vec::new();
    for (key, rules) in &compiled.rule_groups {
      let Some(group) = RuleGroup::from_key(key) else {
        continue;
      };
      let known = groups.entry(group).or_default();
      for rule in rules {
        if known.insert(rule.clone()) {
          added.push(rule.clone());
        }
      }
    }
    added
  }

  pub fn len(&self) -> usize {
    self.groups.lock().values().map(IndexSet::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// All rules, one per line.
  pub fn stylesheet(&self) -> String {
    let groups = self.groups.lock();
    let mut css = String::new();
    for rule in groups.values().flatten() {
      css.push_str(rule);
      css.push('\n');
    }
    css
  }
}

#[cfg(test)]
mod tests {
  use indexmap::IndexMap;
  use pretty_assertions::assert_eq;

  use super::*;

  fn compiled(groups: &[(&str, &[&str])]) -> CompiledStyles {
    CompiledStyles {
      rule_groups: groups
        .iter()
        .map(|(key, rules)| {
          (
            key.to_string(),
            rules.iter().map(|rule| rule.to_string()).collect(),
          )
        })
        .collect::<IndexMap<_, _>>(),
      ..Default::default()
    }
  }

  #[test]
  fn test_rules_are_stored_once() {
    let registry = CssRegistry::new();

    let added = registry.add(&compiled(&[("d", &[".a{color:red;}", ".b{width:1px;}"])]));
    assert_eq!(added.len(), 2);

    let added = registry.add(&compiled(&[
      ("h", &[".c:hover{color:blue;}"]),
      ("d", &[".a{color:red;}"]),
    ]));
    assert_eq!(added, vec![String::from(".c:hover{color:blue;}")]);
    assert_eq!(registry.len(), 3);
  }

  #[test]
  fn test_stylesheet_orders_groups() {
    let registry = CssRegistry::new();
    registry.add(&compiled(&[("m", &["@media print{.m{color:red;}}"])]));
    registry.add(&compiled(&[("h", &[".h:hover{color:red;}"])]));
    registry.add(&compiled(&[("d", &[".d{color:red;}"])]));

    assert_eq!(
      registry.stylesheet(),
      ".d{color:red;}\n.h:hover{color:red;}\n@media print{.m{color:red;}}\n"
    );
  }

  #[test]
  fn test_concurrent_adds() {
    let registry = CssRegistry::new();
    std::thread::scope(|scope| {
      for _ in 0..4 {
        scope.spawn(|| {
          registry.add(&compiled(&[("d", &[".a{color:red;}", ".b{color:blue;}"])]));
        });
      }
    });
    assert_eq!(registry.len(), 2);
    assert!(!registry.is_empty());
  }
}
