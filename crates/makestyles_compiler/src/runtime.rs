//! Model of the runtime side of the contract.
//!
//! [`styles`] mirrors the lightweight primitive that rewritten call sites invoke and
//! [`make_styles`] mirrors the unoptimized path that compiles styles during first render. Both
//! must hand out the same classes for the same style object; tests use them to check that a
//! rewrite never changes what a component renders.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};

use crate::sandbox::EvaluatedValue;
use crate::style_compiler::{compile_styles, MalformedStyleObject, RuleGroup};

/// The document stylesheet. Inserting a rule twice is a no-op.
#[derive(Debug, Default)]
pub struct StyleSheet {
  groups: BTreeMap<RuleGroup, IndexSet<String>>,
}

impl StyleSheet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns `true` when the rule was not present yet.
  pub fn insert(&mut self, group: RuleGroup, rule: &str) -> bool {
    let rules = self.groups.entry(group).or_default();
    if rules.contains(rule) {
      return false;
    }
    rules.insert(rule.to_string())
  }

  pub fn len(&self) -> usize {
    self.groups.values().map(IndexSet::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn rules(&self) -> impl Iterator<Item = &str> {
    self.groups.values().flatten().map(String::as_str)
  }
}

/// The lightweight primitive: insert every rule once and join each slot's classes.
pub fn styles(
  sheet: &mut StyleSheet,
  class_mapping: &IndexMap<String, Vec<String>>,
  rule_groups: &IndexMap<String, Vec<String>>,
) -> IndexMap<String, String> {
  for (key, rules) in rule_groups {
    let group = RuleGroup::from_key(key).unwrap_or(RuleGroup::Default);
    for rule in rules {
      sheet.insert(group, rule);
    }
  }

  class_mapping
    .iter()
    .map(|(slot, classes)| (slot.clone(), classes.join(" ")))
    .collect()
}

/// The unoptimized path: compile `style_object` on the spot, then behave like [`styles`].
pub fn make_styles(
  sheet: &mut StyleSheet,
  style_object: &EvaluatedValue,
  class_name_prefix: &str,
) -> Result<IndexMap<String, String>, MalformedStyleObject> {
  let compiled = compile_styles(style_object, class_name_prefix)?;
  Ok(styles(sheet, &compiled.class_mapping, &compiled.rule_groups))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_styles_inserts_rules_once() {
    let class_mapping = IndexMap::from([
      (String::from("root"), vec![String::from("fa"), String::from("fb")]),
      (String::from("icon"), vec![String::from("fa")]),
    ]);
    let rule_groups = IndexMap::from([
      (
        String::from("d"),
        vec![String::from(".fa{color:red;}"), String::from(".fb{width:1px;}")],
      ),
      (String::from("h"), vec![String::from(".fa:hover{color:blue;}")]),
    ]);

    let mut sheet = StyleSheet::new();
    let first = styles(&mut sheet, &class_mapping, &rule_groups);
    let second = styles(&mut sheet, &class_mapping, &rule_groups);

    assert_eq!(first, second);
    assert_eq!(
      first,
      IndexMap::from([
        (String::from("root"), String::from("fa fb")),
        (String::from("icon"), String::from("fa")),
      ])
    );
    assert_eq!(sheet.len(), 3);
  }

  #[test]
  fn test_rules_are_ordered_by_group() {
    let mut sheet = StyleSheet::new();
    assert!(sheet.insert(RuleGroup::Hover, ".b:hover{color:red;}"));
    assert!(sheet.insert(RuleGroup::Default, ".a{color:red;}"));
    assert!(!sheet.insert(RuleGroup::Default, ".a{color:red;}"));

    assert_eq!(
      sheet.rules().collect::<Vec<_>>(),
      vec![".a{color:red;}", ".b:hover{color:red;}"]
    );
  }

  #[test]
  fn test_make_styles_matches_styles() {
    let style_object = EvaluatedValue::Object(IndexMap::from([(
      String::from("root"),
      EvaluatedValue::Object(IndexMap::from([
        (String::from("color"), EvaluatedValue::String(String::from("red"))),
        (String::from("padding"), EvaluatedValue::String(String::from("4px"))),
      ])),
    )]));

    let compiled = compile_styles(&style_object, "f").unwrap();
    let mut optimized_sheet = StyleSheet::new();
    let optimized = styles(
      &mut optimized_sheet,
      &compiled.class_mapping,
      &compiled.rule_groups,
    );

    let mut fallback_sheet = StyleSheet::new();
    let fallback = make_styles(&mut fallback_sheet, &style_object, "f").unwrap();

    assert_eq!(optimized, fallback);
    assert_eq!(
      optimized_sheet.rules().collect::<Vec<_>>(),
      fallback_sheet.rules().collect::<Vec<_>>()
    );
    assert_eq!(optimized["root"].split(' ').count(), 5);
  }
}
