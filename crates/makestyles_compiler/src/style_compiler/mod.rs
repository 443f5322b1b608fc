//! Compilation of resolved style objects into atomic CSS.
//!
//! Every `(at-rules, selector path, property, value)` tuple becomes one class whose name is a
//! pure function of that tuple, so identical declarations anywhere in a build share a class
//! and a single rule.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};

mod properties;
mod registry;
mod selectors;
mod style_object;

pub use properties::{expand_shorthand, hyphenate, with_vendor_prefixes, Declaration};
pub use registry::CssRegistry;
pub use selectors::RuleGroup;
pub use style_object::{SelectorSegment, StyleBlock, StyleLiteral, StyleObject};

use crate::sandbox::EvaluatedValue;

const AT_RULE_SEPARATOR: char = '\u{1e}';
const FIELD_SEPARATOR: char = '\u{1f}';
const FALLBACK_SEPARATOR: &str = "\u{1e}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedStyleObject {
  #[error("Expected the style argument to be an object, found {0}")]
  NotAnObject(&'static str),
  #[error("Expected styles of '{slot}' to be an object, found {found}")]
  SlotNotAnObject { slot: String, found: &'static str },
  #[error("Property '{property}' of '{slot}' has an invalid value ({found})")]
  InvalidValue {
    slot: String,
    property: String,
    found: String,
  },
  #[error("Nested key '{key}' of '{slot}' is neither a selector nor a supported at-rule")]
  InvalidNesting { slot: String, key: String },
}

/// One atomic class and the rule that defines it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicClassEntry {
  /// Fingerprint of the normalized declaration tuple.
  pub hash_key: String,
  pub class_name: String,
  pub css_rule_text: String,
  pub rule_group: RuleGroup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledStyles {
  /// Slot name to its class names, in declaration order.
  pub class_mapping: IndexMap<String, Vec<String>>,
  /// Rule group key (`d`, `h`, `m`, ...) to its deduplicated rules, groups in cascade order.
  pub rule_groups: IndexMap<String, Vec<String>>,
  /// Every distinct class, in first-seen order.
  pub entries: Vec<AtomicClassEntry>,
}

impl CompiledStyles {
  pub fn rules(&self) -> impl Iterator<Item = &str> {
    self.rule_groups.values().flatten().map(String::as_str)
  }
}

/// Compile an evaluated `makeStyles` argument.
pub fn compile_styles(
  value: &EvaluatedValue,
  class_name_prefix: &str,
) -> Result<CompiledStyles, MalformedStyleObject> {
  let style_object = StyleObject::from_value(value)?;

  let mut class_mapping = IndexMap::new();
  let mut entries: IndexMap<String, AtomicClassEntry> = IndexMap::new();

  for (slot, blocks) in &style_object.slots {
    // (selector path, property) -> class; later declarations replace earlier ones
    let mut slot_classes: IndexMap<(&[SelectorSegment], String), String> = IndexMap::new();

    for block in blocks {
      for (property, literal) in &block.declarations {
        for (longhand, atomic) in atomic_declarations(&hyphenate(property), literal) {
          let entry = atomic_entry(class_name_prefix, &block.selector_path, &longhand, &atomic);
          slot_classes.insert(
            (block.selector_path.as_slice(), longhand),
            entry.class_name.clone(),
          );
          entries.entry(entry.class_name.clone()).or_insert(entry);
        }
      }
    }

    class_mapping.insert(slot.clone(), slot_classes.into_values().collect());
  }

  // Overridden declarations leave entries that no slot references
  let used: IndexSet<&String> = class_mapping.values().flatten().collect();
  let entries: Vec<AtomicClassEntry> = entries
    .into_values()
    .filter(|entry| used.contains(&entry.class_name))
    .collect();

  let mut grouped: BTreeMap<RuleGroup, IndexSet<String>> = BTreeMap::new();
  for entry in &entries {
    grouped
      .entry(entry.rule_group)
      .or_default()
      .insert(entry.css_rule_text.clone());
  }
  let rule_groups = grouped
    .into_iter()
    .map(|(group, rules)| (group.key().to_string(), rules.into_iter().collect()))
    .collect();

  Ok(CompiledStyles {
    class_mapping,
    rule_groups,
    entries,
  })
}

/// Split a literal into the declarations that each get their own class, keyed by the longhand
/// property they set. Fallback arrays stay a single class.
fn atomic_declarations(property: &str, literal: &StyleLiteral) -> Vec<(String, AtomicDeclaration)> {
  match literal {
    StyleLiteral::Value(value) => expand_shorthand(property, value)
      .into_iter()
      .map(|declaration| {
        (
          declaration.property.clone(),
          AtomicDeclaration {
            hash_value: declaration.value.clone(),
            declarations: with_vendor_prefixes(declaration),
          },
        )
      })
      .collect(),
    StyleLiteral::Fallbacks(values) => {
      let hash_value = values.join(FALLBACK_SEPARATOR);
      let declarations = values
        .iter()
        .flat_map(|value| {
          with_vendor_prefixes(Declaration {
            property: property.to_string(),
            value: value.clone(),
          })
        })
        .collect();
      vec![(
        property.to_string(),
        AtomicDeclaration {
          hash_value,
          declarations,
        },
      )]
    }
  }
}

struct AtomicDeclaration {
  hash_value: String,
  declarations: Vec<Declaration>,
}

fn atomic_entry(
  class_name_prefix: &str,
  path: &[SelectorSegment],
  property: &str,
  atomic: &AtomicDeclaration,
) -> AtomicClassEntry {
  let mut key = String::new();
  for (index, at_rule) in selectors::at_rules(path).enumerate() {
    if index > 0 {
      key.push(AT_RULE_SEPARATOR);
    }
    key.push_str(at_rule);
  }
  key.push(FIELD_SEPARATOR);
  for segment in path {
    if let SelectorSegment::Selector(selector) = segment {
      key.push_str(selector);
      key.push(AT_RULE_SEPARATOR);
    }
  }
  key.push(FIELD_SEPARATOR);
  key.push_str(property);
  key.push(FIELD_SEPARATOR);
  key.push_str(&atomic.hash_value);

  let hash_key = makestyles_hash::hash(&key);
  let class_name = format!("{class_name_prefix}{hash_key}");

  let body: String = atomic
    .declarations
    .iter()
    .map(Declaration::to_css)
    .collect::<IndexSet<_>>()
    .into_iter()
    .collect();
  let mut css_rule_text = format!("{}{{{body}}}", selectors::resolve_selector(&class_name, path));
  let at_rules: Vec<&str> = selectors::at_rules(path).collect();
  for at_rule in at_rules.into_iter().rev() {
    css_rule_text = format!("{at_rule}{{{css_rule_text}}}");
  }

  AtomicClassEntry {
    hash_key,
    class_name,
    css_rule_text,
    rule_group: selectors::rule_group(path),
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn object(entries: Vec<(&str, EvaluatedValue)>) -> EvaluatedValue {
    EvaluatedValue::Object(
      entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect(),
    )
  }

  fn string(value: &str) -> EvaluatedValue {
    EvaluatedValue::String(value.to_string())
  }

  fn class_for(key: &str) -> String {
    makestyles_hash::class_name_for("f", key)
  }

  #[test]
  fn test_padding_left_and_flex_display() {
    let value = object(vec![(
      "root",
      object(vec![
        ("paddingLeft", string("1px")),
        ("display", string("flex")),
      ]),
    )]);

    let compiled = compile_styles(&value, "f").unwrap();

    let padding = class_for("\u{1f}\u{1f}padding-left\u{1f}1px");
    let display = class_for("\u{1f}\u{1f}display\u{1f}flex");
    assert_eq!(
      compiled.class_mapping,
      IndexMap::from([(String::from("root"), vec![padding.clone(), display.clone()])])
    );
    assert_eq!(
      compiled.rule_groups,
      IndexMap::from([(
        String::from("d"),
        vec![
          format!(".{padding}{{padding-left:1px;}}"),
          format!(".{display}{{display:-webkit-box;display:-webkit-flex;display:flex;}}"),
        ]
      )])
    );
    assert_eq!(compiled.entries.len(), 2);
    assert_eq!(compiled.entries[0].hash_key, &padding[1..]);
  }

  #[test]
  fn test_identical_declarations_share_a_class() {
    let value = object(vec![
      ("root", object(vec![("color", string("red"))])),
      (
        "icon",
        object(vec![("color", string("red")), ("width", EvaluatedValue::Number(16.0))]),
      ),
    ]);

    let compiled = compile_styles(&value, "f").unwrap();
    let root = &compiled.class_mapping["root"];
    let icon = &compiled.class_mapping["icon"];

    assert_eq!(root[0], icon[0]);
    assert_eq!(icon.len(), 2);
    assert_eq!(compiled.rules().count(), 2);
    assert_eq!(compiled.entries.len(), 2);
    assert_eq!(compiled.rule_groups["d"][1], format!(".{}{{width:16;}}", icon[1]));
  }

  #[test]
  fn test_compilation_is_deterministic() {
    let value = object(vec![(
      "root",
      object(vec![
        ("margin", string("0 auto")),
        (":hover", object(vec![("color", string("blue"))])),
        (
          "@media (min-width: 600px)",
          object(vec![("gap", string("4px 8px"))]),
        ),
      ]),
    )]);

    let first = compile_styles(&value, "f").unwrap();
    let second = compile_styles(&value.clone(), "f").unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_selectors_and_at_rules() {
    let value = object(vec![(
      "root",
      object(vec![
        ("color", string("red")),
        (
          "@media (min-width: 600px)",
          object(vec![(":hover", object(vec![("color", string("blue"))]))]),
        ),
        (":focus-visible", object(vec![("outlineWidth", string("2px"))])),
        (":hover", object(vec![("color", string("green"))])),
      ]),
    )]);

    let compiled = compile_styles(&value, "f").unwrap();
    let classes = &compiled.class_mapping["root"];
    assert_eq!(classes.len(), 4);

    assert_eq!(
      compiled.rule_groups.keys().collect::<Vec<_>>(),
      vec!["d", "i", "h", "m"]
    );
    assert_eq!(
      compiled.rule_groups["m"],
      vec![format!(
        "@media (min-width: 600px){{.{}:hover{{color:blue;}}}}",
        classes[1]
      )]
    );
    assert_eq!(
      compiled.rule_groups["h"],
      vec![format!(".{}:hover{{color:green;}}", classes[3])]
    );
  }

  #[test]
  fn test_shorthands_expand_to_one_class_per_longhand() {
    let value = object(vec![(
      "root",
      object(vec![("padding", string("1px 2px")), ("paddingLeft", string("3px"))]),
    )]);

    let compiled = compile_styles(&value, "f").unwrap();
    let classes = &compiled.class_mapping["root"];

    // padding-left from the shorthand is replaced by the later longhand
    assert_eq!(classes.len(), 4);
    assert_eq!(
      classes[3],
      class_for("\u{1f}\u{1f}padding-left\u{1f}3px")
    );
    assert_eq!(compiled.entries.len(), 4);
    assert!(compiled
      .rules()
      .all(|rule| !rule.contains("padding-left:2px")));
  }

  #[test]
  fn test_fallback_values_share_one_class() {
    let value = object(vec![(
      "root",
      object(vec![(
        "position",
        EvaluatedValue::Array(vec![string("-webkit-sticky"), string("sticky")]),
      )]),
    )]);

    let compiled = compile_styles(&value, "f").unwrap();
    let classes = &compiled.class_mapping["root"];
    assert_eq!(classes.len(), 1);
    assert_eq!(
      compiled.rule_groups["d"],
      vec![format!(
        ".{}{{position:-webkit-sticky;position:sticky;}}",
        classes[0]
      )]
    );
  }

  #[test]
  fn test_prefix_changes_class_names_only() {
    let value = object(vec![("root", object(vec![("color", string("red"))]))]);

    let f = compile_styles(&value, "f").unwrap();
    let x = compile_styles(&value, "x").unwrap();
    assert_eq!(f.entries[0].hash_key, x.entries[0].hash_key);
    assert_eq!(x.class_mapping["root"][0], format!("x{}", x.entries[0].hash_key));
  }

  #[test]
  fn test_empty_slots_are_kept() {
    let value = object(vec![("root", object(vec![("color", EvaluatedValue::Undefined)]))]);

    let compiled = compile_styles(&value, "f").unwrap();
    assert_eq!(
      compiled.class_mapping,
      IndexMap::from([(String::from("root"), Vec::<String>::new())])
    );
    assert!(compiled.rule_groups.is_empty());
  }
}
