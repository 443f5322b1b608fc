use indexmap::IndexMap;

use super::selectors::{classify_nested_key, NestedKey};
use super::MalformedStyleObject;
use crate::sandbox::{number_to_string, EvaluatedValue};

/// One step of the context a declaration applies in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectorSegment {
  /// A selector containing `&`, which stands for the selector built so far.
  Selector(String),
  /// A normalized at-rule prelude such as `@media (min-width: 100px)`.
  AtRule(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleLiteral {
  Value(String),
  /// Values tried in order by the browser, e.g. `['-webkit-sticky', 'sticky']`.
  Fallbacks(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleBlock {
  pub selector_path: Vec<SelectorSegment>,
  /// Property names as written in the source, with their literal values.
  pub declarations: IndexMap<String, StyleLiteral>,
}

/// A validated style object: for each slot (top-level key), the blocks of declarations in
/// source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleObject {
  pub slots: IndexMap<String, Vec<StyleBlock>>,
}

impl StyleObject {
  pub fn from_value(value: &EvaluatedValue) -> Result<Self, MalformedStyleObject> {
    let Some(slots) = value.as_object() else {
      return Err(MalformedStyleObject::NotAnObject(value.kind_name()));
    };

    let mut style_object = StyleObject::default();
    for (slot, rules) in slots {
      let Some(rules) = rules.as_object() else {
        return Err(MalformedStyleObject::SlotNotAnObject {
          slot: slot.clone(),
          found: rules.kind_name(),
        });
      };
      let mut blocks = Vec::new();
      flatten(slot, rules, &mut Vec::new(), &mut blocks)?;
      style_object.slots.insert(slot.clone(), blocks);
    }
    Ok(style_object)
  }
}

fn flatten(
  slot: &str,
  rules: &IndexMap<String, EvaluatedValue>,
  path: &mut Vec<SelectorSegment>,
  blocks: &mut Vec<StyleBlock>,
) -> Result<(), MalformedStyleObject> {
  for (key, value) in rules {
    let literal = match value {
      EvaluatedValue::Undefined | EvaluatedValue::Null => continue,
      EvaluatedValue::Object(nested) => {
        let segments = match classify_nested_key(key) {
          NestedKey::AtRule(prelude) => vec![SelectorSegment::AtRule(prelude)],
          NestedKey::Selectors(selectors) => selectors
            .into_iter()
            .map(SelectorSegment::Selector)
            .collect(),
          NestedKey::Invalid => {
            return Err(MalformedStyleObject::InvalidNesting {
              slot: slot.to_string(),
              key: key.clone(),
            })
          }
        };
        for segment in segments {
          path.push(segment);
          flatten(slot, nested, path, blocks)?;
          path.pop();
        }
        continue;
      }
      EvaluatedValue::String(value) => StyleLiteral::Value(literal_text(slot, key, value)?),
      EvaluatedValue::Number(number) => StyleLiteral::Value(number_to_string(*number)),
      EvaluatedValue::Array(values) => {
        let mut fallbacks = Vec::with_capacity(values.len());
        for value in values {
          match value {
            EvaluatedValue::String(value) => fallbacks.push(literal_text(slot, key, value)?),
            EvaluatedValue::Number(number) => fallbacks.push(number_to_string(*number)),
            EvaluatedValue::Undefined | EvaluatedValue::Null => {}
            other => return Err(invalid_value(slot, key, other.kind_name())),
          }
        }
        match fallbacks.len() {
          0 => continue,
          1 => StyleLiteral::Value(fallbacks.remove(0)),
          _ => StyleLiteral::Fallbacks(fallbacks),
        }
      }
      other => return Err(invalid_value(slot, key, other.kind_name())),
    };

    if !matches!(classify_nested_key(key), NestedKey::Invalid) {
      return Err(invalid_value(slot, key, "non-object"));
    }

    match blocks.last_mut() {
      Some(block) if block.selector_path == *path => {
        block.declarations.insert(key.clone(), literal);
      }
      _ => {
        let mut declarations = IndexMap::new();
        declarations.insert(key.clone(), literal);
        blocks.push(StyleBlock {
          selector_path: path.clone(),
          declarations,
        });
      }
    }
  }
  Ok(())
}

/// Trimmed value text. Characters that would end the declaration or the rule early are
/// rejected.
fn literal_text(slot: &str, property: &str, value: &str) -> Result<String, MalformedStyleObject> {
  if value.contains([';', '{', '}']) {
    return Err(invalid_value(slot, property, "unsafe string"));
  }
  Ok(value.trim().to_string())
}

fn invalid_value(slot: &str, property: &str, found: &str) -> MalformedStyleObject {
  MalformedStyleObject::InvalidValue {
    slot: slot.to_string(),
    property: property.to_string(),
    found: found.to_string(),
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

  #[test]
  fn test_flattens_nested_selectors_and_at_rules() {
    let value = object(vec![(
      "root",
      object(vec![
        ("color", string("red")),
        ("zIndex", EvaluatedValue::Number(2.0)),
        ("opacity", EvaluatedValue::Null),
        (
          ":hover, :focus",
          object(vec![("color", string("blue"))]),
        ),
        (
          "@media (min-width:  100px)",
          object(vec![("display", string(" none "))]),
        ),
      ]),
    )]);

    let style_object = StyleObject::from_value(&value).unwrap();
    let blocks = &style_object.slots["root"];

    assert_eq!(
      blocks
        .iter()
        .map(|block| (block.selector_path.clone(), block.declarations.clone()))
        .collect::<Vec<_>>(),
      vec![
        (
          vec![],
          IndexMap::from([
            (String::from("color"), StyleLiteral::Value(String::from("red"))),
            (String::from("zIndex"), StyleLiteral::Value(String::from("2"))),
          ])
        ),
        (
          vec![SelectorSegment::Selector(String::from("&:hover"))],
          IndexMap::from([(String::from("color"), StyleLiteral::Value(String::from("blue")))])
        ),
        (
          vec![SelectorSegment::Selector(String::from("&:focus"))],
          IndexMap::from([(String::from("color"), StyleLiteral::Value(String::from("blue")))])
        ),
        (
          vec![SelectorSegment::AtRule(String::from("@media (min-width: 100px)"))],
          IndexMap::from([(String::from("display"), StyleLiteral::Value(String::from("none")))])
        ),
      ]
    );
  }

  #[test]
  fn test_fallback_arrays() {
    let value = object(vec![(
      "root",
      object(vec![
        (
          "position",
          EvaluatedValue::Array(vec![string("-webkit-sticky"), string("sticky")]),
        ),
        ("width", EvaluatedValue::Array(vec![string("10px")])),
        ("height", EvaluatedValue::Array(vec![])),
      ]),
    )]);

    let style_object = StyleObject::from_value(&value).unwrap();
    assert_eq!(
      style_object.slots["root"][0].declarations,
      IndexMap::from([
        (
          String::from("position"),
          StyleLiteral::Fallbacks(vec![String::from("-webkit-sticky"), String::from("sticky")])
        ),
        (String::from("width"), StyleLiteral::Value(String::from("10px"))),
      ])
    );
  }

  #[test]
  fn test_malformed_values() {
    let cases = [
      (string("root"), MalformedStyleObject::NotAnObject("string")),
      (
        object(vec![("root", EvaluatedValue::Number(1.0))]),
        MalformedStyleObject::SlotNotAnObject {
          slot: String::from("root"),
          found: "number",
        },
      ),
      (
        object(vec![("root", object(vec![("color", EvaluatedValue::Function)]))]),
        MalformedStyleObject::InvalidValue {
          slot: String::from("root"),
          property: String::from("color"),
          found: String::from("function"),
        },
      ),
      (
        object(vec![("root", object(vec![("color", EvaluatedValue::Bool(true))]))]),
        MalformedStyleObject::InvalidValue {
          slot: String::from("root"),
          property: String::from("color"),
          found: String::from("boolean"),
        },
      ),
      (
        object(vec![(
          "root",
          object(vec![("padding", object(vec![("left", string("1px"))]))]),
        )]),
        MalformedStyleObject::InvalidNesting {
          slot: String::from("root"),
          key: String::from("padding"),
        },
      ),
      (
        object(vec![("root", object(vec![("color", string("red;}body{color:blue"))]))]),
        MalformedStyleObject::InvalidValue {
          slot: String::from("root"),
          property: String::from("color"),
          found: String::from("unsafe string"),
        },
      ),
    ];

    for (value, expected) in cases {
      assert_eq!(StyleObject::from_value(&value), Err(expected));
    }
  }
}
