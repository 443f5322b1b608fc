/// A single CSS declaration after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
  pub property: String,
  pub value: String,
}

impl Declaration {
  fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      property: property.into(),
      value: value.into(),
    }
  }

  pub fn to_css(&self) -> String {
    format!("{}:{};", self.property, self.value)
  }
}

/// Convert a style-object property name to its CSS spelling.
///
/// `paddingLeft` becomes `padding-left`, `WebkitAppearance` becomes `-webkit-appearance`,
/// `msFlex` becomes `-ms-flex`. Custom properties and names that are already hyphenated are
/// left alone.
pub fn hyphenate(property: &str) -> String {
  if property.starts_with("--") {
    return property.to_string();
  }

  let mut css = String::with_capacity(property.len() + 4);
  if property.starts_with("ms") && property[2..].starts_with(|c: char| c.is_ascii_uppercase()) {
    css.push('-');
  }
  for (index, c) in property.char_indices() {
    if c.is_ascii_uppercase() {
      if index > 0 || property.starts_with(['W', 'M', 'O']) {
        css.push('-');
      }
      css.push(c.to_ascii_lowercase());
    } else {
      css.push(c);
    }
  }
  css
}

/// Split a CSS value into its space-separated components, keeping function arguments and
/// quoted strings together.
fn value_components(value: &str) -> Vec<&str> {
  let mut components = Vec::new();
  let mut depth = 0usize;
  let mut quote = None;
  let mut start = None;

  for (index, c) in value.char_indices() {
    match (quote, c) {
      (Some(open), c) if c == open => quote = None,
      (Some(_), _) => {}
      (None, '"' | '\'') => quote = Some(c),
      (None, '(') => depth += 1,
      (None, ')') => depth = depth.saturating_sub(1),
      (None, c) if c.is_whitespace() && depth == 0 => {
        if let Some(begin) = start.take() {
          components.push(&value[begin..index]);
        }
        continue;
      }
      _ => {}
    }
    if start.is_none() {
      start = Some(index);
    }
  }
  if let Some(begin) = start {
    components.push(&value[begin..]);
  }
  components
}

fn split_important(value: &str) -> (&str, &str) {
  match value.strip_suffix("!important") {
    Some(rest) => (rest.trim_end(), " !important"),
    None => (value, ""),
  }
}

/// Longhand names in top/right/bottom/left order.
fn box_longhands(property: &str) -> Option<[&'static str; 4]> {
  Some(match property {
    "padding" => ["padding-top", "padding-right", "padding-bottom", "padding-left"],
    "margin" => ["margin-top", "margin-right", "margin-bottom", "margin-left"],
    "inset" => ["top", "right", "bottom", "left"],
    "border-radius" => [
      "border-top-left-radius",
      "border-top-right-radius",
      "border-bottom-right-radius",
      "border-bottom-left-radius",
    ],
    _ => return None,
  })
}

/// Longhand names for shorthands taking one or two values.
fn pair_longhands(property: &str) -> Option<[&'static str; 2]> {
  Some(match property {
    "overflow" => ["overflow-x", "overflow-y"],
    "gap" => ["row-gap", "column-gap"],
    "place-items" => ["align-items", "justify-items"],
    "place-self" => ["align-self", "justify-self"],
    "place-content" => ["align-content", "justify-content"],
    _ => return None,
  })
}

/// Expand a shorthand into its longhands, each of which gets its own atomic class.
///
/// Values that can't be split safely (`var()` references, `border-radius` with an elliptical
/// `/` part, the wrong number of components) are kept as the shorthand.
pub fn expand_shorthand(property: &str, value: &str) -> Vec<Declaration> {
  let keep = || vec![Declaration::new(property, value)];
  if value.contains("var(") {
    return keep();
  }
  let (value, important) = split_important(value);
  let components = value_components(value);

  if let Some(longhands) = box_longhands(property) {
    if components.is_empty()
      || components.len() > 4
      || (property == "border-radius" && value.contains('/'))
    {
      return keep();
    }
    let top = components[0];
    let right = components.get(1).copied().unwrap_or(top);
    let bottom = components.get(2).copied().unwrap_or(top);
    let left = components.get(3).copied().unwrap_or(right);
    return longhands
      .into_iter()
      .zip([top, right, bottom, left])
      .map(|(longhand, part)| Declaration::new(longhand, format!("{part}{important}")))
      .collect();
  }

  if let Some([first, second]) = pair_longhands(property) {
    if components.is_empty() || components.len() > 2 {
      return keep();
    }
    let first_value = components[0];
    let second_value = components.get(1).copied().unwrap_or(first_value);
    return vec![
      Declaration::new(first, format!("{first_value}{important}")),
      Declaration::new(second, format!("{second_value}{important}")),
    ];
  }

  keep()
}

/// Declarations emitted into the same rule, prefixed ones first.
pub fn with_vendor_prefixes(declaration: Declaration) -> Vec<Declaration> {
  let Declaration { property, value } = &declaration;
  let (bare_value, _) = split_important(value);

  let prefixed = match (property.as_str(), bare_value) {
    ("display", "flex") => vec![
      Declaration::new("display", value.replacen("flex", "-webkit-box", 1)),
      Declaration::new("display", value.replacen("flex", "-webkit-flex", 1)),
    ],
    ("display", "inline-flex") => vec![Declaration::new(
      "display",
      value.replacen("inline-flex", "-webkit-inline-flex", 1),
    )],
    ("position", "sticky") => vec![Declaration::new(
      "position",
      value.replacen("sticky", "-webkit-sticky", 1),
    )],
    ("background-clip", "text") => {
      vec![Declaration::new("-webkit-background-clip", value.clone())]
    }
    ("user-select", _) => vec![
      Declaration::new("-webkit-user-select", value.clone()),
      Declaration::new("-moz-user-select", value.clone()),
      Declaration::new("-ms-user-select", value.clone()),
    ],
    ("hyphens", _) => vec![
      Declaration::new("-webkit-hyphens", value.clone()),
      Declaration::new("-ms-hyphens", value.clone()),
    ],
    ("appearance", _) => vec![
      Declaration::new("-webkit-appearance", value.clone()),
      Declaration::new("-moz-appearance", value.clone()),
    ],
    ("backdrop-filter" | "text-size-adjust" | "mask-image", _) => {
      vec![Declaration::new(format!("-webkit-{property}"), value.clone())]
    }
    _ => Vec::new(),
  };

  let mut declarations = prefixed;
  declarations.push(declaration);
  declarations
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn pairs(declarations: Vec<Declaration>) -> Vec<(String, String)> {
    declarations
      .into_iter()
      .map(|declaration| (declaration.property, declaration.value))
      .collect()
  }

  fn expected(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
      .iter()
      .map(|(property, value)| (property.to_string(), value.to_string()))
      .collect()
  }

  #[test]
  fn test_hyphenate() {
    assert_eq!(hyphenate("paddingLeft"), "padding-left");
    assert_eq!(hyphenate("color"), "color");
    assert_eq!(hyphenate("WebkitLineClamp"), "-webkit-line-clamp");
    assert_eq!(hyphenate("MozAppearance"), "-moz-appearance");
    assert_eq!(hyphenate("msOverflowStyle"), "-ms-overflow-style");
    assert_eq!(hyphenate("--brand-color"), "--brand-color");
    assert_eq!(hyphenate("--brandColor"), "--brandColor");
    assert_eq!(hyphenate("border-top-width"), "border-top-width");
  }

  #[test]
  fn test_value_components() {
    assert_eq!(value_components("  1px 2px "), vec!["1px", "2px"]);
    assert_eq!(
      value_components("calc(1px + 2px) 0 'a b'"),
      vec!["calc(1px + 2px)", "0", "'a b'"]
    );
  }

  #[test]
  fn test_expand_box_shorthands() {
    assert_eq!(
      pairs(expand_shorthand("padding", "1px")),
      expected(&[
        ("padding-top", "1px"),
        ("padding-right", "1px"),
        ("padding-bottom", "1px"),
        ("padding-left", "1px"),
      ])
    );
    assert_eq!(
      pairs(expand_shorthand("margin", "1px 2px 3px")),
      expected(&[
        ("margin-top", "1px"),
        ("margin-right", "2px"),
        ("margin-bottom", "3px"),
        ("margin-left", "2px"),
      ])
    );
    assert_eq!(
      pairs(expand_shorthand("inset", "0 auto !important")),
      expected(&[
        ("top", "0 !important"),
        ("right", "auto !important"),
        ("bottom", "0 !important"),
        ("left", "auto !important"),
      ])
    );
  }

  #[test]
  fn test_expand_pair_shorthands() {
    assert_eq!(
      pairs(expand_shorthand("overflow", "hidden auto")),
      expected(&[("overflow-x", "hidden"), ("overflow-y", "auto")])
    );
    assert_eq!(
      pairs(expand_shorthand("gap", "4px")),
      expected(&[("row-gap", "4px"), ("column-gap", "4px")])
    );
    assert_eq!(
      pairs(expand_shorthand("place-items", "center start")),
      expected(&[("align-items", "center"), ("justify-items", "start")])
    );
  }

  #[test]
  fn test_shorthands_kept_when_unsafe() {
    assert_eq!(
      pairs(expand_shorthand("padding", "var(--space)")),
      expected(&[("padding", "var(--space)")])
    );
    assert_eq!(
      pairs(expand_shorthand("border-radius", "10px / 5px")),
      expected(&[("border-radius", "10px / 5px")])
    );
    assert_eq!(
      pairs(expand_shorthand("margin", "1px 2px 3px 4px 5px")),
      expected(&[("margin", "1px 2px 3px 4px 5px")])
    );
    assert_eq!(
      pairs(expand_shorthand("color", "red")),
      expected(&[("color", "red")])
    );
  }

  #[test]
  fn test_vendor_prefixes() {
    assert_eq!(
      pairs(with_vendor_prefixes(Declaration::new("display", "flex"))),
      expected(&[
        ("display", "-webkit-box"),
        ("display", "-webkit-flex"),
        ("display", "flex"),
      ])
    );
    assert_eq!(
      pairs(with_vendor_prefixes(Declaration::new("user-select", "none"))),
      expected(&[
        ("-webkit-user-select", "none"),
        ("-moz-user-select", "none"),
        ("-ms-user-select", "none"),
        ("user-select", "none"),
      ])
    );
    assert_eq!(
      pairs(with_vendor_prefixes(Declaration::new("position", "sticky !important"))),
      expected(&[
        ("position", "-webkit-sticky !important"),
        ("position", "sticky !important"),
      ])
    );
    assert_eq!(
      pairs(with_vendor_prefixes(Declaration::new("display", "block"))),
      expected(&[("display", "block")])
    );
  }
}
