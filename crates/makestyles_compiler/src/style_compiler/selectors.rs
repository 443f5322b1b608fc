use super::style_object::SelectorSegment;

/// Pseudo-classes that get their own rule group, lowest priority first.
const PSEUDO_ORDER: [(&str, RuleGroup); 7] = [
  ("link", RuleGroup::Link),
  ("visited", RuleGroup::Visited),
  ("focus-within", RuleGroup::FocusWithin),
  ("focus", RuleGroup::Focus),
  ("focus-visible", RuleGroup::FocusVisible),
  ("hover", RuleGroup::Hover),
  ("active", RuleGroup::Active),
];

const AT_RULES: [(&str, RuleGroup); 4] = [
  ("media", RuleGroup::Media),
  ("supports", RuleGroup::Supports),
  ("container", RuleGroup::Container),
  ("layer", RuleGroup::Layer),
];

/// Bucket a rule is inserted into. Buckets are emitted in declaration order so that, for
/// example, `:hover` rules win over default rules of the same specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleGroup {
  Default,
  Link,
  Visited,
  FocusWithin,
  Focus,
  FocusVisible,
  Hover,
  Active,
  Supports,
  Media,
  Container,
  Layer,
}

impl RuleGroup {
  pub const ALL: [RuleGroup; 12] = [
    RuleGroup::Default,
    RuleGroup::Link,
    RuleGroup::Visited,
    RuleGroup::FocusWithin,
    RuleGroup::Focus,
    RuleGroup::FocusVisible,
    RuleGroup::Hover,
    RuleGroup::Active,
    RuleGroup::Supports,
    RuleGroup::Media,
    RuleGroup::Container,
    RuleGroup::Layer,
  ];

  /// Short key used in the `ruleGroups` literal.
  pub fn key(&self) -> &'static str {
    match self {
      RuleGroup::Default => "d",
      RuleGroup::Link => "l",
      RuleGroup::Visited => "v",
      RuleGroup::FocusWithin => "w",
      RuleGroup::Focus => "f",
      RuleGroup::FocusVisible => "i",
      RuleGroup::Hover => "h",
      RuleGroup::Active => "a",
      RuleGroup::Supports => "t",
      RuleGroup::Media => "m",
      RuleGroup::Container => "c",
      RuleGroup::Layer => "y",
    }
  }

  pub fn from_key(key: &str) -> Option<RuleGroup> {
    RuleGroup::ALL.into_iter().find(|group| group.key() == key)
  }
}

pub(crate) enum NestedKey {
  AtRule(String),
  /// One normalized selector per entry of a comma-separated list.
  Selectors(Vec<String>),
  Invalid,
}

/// Decide whether an object-valued key opens an at-rule or a selector context.
pub(crate) fn classify_nested_key(key: &str) -> NestedKey {
  let key = key.trim();
  if let Some(at_rule) = key.strip_prefix('@') {
    let name_end = at_rule
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
      .unwrap_or(at_rule.len());
    let name = &at_rule[..name_end];
    if !AT_RULES.iter().any(|(known, _)| *known == name) {
      return NestedKey::Invalid;
    }
    let prelude = collapse_whitespace(&at_rule[name_end..]);
    return NestedKey::AtRule(if prelude.is_empty() {
      format!("@{name}")
    } else {
      format!("@{name} {prelude}")
    });
  }

  let is_selector = key.contains('&')
    || key.starts_with([':', '[', '>', '+', '~', '*', '.', '#']);
  if !is_selector {
    return NestedKey::Invalid;
  }

  let selectors: Vec<String> = split_selector_list(key)
    .into_iter()
    .map(|selector| normalize_selector(&selector))
    .filter(|selector| !selector.is_empty())
    .collect();
  if selectors.is_empty() {
    NestedKey::Invalid
  } else {
    NestedKey::Selectors(selectors)
  }
}

/// Split a selector list on commas that are not inside parentheses or brackets.
fn split_selector_list(selector: &str) -> Vec<String> {
  let mut parts = Vec::new();
  let mut current = String::new();
  let mut depth = 0usize;
  for c in selector.chars() {
    match c {
      '(' | '[' => depth += 1,
      ')' | ']' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        parts.push(std::mem::take(&mut current));
        continue;
      }
      _ => {}
    }
    current.push(c);
  }
  parts.push(current);
  parts
}

/// Make the parent reference explicit: pseudo-classes and attribute selectors attach to the
/// parent, anything else is a descendant or combinator relative to it.
fn normalize_selector(selector: &str) -> String {
  let selector = collapse_whitespace(selector);
  if selector.is_empty() || selector.contains('&') {
    return selector;
  }
  if selector.starts_with([':', '[']) {
    format!("&{selector}")
  } else {
    format!("& {selector}")
  }
}

fn collapse_whitespace(value: &str) -> String {
  value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `&` references along `path`, starting from `.{class_name}`.
pub(crate) fn resolve_selector(class_name: &str, path: &[SelectorSegment]) -> String {
  let mut selector = format!(".{class_name}");
  for segment in path {
    if let SelectorSegment::Selector(nested) = segment {
      selector = nested.replace('&', &selector);
    }
  }
  selector
}

pub(crate) fn at_rules(path: &[SelectorSegment]) -> impl Iterator<Item = &str> {
  path.iter().filter_map(|segment| match segment {
    SelectorSegment::AtRule(prelude) => Some(prelude.as_str()),
    SelectorSegment::Selector(_) => None,
  })
}

/// The group of a rule: its outermost at-rule, otherwise the highest-priority pseudo-class of
/// its selector.
pub(crate) fn rule_group(path: &[SelectorSegment]) -> RuleGroup {
  if let Some(at_rule) = at_rules(path).next() {
    return AT_RULES
      .iter()
      .find(|(name, _)| {
        at_rule[1..].starts_with(name) && !at_rule[1 + name.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-')
      })
      .map(|(_, group)| *group)
      .unwrap_or(RuleGroup::Default);
  }

  let selector = resolve_selector("", path);
  pseudo_classes(&selector)
    .filter_map(|pseudo| {
      PSEUDO_ORDER
        .iter()
        .find(|(name, _)| *name == pseudo)
        .map(|(_, group)| *group)
    })
    .max()
    .unwrap_or(RuleGroup::Default)
}

/// Names of the single-colon pseudo-classes in `selector`.
fn pseudo_classes(selector: &str) -> impl Iterator<Item = &str> {
  selector
    .match_indices(':')
    .filter(move |(index, _)| {
      !selector[..*index].ends_with(':') && !selector[index + 1..].starts_with(':')
    })
    .map(move |(index, _)| {
      let rest = &selector[index + 1..];
      let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(rest.len());
      &rest[..end]
    })
}
