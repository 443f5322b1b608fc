use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use swc_core::atoms::Atom;
use swc_core::ecma::ast::{BlockStmt, Expr, Pat};

use super::builtins::{Builtin, Method};
use super::scope::Scope;
use crate::loader::ModuleId;

pub(crate) type ObjectRef = Rc<RefCell<JsObject>>;
pub(crate) type ArrayRef = Rc<RefCell<JsArray>>;

/// A value inside the sandbox. Objects and arrays have reference semantics.
#[derive(Clone, Debug)]
pub(crate) enum JsValue {
  Undefined,
  Null,
  Bool(bool),
  Number(f64),
  String(Rc<str>),
  Object(ObjectRef),
  Array(ArrayRef),
  Function(Rc<JsFunction>),
  /// Namespace object of a module, read export by export.
  Namespace(ModuleId),
}

#[derive(Debug)]
pub(crate) struct JsObject {
  /// Allocation order, used to tell objects that existed before a call site apart from ones
  /// it created itself.
  pub id: u64,
  pub properties: IndexMap<Rc<str>, JsValue>,
  pub frozen: bool,
}

#[derive(Debug)]
pub(crate) struct JsArray {
  pub id: u64,
  pub elements: Vec<JsValue>,
  pub frozen: bool,
}

#[derive(Debug)]
pub(crate) enum JsFunction {
  Closure(Closure),
  Builtin(Builtin),
  Method { receiver: JsValue, method: Method },
}

#[derive(Debug)]
pub(crate) struct Closure {
  pub name: Option<Atom>,
  pub params: Rc<[Pat]>,
  pub body: Rc<ClosureBody>,
  pub scope: Scope,
}

#[derive(Debug)]
pub(crate) enum ClosureBody {
  Block(BlockStmt),
  Expr(Box<Expr>),
  /// Async functions, generators and declarations without a body can be created but not called.
  Unsupported(&'static str),
}

impl JsValue {
  pub fn string(value: impl AsRef<str>) -> Self {
    JsValue::String(Rc::from(value.as_ref()))
  }

  pub fn is_nullish(&self) -> bool {
    matches!(self, JsValue::Undefined | JsValue::Null)
  }

  pub fn truthy(&self) -> bool {
    match self {
      JsValue::Undefined | JsValue::Null => false,
      JsValue::Bool(value) => *value,
      JsValue::Number(value) => !(value.is_nan() || *value == 0.0),
      JsValue::String(value) => !value.is_empty(),
      JsValue::Object(_) | JsValue::Array(_) | JsValue::Function(_) | JsValue::Namespace(_) => true,
    }
  }

  pub fn type_of(&self) -> &'static str {
    match self {
      JsValue::Undefined => "undefined",
      JsValue::Null => "object",
      JsValue::Bool(_) => "boolean",
      JsValue::Number(_) => "number",
      JsValue::String(_) => "string",
      JsValue::Function(_) => "function",
      JsValue::Object(_) | JsValue::Array(_) | JsValue::Namespace(_) => "object",
    }
  }

  pub fn to_number(&self) -> f64 {
    match self {
      JsValue::Undefined => f64::NAN,
      JsValue::Null => 0.0,
      JsValue::Bool(value) => f64::from(u8::from(*value)),
      JsValue::Number(value) => *value,
      JsValue::String(value) => string_to_number(value),
      JsValue::Array(_) => string_to_number(&self.to_js_string()),
      JsValue::Object(_) | JsValue::Function(_) | JsValue::Namespace(_) => f64::NAN,
    }
  }

  pub fn to_js_string(&self) -> String {
    match self {
      JsValue::Undefined => String::from("undefined"),
      JsValue::Null => String::from("null"),
      JsValue::Bool(value) => value.to_string(),
      JsValue::Number(value) => number_to_string(*value),
      JsValue::String(value) => value.to_string(),
      JsValue::Array(array) => array
        .borrow()
        .elements
        .iter()
        .map(|element| {
          if element.is_nullish() {
            String::new()
          } else {
            element.to_js_string()
          }
        })
        .collect::<Vec<_>>()
        .join(","),
      JsValue::Object(_) => String::from("[object Object]"),
      JsValue::Namespace(_) => String::from("[object Module]"),
      JsValue::Function(function) => match &**function {
        JsFunction::Closure(Closure { name: Some(name), .. }) => format!("function {name}() {{}}"),
        _ => String::from("function () { [native code] }"),
      },
    }
  }

  /// Convert to a property key, as the `[key]` of a member expression does.
  pub fn to_property_key(&self) -> Rc<str> {
    match self {
      JsValue::String(value) => value.clone(),
      other => Rc::from(other.to_js_string()),
    }
  }

  pub fn strict_equals(&self, other: &JsValue) -> bool {
    match (self, other) {
      (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
      (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
      (JsValue::Number(a), JsValue::Number(b)) => a == b,
      (JsValue::String(a), JsValue::String(b)) => a == b,
      (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
      (JsValue::Array(a), JsValue::Array(b)) => Rc::ptr_eq(a, b),
      (JsValue::Function(a), JsValue::Function(b)) => Rc::ptr_eq(a, b),
      (JsValue::Namespace(a), JsValue::Namespace(b)) => a == b,
      _ => false,
    }
  }

  pub fn loose_equals(&self, other: &JsValue) -> bool {
    match (self, other) {
      (a, b) if a.is_nullish() && b.is_nullish() => true,
      (a, b) if a.is_nullish() || b.is_nullish() => false,
      (JsValue::Number(_), JsValue::String(_)) | (JsValue::String(_), JsValue::Number(_)) => {
        self.to_number() == other.to_number()
      }
      (JsValue::Bool(_), _) => JsValue::Number(self.to_number()).loose_equals(other),
      (_, JsValue::Bool(_)) => self.loose_equals(&JsValue::Number(other.to_number())),
      (JsValue::Array(_), JsValue::String(_) | JsValue::Number(_)) => {
        JsValue::string(self.to_js_string()).loose_equals(other)
      }
      (JsValue::String(_) | JsValue::Number(_), JsValue::Array(_)) => {
        self.loose_equals(&JsValue::string(other.to_js_string()))
      }
      _ => self.strict_equals(other),
    }
  }

  /// `SameValueZero`, used by `includes`.
  pub fn same_value_zero(&self, other: &JsValue) -> bool {
    match (self, other) {
      (JsValue::Number(a), JsValue::Number(b)) if a.is_nan() && b.is_nan() => true,
      _ => self.strict_equals(other),
    }
  }
}

/// Format a number the way `Number.prototype.toString()` does.
pub(crate) fn number_to_string(value: f64) -> String {
  if value.is_nan() {
    return String::from("NaN");
  }
  if value == 0.0 {
    return String::from("0");
  }
  if value.is_infinite() {
    return String::from(if value > 0.0 { "Infinity" } else { "-Infinity" });
  }

  let sign = if value < 0.0 { "-" } else { "" };
  // Shortest round-trip digits, e.g. "1.2345e20".
  let scientific = format!("{:e}", value.abs());
  let (mantissa, exponent) = scientific
    .split_once('e')
    .unwrap_or((scientific.as_str(), "0"));
  let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
  let exponent: i32 = exponent.parse().unwrap_or(0);

  let k = digits.len() as i32;
  let n = exponent + 1;

  let body = if k <= n && n <= 21 {
    format!("{digits}{}", "0".repeat((n - k) as usize))
  } else if 0 < n && n <= 21 {
    format!("{}.{}", &digits[..n as usize], &digits[n as usize..])
  } else if -6 < n && n <= 0 {
    format!("0.{}{digits}", "0".repeat((-n) as usize))
  } else {
    let exponent_sign = if n - 1 < 0 { "-" } else { "+" };
    let fraction = if k > 1 {
      format!(".{}", &digits[1..])
    } else {
      String::new()
    };
    format!("{}{fraction}e{exponent_sign}{}", &digits[..1], (n - 1).abs())
  };

  format!("{sign}{body}")
}

/// `StringToNumber`: whitespace is trimmed, the empty string is zero and anything that is not
/// a complete numeric literal is `NaN`.
pub(crate) fn string_to_number(value: &str) -> f64 {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    return 0.0;
  }

  for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
    if let Some(rest) = trimmed.strip_prefix(prefix) {
      return u64::from_str_radix(rest, radix)
        .map(|parsed| parsed as f64)
        .unwrap_or(f64::NAN);
    }
  }

  match trimmed {
    "Infinity" | "+Infinity" => return f64::INFINITY,
    "-Infinity" => return f64::NEG_INFINITY,
    _ => {}
  }

  let is_decimal_literal = trimmed
    .chars()
    .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
  if !is_decimal_literal {
    return f64::NAN;
  }
  trimmed.parse().unwrap_or(f64::NAN)
}

/// `parseFloat`: the longest numeric prefix after leading whitespace.
pub(crate) fn parse_float_prefix(value: &str) -> f64 {
  let trimmed = value.trim_start();
  for infinity in ["Infinity", "+Infinity"] {
    if trimmed.starts_with(infinity) {
      return f64::INFINITY;
    }
  }
  if trimmed.starts_with("-Infinity") {
    return f64::NEG_INFINITY;
  }

  let mut end = 0;
  let mut seen_digit = false;
  let mut seen_dot = false;
  let mut seen_exponent = false;
  let bytes = trimmed.as_bytes();
  while end < bytes.len() {
    let c = bytes[end];
    let accepted = match c {
      b'0'..=b'9' => {
        seen_digit = true;
        true
      }
      b'+' | b'-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
      b'.' if !seen_dot && !seen_exponent => {
        seen_dot = true;
        true
      }
      b'e' | b'E' if seen_digit && !seen_exponent => {
        seen_exponent = true;
        true
      }
      _ => false,
    };
    if !accepted {
      break;
    }
    end += 1;
  }

  // Back off trailing characters that cannot end a literal, e.g. "1e" or "2.5e+".
  let mut candidate = &trimmed[..end];
  while !candidate.is_empty() {
    if let Ok(parsed) = candidate.parse::<f64>() {
      return parsed;
    }
    candidate = &candidate[..candidate.len() - 1];
  }
  f64::NAN
}

/// `parseInt` with an optional radix.
pub(crate) fn parse_int_prefix(value: &str, radix: Option<u32>) -> f64 {
  let trimmed = value.trim_start();
  let (negative, rest) = match trimmed.as_bytes().first() {
    Some(b'-') => (true, &trimmed[1..]),
    Some(b'+') => (false, &trimmed[1..]),
    _ => (false, trimmed),
  };

  let (radix, rest) = match radix {
    Some(16) | None if rest.starts_with("0x") || rest.starts_with("0X") => (16, &rest[2..]),
    Some(radix) if (2..=36).contains(&radix) => (radix, rest),
    Some(_) => return f64::NAN,
    None => (10, rest),
  };

  let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
  if digits.is_empty() {
    return f64::NAN;
  }

  let magnitude = digits.chars().fold(0.0, |acc, c| {
    acc * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0))
  });
  if negative {
    -magnitude
  } else {
    magnitude
  }
}

/// `ToInt32`, used by the bitwise operators.
pub(crate) fn to_int32(value: f64) -> i32 {
  if !value.is_finite() {
    return 0;
  }
  let truncated = value.trunc() % 4_294_967_296.0;
  let unsigned = if truncated < 0.0 {
    truncated + 4_294_967_296.0
  } else {
    truncated
  };
  unsigned as u32 as i32
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_number_to_string() {
    let cases = [
      (0.0, "0"),
      (-0.0, "0"),
      (1.0, "1"),
      (-2.5, "-2.5"),
      (0.1, "0.1"),
      (0.1 + 0.2, "0.30000000000000004"),
      (123456789.0, "123456789"),
      (1e20, "100000000000000000000"),
      (1e21, "1e+21"),
      (1.5e-7, "1.5e-7"),
      (0.000001, "0.000001"),
      (f64::NAN, "NaN"),
      (f64::NEG_INFINITY, "-Infinity"),
    ];
    for (value, expected) in cases {
      assert_eq!(number_to_string(value), expected, "formatting {value}");
    }
  }

  #[test]
  fn test_string_to_number() {
    assert_eq!(string_to_number(""), 0.0);
    assert_eq!(string_to_number("  42 "), 42.0);
    assert_eq!(string_to_number("0x10"), 16.0);
    assert_eq!(string_to_number("1e3"), 1000.0);
    assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    assert!(string_to_number("12px").is_nan());
    assert!(string_to_number("inf").is_nan());
  }

  #[test]
  fn test_parse_prefixes() {
    assert_eq!(parse_float_prefix("12.5px"), 12.5);
    assert_eq!(parse_float_prefix("  -3e2rem"), -300.0);
    assert_eq!(parse_float_prefix("1e"), 1.0);
    assert!(parse_float_prefix("px").is_nan());
    assert_eq!(parse_int_prefix("12.9px", None), 12.0);
    assert_eq!(parse_int_prefix("-0x1f", None), -31.0);
    assert_eq!(parse_int_prefix("101", Some(2)), 5.0);
    assert!(parse_int_prefix("z", Some(10)).is_nan());
  }

  #[test]
  fn test_equality() {
    assert!(JsValue::Null.loose_equals(&JsValue::Undefined));
    assert!(!JsValue::Null.strict_equals(&JsValue::Undefined));
    assert!(JsValue::string("1").loose_equals(&JsValue::Number(1.0)));
    assert!(JsValue::Bool(true).loose_equals(&JsValue::Number(1.0)));
    assert!(!JsValue::Number(f64::NAN).strict_equals(&JsValue::Number(f64::NAN)));
    assert!(JsValue::Number(f64::NAN).same_value_zero(&JsValue::Number(f64::NAN)));
  }

  #[test]
  fn test_to_int32() {
    assert_eq!(to_int32(4_294_967_297.0), 1);
    assert_eq!(to_int32(-1.0), -1);
    assert_eq!(to_int32(f64::NAN), 0);
  }
}
