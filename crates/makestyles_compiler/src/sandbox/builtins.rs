//! The allow-listed standard library available to evaluated code.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use super::interpreter::Interpreter;
use super::value::{
  number_to_string, parse_float_prefix, parse_int_prefix, JsFunction, JsValue,
};
use super::EvaluationError;

/// Globals that only exist in a browser or host runtime. Reading them fails the call site;
/// `typeof` on them yields `"undefined"`.
const HOST_GLOBALS: &[&str] = &[
  "window",
  "document",
  "navigator",
  "location",
  "history",
  "screen",
  "localStorage",
  "sessionStorage",
  "matchMedia",
  "getComputedStyle",
  "requestAnimationFrame",
  "setTimeout",
  "setInterval",
  "fetch",
  "self",
  "globalThis",
  "process",
  "require",
  "module",
  "exports",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
  Error,
  TypeError,
  RangeError,
}

impl ErrorKind {
  fn name(&self) -> &'static str {
    match self {
      ErrorKind::Error => "Error",
      ErrorKind::TypeError => "TypeError",
      ErrorKind::RangeError => "RangeError",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
  MathMax,
  MathMin,
  MathRound,
  MathFloor,
  MathCeil,
  MathAbs,
  MathPow,
  MathSqrt,
  MathTrunc,
  MathSign,
  MathRandom,
  ObjectAssign,
  ObjectKeys,
  ObjectValues,
  ObjectEntries,
  ObjectFreeze,
  ObjectIsFrozen,
  ObjectFromEntries,
  ArrayIsArray,
  ArrayFrom,
  ArrayOf,
  JsonStringify,
  JsonParse,
  String,
  Number,
  Boolean,
  ParseInt,
  ParseFloat,
  IsNaN,
  IsFinite,
  NumberIsInteger,
  NumberIsFinite,
  NumberIsNaN,
  Error(ErrorKind),
  ConsoleLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
  ToUpperCase,
  ToLowerCase,
  Trim,
  TrimStart,
  TrimEnd,
  Split,
  Substring,
  StartsWith,
  EndsWith,
  Replace,
  ReplaceAll,
  PadStart,
  PadEnd,
  Repeat,
  CharAt,
  ToFixed,
  Map,
  Filter,
  ForEach,
  Reduce,
  Find,
  FindIndex,
  Some,
  Every,
  Join,
  Flat,
  FlatMap,
  Push,
  Pop,
  Shift,
  Unshift,
  Reverse,
  Sort,
  Slice,
  Concat,
  Includes,
  IndexOf,
  At,
  ToString,
  HasOwnProperty,
}

impl Method {
  pub fn for_string(name: &str) -> Option<Method> {
    Some(match name {
      "toUpperCase" => Method::ToUpperCase,
      "toLowerCase" => Method::ToLowerCase,
      "trim" => Method::Trim,
      "trimStart" => Method::TrimStart,
      "trimEnd" => Method::TrimEnd,
      "split" => Method::Split,
      "slice" => Method::Slice,
      "substring" => Method::Substring,
      "startsWith" => Method::StartsWith,
      "endsWith" => Method::EndsWith,
      "includes" => Method::Includes,
      "indexOf" => Method::IndexOf,
      "replace" => Method::Replace,
      "replaceAll" => Method::ReplaceAll,
      "padStart" => Method::PadStart,
      "padEnd" => Method::PadEnd,
      "repeat" => Method::Repeat,
      "concat" => Method::Concat,
      "charAt" => Method::CharAt,
      "at" => Method::At,
      "toString" => Method::ToString,
      _ => return None,
    })
  }

  pub fn for_array(name: &str) -> Option<Method> {
    Some(match name {
      "map" => Method::Map,
      "filter" => Method::Filter,
      "forEach" => Method::ForEach,
      "reduce" => Method::Reduce,
      "find" => Method::Find,
      "findIndex" => Method::FindIndex,
      "some" => Method::Some,
      "every" => Method::Every,
      "join" => Method::Join,
      "flat" => Method::Flat,
      "flatMap" => Method::FlatMap,
      "push" => Method::Push,
      "pop" => Method::Pop,
      "shift" => Method::Shift,
      "unshift" => Method::Unshift,
      "reverse" => Method::Reverse,
      "sort" => Method::Sort,
      "slice" => Method::Slice,
      "concat" => Method::Concat,
      "includes" => Method::Includes,
      "indexOf" => Method::IndexOf,
      "at" => Method::At,
      "toString" => Method::ToString,
      _ => return None,
    })
  }

  pub fn for_number(name: &str) -> Option<Method> {
    match name {
      "toFixed" => Some(Method::ToFixed),
      "toString" => Some(Method::ToString),
      _ => None,
    }
  }

  pub fn for_object(name: &str) -> Option<Method> {
    match name {
      "hasOwnProperty" => Some(Method::HasOwnProperty),
      "toString" => Some(Method::ToString),
      _ => None,
    }
  }
}

/// Static members of callable builtins, e.g. `Number.isInteger`.
pub(crate) fn static_property(builtin: Builtin, key: &str) -> Option<JsValue> {
  let function = |builtin| Some(JsValue::Function(Rc::new(JsFunction::Builtin(builtin))));
  match (builtin, key) {
    (Builtin::Number, "isInteger") => function(Builtin::NumberIsInteger),
    (Builtin::Number, "isFinite") => function(Builtin::NumberIsFinite),
    (Builtin::Number, "isNaN") => function(Builtin::NumberIsNaN),
    (Builtin::Number, "parseFloat") => function(Builtin::ParseFloat),
    (Builtin::Number, "parseInt") => function(Builtin::ParseInt),
    (Builtin::Number, "MAX_SAFE_INTEGER") => Some(JsValue::Number(9_007_199_254_740_991.0)),
    (Builtin::Number, "MIN_SAFE_INTEGER") => Some(JsValue::Number(-9_007_199_254_740_991.0)),
    (Builtin::Number, "EPSILON") => Some(JsValue::Number(f64::EPSILON)),
    _ => None,
  }
}

fn arg(args: &[JsValue], index: usize) -> JsValue {
  args.get(index).cloned().unwrap_or(JsValue::Undefined)
}

fn number_arg(args: &[JsValue], index: usize) -> f64 {
  arg(args, index).to_number()
}

/// Clamp a relative index the way `slice` does.
fn relative_index(value: JsValue, length: usize, default: usize) -> usize {
  if matches!(value, JsValue::Undefined) {
    return default;
  }
  let number = value.to_number();
  let number = if number.is_nan() { 0.0 } else { number.trunc() };
  if number < 0.0 {
    (length as f64 + number).max(0.0) as usize
  } else {
    number.min(length as f64) as usize
  }
}

fn utf16(value: &str) -> Vec<u16> {
  value.encode_utf16().collect()
}

fn from_utf16(units: &[u16]) -> JsValue {
  JsValue::string(String::from_utf16_lossy(units))
}

fn find_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
  if needle.is_empty() {
    return Some(from.min(haystack.len()));
  }
  (from..=haystack.len().saturating_sub(needle.len()))
    .find(|start| haystack.get(*start..start + needle.len()) == Some(needle))
}

impl Interpreter<'_> {
  pub(super) fn global(&mut self, name: &str) -> Result<JsValue, EvaluationError> {
    let function = |builtin| Ok(JsValue::Function(Rc::new(JsFunction::Builtin(builtin))));
    match name {
      "undefined" => Ok(JsValue::Undefined),
      "NaN" => Ok(JsValue::Number(f64::NAN)),
      "Infinity" => Ok(JsValue::Number(f64::INFINITY)),
      "String" => function(Builtin::String),
      "Number" => function(Builtin::Number),
      "Boolean" => function(Builtin::Boolean),
      "parseInt" => function(Builtin::ParseInt),
      "parseFloat" => function(Builtin::ParseFloat),
      "isNaN" => function(Builtin::IsNaN),
      "isFinite" => function(Builtin::IsFinite),
      "Error" => function(Builtin::Error(ErrorKind::Error)),
      "TypeError" => function(Builtin::Error(ErrorKind::TypeError)),
      "RangeError" => function(Builtin::Error(ErrorKind::RangeError)),
      "Math" | "Object" | "Array" | "JSON" | "console" => {
        if let Some(value) = self.globals.get(name) {
          return Ok(value.clone());
        }
        let value = self.create_global_object(name);
        self.globals.insert(name.to_string(), value.clone());
        Ok(value)
      }
      _ if HOST_GLOBALS.contains(&name) => Err(EvaluationError::UnavailableGlobal(format!(
        "'{name}' is a runtime host API"
      ))),
      _ => Err(EvaluationError::UnavailableGlobal(format!(
        "'{name}' is not defined"
      ))),
    }
  }

  fn create_global_object(&mut self, name: &str) -> JsValue {
    let members: &[(&str, Builtin)] = match name {
      "Math" => &[
        ("max", Builtin::MathMax),
        ("min", Builtin::MathMin),
        ("round", Builtin::MathRound),
        ("floor", Builtin::MathFloor),
        ("ceil", Builtin::MathCeil),
        ("abs", Builtin::MathAbs),
        ("pow", Builtin::MathPow),
        ("sqrt", Builtin::MathSqrt),
        ("trunc", Builtin::MathTrunc),
        ("sign", Builtin::MathSign),
        ("random", Builtin::MathRandom),
      ],
      "Object" => &[
        ("assign", Builtin::ObjectAssign),
        ("keys", Builtin::ObjectKeys),
        ("values", Builtin::ObjectValues),
        ("entries", Builtin::ObjectEntries),
        ("freeze", Builtin::ObjectFreeze),
        ("isFrozen", Builtin::ObjectIsFrozen),
        ("fromEntries", Builtin::ObjectFromEntries),
      ],
      "Array" => &[
        ("isArray", Builtin::ArrayIsArray),
        ("from", Builtin::ArrayFrom),
        ("of", Builtin::ArrayOf),
      ],
      "JSON" => &[
        ("stringify", Builtin::JsonStringify),
        ("parse", Builtin::JsonParse),
      ],
      _ => &[
        ("log", Builtin::ConsoleLog),
        ("info", Builtin::ConsoleLog),
        ("warn", Builtin::ConsoleLog),
        ("error", Builtin::ConsoleLog),
        ("debug", Builtin::ConsoleLog),
      ],
    };

    let mut properties: IndexMap<Rc<str>, JsValue> = members
      .iter()
      .map(|(key, builtin)| {
        (
          Rc::from(*key),
          JsValue::Function(Rc::new(JsFunction::Builtin(*builtin))),
        )
      })
      .collect();
    if name == "Math" {
      properties.insert(Rc::from("PI"), JsValue::Number(std::f64::consts::PI));
      properties.insert(Rc::from("E"), JsValue::Number(std::f64::consts::E));
    }
    self.new_object(properties)
  }

  pub(super) fn call_builtin(
    &mut self,
    builtin: Builtin,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    let math = |f: fn(f64) -> f64| Ok(JsValue::Number(f(number_arg(&args, 0))));
    match builtin {
      Builtin::MathMax => Ok(JsValue::Number(args.iter().fold(f64::NEG_INFINITY, |acc, value| {
        let number = value.to_number();
        if acc.is_nan() || number.is_nan() {
          f64::NAN
        } else {
          acc.max(number)
        }
      }))),
      Builtin::MathMin => Ok(JsValue::Number(args.iter().fold(f64::INFINITY, |acc, value| {
        let number = value.to_number();
        if acc.is_nan() || number.is_nan() {
          f64::NAN
        } else {
          acc.min(number)
        }
      }))),
      // Math.round rounds half up, towards positive infinity.
      Builtin::MathRound => math(|n| (n + 0.5).floor()),
      Builtin::MathFloor => math(f64::floor),
      Builtin::MathCeil => math(f64::ceil),
      Builtin::MathAbs => math(f64::abs),
      Builtin::MathSqrt => math(f64::sqrt),
      Builtin::MathTrunc => math(f64::trunc),
      Builtin::MathSign => math(|n| if n.is_nan() || n == 0.0 { n } else { n.signum() }),
      Builtin::MathPow => Ok(JsValue::Number(
        number_arg(&args, 0).powf(number_arg(&args, 1)),
      )),
      Builtin::MathRandom => Err(EvaluationError::Unsupported(String::from(
        "Math.random() is not deterministic",
      ))),
      Builtin::ObjectAssign => {
        let target = arg(&args, 0);
        if !matches!(target, JsValue::Object(_)) {
          return Err(EvaluationError::Unsupported(String::from(
            "Object.assign() with a non-object target",
          )));
        }
        for source in args.iter().skip(1) {
          for (key, value) in self.own_entries(source)? {
            self.set_property(&target, key, value)?;
          }
        }
        Ok(target)
      }
      Builtin::ObjectKeys | Builtin::ObjectValues | Builtin::ObjectEntries => {
        let source = arg(&args, 0);
        if source.is_nullish() {
          return Err(EvaluationError::Type(String::from(
            "Cannot convert undefined or null to object",
          )));
        }
        let entries = self.own_entries(&source)?;
        let elements = entries
          .into_iter()
          .map(|(key, value)| match builtin {
            Builtin::ObjectKeys => JsValue::String(key),
            Builtin::ObjectValues => value,
            _ => self.new_array(vec![JsValue::String(key), value]),
          })
          .collect();
        Ok(self.new_array(elements))
      }
      Builtin::ObjectFreeze => {
        let target = arg(&args, 0);
        match &target {
          JsValue::Object(object) => object.borrow_mut().frozen = true,
          JsValue::Array(array) => array.borrow_mut().frozen = true,
          _ => {}
        }
        Ok(target)
      }
      Builtin::ObjectIsFrozen => Ok(JsValue::Bool(match arg(&args, 0) {
        JsValue::Object(object) => object.borrow().frozen,
        JsValue::Array(array) => array.borrow().frozen,
        _ => true,
      })),
      Builtin::ObjectFromEntries => {
        let mut properties = IndexMap::new();
        for (_, entry) in self.own_entries(&arg(&args, 0))? {
          let key = self.get_property(&entry, "0")?.to_property_key();
          let value = self.get_property(&entry, "1")?;
          properties.insert(key, value);
        }
        Ok(self.new_object(properties))
      }
      Builtin::ArrayIsArray => Ok(JsValue::Bool(matches!(arg(&args, 0), JsValue::Array(_)))),
      Builtin::ArrayFrom => {
        let source = arg(&args, 0);
        let elements: Vec<JsValue> = match &source {
          JsValue::Array(_) | JsValue::String(_) => self
            .own_entries(&source)?
            .into_iter()
            .map(|(_, value)| value)
            .collect(),
          JsValue::Object(_) => {
            let length = self.get_property(&source, "length")?.to_number();
            let length = if length.is_nan() { 0 } else { length.max(0.0) as usize };
            let mut elements = Vec::with_capacity(length);
            for index in 0..length {
              elements.push(self.get_property(&source, &index.to_string())?);
            }
            elements
          }
          _ => Vec::new(),
        };
        let elements = match args.get(1) {
          Some(mapper @ JsValue::Function(_)) => {
            let mut mapped = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
              mapped.push(self.call_function(mapper, vec![element, JsValue::Number(index as f64)])?);
            }
            mapped
          }
          _ => elements,
        };
        Ok(self.new_array(elements))
      }
      Builtin::ArrayOf => Ok(self.new_array(args)),
      Builtin::JsonStringify => match self.to_json(&arg(&args, 0), 0)? {
        Some(json) => {
          let text = if args.get(2).is_some_and(|indent| !indent.is_nullish()) {
            serde_json::to_string_pretty(&json)
          } else {
            serde_json::to_string(&json)
          };
          text
            .map(JsValue::string)
            .map_err(|error| EvaluationError::Type(error.to_string()))
        }
        None => Ok(JsValue::Undefined),
      },
      Builtin::JsonParse => {
        let text = arg(&args, 0).to_js_string();
        let json: serde_json::Value = serde_json::from_str(&text)
          .map_err(|error| self.throw_error(ErrorKind::Error, format!("JSON.parse: {error}")))?;
        Ok(self.from_json(json))
      }
      Builtin::String => Ok(JsValue::string(match args.first() {
        Some(value) => value.to_js_string(),
        None => String::new(),
      })),
      Builtin::Number => Ok(JsValue::Number(match args.first() {
        Some(value) => value.to_number(),
        None => 0.0,
      })),
      Builtin::Boolean => Ok(JsValue::Bool(arg(&args, 0).truthy())),
      Builtin::ParseInt => {
        let radix = match arg(&args, 1) {
          JsValue::Undefined => None,
          value => {
            let radix = value.to_number();
            if radix.is_nan() || radix == 0.0 {
              None
            } else {
              Some(radix.trunc() as u32)
            }
          }
        };
        Ok(JsValue::Number(parse_int_prefix(
          &arg(&args, 0).to_js_string(),
          radix,
        )))
      }
      Builtin::ParseFloat => Ok(JsValue::Number(parse_float_prefix(
        &arg(&args, 0).to_js_string(),
      ))),
      Builtin::IsNaN => Ok(JsValue::Bool(number_arg(&args, 0).is_nan())),
      Builtin::IsFinite => Ok(JsValue::Bool(number_arg(&args, 0).is_finite())),
      Builtin::NumberIsInteger => Ok(JsValue::Bool(
        matches!(arg(&args, 0), JsValue::Number(n) if n.is_finite() && n.trunc() == n),
      )),
      Builtin::NumberIsFinite => Ok(JsValue::Bool(
        matches!(arg(&args, 0), JsValue::Number(n) if n.is_finite()),
      )),
      Builtin::NumberIsNaN => Ok(JsValue::Bool(
        matches!(arg(&args, 0), JsValue::Number(n) if n.is_nan()),
      )),
      Builtin::Error(kind) => {
        let message = match arg(&args, 0) {
          JsValue::Undefined => String::new(),
          value => value.to_js_string(),
        };
        Ok(self.create_error(kind, message))
      }
      Builtin::ConsoleLog => {
        let message = args
          .iter()
          .map(JsValue::to_js_string)
          .collect::<Vec<_>>()
          .join(" ");
        tracing::trace!(%message, "console output from evaluated code");
        Ok(JsValue::Undefined)
      }
    }
  }

  pub(super) fn create_error(&mut self, kind: ErrorKind, message: String) -> JsValue {
    let mut properties = IndexMap::new();
    properties.insert(Rc::from("name"), JsValue::string(kind.name()));
    properties.insert(Rc::from("message"), JsValue::string(message));
    self.new_object(properties)
  }

  /// Build an exception that evaluated code can catch.
  pub(super) fn throw_error(&mut self, kind: ErrorKind, message: String) -> EvaluationError {
    let error = self.create_error(kind, message.clone());
    self.pending_exception = Some(error);
    EvaluationError::Thrown(format!("{}: {message}", kind.name()))
  }

  pub(super) fn call_method(
    &mut self,
    receiver: &JsValue,
    method: Method,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    match receiver {
      JsValue::String(value) => self.call_string_method(value, method, args),
      JsValue::Array(_) => self.call_array_method(receiver, method, args),
      JsValue::Number(value) => match method {
        Method::ToFixed => {
          let digits = number_arg(&args, 0);
          let digits = if digits.is_nan() { 0 } else { digits.trunc() as usize };
          if digits > 100 {
            return Err(self.throw_error(
              ErrorKind::RangeError,
              String::from("toFixed() digits argument must be between 0 and 100"),
            ));
          }
          if !value.is_finite() || value.abs() >= 1e21 {
            return Ok(JsValue::string(number_to_string(*value)));
          }
          Ok(JsValue::string(format!("{value:.digits$}")))
        }
        Method::ToString => {
          let radix = match arg(&args, 0) {
            JsValue::Undefined => 10,
            radix => radix.to_number() as u32,
          };
          if radix == 10 {
            return Ok(JsValue::string(number_to_string(*value)));
          }
          if !(2..=36).contains(&radix) || value.trunc() != *value || value.abs() > 9e15 {
            return Err(EvaluationError::Unsupported(format!(
              "Number.prototype.toString({radix}) on {value}"
            )));
          }
          Ok(JsValue::string(integer_to_radix(*value as i64, radix)))
        }
        _ => Err(not_a_function(receiver, method)),
      },
      JsValue::Object(object) => match method {
        Method::HasOwnProperty => {
          let key = arg(&args, 0).to_property_key();
          Ok(JsValue::Bool(object.borrow().properties.contains_key(&key)))
        }
        Method::ToString => Ok(JsValue::string(receiver.to_js_string())),
        _ => Err(not_a_function(receiver, method)),
      },
      JsValue::Bool(_) if method == Method::ToString => {
        Ok(JsValue::string(receiver.to_js_string()))
      }
      _ => Err(not_a_function(receiver, method)),
    }
  }

  fn call_string_method(
    &mut self,
    value: &Rc<str>,
    method: Method,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    let string_arg = |index: usize| arg(&args, index).to_js_string();
    match method {
      Method::ToUpperCase => Ok(JsValue::string(value.to_uppercase())),
      Method::ToLowerCase => Ok(JsValue::string(value.to_lowercase())),
      Method::Trim => Ok(JsValue::string(value.trim())),
      Method::TrimStart => Ok(JsValue::string(value.trim_start())),
      Method::TrimEnd => Ok(JsValue::string(value.trim_end())),
      Method::ToString => Ok(JsValue::String(value.clone())),
      Method::Concat => Ok(JsValue::string(
        std::iter::once(value.to_string())
          .chain(args.iter().map(JsValue::to_js_string))
          .collect::<String>(),
      )),
      Method::Repeat => {
        let count = number_arg(&args, 0);
        if count < 0.0 || count.is_infinite() {
          return Err(self.throw_error(ErrorKind::RangeError, format!("Invalid count value: {count}")));
        }
        let count = if count.is_nan() { 0 } else { count as usize };
        Ok(JsValue::string(value.repeat(count)))
      }
      Method::StartsWith | Method::EndsWith | Method::Includes => {
        let needle = string_arg(0);
        Ok(JsValue::Bool(match method {
          Method::StartsWith => value.starts_with(needle.as_str()),
          Method::EndsWith => value.ends_with(needle.as_str()),
          _ => value.contains(needle.as_str()),
        }))
      }
      Method::Replace | Method::ReplaceAll => {
        let pattern = utf16(&string_arg(0));
        let replacement = arg(&args, 1);
        let units = utf16(value);
        let mut output: Vec<u16> = Vec::with_capacity(units.len());
        let mut position = 0;
        while let Some(found) = find_units(&units, &pattern, position) {
          output.extend_from_slice(&units[position..found]);
          let replaced = match &replacement {
            JsValue::Function(_) => self
              .call_function(
                &replacement,
                vec![
                  from_utf16(&pattern),
                  JsValue::Number(found as f64),
                  JsValue::String(value.clone()),
                ],
              )?
              .to_js_string(),
            other => other.to_js_string(),
          };
          output.extend(replaced.encode_utf16());
          position = found + pattern.len();
          if method == Method::Replace || pattern.is_empty() {
            break;
          }
        }
        output.extend_from_slice(units.get(position..).unwrap_or_default());
        Ok(from_utf16(&output))
      }
      Method::PadStart | Method::PadEnd => {
        let units = utf16(value);
        let target = number_arg(&args, 0);
        let target = if target.is_nan() { 0 } else { target.max(0.0) as usize };
        let filler = match arg(&args, 1) {
          JsValue::Undefined => vec![u16::from(b' ')],
          filler => utf16(&filler.to_js_string()),
        };
        if target <= units.len() || filler.is_empty() {
          return Ok(JsValue::String(value.clone()));
        }
        let padding: Vec<u16> = filler.iter().copied().cycle().take(target - units.len()).collect();
        let output = if method == Method::PadStart {
          [padding, units].concat()
        } else {
          [units, padding].concat()
        };
        Ok(from_utf16(&output))
      }
      Method::Split => {
        let separator = arg(&args, 0);
        let parts: Vec<JsValue> = match separator {
          JsValue::Undefined => vec![JsValue::String(value.clone())],
          separator => {
            let separator = separator.to_js_string();
            if separator.is_empty() {
              utf16(value).iter().map(|unit| from_utf16(&[*unit])).collect()
            } else {
              value.split(separator.as_str()).map(JsValue::string).collect()
            }
          }
        };
        let parts = match arg(&args, 1) {
          JsValue::Undefined => parts,
          limit => parts.into_iter().take(limit.to_number().max(0.0) as usize).collect(),
        };
        Ok(self.new_array(parts))
      }
      Method::Slice | Method::Substring | Method::CharAt | Method::At | Method::IndexOf => {
        let units = utf16(value);
        let length = units.len();
        match method {
          Method::Slice => {
            let start = relative_index(arg(&args, 0), length, 0);
            let end = relative_index(arg(&args, 1), length, length);
            Ok(from_utf16(units.get(start..end.max(start)).unwrap_or_default()))
          }
          Method::Substring => {
            let clamp = |value: JsValue, default: usize| match value {
              JsValue::Undefined => default,
              value => {
                let number = value.to_number();
                if number.is_nan() {
                  0
                } else {
                  number.clamp(0.0, length as f64) as usize
                }
              }
            };
            let start = clamp(arg(&args, 0), 0);
            let end = clamp(arg(&args, 1), length);
            let (start, end) = (start.min(end), start.max(end));
            Ok(from_utf16(&units[start..end]))
          }
          Method::CharAt => {
            let index = number_arg(&args, 0);
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            Ok(if index < 0.0 || index as usize >= length {
              JsValue::string("")
            } else {
              from_utf16(&units[index as usize..index as usize + 1])
            })
          }
          Method::At => {
            let index = number_arg(&args, 0);
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            let index = if index < 0.0 { length as f64 + index } else { index };
            Ok(if index < 0.0 || index as usize >= length {
              JsValue::Undefined
            } else {
              from_utf16(&units[index as usize..index as usize + 1])
            })
          }
          _ => {
            let needle = utf16(&string_arg(0));
            let from = relative_index(arg(&args, 1), length, 0);
            Ok(JsValue::Number(
              find_units(&units, &needle, from).map_or(-1.0, |index| index as f64),
            ))
          }
        }
      }
      _ => Err(not_a_function(&JsValue::String(value.clone()), method)),
    }
  }

  fn call_array_method(
    &mut self,
    receiver: &JsValue,
    method: Method,
    args: Vec<JsValue>,
  ) -> Result<JsValue, EvaluationError> {
    let JsValue::Array(array) = receiver else {
      return Err(not_a_function(receiver, method));
    };
    let snapshot = || array.borrow().elements.clone();
    let callback = arg(&args, 0);
    let check_callback = |callback: &JsValue| {
      if matches!(callback, JsValue::Function(_)) {
        Ok(())
      } else {
        Err(EvaluationError::Type(format!(
          "{} is not a function",
          callback.to_js_string()
        )))
      }
    };

    match method {
      Method::Map | Method::Filter | Method::ForEach | Method::FlatMap => {
        check_callback(&callback)?;
        let mut output = Vec::new();
        for (index, element) in snapshot().into_iter().enumerate() {
          let result = self.call_function(
            &callback,
            vec![element.clone(), JsValue::Number(index as f64), receiver.clone()],
          )?;
          match method {
            Method::Map => output.push(result),
            Method::Filter if result.truthy() => output.push(element),
            Method::FlatMap => match result {
              JsValue::Array(inner) => output.extend(inner.borrow().elements.iter().cloned()),
              other => output.push(other),
            },
            _ => {}
          }
        }
        Ok(if method == Method::ForEach {
          JsValue::Undefined
        } else {
          self.new_array(output)
        })
      }
      Method::Find | Method::FindIndex | Method::Some | Method::Every => {
        check_callback(&callback)?;
        for (index, element) in snapshot().into_iter().enumerate() {
          let result = self
            .call_function(
              &callback,
              vec![element.clone(), JsValue::Number(index as f64), receiver.clone()],
            )?
            .truthy();
          match method {
            Method::Find if result => return Ok(element),
            Method::FindIndex if result => return Ok(JsValue::Number(index as f64)),
            Method::Some if result => return Ok(JsValue::Bool(true)),
            Method::Every if !result => return Ok(JsValue::Bool(false)),
            _ => {}
          }
        }
        Ok(match method {
          Method::Find => JsValue::Undefined,
          Method::FindIndex => JsValue::Number(-1.0),
          Method::Some => JsValue::Bool(false),
          _ => JsValue::Bool(true),
        })
      }
      Method::Reduce => {
        check_callback(&callback)?;
        let elements = snapshot();
        let mut indexed = elements.into_iter().enumerate();
        let mut accumulator = match args.get(1) {
          Some(initial) => initial.clone(),
          None => match indexed.next() {
            Some((_, first)) => first,
            None => {
              return Err(EvaluationError::Type(String::from(
                "Reduce of empty array with no initial value",
              )))
            }
          },
        };
        for (index, element) in indexed {
          accumulator = self.call_function(
            &callback,
            vec![
              accumulator,
              element,
              JsValue::Number(index as f64),
              receiver.clone(),
            ],
          )?;
        }
        Ok(accumulator)
      }
      Method::Join | Method::ToString => {
        let separator = match arg(&args, 0) {
          JsValue::Undefined => String::from(","),
          separator if method == Method::Join => separator.to_js_string(),
          _ => String::from(","),
        };
        let joined = snapshot()
          .iter()
          .map(|element| {
            if element.is_nullish() {
              String::new()
            } else {
              element.to_js_string()
            }
          })
          .collect::<Vec<_>>()
          .join(&separator);
        Ok(JsValue::string(joined))
      }
      Method::Flat => {
        let depth = match arg(&args, 0) {
          JsValue::Undefined => 1,
          depth => depth.to_number().max(0.0) as usize,
        };
        let output = flatten(snapshot(), depth);
        Ok(self.new_array(output))
      }
      Method::Slice => {
        let elements = snapshot();
        let length = elements.len();
        let start = relative_index(arg(&args, 0), length, 0);
        let end = relative_index(arg(&args, 1), length, length);
        let output = elements
          .get(start..end.max(start))
          .map(<[JsValue]>::to_vec)
          .unwrap_or_default();
        Ok(self.new_array(output))
      }
      Method::Concat => {
        let mut output = snapshot();
        for value in args {
          match value {
            JsValue::Array(other) => output.extend(other.borrow().elements.iter().cloned()),
            other => output.push(other),
          }
        }
        Ok(self.new_array(output))
      }
      Method::Includes => {
        let needle = arg(&args, 0);
        Ok(JsValue::Bool(
          snapshot().iter().any(|element| element.same_value_zero(&needle)),
        ))
      }
      Method::IndexOf => {
        let needle = arg(&args, 0);
        Ok(JsValue::Number(
          snapshot()
            .iter()
            .position(|element| element.strict_equals(&needle))
            .map_or(-1.0, |index| index as f64),
        ))
      }
      Method::At => {
        let elements = snapshot();
        let index = number_arg(&args, 0);
        let index = if index.is_nan() { 0.0 } else { index.trunc() };
        let index = if index < 0.0 {
          elements.len() as f64 + index
        } else {
          index
        };
        Ok(if index < 0.0 {
          JsValue::Undefined
        } else {
          elements.get(index as usize).cloned().unwrap_or(JsValue::Undefined)
        })
      }
      Method::Push | Method::Pop | Method::Shift | Method::Unshift | Method::Reverse => {
        self.before_array_write(receiver)?;
        let mut array = array.borrow_mut();
        Ok(match method {
          Method::Push => {
            array.elements.extend(args);
            JsValue::Number(array.elements.len() as f64)
          }
          Method::Unshift => {
            array.elements.splice(0..0, args);
            JsValue::Number(array.elements.len() as f64)
          }
          Method::Pop => array.elements.pop().unwrap_or(JsValue::Undefined),
          Method::Shift => {
            if array.elements.is_empty() {
              JsValue::Undefined
            } else {
              array.elements.remove(0)
            }
          }
          _ => {
            array.elements.reverse();
            drop(array);
            receiver.clone()
          }
        })
      }
      Method::Sort => {
        self.before_array_write(receiver)?;
        let mut elements = snapshot();
        // Insertion sort keeps the comparator fallible and the sort stable.
        for i in 1..elements.len() {
          let mut j = i;
          while j > 0 {
            let ordering = self.compare_for_sort(&callback, &elements[j - 1], &elements[j])?;
            if ordering != Ordering::Greater {
              break;
            }
            elements.swap(j - 1, j);
            j -= 1;
          }
        }
        array.borrow_mut().elements = elements;
        Ok(receiver.clone())
      }
      _ => Err(not_a_function(receiver, method)),
    }
  }

  fn compare_for_sort(
    &mut self,
    comparator: &JsValue,
    a: &JsValue,
    b: &JsValue,
  ) -> Result<Ordering, EvaluationError> {
    match (a, b) {
      (JsValue::Undefined, JsValue::Undefined) => return Ok(Ordering::Equal),
      (JsValue::Undefined, _) => return Ok(Ordering::Greater),
      (_, JsValue::Undefined) => return Ok(Ordering::Less),
      _ => {}
    }
    if let JsValue::Function(_) = comparator {
      let result = self
        .call_function(comparator, vec![a.clone(), b.clone()])?
        .to_number();
      return Ok(if result > 0.0 {
        Ordering::Greater
      } else if result < 0.0 {
        Ordering::Less
      } else {
        Ordering::Equal
      });
    }
    Ok(utf16(&a.to_js_string()).cmp(&utf16(&b.to_js_string())))
  }

  pub(super) fn to_json(
    &mut self,
    value: &JsValue,
    depth: usize,
  ) -> Result<Option<serde_json::Value>, EvaluationError> {
    if depth > super::MAX_VALUE_DEPTH {
      return Err(EvaluationError::Type(String::from(
        "Converting circular structure to JSON",
      )));
    }
    Ok(Some(match value {
      JsValue::Undefined | JsValue::Function(_) => return Ok(None),
      JsValue::Null => serde_json::Value::Null,
      JsValue::Bool(value) => serde_json::Value::Bool(*value),
      JsValue::Number(number) => {
        if number.is_finite() && number.trunc() == *number && number.abs() < 9e15 {
          serde_json::Value::from(*number as i64)
        } else {
          serde_json::Number::from_f64(*number)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
        }
      }
      JsValue::String(value) => serde_json::Value::String(value.to_string()),
      JsValue::Array(array) => {
        let elements = array.borrow().elements.clone();
        let mut output = Vec::with_capacity(elements.len());
        for element in &elements {
          output.push(self.to_json(element, depth + 1)?.unwrap_or(serde_json::Value::Null));
        }
        serde_json::Value::Array(output)
      }
      JsValue::Object(_) | JsValue::Namespace(_) => {
        let mut output = serde_json::Map::new();
        for (key, property) in self.own_entries(value)? {
          if let Some(json) = self.to_json(&property, depth + 1)? {
            output.insert(key.to_string(), json);
          }
        }
        serde_json::Value::Object(output)
      }
    }))
  }

  fn from_json(&mut self, json: serde_json::Value) -> JsValue {
    match json {
      serde_json::Value::Null => JsValue::Null,
      serde_json::Value::Bool(value) => JsValue::Bool(value),
      serde_json::Value::Number(number) => JsValue::Number(number.as_f64().unwrap_or(f64::NAN)),
      serde_json::Value::String(value) => JsValue::string(value),
      serde_json::Value::Array(elements) => {
        let elements = elements
          .into_iter()
          .map(|element| self.from_json(element))
          .collect();
        self.new_array(elements)
      }
      serde_json::Value::Object(map) => {
        let properties = map
          .into_iter()
          .map(|(key, value)| (Rc::from(key.as_str()), self.from_json(value)))
          .collect();
        self.new_object(properties)
      }
    }
  }
}

fn flatten(elements: Vec<JsValue>, depth: usize) -> Vec<JsValue> {
  let mut output = Vec::new();
  for element in elements {
    match element {
      JsValue::Array(inner) if depth > 0 => {
        let inner = inner.borrow().elements.clone();
        output.extend(flatten(inner, depth - 1));
      }
      other => output.push(other),
    }
  }
  output
}

fn integer_to_radix(value: i64, radix: u32) -> String {
  if value == 0 {
    return String::from("0");
  }
  let mut magnitude = value.unsigned_abs();
  let mut digits = Vec::new();
  while magnitude > 0 {
    let digit = (magnitude % u64::from(radix)) as u32;
    digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
    magnitude /= u64::from(radix);
  }
  if value < 0 {
    digits.push('-');
  }
  digits.iter().rev().collect()
}

fn not_a_function(receiver: &JsValue, method: Method) -> EvaluationError {
  EvaluationError::Type(format!(
    "{method:?} is not a function on a value of type {}",
    receiver.type_of()
  ))
}
