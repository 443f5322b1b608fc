use xxhash_rust::xxh3::xxh3_64;

/// Number of base36 digits needed to render any `u64`.
pub const FINGERPRINT_LEN: usize = 13;

/// 64 bit content fingerprint of `key`.
///
/// This is a pure function of the input bytes; it must stay stable across builds and
/// processes because class names derived from it are shared between bundles.
pub fn fingerprint(key: &str) -> u64 {
  xxh3_64(key.as_bytes())
}

/// Fingerprint `key` and render it as a fixed width base36 token.
pub fn hash(key: &str) -> String {
  to_base36(fingerprint(key))
}

/// Atomic class name for a normalized declaration key.
///
/// The prefix keeps the name a valid CSS identifier when the fingerprint starts with a digit.
pub fn class_name_for(prefix: &str, key: &str) -> String {
  let mut class_name = String::with_capacity(prefix.len() + FINGERPRINT_LEN);
  class_name.push_str(prefix);
  class_name.push_str(&hash(key));
  class_name
}

/// Render `num` in base36, left padded with zeroes to [`FINGERPRINT_LEN`] characters.
pub fn to_base36(mut num: u64) -> String {
  const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

  let mut buf = [b'0'; FINGERPRINT_LEN];
  let mut idx = buf.len();
  while num > 0 {
    idx -= 1;
    buf[idx] = DIGITS[(num % 36) as usize];
    num /= 36;
  }

  buf.iter().map(|byte| *byte as char).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_to_base36_pads_small_numbers() {
    assert_eq!(to_base36(0), "0000000000000");
    assert_eq!(to_base36(35), "000000000000z");
    assert_eq!(to_base36(36 * 36 * 36 + 1), "0000000001001");
  }

  #[test]
  fn test_to_base36_max_value_fits() {
    assert_eq!(to_base36(u64::MAX), "3w5e11264sgsf");
  }

  #[test]
  fn test_hash_is_deterministic() {
    assert_eq!(hash("&\u{1}padding-left\u{1}1px"), hash("&\u{1}padding-left\u{1}1px"));
    assert_eq!(fingerprint("display"), fingerprint("display"));
  }

  #[test]
  fn test_hash_has_fixed_length() {
    for key in ["", "a", "display", "@media (min-width: 100px)&:hover\u{1}color\u{1}red"] {
      let hashed = hash(key);
      assert_eq!(hashed.len(), FINGERPRINT_LEN);
      assert!(hashed
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
  }

  #[test]
  fn test_class_name_for_prepends_prefix() {
    let class_name = class_name_for("f", "color\u{1}red");
    assert_eq!(class_name.len(), 1 + FINGERPRINT_LEN);
    assert_eq!(&class_name[1..], hash("color\u{1}red"));
    assert!(class_name.starts_with('f'));
  }

  #[test]
  fn test_hash_distinguishes_inputs() {
    assert_ne!(hash("color\u{1}red"), hash("color\u{1}blue"));
    assert_ne!(hash("&:hover\u{1}color\u{1}red"), hash("&\u{1}color\u{1}red"));
  }
}
