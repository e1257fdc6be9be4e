/// Turn a human name into a step id.
///
/// Lowercase ASCII letters and digits are kept, whitespace, `_` and `-` runs
/// collapse to a single `-`, everything else is dropped. Returns `None` when
/// nothing usable is left.
pub fn slugify(value: &str) -> Option<String> {
  let mut out = String::new();
  let mut prev_was_dash = false;

  for ch in value.trim().chars() {
    let normalized = match ch {
      'a'..='z' | '0'..='9' => ch,
      'A'..='Z' => ch.to_ascii_lowercase(),
      _ if ch.is_whitespace() || ch == '_' || ch == '-' => '-',
      _ => continue,
    };

    if normalized == '-' {
      if out.is_empty() || prev_was_dash {
        continue;
      }
      prev_was_dash = true;
    } else {
      prev_was_dash = false;
    }
    out.push(normalized);
  }

  while out.ends_with('-') {
    out.pop();
  }

  (!out.is_empty()).then_some(out)
}
