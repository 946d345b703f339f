//! Small utility helpers used across modules.

use std::collections::BTreeSet;

/// Distinct lowercase word tokens of a practice sentence.
/// Alphabetic runs only; punctuation and digits act as separators.
/// Used to derive a level's word set when the backend omits one, and to
/// estimate word totals for the progress cache without a network call.
pub fn distinct_words(text: &str) -> Vec<String> {
  let mut seen = BTreeSet::new();
  let mut current = String::new();
  for ch in text.chars() {
    if ch.is_alphabetic() || ch == '\'' {
      current.extend(ch.to_lowercase());
    } else if !current.is_empty() {
      seen.insert(std::mem::take(&mut current));
    }
  }
  if !current.is_empty() {
    seen.insert(current);
  }
  seen.into_iter().collect()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    s.to_string()
  } else {
    let cut = s.char_indices().take_while(|(i, _)| *i < max).last().map(|(i, c)| i + c.len_utf8()).unwrap_or(0);
    format!("{}… ({} bytes total)", &s[..cut], s.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn distinct_words_dedupes_and_lowercases() {
    let words = distinct_words("The cat saw the cat's shadow.");
    assert_eq!(words, vec!["cat", "cat's", "saw", "shadow", "the"]);
  }

  #[test]
  fn distinct_words_empty_input() {
    assert!(distinct_words("  …  123 ").is_empty());
  }
}
