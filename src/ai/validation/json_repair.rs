//! JSON Repair
//!
//! Permissive repair of almost-JSON produced by models. Repairs are applied in
//! levels of increasing aggressiveness and each level is re-parsed strictly:
//!
//! 1. Smart quotes, trailing commas, bracket balancing
//! 2. Unquoted keys and single-quoted strings
//! 3. Control characters, truncated strings, trailing garbage
//!
//! The repairer never locates JSON inside prose; callers hand it a candidate
//! that already starts at the opening bracket.

use serde_json::Value;
use tracing::debug;

use crate::types::{ChaplinError, Result};

// =============================================================================
// JsonRepairer
// =============================================================================

pub struct JsonRepairer {
    max_level: usize,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self { max_level: 3 }
    }

    /// Parse `candidate`, repairing it if the strict parse fails
    ///
    /// Returns `(value, was_repaired)`.
    pub fn parse_or_repair(&self, candidate: &str) -> Result<(Value, bool)> {
        let trimmed = candidate.trim().trim_start_matches('\u{feff}');

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok((value, false));
        }

        for level in 1..=self.max_level {
            let repaired = self.repair_level(trimmed, level);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                debug!(level, "JSON repaired");
                return Ok((value, true));
            }
        }

        Err(ChaplinError::parse(
            format!("JSON repair failed after {} levels", self.max_level),
            trimmed,
        ))
    }

    /// Apply every repair up to `level` and return the rewritten text
    pub fn repair_level(&self, s: &str, level: usize) -> String {
        let mut result = normalize_smart_quotes(s);

        if level >= 2 {
            result = convert_single_quotes(&result);
            result = quote_unquoted_keys(&result);
        }
        if level >= 3 {
            result = remove_control_chars(&result);
            result = close_truncated_strings(&result);
            result = truncate_to_valid(&result);
        }

        result = fix_trailing_commas(&result);
        balance_brackets(&result)
    }
}

// =============================================================================
// Repairs
// =============================================================================

/// Replace typographic quotes with their ASCII counterparts
pub fn normalize_smart_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            _ => c,
        })
        .collect()
}

/// Drop commas that directly precede a closing bracket
fn fix_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if escape {
            escape = false;
            result.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some(']') | Some('}')) {
                    continue;
                }
            }
            _ => {}
        }
        result.push(ch);
    }

    result
}

/// Append the closers missing at the end, innermost first
fn balance_brackets(s: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = s.to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Rewrite `'single quoted'` strings as double-quoted JSON strings
fn convert_single_quotes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_double = false;
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if in_double {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_double = false;
            }
            result.push(ch);
            continue;
        }

        match ch {
            '"' => {
                in_double = true;
                result.push(ch);
            }
            '\'' => {
                result.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some('\'') => result.push('\''),
                            Some(other) => {
                                result.push('\\');
                                result.push(other);
                            }
                            None => {}
                        },
                        '\'' => break,
                        '"' => result.push_str("\\\""),
                        _ => result.push(inner),
                    }
                }
                result.push('"');
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Quote bare identifiers used as object keys: `{name: 1}` becomes `{"name": 1}`
fn quote_unquoted_keys(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + 16);
    let mut in_string = false;
    let mut escape = false;
    let mut expecting_key = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            result.push(ch);
            i += 1;
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                expecting_key = false;
            }
            '{' | ',' => expecting_key = true,
            c if c.is_whitespace() => {}
            c if expecting_key && (c.is_alphabetic() || c == '_' || c == '$') => {
                let start = i;
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_alphanumeric() || matches!(chars[end], '_' | '$' | '-'))
                {
                    end += 1;
                }
                let mut look = end;
                while look < chars.len() && chars[look].is_whitespace() {
                    look += 1;
                }
                if look < chars.len() && chars[look] == ':' {
                    result.push('"');
                    result.extend(&chars[start..end]);
                    result.push('"');
                    i = end;
                    expecting_key = false;
                    continue;
                }
                expecting_key = false;
            }
            _ => expecting_key = false,
        }

        result.push(ch);
        i += 1;
    }

    result
}

/// Strip control characters other than ordinary whitespace
fn remove_control_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Close a string left open at a line break
fn close_truncated_strings(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    let mut in_string = false;
    let mut escape = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            result.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '\n' | '\r' if in_string => {
                result.push('"');
                in_string = false;
            }
            _ => {}
        }
        result.push(ch);
    }

    result
}

/// Cut anything after the last point where every bracket was closed
fn truncate_to_valid(s: &str) -> String {
    let mut depth: i32 = 0;
    let mut last_valid = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    last_valid = i + ch.len_utf8();
                }
            }
            _ => {}
        }
    }

    if last_valid > 0 && last_valid < s.len() {
        s[..last_valid].to_string()
    } else {
        s.to_string()
    }
}
