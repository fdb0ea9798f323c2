//! PostgreSQL array-literal parsing, e.g. `{foo,bar,"baz,qux"}` → `["foo",
//! "bar", "baz,qux"]`, and the inverse.
//!
//! Only the one-dimensional text-array shape the KV mirror's array-valued
//! presets and status fields actually use is supported: no nested arrays,
//! no `NULL` element (an absent element is represented as the empty
//! string, matching how the daemon's own string-valued fields behave).

/// Parse a PostgreSQL array literal into its element list. Returns `None`
/// if `s` isn't wrapped in `{}`.
pub fn parse_pg_array(s: &str) -> Option<Vec<String>> {
    let s = s.trim();
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }

    let mut elements = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        let mut current = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            current.push(escaped);
                        }
                    }
                    Some('"') => break,
                    Some(c) => current.push(c),
                    None => break,
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                current.push(c);
                chars.next();
            }
        }
        elements.push(current);
        match chars.next() {
            Some(',') => continue,
            _ => break,
        }
    }
    Some(elements)
}

/// Format an element list back into a PostgreSQL array literal, quoting
/// any element that contains a comma, brace, quote, backslash, or is empty.
pub fn format_pg_array(elements: &[String]) -> String {
    let mut out = String::from("{");
    for (i, e) in elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if needs_quoting(e) {
            out.push('"');
            for c in e.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(e);
        }
    }
    out.push('}');
    out
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\' | ' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_elements() {
        assert_eq!(
            parse_pg_array("{foo,bar,baz}").unwrap(),
            vec!["foo".to_string(), "bar".to_string(), "baz".to_string()]
        );
    }

    #[test]
    fn parses_empty_array() {
        assert_eq!(parse_pg_array("{}").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn parses_quoted_element_with_comma() {
        assert_eq!(
            parse_pg_array(r#"{foo,"bar,baz",qux}"#).unwrap(),
            vec!["foo".to_string(), "bar,baz".to_string(), "qux".to_string()]
        );
    }

    #[test]
    fn parses_escaped_quote_inside_element() {
        assert_eq!(
            parse_pg_array(r#"{"say \"hi\""}"#).unwrap(),
            vec![r#"say "hi""#.to_string()]
        );
    }

    #[test]
    fn rejects_unwrapped_input() {
        assert!(parse_pg_array("foo,bar").is_none());
    }

    #[test]
    fn round_trips_through_format_and_parse() {
        let original = vec!["foo".to_string(), "bar,baz".to_string(), "".to_string(), "qux".to_string()];
        let formatted = format_pg_array(&original);
        let parsed = parse_pg_array(&formatted).unwrap();
        assert_eq!(parsed, original);
    }
}
