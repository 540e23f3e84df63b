//! Tolerant field handling for historical CSV producers.
//!
//! Old exports were written by hand-rolled emitters that put a space after
//! every comma (`"id", "adj", 0.5`), quoted numbers inconsistently, and
//! sometimes wrapped values in two layers of quotes (`""forest""`). Later
//! ones went through a standard CSV writer, which escapes quotes as `""` and
//! keeps newlines inside quoted fields. Both shapes must come back the same.
//! Nothing here ever fails: a field that cannot be understood comes back
//! empty or as the caller's default.

/// Physical lines one record may span before the quote is given up on.
pub const MAX_RECORD_LINES: usize = 64;

/// True when `text` ends inside a quoted run, so the record continues on the
/// next physical line. Escaped quotes (`""`) keep the parity even.
pub fn has_open_quote(text: &str) -> bool {
    text.bytes().filter(|&b| b == b'"').count() % 2 == 1
}

/// Split one record into raw fields.
///
/// Commas inside a quoted run do not split, and neither do newlines. Quote
/// characters are kept in the returned fields; [`clean_value`] removes them.
pub fn split_line(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            '\r' if in_quotes => {}
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Strip whitespace and surrounding quotes.
///
/// Inside a quoted field, `""` is an escaped quote. A field whose quoted body
/// has no escapes but is itself wrapped in quotes is the doubly quoted
/// historical form and loses both layers.
pub fn clean_value(raw: &str) -> String {
    let value = raw.trim();
    let Some(body) = unwrap_quotes(value) else {
        return value.to_string();
    };
    if body.contains("\"\"") {
        return body.replace("\"\"", "\"").trim().to_string();
    }
    let body = body.trim();
    unwrap_quotes(body).unwrap_or(body).trim().to_string()
}

fn unwrap_quotes(value: &str) -> Option<&str> {
    (value.len() >= 2 && value.starts_with('"') && value.ends_with('"')).then(|| &value[1..value.len() - 1])
}

/// Clean a numeric field: like [`clean_value`], then drop any stray quotes.
pub fn clean_number(raw: &str) -> String {
    clean_value(raw).replace('"', "").trim().to_string()
}

/// Parse a float the way historical files need it; `None` means "use the default".
pub fn parse_float(raw: &str) -> Option<f64> {
    let cleaned = clean_number(raw);
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integer; accepts `"3"` and `3.0`, rejects anything else.
pub fn parse_int(raw: &str) -> Option<i32> {
    let cleaned = clean_number(raw);
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null") {
        return None;
    }
    cleaned.parse::<i32>().ok().or_else(|| {
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
            .map(|v| v as i32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_space_after_comma() {
        let fields = split_line(r#""adj1", "noun1", 0.5, -0.2, "2.5", "corpus""#);
        assert_eq!(fields.len(), 6);
        assert_eq!(clean_value(&fields[1]), "noun1");
        assert_eq!(clean_value(&fields[5]), "corpus");
    }

    #[test]
    fn test_split_keeps_quoted_commas() {
        let fields = split_line(r#""Jung, C.G.", "b1", "Psychology and Alchemy", "jung.txt""#);
        assert_eq!(fields.len(), 4);
        assert_eq!(clean_value(&fields[0]), "Jung, C.G.");
    }

    #[test]
    fn test_doubly_quoted() {
        let fields = split_line(r#"""forest"", 1"#);
        assert_eq!(clean_value(&fields[0]), "forest");
        assert_eq!(parse_float(&fields[1]), Some(1.0));
    }

    #[test]
    fn test_parse_float_defaults() {
        assert_eq!(parse_float(r#" "2.5" "#), Some(2.5));
        assert_eq!(parse_float("NULL"), None);
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_float("NaN"), None);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("7"), Some(7));
        assert_eq!(parse_int("\"7\""), Some(7));
        assert_eq!(parse_int("7.0"), Some(7));
        assert_eq!(parse_int("7.5"), None);
        assert_eq!(parse_int("seven"), None);
    }

    #[test]
    fn test_trailing_newline() {
        let fields = split_line("a, b\r\n");
        assert_eq!(fields, vec!["a".to_string(), " b".to_string()]);
    }

    #[test]
    fn test_escaped_quotes_unescape() {
        let fields = split_line(r#""Grimm","bk3","Anonymous ""Ballads""","t.txt""#);
        assert_eq!(fields.len(), 4);
        assert_eq!(clean_value(&fields[2]), r#"Anonymous "Ballads""#);
        assert_eq!(clean_value(r#""""Ballads""""#), r#""Ballads""#);
        assert_eq!(clean_value(r#""""""#), "\"");
        assert_eq!(clean_value(r#""""#), "");
    }

    #[test]
    fn test_quoted_newline_stays_in_field() {
        assert!(has_open_quote(r#""bk1","Line one"#));
        let record = "\"bk1\",\"Line one\r\nLine two\",\"X\"";
        assert!(!has_open_quote(record));
        let fields = split_line(record);
        assert_eq!(fields.len(), 3);
        assert_eq!(clean_value(&fields[1]), "Line one\nLine two");
    }
}
