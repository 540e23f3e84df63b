//! Word coordinate JSON.
//!
//! Accepted shapes:
//!
//! ```text
//! {"shadow": {"A": -0.4, "S": 0.3, "tau": 3.5}}
//! {"coordinates": {"shadow": [-0.4, 0.3, 3.5]}}
//! ```
//!
//! An object value missing `tau` falls back to `n`, then to the default.
//! Values that are neither an object nor a list of at least three numbers
//! are skipped and counted.

use std::path::Path;

use serde_json::{Map, Value};

use crate::model::{WordCoordinate, DEFAULT_AXIS, DEFAULT_TAU};
use crate::{Error, Result};

/// Result of decoding one coordinates document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateDecode {
    pub coordinates: Vec<WordCoordinate>,
    /// Words dropped because their value had no recognisable shape.
    pub skipped: u64,
    /// Axis values that were present but not numeric.
    pub coerced: u64,
}

/// Read and decode a coordinates file.
pub fn read_coordinates(path: &Path, source: &str) -> Result<CoordinateDecode> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let value: Value = serde_json::from_reader(std::io::BufReader::new(file))?;
    decode_coordinates(&value, source)
}

pub fn decode_coordinates(document: &Value, source: &str) -> Result<CoordinateDecode> {
    let root = document.as_object().ok_or_else(|| Error::Decode {
        line: 0,
        message: "coordinates document is not a JSON object".into(),
    })?;
    let words = match root.get("coordinates") {
        Some(Value::Object(nested)) => nested,
        _ => root,
    };

    let mut out = CoordinateDecode::default();
    for (word, value) in words {
        let decoded = match value {
            Value::Object(fields) => Some(from_object(fields, &mut out.coerced)),
            Value::Array(items) => from_list(items),
            _ => None,
        };
        match decoded {
            Some((a, s, tau)) if !word.trim().is_empty() => {
                out.coordinates.push(WordCoordinate::new(word, a, s, tau, source));
            }
            _ => {
                out.skipped += 1;
                tracing::debug!(word = %word, "Skipping coordinate with unrecognised shape");
            }
        }
    }
    Ok(out)
}

fn from_object(fields: &Map<String, Value>, coerced: &mut u64) -> (f64, f64, f64) {
    let mut number = |key: &str| -> Option<f64> {
        let value = fields.get(key)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Null => return None,
            _ => None,
        }
        .filter(|v| v.is_finite());
        if parsed.is_none() {
            *coerced += 1;
        }
        parsed
    };

    let a = number("A").unwrap_or(DEFAULT_AXIS);
    let s = number("S").unwrap_or(DEFAULT_AXIS);
    let tau = number("tau").or_else(|| number("n")).unwrap_or(DEFAULT_TAU);
    (a, s, tau)
}

fn from_list(items: &[Value]) -> Option<(f64, f64, f64)> {
    match items {
        [a, s, tau, ..] => Some((a.as_f64()?, s.as_f64()?, tau.as_f64()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_flat_and_nested_shapes_agree() {
        let flat = decode_coordinates(&json!({"w": {"A": 0.1, "S": 0.2, "tau": 2.0}}), "json").unwrap();
        let nested = decode_coordinates(&json!({"coordinates": {"w": [0.1, 0.2, 2.0]}}), "json").unwrap();
        assert_eq!(flat, nested);
        assert_eq!(flat.coordinates, vec![WordCoordinate::new("w", 0.1, 0.2, 2.0, "json")]);
    }

    #[test]
    fn test_tau_falls_back_to_n() {
        let out = decode_coordinates(&json!({"Shadow": {"A": -0.4, "S": 0.3, "n": 3.5}}), "json").unwrap();
        assert_eq!(out.coordinates[0].word, "shadow");
        assert_eq!(out.coordinates[0].tau, 3.5);

        let out = decode_coordinates(&json!({"anima": {"A": 0.2}}), "json").unwrap();
        assert_eq!((out.coordinates[0].s, out.coordinates[0].tau), (0.0, 2.5));
    }

    #[test]
    fn test_unrecognised_values_are_skipped() {
        let out = decode_coordinates(
            &json!({"a": "high", "b": [0.1, 0.2], "c": 7, "d": [0.1, 0.2, 3.0]}),
            "json",
        )
        .unwrap();
        assert_eq!(out.coordinates.len(), 1);
        assert_eq!(out.coordinates[0].word, "d");
        assert_eq!(out.skipped, 3);
    }

    #[test]
    fn test_non_object_document_is_an_error() {
        assert!(decode_coordinates(&json!([1, 2, 3]), "json").is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_coordinates(&dir.path().join("nope.json"), "json").unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
