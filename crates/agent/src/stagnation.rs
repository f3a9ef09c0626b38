//! Detection of an agent repeating the same tool batch.
//!
//! A batch signature is the sorted list of `name:sha256(args)` entries, so
//! call order and call ids don't matter. Arguments are hashed in canonical
//! form (object keys sorted recursively).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Signature of a single call.
pub fn call_signature(name: &str, arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{name}:{hex}")
}

/// Order-independent signature of a batch.
pub fn batch_signature<'a>(calls: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Vec<String> {
    let mut signatures: Vec<String> = calls
        .into_iter()
        .map(|(name, arguments)| call_signature(name, arguments))
        .collect();
    signatures.sort();
    signatures
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Counts consecutive identical batches.
#[derive(Debug)]
pub struct StagnationDetector {
    threshold: u32,
    last: Option<Vec<String>>,
    repeats: u32,
}

impl StagnationDetector {
    /// `threshold` is the number of identical consecutive batches that
    /// counts as stagnation; values below 2 are raised to 2.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(2),
            last: None,
            repeats: 0,
        }
    }

    /// Record a batch; true once it has been seen `threshold` times in a row.
    pub fn record(&mut self, signature: Vec<String>) -> bool {
        if self.last.as_ref() == Some(&signature) {
            self.repeats += 1;
        } else {
            self.last = Some(signature);
            self.repeats = 1;
        }
        self.repeats >= self.threshold
    }

    /// How many times in a row the latest batch has been seen.
    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_signature() {
        let a = json!({"pattern": "ERROR", "options": {"b": 1, "a": [1, {"y": 2, "x": 1}]}});
        let b = json!({"options": {"a": [1, {"x": 1, "y": 2}], "b": 1}, "pattern": "ERROR"});
        assert_eq!(call_signature("grep", &a), call_signature("grep", &b));
    }

    #[test]
    fn different_arguments_or_names_differ() {
        let args = json!({"pattern": "ERROR"});
        assert_ne!(call_signature("grep", &args), call_signature("grep", &json!({"pattern": "WARN"})));
        assert_ne!(call_signature("grep", &args), call_signature("search", &args));
    }

    #[test]
    fn batch_order_is_ignored() {
        let x = json!({"path": "a"});
        let y = json!({"path": "b"});
        assert_eq!(
            batch_signature([("read_file", &x), ("read_file", &y)]),
            batch_signature([("read_file", &y), ("read_file", &x)])
        );
    }

    #[test]
    fn trips_on_third_identical_batch() {
        let args = json!({"pattern": "ERROR"});
        let mut detector = StagnationDetector::new(3);
        assert!(!detector.record(batch_signature([("grep", &args)])));
        assert!(!detector.record(batch_signature([("grep", &args)])));
        assert!(detector.record(batch_signature([("grep", &args)])));
        assert_eq!(detector.repeats(), 3);
    }

    #[test]
    fn a_different_batch_resets_the_count() {
        let a = json!({"pattern": "ERROR"});
        let b = json!({"pattern": "WARN"});
        let mut detector = StagnationDetector::new(3);
        detector.record(batch_signature([("grep", &a)]));
        detector.record(batch_signature([("grep", &a)]));
        assert!(!detector.record(batch_signature([("grep", &b)])));
        assert!(!detector.record(batch_signature([("grep", &a)])));
        assert_eq!(detector.repeats(), 1);
    }

    #[test]
    fn threshold_has_a_floor() {
        assert_eq!(StagnationDetector::new(0).threshold(), 2);
    }
}
