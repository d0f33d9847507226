//! # Transferable scanner
//!
//! Collects the binary buffers in a payload so they can be handed over
//! alongside the message instead of being copied into it.
//!
//! Descends into lists and maps. Inputs are assumed acyclic, which `Value`
//! guarantees by construction. Every other leaf is ignored.

use bytes::Bytes;

use crate::value::Value;

/// Finds every binary buffer in `values`, depth first, in order.
pub fn find_transferables<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<Bytes> {
    let mut found = Vec::new();
    for value in values {
        collect(value, &mut found);
    }
    found
}

fn collect(value: &Value, found: &mut Vec<Bytes>) {
    match value {
        Value::Bytes(buf) => found.push(buf.clone()),
        Value::List(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Map(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_nested_buffers() {
        let inner: Value = [
            ("thing".to_string(), Value::from(vec![1u8, 2, 3])),
            ("multiplier".to_string(), Value::from(2)),
        ]
        .into_iter()
        .collect();
        let args = vec![inner, Value::List(vec![Value::from(vec![9u8]), Value::from("x")])];

        let found = find_transferables(&args);

        assert_eq!(found, vec![Bytes::from_static(&[1, 2, 3]), Bytes::from_static(&[9])]);
    }

    #[test]
    fn test_ignores_plain_leaves() {
        let args = vec![Value::from("text"), Value::from(1), Value::Null, Value::error("boom")];
        assert!(find_transferables(&args).is_empty());
    }

    #[test]
    fn test_shares_the_underlying_buffer() {
        let buf = Bytes::from(vec![7u8; 64]);
        let args = vec![Value::Bytes(buf.clone())];

        let found = find_transferables(&args);

        assert_eq!(found[0].as_ptr(), buf.as_ptr());
    }
}
