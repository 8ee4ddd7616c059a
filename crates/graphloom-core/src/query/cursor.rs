//! Value-based cursors and keyset boundaries.
//!
//! A cursor is the URL-safe base64 of the JSON map `{key name -> value}` for
//! every key of the order it was issued under. It is only valid for an order
//! with exactly the same key names.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use graphloom_proto::Value;

use super::condition::{Bindings, CompareOp, Condition, Operand};
use super::order::{Order, OrderKey, SortDirection};
use crate::error::Error;

/// Decoded cursor contents, keyed by order key name.
pub type CursorValues = BTreeMap<String, Value>;

/// Cursor encoding and decoding.
pub struct Cursor;

impl Cursor {
    /// Encode the observed key values of one row.
    ///
    /// Keys missing from `observed` encode as null. The output is
    /// deterministic for the same order and values.
    pub fn encode(order: &Order, observed: &BTreeMap<String, Value>) -> Result<String, Error> {
        let values: CursorValues = order
            .key_names()
            .map(|name| {
                let value = observed.get(name).cloned().unwrap_or(Value::Null);
                (name.to_string(), value)
            })
            .collect();
        let json = serde_json::to_vec(&values)
            .map_err(|e| Error::InvalidCursor(format!("cannot encode cursor: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a cursor issued under an order with the same key names.
    pub fn decode(order: &Order, cursor: &str) -> Result<CursorValues, Error> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|e| Error::InvalidCursor(format!("not a cursor: {}", e)))?;
        let values: CursorValues = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidCursor(format!("not a cursor: {}", e)))?;

        let matches = values.len() == order.keys().len()
            && order.key_names().all(|name| values.contains_key(name));
        if !matches {
            return Err(Error::InvalidCursor(format!(
                "cursor keys [{}] do not match order keys [{}]",
                values.keys().cloned().collect::<Vec<_>>().join(", "),
                order.key_names().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(values)
    }
}

/// Build the keyset boundary for rows strictly after (`forwards`) or strictly
/// before the cursor position.
///
/// For keys `k1..kn` this is `k1 > c1 OR (k1 = c1 AND (k2 > c2 OR (...)))`,
/// where `>` becomes `<` for a key whose effective direction (its sort
/// direction, flipped when going backwards) is descending.
///
/// Nulls sort after every other value. A null cursor value compares through
/// `IS NULL` and allocates no parameter. Nullable keys also admit nulls past
/// a non-null cursor value when ascending.
pub fn seek_condition(
    order: &Order,
    values: &CursorValues,
    forwards: bool,
    bindings: &mut Bindings,
    operand_of: impl Fn(&OrderKey) -> Operand,
) -> Condition {
    let mut acc: Option<Condition> = None;
    for key in order.keys().iter().rev() {
        let value = values.get(&key.name).cloned().unwrap_or(Value::Null);
        let operand = operand_of(key);
        let descending = (key.direction == SortDirection::Desc) != !forwards;
        let (strict, equal) = key_bounds(key, operand, value, descending, bindings);

        acc = Some(match acc {
            None => strict,
            Some(rest) => Condition::or([strict, Condition::and([equal, rest])]),
        });
    }
    acc.unwrap_or(Condition::True)
}

/// The `(past, equal)` conditions of one key.
fn key_bounds(
    key: &OrderKey,
    operand: Operand,
    value: Value,
    descending: bool,
    bindings: &mut Bindings,
) -> (Condition, Condition) {
    let is_null = Condition::IsNull(operand.clone());
    if value.is_null() {
        let past = if descending {
            Condition::not(is_null.clone())
        } else {
            Condition::False
        };
        return (past, is_null);
    }

    let param = bindings.param(value);
    let compare = Condition::Compare {
        operand: operand.clone(),
        op: if descending { CompareOp::Lt } else { CompareOp::Gt },
        param: param.clone(),
    };
    let past = if key.nullable && !descending {
        Condition::or([compare, is_null])
    } else {
        compare
    };
    let equal = Condition::Compare {
        operand,
        op: CompareOp::Eq,
        param,
    };
    (past, equal)
}
