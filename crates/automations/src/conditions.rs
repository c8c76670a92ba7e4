//! Declarative condition evaluation over a JSON view of the user, the
//! triggering event and the clock.
//!
//! Field paths are dot separated (`user.balance`, `event.service`,
//! `user.attributes.active_vds`). A missing field or a type mismatch makes
//! the predicate false.

use chrono::{DateTime, Datelike, Timelike, Utc};
use growth_core::types::{AutomationEvent, User};
use serde_json::{json, Value};

use crate::types::Condition;

/// Builds the document conditions are evaluated against.
pub fn build_context(user: &User, event: Option<&AutomationEvent>, now: DateTime<Utc>) -> Value {
    let mut user_doc = serde_json::to_value(user).unwrap_or_else(|_| json!({}));
    if let Some(obj) = user_doc.as_object_mut() {
        obj.insert(
            "days_since_registration".into(),
            json!((now - user.registered_at).num_days()),
        );
        obj.insert(
            "days_inactive".into(),
            json!((now - user.last_active_at).num_days()),
        );
    }

    let event_doc = match event {
        Some(e) => {
            let mut doc = Value::Object(e.fields.clone());
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("type".into(), json!(e.event_type));
            }
            doc
        }
        None => Value::Null,
    };

    json!({
        "user": user_doc,
        "event": event_doc,
        "now": {
            "hour": now.hour(),
            "weekday": now.weekday().num_days_from_monday(),
        },
    })
}

/// Resolves a dot-separated path inside `context`.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(context, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Evaluates `condition`; `And` of nothing holds, `Or` of nothing does not.
pub fn evaluate(condition: &Condition, context: &Value) -> bool {
    match condition {
        Condition::And { conditions } => conditions.iter().all(|c| evaluate(c, context)),
        Condition::Or { conditions } => conditions.iter().any(|c| evaluate(c, context)),
        Condition::Eq { field, value } => {
            lookup(context, field).is_some_and(|actual| values_equal(actual, value))
        }
        Condition::Ne { field, value } => {
            lookup(context, field).is_some_and(|actual| !actual.is_null() && !values_equal(actual, value))
        }
        Condition::Range { field, min, max } => {
            if min.is_none() && max.is_none() {
                return false;
            }
            let Some(actual) = lookup(context, field).and_then(Value::as_f64) else {
                return false;
            };
            min.map_or(true, |m| actual >= m) && max.map_or(true, |m| actual <= m)
        }
        Condition::In { field, values } => lookup(context, field)
            .is_some_and(|actual| values.iter().any(|v| values_equal(actual, v))),
        Condition::Exists { field } => lookup(context, field).is_some_and(|v| !v.is_null()),
    }
}

/// Numbers compare by value so that `5` equals `5.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}
