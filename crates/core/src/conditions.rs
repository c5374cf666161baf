//! Readiness and summary rules over `status.conditions` of a Flux object.

use serde_json::Value as Json;

use crate::{StatusSnapshot, StatusVerdict};

const READY: &str = "Ready";
const TRUE: &str = "True";
const FALSE: &str = "False";

struct Condition<'a> {
    kind: &'a str,
    status: &'a str,
    message: &'a str,
}

fn field<'a>(cond: &'a Json, key: &str) -> &'a str {
    cond.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// A fresh object may have no status or no condition list yet; the error is the summary to show for that.
fn conditions(obj: &Json) -> Result<Vec<Condition<'_>>, &'static str> {
    let status = obj.get("status").filter(|s| s.is_object()).ok_or("unknown")?;
    let list = status.get("conditions").and_then(|c| c.as_array()).ok_or("no conditions")?;
    Ok(list
        .iter()
        .filter(|c| c.is_object())
        .map(|c| Condition { kind: field(c, "type"), status: field(c, "status"), message: field(c, "message") })
        .collect())
}

/// True iff a `Ready` condition with status `True` exists.
pub fn is_ready(obj: &Json) -> bool {
    match conditions(obj) {
        Ok(conds) => conds.iter().any(|c| c.kind == READY && c.status == TRUE),
        Err(_) => false,
    }
}

/// Condition summary for progress lines.
///
/// Conditions are rendered in list order: the `Ready` condition as
/// `Ready=<status> (<message>)` and any other `False` condition carrying a
/// message as `<type>=<status>: <message>`. A `Ready=True` short-circuits.
pub fn summarize(obj: &Json) -> StatusSnapshot {
    let conds = match conditions(obj) {
        Ok(c) => c,
        Err(missing) => return StatusSnapshot::new(StatusVerdict::Unknown, missing),
    };
    let mut parts = Vec::new();
    for c in &conds {
        if c.kind == READY {
            if c.status == TRUE {
                return StatusSnapshot::new(StatusVerdict::Ready, "Ready=True");
            }
            if c.message.is_empty() {
                parts.push(format!("{}={}", c.kind, c.status));
            } else {
                parts.push(format!("{}={} ({})", c.kind, c.status, c.message));
            }
        } else if c.status == FALSE && !c.message.is_empty() {
            parts.push(format!("{}={}: {}", c.kind, c.status, c.message));
        }
    }
    if parts.is_empty() {
        return StatusSnapshot::new(StatusVerdict::Unknown, "checking");
    }
    StatusSnapshot::new(StatusVerdict::NotReady, parts.join(", "))
}
