//! One-line JSON result printed on stdout when the process finishes.

use serde_json::json;

use crate::engine::RunSummary;
use crate::error::{Aborted, ConfigError};

pub fn ok(result: serde_json::Value) -> serde_json::Value {
    json!({
        "ok": true,
        "result": result
    })
}

pub fn err(code: &str, message: impl Into<String>, details: Option<serde_json::Value>) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "ok": false,
        "error": error,
    })
}

pub fn completed(summary: &RunSummary) -> serde_json::Value {
    ok(serde_json::to_value(summary).unwrap_or_else(|_| json!({ "processed": summary.processed })))
}

pub fn config_failed(error: &ConfigError) -> serde_json::Value {
    err(error.code(), error.to_string(), None)
}

pub fn aborted(error: &Aborted) -> serde_json::Value {
    err(
        error.source.code(),
        error.to_string(),
        Some(json!({
            "processed": error.processed,
            "pagesCommitted": error.pages_committed,
            "page": error.source.page(),
        })),
    )
}
