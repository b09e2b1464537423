use serde_json::{Value, json};

use super::{Diagnostic, SourceMap};

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = json!({
        "phase": d.phase.as_str(),
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = Value::from(code);
    }
    if let Some(line) = d.line {
        obj["line"] = Value::from(line);
    }
    if let Some(module) = &d.module {
        obj["module"] = Value::from(module.as_str());
    }
    if let Some(label) = &d.label {
        let mut span = json!({
            "start": label.span.start,
            "end": label.span.end,
            "message": label.message,
        });
        if let Some(source) = &d.source {
            let (line, col) = SourceMap::new(source).lookup(label.span.start);
            span["line"] = Value::from(line);
            span["col"] = Value::from(col);
        }
        obj["span"] = span;
    }
    if let Some(s) = &d.suggestion {
        obj["suggestion"] = Value::from(s.as_str());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"phase":"compile","message":"internal error serializing diagnostic"}"#.to_string())
}
