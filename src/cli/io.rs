//! Output helpers
//!
//! Every command prints exactly one JSON document on stdout. Logs go to
//! stderr so stdout stays machine-readable.

use std::io::{self, Write};

use serde_json::{json, Value};

/// Write a JSON value followed by a newline
pub fn write_json_to<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()
}

pub fn write_json(value: &Value) -> io::Result<()> {
    write_json_to(&mut io::stdout().lock(), value)
}

/// Write a successful command result
pub fn write_response(data: Value) -> io::Result<()> {
    write_json(&data)
}

/// Body printed for a failed command
pub fn error_body(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message,
        }
    })
}

pub fn write_error(code: &str, message: &str) -> io::Result<()> {
    write_json(&error_body(code, message))
}
