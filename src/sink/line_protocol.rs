//! InfluxDB line protocol encoding
//!
//! `measurement,tag=value field=1.5,other="text" 1700000000000000000`
//!
//! Tags are written in key order. Tags with an empty value are omitted since
//! the store rejects them. A sample without fields cannot be encoded.
//!
//! The protocol has no escape for line breaks in measurements, tag keys,
//! tag values or field keys; they are written as escaped spaces.

use std::fmt::Write;

use crate::{FieldValue, MetricSample};

use super::error::{SinkError, SinkResult};

fn escape_measurement(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            ',' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
}

/// Escaping shared by tag keys, tag values and field keys
fn escape_key(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            ',' | '=' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
}

fn escape_string_field(value: &str, out: &mut String) {
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn write_field_value(value: &FieldValue, out: &mut String) -> SinkResult<()> {
    match value {
        FieldValue::Integer(v) => {
            let _ = write!(out, "{v}i");
        }
        FieldValue::Float(v) => {
            if !v.is_finite() {
                return Err(SinkError::Encoding(format!(
                    "non-finite float field value {v}"
                )));
            }
            let _ = write!(out, "{v}");
        }
        FieldValue::Text(v) => escape_string_field(v, out),
    }
    Ok(())
}

/// Encode one sample as a single line (without trailing newline)
pub fn encode_sample(sample: &MetricSample) -> SinkResult<String> {
    if sample.name.is_empty() {
        return Err(SinkError::Encoding("empty measurement name".to_string()));
    }
    if sample.fields.is_empty() {
        return Err(SinkError::Encoding(format!(
            "measurement {} has no fields",
            sample.name
        )));
    }

    let mut line = String::with_capacity(64);
    escape_measurement(&sample.name, &mut line);

    for (key, value) in &sample.tags {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        line.push(',');
        escape_key(key, &mut line);
        line.push('=');
        escape_key(value, &mut line);
    }

    line.push(' ');
    for (i, (key, value)) in sample.fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        escape_key(key, &mut line);
        line.push('=');
        write_field_value(value, &mut line)?;
    }

    let nanos = sample.timestamp.timestamp_nanos_opt().ok_or_else(|| {
        SinkError::Encoding(format!("timestamp {} out of range", sample.timestamp))
    })?;
    let _ = write!(line, " {nanos}");

    Ok(line)
}

/// Encode a batch, one line per sample
pub fn encode_batch(samples: &[MetricSample]) -> SinkResult<String> {
    let mut body = String::new();
    for sample in samples {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&encode_sample(sample)?);
    }
    Ok(body)
}
