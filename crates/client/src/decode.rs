// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Decoding of JSON-encoded record payloads.
//!
//! Record endpoints return their rows as JSON text embedded in the response
//! (`json_encoded_response`, `records_json`). A payload is either one JSON
//! text or an array of them; arrays are decoded element by element and keep
//! their order.

use serde_json::Value;
use snafu::ResultExt;

use crate::types::{ClientError, ClientResult, ParseSnafu};

const NON_FINITE_TOKENS: [&str; 3] = ["Infinity", "-Infinity", "NaN"];

/// Decodes a payload as-is.
pub fn decode_regular(payload: &Value) -> ClientResult<Value> { decode_with(payload, decode_str) }

/// Decodes a payload, turning `"Infinity"`, `"-Infinity"` and `"NaN"`
/// string values into `null`.
pub fn decode_no_inf_nan(payload: &Value) -> ClientResult<Value> {
    decode_with(payload, decode_str_no_inf_nan)
}

/// Decodes with the mode selected by `sanitize`.
pub fn decode(payload: &Value, sanitize: bool) -> ClientResult<Value> {
    if sanitize {
        decode_no_inf_nan(payload)
    } else {
        decode_regular(payload)
    }
}

pub fn decode_str(text: &str) -> ClientResult<Value> { serde_json::from_str(text).context(ParseSnafu) }

pub fn decode_str_no_inf_nan(text: &str) -> ClientResult<Value> {
    let mut value = decode_str(text)?;
    null_non_finite(&mut value);
    Ok(value)
}

/// Serializes a value to JSON text; an array becomes an array of texts.
pub fn encode(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(encode).collect()),
        other => Value::String(other.to_string()),
    }
}

fn decode_with(payload: &Value, parse: fn(&str) -> ClientResult<Value>) -> ClientResult<Value> {
    match payload {
        Value::Array(items) => items
            .iter()
            .map(|item| decode_with(item, parse))
            .collect::<ClientResult<Vec<_>>>()
            .map(Value::Array),
        Value::String(text) => parse(text),
        Value::Object(_) => Err(ClientError::MalformedPayload {
            message: "expected JSON text, found an object".to_string(),
        }),
        scalar => Ok(scalar.clone()),
    }
}

fn null_non_finite(value: &mut Value) {
    match value {
        Value::String(s) if NON_FINITE_TOKENS.contains(&s.as_str()) => *value = Value::Null,
        Value::Array(items) => items.iter_mut().for_each(null_non_finite),
        Value::Object(map) => map.values_mut().for_each(null_non_finite),
        _ => {}
    }
}
