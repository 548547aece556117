//! Built-in semantic type handlers

use super::{value_to_sql, FallbackHook, PropertyType};
use crate::errors::{MapError, Result};
use crate::value::{SqlValue, Value, STORAGE_DATE_FORMAT};
use base64::Engine as _;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};

pub(crate) static STRING: StringType = StringType;
pub(crate) static INT: IntType = IntType;
pub(crate) static FLOAT: FloatType = FloatType;
pub(crate) static BOOL: BoolType = BoolType;
pub(crate) static BOOL_AS_INT: BoolAsIntType = BoolAsIntType;
pub(crate) static DATE: DateType = DateType;
pub(crate) static ARRAY_CSV: ArrayCsvType = ArrayCsvType;
pub(crate) static ARRAY_SERIALIZED: ArraySerializedType = ArraySerializedType;
pub(crate) static JSON: JsonType = JsonType;
pub(crate) static JSON_OBJECT: JsonObjectType = JsonObjectType;
pub(crate) static BINARY_HEX: BinaryHexType = BinaryHexType;
pub(crate) static BASE64: Base64Type = Base64Type;
pub(crate) static TERM_REF_SINGLE: TermRefSingleType = TermRefSingleType;
pub(crate) static TERM_REF_ARRAY: TermRefArrayType = TermRefArrayType;
pub(crate) static SLUG: SlugType = SlugType;

fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "y"
        ),
        Value::Json(serde_json::Value::Bool(b)) => *b,
        Value::Json(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Json(serde_json::Value::String(s)) => truthy(&Value::Text(s.clone())),
        _ => false,
    }
}

fn parse_int(raw: &Value) -> i64 {
    match raw {
        Value::Int(n) => *n,
        Value::Float(f) if f.is_finite() => *f as i64,
        Value::Bool(b) => i64::from(*b),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Date(d) => d.timestamp(),
        Value::Json(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::Json(serde_json::Value::String(s)) => parse_int(&Value::Text(s.clone())),
        Value::Json(serde_json::Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

fn parse_float(raw: &Value) -> f64 {
    let f = match raw {
        Value::Float(f) => *f,
        Value::Int(n) => *n as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Json(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Value::Json(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if f.is_finite() {
        f
    } else {
        0.0
    }
}

fn parse_date(raw: &Value) -> Option<DateTime<Utc>> {
    let parsed = match raw {
        Value::Date(d) => Some(*d),
        Value::Int(n) => DateTime::from_timestamp(*n, 0),
        Value::Text(s) => parse_date_str(s.trim()),
        Value::Json(serde_json::Value::String(s)) => parse_date_str(s.trim()),
        _ => None,
    };
    parsed
        .filter(|d| (1..=9999).contains(&d.year()))
        .and_then(|d| d.with_nanosecond(0))
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() || s.starts_with("0000-00-00") {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, STORAGE_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Split comma/whitespace separated text into trimmed, non-empty pieces
pub fn split_list(s: &str, on_whitespace: bool) -> Vec<String> {
    s.split(|c: char| c == ',' || (on_whitespace && c.is_whitespace()))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| (0x20..=0x7e).contains(b) || matches!(b, b'\t' | b'\n' | b'\r'))
}

fn is_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub struct StringType;

impl PropertyType for StringType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Text(raw.to_text()))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Text(edit.to_text())
    }

    fn zero(&self) -> Value {
        Value::Text(String::new())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntType;

impl PropertyType for IntType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Int(parse_int(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Integer(parse_int(edit))
    }

    fn zero(&self) -> Value {
        Value::Int(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FloatType;

impl PropertyType for FloatType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Float(parse_float(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Real(parse_float(edit))
    }

    fn zero(&self) -> Value {
        Value::Float(0.0)
    }
}

/// Boolean stored as the literal strings `yes` / `no`
#[derive(Debug, Clone, Copy)]
pub struct BoolType;

impl PropertyType for BoolType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Bool(truthy(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let literal = if truthy(edit) { "yes" } else { "no" };
        SqlValue::Text(literal.to_string())
    }

    fn zero(&self) -> Value {
        Value::Bool(false)
    }
}

/// Boolean stored as integer 1 / 0
#[derive(Debug, Clone, Copy)]
pub struct BoolAsIntType;

impl PropertyType for BoolAsIntType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Bool(truthy(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Integer(i64::from(truthy(edit)))
    }

    fn zero(&self) -> Value {
        Value::Bool(false)
    }
}

/// UTC timestamp, stored as `YYYY-MM-DD HH:MM:SS`; unparseable input is null
#[derive(Debug, Clone, Copy)]
pub struct DateType;

impl PropertyType for DateType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(parse_date(raw).map(Value::Date).unwrap_or(Value::Null))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        match parse_date(edit) {
            Some(d) => SqlValue::Text(d.format(STORAGE_DATE_FORMAT).to_string()),
            None => SqlValue::Null,
        }
    }

    fn view(&self, edit: &Value) -> Value {
        match edit {
            Value::Date(d) => Value::Text(d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            _ => Value::Null,
        }
    }

    fn zero(&self) -> Value {
        Value::Null
    }
}

/// List of strings stored comma-joined
#[derive(Debug, Clone, Copy)]
pub struct ArrayCsvType;

impl PropertyType for ArrayCsvType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        let items = match raw {
            Value::Null => Vec::new(),
            Value::List(items) => items
                .iter()
                .flat_map(|item| split_list(&item.to_text(), false))
                .collect(),
            Value::Json(serde_json::Value::Array(_)) => {
                return self.to_edit(&Value::from_json(&raw.to_json()));
            }
            other => split_list(&other.to_text(), false),
        };
        Ok(Value::List(items.into_iter().map(Value::Text).collect()))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let joined = match edit {
            Value::List(items) => items
                .iter()
                .map(Value::to_text)
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_text(),
        };
        SqlValue::Text(joined)
    }

    fn zero(&self) -> Value {
        Value::List(Vec::new())
    }
}

/// List stored as a JSON array
#[derive(Debug, Clone, Copy)]
pub struct ArraySerializedType;

impl PropertyType for ArraySerializedType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        let list = match raw {
            Value::Null => Value::List(Vec::new()),
            Value::List(_) => raw.clone(),
            Value::Json(serde_json::Value::Array(_)) => Value::from_json(&raw.to_json()),
            Value::Text(s) if s.trim().is_empty() => Value::List(Vec::new()),
            Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(json @ serde_json::Value::Array(_)) => Value::from_json(&json),
                _ => Value::List(vec![raw.clone()]),
            },
            other => Value::List(vec![other.clone()]),
        };
        Ok(list)
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let json = match edit {
            Value::List(_) => edit.to_json(),
            Value::Null => serde_json::Value::Array(Vec::new()),
            other => serde_json::Value::Array(vec![other.to_json()]),
        };
        SqlValue::Text(json.to_string())
    }

    fn zero(&self) -> Value {
        Value::List(Vec::new())
    }
}

fn to_json_value(raw: &Value) -> serde_json::Value {
    match raw {
        Value::Json(j) => j.clone(),
        Value::Text(s) if s.trim().is_empty() => serde_json::Value::Null,
        Value::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone())),
        other => other.to_json(),
    }
}

/// Arbitrary JSON document stored as text
#[derive(Debug, Clone, Copy)]
pub struct JsonType;

impl PropertyType for JsonType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Json(to_json_value(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        match to_json_value(edit) {
            serde_json::Value::Null => SqlValue::Null,
            json => SqlValue::Text(json.to_string()),
        }
    }

    fn zero(&self) -> Value {
        Value::Json(serde_json::Value::Null)
    }
}

/// JSON object; anything else normalizes to `{}`
#[derive(Debug, Clone, Copy)]
pub struct JsonObjectType;

impl PropertyType for JsonObjectType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Json(match to_json_value(raw) {
            json @ serde_json::Value::Object(_) => json,
            _ => serde_json::Value::Object(serde_json::Map::new()),
        }))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let json = match to_json_value(edit) {
            json @ serde_json::Value::Object(_) => json,
            _ => serde_json::Value::Object(serde_json::Map::new()),
        };
        SqlValue::Text(json.to_string())
    }

    fn zero(&self) -> Value {
        Value::Json(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Binary data held as lowercase hex in memory and raw bytes in storage
///
/// Text input is auto-detected: non-printable content or non-hex text is
/// treated as raw bytes and hex-encoded; printable hex is kept.
#[derive(Debug, Clone, Copy)]
pub struct BinaryHexType;

impl BinaryHexType {
    fn hex_of(raw: &Value) -> String {
        match raw {
            Value::Null => String::new(),
            Value::Bytes(b) => hex::encode(b),
            other => {
                let text = other.to_text();
                if is_printable(text.as_bytes()) && is_hex(&text) {
                    text.to_ascii_lowercase()
                } else {
                    hex::encode(text.as_bytes())
                }
            }
        }
    }
}

impl PropertyType for BinaryHexType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Text(Self::hex_of(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let hex_text = Self::hex_of(edit);
        SqlValue::Blob(hex::decode(&hex_text).unwrap_or_else(|_| hex_text.into_bytes()))
    }

    fn zero(&self) -> Value {
        Value::Text(String::new())
    }
}

/// Binary data stored as standard base64 text
#[derive(Debug, Clone, Copy)]
pub struct Base64Type;

impl Base64Type {
    fn bytes_of(raw: &Value) -> Vec<u8> {
        match raw {
            Value::Null => Vec::new(),
            Value::Bytes(b) => b.clone(),
            other => {
                let text = other.to_text();
                base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .unwrap_or_else(|_| text.into_bytes())
            }
        }
    }
}

impl PropertyType for Base64Type {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Bytes(Self::bytes_of(raw)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Text(base64::engine::general_purpose::STANDARD.encode(Self::bytes_of(edit)))
    }

    fn view(&self, edit: &Value) -> Value {
        Value::Text(base64::engine::general_purpose::STANDARD.encode(Self::bytes_of(edit)))
    }

    fn zero(&self) -> Value {
        Value::Bytes(Vec::new())
    }
}

/// Closed set of allowed strings
#[derive(Debug, Clone, Copy)]
pub struct EnumType<'a> {
    values: &'a [String],
}

impl<'a> EnumType<'a> {
    pub fn new(values: &'a [String]) -> Self {
        Self { values }
    }
}

impl PropertyType for EnumType<'_> {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        let text = raw.to_text();
        if text.is_empty() || self.values.iter().any(|v| *v == text) {
            return Ok(Value::Text(text));
        }
        Err(MapError::InvalidEnumValue {
            type_name: "enum".to_string(),
            value: text,
            allowed: self.values.to_vec(),
        }
        .into())
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Text(edit.to_text())
    }

    fn zero(&self) -> Value {
        Value::Text(String::new())
    }
}

/// Single term id
#[derive(Debug, Clone, Copy)]
pub struct TermRefSingleType;

impl PropertyType for TermRefSingleType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        let id = match raw {
            Value::List(items) => items.first().map(parse_int).unwrap_or(0),
            other => parse_int(other),
        };
        Ok(Value::Int(id.max(0)))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Integer(parse_int(edit).max(0))
    }

    fn zero(&self) -> Value {
        Value::Int(0)
    }
}

/// Positive, de-duplicated term ids
#[derive(Debug, Clone, Copy)]
pub struct TermRefArrayType;

impl TermRefArrayType {
    fn ids_of(raw: &Value) -> Vec<i64> {
        let candidates: Vec<i64> = match raw {
            Value::Null => Vec::new(),
            Value::List(items) => items.iter().map(parse_int).collect(),
            Value::Json(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| parse_int(&Value::from_json(item)))
                .collect(),
            Value::Int(n) => vec![*n],
            other => split_list(&other.to_text(), true)
                .iter()
                .map(|piece| parse_int(&Value::Text(piece.clone())))
                .collect(),
        };
        let mut ids = Vec::with_capacity(candidates.len());
        for id in candidates {
            if id > 0 && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

impl PropertyType for TermRefArrayType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::List(Self::ids_of(raw).into_iter().map(Value::Int).collect()))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        let joined = Self::ids_of(edit)
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        SqlValue::Text(joined)
    }

    fn zero(&self) -> Value {
        Value::List(Vec::new())
    }
}

/// URL-safe lowercase identifier: `[a-z0-9]` runs joined by single dashes
#[derive(Debug, Clone, Copy)]
pub struct SlugType;

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

impl PropertyType for SlugType {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(Value::Text(slugify(&raw.to_text())))
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        SqlValue::Text(slugify(&edit.to_text()))
    }

    fn zero(&self) -> Value {
        Value::Text(String::new())
    }
}

/// Handler for extension types with no registered implementation
pub struct Passthrough<'a> {
    name: &'a str,
    hook: Option<&'a FallbackHook>,
}

impl<'a> Passthrough<'a> {
    pub fn new(name: &'a str, hook: Option<&'a FallbackHook>) -> Self {
        Self { name, hook }
    }
}

impl PropertyType for Passthrough<'_> {
    fn to_edit(&self, raw: &Value) -> Result<Value> {
        Ok(match self.hook {
            Some(hook) => hook(self.name, raw),
            None => raw.clone(),
        })
    }

    fn to_storage(&self, edit: &Value) -> SqlValue {
        value_to_sql(edit)
    }

    fn zero(&self) -> Value {
        Value::Null
    }
}
