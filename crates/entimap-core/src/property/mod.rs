//! Property Coercion Engine
//!
//! Pure conversions between the three representations of a property value:
//!
//! - **edit**: the in-memory value held by an entity (normalized, comparable)
//! - **storage**: the scalar written to or read from the relational store
//! - **view**: the presentable value handed to API consumers
//!
//! Every built-in semantic type is total except `enum`, which rejects values
//! outside its allowed set. For every type
//! `to_storage(to_edit(to_storage(x))) == to_storage(x)`.

pub mod types;

use crate::errors::{MapError, Result};
use crate::schema::SemanticType;
use crate::value::{SqlValue, Value, STORAGE_DATE_FORMAT};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub use types::{EnumType, Passthrough};

/// Representation requested from an entity getter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Context {
    /// In-memory value
    #[default]
    Edit,
    /// Presentable value
    View,
    /// Storage encoding
    Storage,
}

/// Conversion handler for one semantic type
///
/// Implementors must keep `to_storage(to_edit(storage))` stable: re-reading a
/// stored value and storing it again yields the same storage scalar.
pub trait PropertyType {
    /// Normalize any raw input (including a value read back from storage)
    /// into the in-memory representation.
    ///
    /// # Errors
    ///
    /// Only types with a closed value set fail here.
    fn to_edit(&self, raw: &Value) -> Result<Value>;

    /// Encode a normalized value for storage
    fn to_storage(&self, edit: &Value) -> SqlValue;

    /// Presentable form of a normalized value
    fn view(&self, edit: &Value) -> Value {
        edit.clone()
    }

    /// Normalize a value read back from storage
    ///
    /// Stored data is trusted: a value the type would reject on write is
    /// kept as text rather than failing the read.
    fn decode(&self, stored: &Value) -> Value {
        self.to_edit(stored)
            .unwrap_or_else(|_| Value::Text(stored.to_text()))
    }

    /// The type's default value
    fn zero(&self) -> Value;

    /// Whether a normalized value counts as "not set"
    fn is_empty(&self, edit: &Value) -> bool {
        edit.is_null() || *edit == self.zero()
    }

    /// Type-specific validator run on writes to read entities
    fn validate(&self, _edit: &Value) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Hook invoked by the passthrough handler for unregistered extension types
pub type FallbackHook = dyn Fn(&str, &Value) -> Value;

enum Handler<'a> {
    Builtin(&'static dyn PropertyType),
    Enum(EnumType<'a>),
    Custom(&'a dyn PropertyType),
    Fallback(Passthrough<'a>),
}

impl Handler<'_> {
    fn get(&self) -> &dyn PropertyType {
        match self {
            Handler::Builtin(h) => *h,
            Handler::Enum(h) => h,
            Handler::Custom(h) => *h,
            Handler::Fallback(h) => h,
        }
    }
}

/// Resolves semantic types to their handlers
///
/// Built-in types are always available. Extension types
/// ([`SemanticType::Custom`]) resolve by name against registered handlers and
/// otherwise fall back to a passthrough handler that calls the fallback hook,
/// if one is set.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    custom: HashMap<String, Rc<dyn PropertyType>>,
    fallback_hook: Option<Rc<FallbackHook>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry")
            .field("custom", &names)
            .field("fallback_hook", &self.fallback_hook.is_some())
            .finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an extension type name
    pub fn register(&mut self, name: impl Into<String>, handler: impl PropertyType + 'static) {
        self.custom.insert(name.into(), Rc::new(handler));
    }

    /// Set the hook used by the passthrough handler
    pub fn set_fallback_hook(&mut self, hook: impl Fn(&str, &Value) -> Value + 'static) {
        let hook: Rc<FallbackHook> = Rc::new(hook);
        self.fallback_hook = Some(hook);
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    fn handler<'a>(&'a self, ty: &'a SemanticType) -> Handler<'a> {
        match ty {
            SemanticType::String => Handler::Builtin(&types::STRING),
            SemanticType::Int => Handler::Builtin(&types::INT),
            SemanticType::Float => Handler::Builtin(&types::FLOAT),
            SemanticType::Bool => Handler::Builtin(&types::BOOL),
            SemanticType::BoolAsInt => Handler::Builtin(&types::BOOL_AS_INT),
            SemanticType::Date => Handler::Builtin(&types::DATE),
            SemanticType::ArrayCsv => Handler::Builtin(&types::ARRAY_CSV),
            SemanticType::ArraySerialized => Handler::Builtin(&types::ARRAY_SERIALIZED),
            SemanticType::Json => Handler::Builtin(&types::JSON),
            SemanticType::JsonObject => Handler::Builtin(&types::JSON_OBJECT),
            SemanticType::BinaryHex => Handler::Builtin(&types::BINARY_HEX),
            SemanticType::Base64 => Handler::Builtin(&types::BASE64),
            SemanticType::TermRefSingle => Handler::Builtin(&types::TERM_REF_SINGLE),
            SemanticType::TermRefArray => Handler::Builtin(&types::TERM_REF_ARRAY),
            SemanticType::Slug => Handler::Builtin(&types::SLUG),
            SemanticType::Enum { values } => Handler::Enum(EnumType::new(values)),
            SemanticType::Custom(name) => match self.custom.get(name) {
                Some(handler) => Handler::Custom(handler.as_ref()),
                None => Handler::Fallback(Passthrough::new(name, self.fallback_hook.as_deref())),
            },
        }
    }

    /// Raw input → in-memory value
    ///
    /// # Errors
    ///
    /// `InvalidEnumValue` for enum values outside the allowed set.
    pub fn to_edit(&self, ty: &SemanticType, raw: &Value) -> Result<Value> {
        self.handler(ty).get().to_edit(raw)
    }

    /// Raw input → storage scalar (normalizes through the edit form first)
    ///
    /// # Errors
    ///
    /// `InvalidEnumValue` for enum values outside the allowed set.
    pub fn to_storage(&self, ty: &SemanticType, raw: &Value) -> Result<SqlValue> {
        let handler = self.handler(ty);
        let edit = handler.get().to_edit(raw)?;
        Ok(handler.get().to_storage(&edit))
    }

    /// Already-normalized in-memory value → storage scalar
    pub fn encode(&self, ty: &SemanticType, edit: &Value) -> SqlValue {
        self.handler(ty).get().to_storage(edit)
    }

    /// Storage scalar → in-memory value; never fails
    pub fn from_storage(&self, ty: &SemanticType, stored: &SqlValue) -> Value {
        self.decode(ty, &Value::from(stored.clone()))
    }

    /// Trusted value → in-memory value, without closed-set checks
    pub fn decode(&self, ty: &SemanticType, raw: &Value) -> Value {
        self.handler(ty).get().decode(raw)
    }

    /// In-memory value → presentable value
    pub fn view(&self, ty: &SemanticType, edit: &Value) -> Value {
        self.handler(ty).get().view(edit)
    }

    /// Representation of an in-memory value for a given context
    pub fn in_context(&self, ty: &SemanticType, edit: &Value, context: Context) -> Value {
        let handler = self.handler(ty);
        match context {
            Context::Edit => edit.clone(),
            Context::View => handler.get().view(edit),
            Context::Storage => Value::from(handler.get().to_storage(edit)),
        }
    }

    pub fn zero(&self, ty: &SemanticType) -> Value {
        self.handler(ty).get().zero()
    }

    pub fn is_empty(&self, ty: &SemanticType, edit: &Value) -> bool {
        self.handler(ty).get().is_empty(edit)
    }

    /// Run the type-specific validator
    ///
    /// # Errors
    ///
    /// `InvalidInput` carrying the validator's reason.
    pub fn validate(&self, ty: &SemanticType, prop: &str, edit: &Value) -> Result<()> {
        self.handler(ty).get().validate(edit).map_err(|reason| {
            MapError::InvalidValue {
                prop: prop.to_string(),
                reason,
            }
            .into()
        })
    }
}

/// Generic storage encoding for values of no particular type
///
/// Used by the passthrough handler and for binding untyped filter values.
pub fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format(STORAGE_DATE_FORMAT).to_string()),
        Value::List(_) => SqlValue::Text(value.to_json().to_string()),
        Value::Json(serde_json::Value::Null) => SqlValue::Null,
        Value::Json(serde_json::Value::String(s)) => SqlValue::Text(s.clone()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}
