use thiserror::Error;

/// Result type alias using the canonical [`ExError`]
pub type Result<T> = std::result::Result<T, ExError>;

/// Classification of every failure the mapping layer reports
///
/// Callers and tests match on the kind; the string [`code`](Self::code) is
/// what lifecycle logs record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Registration
    SchemaInvalid,

    // Lookup
    NotFound,

    // Property-write validation
    DuplicateValue,
    MissingRequired,
    InvalidEnumValue,
    UnknownProperty,

    // Caller input
    InvalidInput,

    // Persistence
    PersistFailed,
    Persistence,

    // Integration/IO
    Io,
    Serialization,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::SchemaInvalid => "ERR_SCHEMA_INVALID",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::DuplicateValue => "ERR_DUPLICATE_VALUE",
            ExErrorKind::MissingRequired => "ERR_MISSING_REQUIRED",
            ExErrorKind::InvalidEnumValue => "ERR_INVALID_ENUM_VALUE",
            ExErrorKind::UnknownProperty => "ERR_UNKNOWN_PROPERTY",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::PersistFailed => "ERR_PERSIST_FAILED",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether this kind is raised by a property setter
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExErrorKind::DuplicateValue
                | ExErrorKind::MissingRequired
                | ExErrorKind::InvalidEnumValue
        )
    }
}

/// Error returned across crate boundaries
///
/// A kind plus whatever is known about where it happened. Built with the
/// `with_*` methods; the lower layers fill in `op` and the repository adds
/// the entity it was working on.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<i64>,
    prop: Option<String>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_type: None,
            entity_id: None,
            prop: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add entity id context
    pub fn with_entity_id(mut self, id: i64) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Add property name context
    pub fn with_prop(mut self, prop: impl Into<String>) -> Self {
        self.prop = Some(prop.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the entity type context, if any
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Get the entity id context, if any
    pub fn entity_id(&self) -> Option<i64> {
        self.entity_id
    }

    /// Get the property context, if any
    pub fn prop(&self) -> Option<&str> {
        self.prop.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    /// `[CODE] op: message (product #7, prop sku) <- source`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        match (&self.op, self.message.is_empty()) {
            (Some(op), false) => write!(f, " {}: {}", op, self.message)?,
            (Some(op), true) => write!(f, " {}", op)?,
            (None, false) => write!(f, " {}", self.message)?,
            (None, true) => {}
        }

        let mut subject = Vec::new();
        match (&self.entity_type, self.entity_id) {
            (Some(ty), Some(id)) => subject.push(format!("{} #{}", ty, id)),
            (Some(ty), None) => subject.push(ty.clone()),
            (None, Some(id)) => subject.push(format!("#{}", id)),
            (None, None) => {}
        }
        if let Some(prop) = &self.prop {
            subject.push(format!("prop {}", prop));
        }
        if !subject.is_empty() {
            write!(f, " ({})", subject.join(", "))?;
        }

        match &self.source {
            Some(source) => write!(f, " <- {}", source),
            None => Ok(()),
        }
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Typed failures raised by the mapping layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    // ===== Registration =====
    /// Entity schema failed validation
    #[error("Invalid schema for {entity_type}: {reason}")]
    SchemaInvalid { entity_type: String, reason: String },

    /// No schema registered under this entity type
    #[error("Unknown entity type: {entity_type}")]
    UnknownEntityType { entity_type: String },

    // ===== Lookup =====
    /// Row lookup by id found nothing
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: i64 },

    // ===== Validation =====
    /// A unique property collides with another live row
    #[error("Duplicate value for unique property {prop}: {value}")]
    DuplicateValue { prop: String, value: String },

    /// A required property resolved to its type default
    #[error("Required property {prop} is missing")]
    MissingRequired { prop: String },

    /// Enum value outside the allowed set
    #[error("Invalid value {value:?} for {type_name}; expected one of {allowed:?}")]
    InvalidEnumValue {
        type_name: String,
        value: String,
        allowed: Vec<String>,
    },

    /// Property name not declared by the schema
    #[error("Unknown property {prop} on {entity_type}")]
    UnknownProperty { entity_type: String, prop: String },

    /// Custom type validator rejected the value
    #[error("Invalid value for {prop}: {reason}")]
    InvalidValue { prop: String, reason: String },

    // ===== Persistence =====
    /// Insert or update reported no effect
    #[error("Persisting {entity_type} failed: {reason}")]
    PersistFailed { entity_type: String, reason: String },

    /// Entity has no repository attached
    #[error("Entity of type {entity_type} is not bound to a repository")]
    Unbound { entity_type: String },

    // ===== Generic =====
    /// Serialization error (JSON/YAML encoding/decoding)
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Conversion from MapError to the canonical ExError
impl From<MapError> for ExError {
    fn from(err: MapError) -> Self {
        let message = err.to_string();
        match err {
            MapError::SchemaInvalid { entity_type, .. } => {
                ExError::new(ExErrorKind::SchemaInvalid)
                    .with_entity_type(entity_type)
                    .with_op("register_schema")
                    .with_message(message)
            }

            MapError::UnknownEntityType { entity_type } => {
                ExError::new(ExErrorKind::SchemaInvalid)
                    .with_entity_type(entity_type)
                    .with_message(message)
            }

            MapError::NotFound { entity_type, id } => ExError::new(ExErrorKind::NotFound)
                .with_entity_type(entity_type)
                .with_entity_id(id)
                .with_message(message),

            MapError::DuplicateValue { prop, .. } => ExError::new(ExErrorKind::DuplicateValue)
                .with_prop(prop)
                .with_op("set")
                .with_message(message),

            MapError::MissingRequired { prop } => ExError::new(ExErrorKind::MissingRequired)
                .with_prop(prop)
                .with_op("set")
                .with_message(message),

            MapError::InvalidEnumValue { .. } => {
                ExError::new(ExErrorKind::InvalidEnumValue).with_message(message)
            }

            MapError::UnknownProperty { entity_type, prop } => {
                ExError::new(ExErrorKind::UnknownProperty)
                    .with_entity_type(entity_type)
                    .with_prop(prop)
                    .with_message(message)
            }

            MapError::InvalidValue { prop, .. } => ExError::new(ExErrorKind::InvalidInput)
                .with_prop(prop)
                .with_op("set")
                .with_message(message),

            MapError::PersistFailed { entity_type, .. } => {
                ExError::new(ExErrorKind::PersistFailed)
                    .with_entity_type(entity_type)
                    .with_message(message)
            }

            MapError::Unbound { entity_type } => ExError::new(ExErrorKind::Internal)
                .with_entity_type(entity_type)
                .with_op("save")
                .with_message(message),

            MapError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            MapError::Internal { .. } => ExError::new(ExErrorKind::Internal).with_message(message),
        }
    }
}
