//! Model schemas and records.
//!
//! A [`ModelSchema`] describes one record type: its name, its fields and
//! the authorization modes the remote service accepts for it. Schemas are
//! built once at configuration time and shared read-only afterwards.
//!
//! Records travel as JSON objects. [`ModelSchema::decode_record`] checks a
//! raw object against the schema and produces a [`Record`].

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the primary key field every model carries.
pub const ID_FIELD: &str = "id";

/// Storage type of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Primary key.
    Id,
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int,
    /// Double precision float.
    Double,
    /// Boolean.
    Bool,
    /// Calendar date as an ISO-8601 string.
    Date,
    /// Date and time as an ISO-8601 string.
    DateTime,
    /// Time of day as an ISO-8601 string.
    Time,
    /// Unix timestamp in seconds.
    Timestamp,
    /// Enumeration value, stored by name.
    Enum,
    /// Arbitrary JSON, stored serialized.
    Json,
}

impl FieldType {
    /// Returns the SQL column type used for this field.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Int | FieldType::Timestamp | FieldType::Bool => "INTEGER",
            FieldType::Double => "REAL",
            FieldType::Id
            | FieldType::String
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::Time
            | FieldType::Enum
            | FieldType::Json => "TEXT",
        }
    }

    /// Returns true if `value` has the JSON shape this type expects.
    ///
    /// `null` is never accepted here; optionality is checked by the caller.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Id
            | FieldType::String
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::Time
            | FieldType::Enum => value.is_string(),
            FieldType::Int | FieldType::Timestamp => value.is_i64() || value.is_u64(),
            FieldType::Double => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => !value.is_null(),
        }
    }
}

/// An authorization mode accepted by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// Whatever the transport is configured with by default.
    Default,
    /// Static API key.
    ApiKey,
    /// Signed IAM credentials.
    Iam,
    /// OpenID Connect token.
    Oidc,
    /// User pool token.
    UserPools,
    /// Custom authorizer function.
    Function,
}

impl AuthMode {
    /// Returns true if this mode needs a signed-in user.
    pub fn requires_user(&self) -> bool {
        matches!(self, AuthMode::UserPools | AuthMode::Oidc)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMode::Default => "default",
            AuthMode::ApiKey => "api_key",
            AuthMode::Iam => "iam",
            AuthMode::Oidc => "oidc",
            AuthMode::UserPools => "user_pools",
            AuthMode::Function => "function",
        };
        f.write_str(name)
    }
}

/// A field of a model schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    /// Field name as it appears in records.
    pub name: String,
    /// Column name in local storage, when it differs from `name`.
    pub target_name: Option<String>,
    /// Storage type.
    pub field_type: FieldType,
    /// Whether records must carry a non-null value.
    pub is_required: bool,
}

impl ModelField {
    /// Creates an optional field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            target_name: None,
            field_type,
            is_required: false,
        }
    }

    /// Creates the required primary key field.
    pub fn id() -> Self {
        Self::new(ID_FIELD, FieldType::Id).required()
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Sets the storage column name.
    #[must_use]
    pub fn with_target_name(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = Some(target_name.into());
        self
    }

    /// Returns the column name used in local storage.
    pub fn sql_name(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns the SQL column type.
    pub fn sql_type(&self) -> &'static str {
        self.field_type.sql_type()
    }
}

/// Immutable descriptor of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    name: String,
    plural_name: Option<String>,
    fields: Vec<ModelField>,
    auth_modes: Vec<AuthMode>,
}

impl ModelSchema {
    /// Creates a schema with only the primary key field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural_name: None,
            fields: vec![ModelField::id()],
            auth_modes: Vec::new(),
        }
    }

    /// Adds a field. A field with the same name replaces the previous one.
    #[must_use]
    pub fn field(mut self, field: ModelField) -> Self {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
        self
    }

    /// Sets the plural name used for remote list operations.
    #[must_use]
    pub fn with_plural_name(mut self, plural_name: impl Into<String>) -> Self {
        self.plural_name = Some(plural_name.into());
        self
    }

    /// Adds an authorization mode the remote service accepts for this model.
    #[must_use]
    pub fn allow_auth_mode(mut self, mode: AuthMode) -> Self {
        if !self.auth_modes.contains(&mode) {
            self.auth_modes.push(mode);
        }
        self
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plural name, defaulting to the name with an `s` suffix.
    pub fn plural_name(&self) -> String {
        self.plural_name
            .clone()
            .unwrap_or_else(|| format!("{}s", self.name))
    }

    /// Returns the name of the remote sync operation for this model.
    ///
    /// Responses to that operation are keyed by this name.
    pub fn sync_query_name(&self) -> String {
        format!("sync{}", self.plural_name())
    }

    /// Returns all fields, primary key first.
    pub fn fields(&self) -> &[ModelField] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field_named(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the authorization modes declared for this model.
    pub fn auth_modes(&self) -> &[AuthMode] {
        &self.auth_modes
    }

    /// Decodes a raw JSON object into a record of this model.
    ///
    /// Keys that are not schema fields are ignored. Required fields must be
    /// present and non-null; present values must match their field type.
    pub fn decode_record(&self, raw: &Value) -> CoreResult<Record> {
        let object = raw
            .as_object()
            .ok_or_else(|| CoreError::decode(&self.name, "expected a JSON object"))?;

        let id = object
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoreError::decode(&self.name, "missing string id"))?
            .to_string();

        let mut fields = Map::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.is_required {
                        return Err(CoreError::decode(
                            &self.name,
                            format!("required field {} is missing", field.name),
                        ));
                    }
                }
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(CoreError::decode(
                            &self.name,
                            format!("field {} expected {:?}, got {}", field.name, field.field_type, value),
                        ));
                    }
                    fields.insert(field.name.clone(), value.clone());
                }
            }
        }

        Ok(Record {
            id,
            model_name: self.name.clone(),
            fields,
        })
    }
}

/// A decoded record of some model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub id: String,
    /// Name of the model this record belongs to.
    pub model_name: String,
    /// Field values keyed by field name, including `id`.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}
