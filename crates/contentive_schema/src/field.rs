//! Field Type System
//!
//! Every schema field has one of a closed set of types. Each type carries its own
//! option grammar; options that do not belong to the type, or that are malformed,
//! reject the whole field list.
//!
//! Field definitions are stored as JSON in the shape
//! `{"id", "name", "type", "required", "options"}`. [`RawFieldDefinition`] is that
//! wire shape; [`FieldDefinition`] is the checked form with options parsed into a
//! per-type [`FieldKind`].

use crate::lookup::{LookupError, SchemaLookup};
use contentive_ids::FieldId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Field names that may never be declared by a schema.
pub const RESERVED_FIELD_NAMES: &[&str] = &["media", "media_list"];

/// The closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Boolean,
    Relation,
    Media,
    MediaList,
    Select,
    #[serde(rename = "richtext")]
    RichText,
    Email,
    Password,
}

impl FieldType {
    pub const ALL: [FieldType; 13] = [
        FieldType::Text,
        FieldType::Textarea,
        FieldType::Number,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Boolean,
        FieldType::Relation,
        FieldType::Media,
        FieldType::MediaList,
        FieldType::Select,
        FieldType::RichText,
        FieldType::Email,
        FieldType::Password,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Boolean => "boolean",
            FieldType::Relation => "relation",
            FieldType::Media => "media",
            FieldType::MediaList => "media_list",
            FieldType::Select => "select",
            FieldType::RichText => "richtext",
            FieldType::Email => "email",
            FieldType::Password => "password",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cardinality of a relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::OneToOne => "one-to-one",
            RelationType::OneToMany => "one-to-many",
            RelationType::ManyToOne => "many-to-one",
            RelationType::ManyToMany => "many-to-many",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "one-to-one" => Some(RelationType::OneToOne),
            "one-to-many" => Some(RelationType::OneToMany),
            "many-to-one" => Some(RelationType::ManyToOne),
            "many-to-many" => Some(RelationType::ManyToMany),
            _ => None,
        }
    }

    /// Whether a value of this relation may hold several target slugs.
    pub fn allows_many(&self) -> bool {
        matches!(self, RelationType::OneToMany | RelationType::ManyToMany)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextOptions {
    pub max_length: Option<u64>,
    pub min_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Maximum number of decimal places.
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateOptions {
    /// Display hint only; values are always ISO-8601.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BooleanOptions {
    pub default: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationOptions {
    pub target_schema: String,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaOptions {
    pub allowed_types: Option<Vec<String>>,
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOptions {
    pub choices: Vec<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RichTextOptions {
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailOptions {
    pub default: Option<String>,
}

/// A field type together with its parsed options.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text(TextOptions),
    Textarea(TextOptions),
    Number(NumberOptions),
    Date(DateOptions),
    DateTime(DateOptions),
    Boolean(BooleanOptions),
    Relation(RelationOptions),
    Media(MediaOptions),
    MediaList(MediaOptions),
    Select(SelectOptions),
    RichText(RichTextOptions),
    Email(EmailOptions),
    Password,
}

impl FieldKind {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldKind::Text(_) => FieldType::Text,
            FieldKind::Textarea(_) => FieldType::Textarea,
            FieldKind::Number(_) => FieldType::Number,
            FieldKind::Date(_) => FieldType::Date,
            FieldKind::DateTime(_) => FieldType::DateTime,
            FieldKind::Boolean(_) => FieldType::Boolean,
            FieldKind::Relation(_) => FieldType::Relation,
            FieldKind::Media(_) => FieldType::Media,
            FieldKind::MediaList(_) => FieldType::MediaList,
            FieldKind::Select(_) => FieldType::Select,
            FieldKind::RichText(_) => FieldType::RichText,
            FieldKind::Email(_) => FieldType::Email,
            FieldKind::Password => FieldType::Password,
        }
    }

    /// The declared default value, if the type supports one and it is set.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            FieldKind::Boolean(opts) => opts.default.map(Value::Bool),
            FieldKind::Select(opts) => opts.default.clone().map(Value::String),
            FieldKind::RichText(opts) => opts.default.clone().map(Value::String),
            FieldKind::Email(opts) => opts.default.clone().map(Value::String),
            _ => None,
        }
    }

    /// Target schema slug for relation fields.
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            FieldKind::Relation(opts) => Some(opts.target_schema.as_str()),
            _ => None,
        }
    }

    /// Parse the option map for `field_type`.
    pub fn parse(
        field_type: FieldType,
        field: &str,
        options: &Map<String, Value>,
    ) -> Result<Self, FieldDefinitionError> {
        let mut reader = OptionReader::new(field, field_type, options);
        let kind = match field_type {
            FieldType::Text | FieldType::Textarea => {
                let max_length = reader.positive_int("maxLength")?;
                let min_length = reader.non_negative_int("minLength")?;
                if let (Some(min), Some(max)) = (min_length, max_length) {
                    if min > max {
                        return Err(reader.malformed("minLength cannot be greater than maxLength"));
                    }
                }
                let opts = TextOptions { max_length, min_length };
                if field_type == FieldType::Text {
                    FieldKind::Text(opts)
                } else {
                    FieldKind::Textarea(opts)
                }
            }
            FieldType::Number => {
                let min = reader.number("min")?;
                let max = reader.number("max")?;
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(reader.malformed("min cannot be greater than max"));
                    }
                }
                let precision = reader
                    .non_negative_int("precision")?
                    .map(|p| u32::try_from(p).map_err(|_| reader.malformed("precision is too large")))
                    .transpose()?;
                FieldKind::Number(NumberOptions { min, max, precision })
            }
            FieldType::Date | FieldType::DateTime => {
                let opts = DateOptions {
                    format: reader.non_empty_string("format")?,
                };
                if field_type == FieldType::Date {
                    FieldKind::Date(opts)
                } else {
                    FieldKind::DateTime(opts)
                }
            }
            FieldType::Boolean => FieldKind::Boolean(BooleanOptions {
                default: reader.boolean("default")?,
            }),
            FieldType::Relation => {
                let target_schema = reader
                    .non_empty_string("targetSchema")?
                    .ok_or_else(|| reader.malformed("relation field must have a 'targetSchema' option"))?;
                let relation_type = reader
                    .string("relationType")?
                    .ok_or_else(|| reader.malformed("relation field must have a 'relationType' option"))?;
                let relation_type = RelationType::parse(&relation_type).ok_or_else(|| {
                    reader.malformed(format!(
                        "relationType must be one of one-to-one, one-to-many, many-to-one, many-to-many (got '{}')",
                        relation_type
                    ))
                })?;
                FieldKind::Relation(RelationOptions {
                    target_schema,
                    relation_type,
                })
            }
            FieldType::Media | FieldType::MediaList => {
                let allowed_types = reader.string_array("allowedTypes")?;
                let max_size = reader.positive_int("maxSize")?;
                let opts = MediaOptions {
                    allowed_types,
                    max_size,
                };
                if field_type == FieldType::Media {
                    FieldKind::Media(opts)
                } else {
                    FieldKind::MediaList(opts)
                }
            }
            FieldType::Select => {
                let choices = reader
                    .string_array("choices")?
                    .ok_or_else(|| reader.malformed("select field must have a 'choices' option"))?;
                let default = reader.string("default")?;
                if let Some(default) = &default {
                    if !choices.contains(default) {
                        return Err(reader.malformed(format!(
                            "default value '{}' must be one of the choices",
                            default
                        )));
                    }
                }
                FieldKind::Select(SelectOptions { choices, default })
            }
            FieldType::RichText => FieldKind::RichText(RichTextOptions {
                default: reader.string("default")?,
            }),
            FieldType::Email => {
                let default = reader.string("default")?;
                if let Some(default) = &default {
                    if !default.contains('@') {
                        return Err(reader.malformed("default value must be a valid email address"));
                    }
                }
                FieldKind::Email(EmailOptions { default })
            }
            FieldType::Password => {
                if options.get("default").is_some_and(|v| !v.is_null()) {
                    return Err(reader.malformed("password fields cannot have a default value"));
                }
                FieldKind::Password
            }
        };
        reader.finish()?;
        Ok(kind)
    }

    /// Options in their wire shape (camelCase keys, unset options omitted).
    pub fn to_options(&self) -> Map<String, Value> {
        let mut out = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                out.insert(key.to_string(), value);
            }
        };
        match self {
            FieldKind::Text(o) | FieldKind::Textarea(o) => {
                put("maxLength", o.max_length.map(Value::from));
                put("minLength", o.min_length.map(Value::from));
            }
            FieldKind::Number(o) => {
                put("min", o.min.map(Value::from));
                put("max", o.max.map(Value::from));
                put("precision", o.precision.map(Value::from));
            }
            FieldKind::Date(o) | FieldKind::DateTime(o) => {
                put("format", o.format.clone().map(Value::String));
            }
            FieldKind::Boolean(o) => put("default", o.default.map(Value::Bool)),
            FieldKind::Relation(o) => {
                put("targetSchema", Some(Value::String(o.target_schema.clone())));
                put("relationType", Some(Value::String(o.relation_type.as_str().to_string())));
            }
            FieldKind::Media(o) | FieldKind::MediaList(o) => {
                put("allowedTypes", o.allowed_types.clone().map(Value::from));
                put("maxSize", o.max_size.map(Value::from));
            }
            FieldKind::Select(o) => {
                put("choices", Some(Value::from(o.choices.clone())));
                put("default", o.default.clone().map(Value::String));
            }
            FieldKind::RichText(RichTextOptions { default })
            | FieldKind::Email(EmailOptions { default }) => {
                put("default", default.clone().map(Value::String));
            }
            FieldKind::Password => {}
        }
        out
    }
}

/// Why a single field definition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionErrorKind {
    EmptyName,
    ReservedName,
    UnknownType,
    UnknownOption,
    MalformedOption,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}': {message}")]
pub struct FieldDefinitionError {
    pub field: String,
    pub kind: DefinitionErrorKind,
    pub message: String,
}

impl FieldDefinitionError {
    pub fn new(field: impl Into<String>, kind: DefinitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised while defining a schema's field list.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    InvalidField(#[from] FieldDefinitionError),

    #[error("duplicate field name: {0}")]
    DuplicateName(String),

    #[error("duplicate field id: {0}")]
    DuplicateId(FieldId),

    #[error("field '{field}' targets unknown schema '{target}'")]
    UnknownTargetSchema { field: String, target: String },

    #[error("invalid slug '{0}': must be non-empty and contain only lowercase letters, digits and '-'")]
    InvalidSlug(String),

    #[error("schema name cannot be empty")]
    EmptySchemaName,

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// The wire shape of a field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFieldDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldId>,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl RawFieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: None,
            name: name.into(),
            field_type: field_type.as_str().to_string(),
            required: false,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_id(mut self, id: FieldId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    fn explicit_id(&self) -> Option<FieldId> {
        self.id.filter(|id| !id.is_nil())
    }
}

/// A checked field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFieldDefinition", into = "RawFieldDefinition")]
pub struct FieldDefinition {
    pub id: FieldId,
    pub name: String,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldDefinition {
    pub fn field_type(&self) -> FieldType {
        self.kind.field_type()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.kind.default_value()
    }
}

impl TryFrom<RawFieldDefinition> for FieldDefinition {
    type Error = FieldDefinitionError;

    fn try_from(raw: RawFieldDefinition) -> Result<Self, Self::Error> {
        if raw.name.trim().is_empty() {
            return Err(FieldDefinitionError::new(
                raw.name,
                DefinitionErrorKind::EmptyName,
                "field name cannot be empty",
            ));
        }
        if RESERVED_FIELD_NAMES.contains(&raw.name.as_str()) {
            return Err(FieldDefinitionError::new(
                raw.name.clone(),
                DefinitionErrorKind::ReservedName,
                format!("'{}' is a reserved field name", raw.name),
            ));
        }
        let field_type = FieldType::parse(&raw.field_type).ok_or_else(|| {
            FieldDefinitionError::new(
                raw.name.clone(),
                DefinitionErrorKind::UnknownType,
                format!("unknown field type '{}'", raw.field_type),
            )
        })?;
        let empty = Map::new();
        let kind = FieldKind::parse(field_type, &raw.name, raw.options.as_ref().unwrap_or(&empty))?;
        Ok(Self {
            id: raw.explicit_id().unwrap_or_else(FieldId::new),
            name: raw.name,
            required: raw.required,
            kind,
        })
    }
}

impl From<FieldDefinition> for RawFieldDefinition {
    fn from(def: FieldDefinition) -> Self {
        let options = def.kind.to_options();
        Self {
            id: Some(def.id),
            name: def.name,
            field_type: def.kind.field_type().as_str().to_string(),
            required: def.required,
            options: (!options.is_empty()).then_some(options),
        }
    }
}

/// Check a field list and turn it into definitions.
///
/// Fields without an id inherit the id of the `previous` field with the same
/// name (when that id is not claimed explicitly by another field); otherwise a
/// fresh id is generated. Relation targets must resolve through `schemas`, except
/// a target equal to `own_slug` (self-reference).
pub async fn define_fields(
    raw: Vec<RawFieldDefinition>,
    previous: &[FieldDefinition],
    own_slug: Option<&str>,
    schemas: &dyn SchemaLookup,
) -> Result<Vec<FieldDefinition>, SchemaError> {
    let mut claimed: HashSet<FieldId> = HashSet::new();
    for field in &raw {
        if let Some(id) = field.explicit_id() {
            if !claimed.insert(id) {
                return Err(SchemaError::DuplicateId(id));
            }
        }
    }

    let previous_by_name: HashMap<&str, FieldId> =
        previous.iter().map(|f| (f.name.as_str(), f.id)).collect();
    let mut names: HashSet<String> = HashSet::new();
    let mut fields = Vec::with_capacity(raw.len());

    for mut field in raw {
        if !field.name.trim().is_empty() && !names.insert(field.name.clone()) {
            return Err(SchemaError::DuplicateName(field.name));
        }
        if field.explicit_id().is_none() {
            let id = previous_by_name
                .get(field.name.as_str())
                .copied()
                .filter(|id| !claimed.contains(id))
                .unwrap_or_else(FieldId::new);
            claimed.insert(id);
            field.id = Some(id);
        }
        fields.push(FieldDefinition::try_from(field)?);
    }

    let mut checked: HashSet<&str> = HashSet::new();
    for field in &fields {
        let Some(target) = field.kind.relation_target() else {
            continue;
        };
        if Some(target) == own_slug || !checked.insert(target) {
            continue;
        }
        if !schemas.schema_exists(target).await? {
            return Err(SchemaError::UnknownTargetSchema {
                field: field.name.clone(),
                target: target.to_string(),
            });
        }
    }

    Ok(fields)
}

/// Typed access to an option map that tracks which keys the type accepts.
struct OptionReader<'a> {
    field: &'a str,
    field_type: FieldType,
    options: &'a Map<String, Value>,
    known: Vec<&'static str>,
}

impl<'a> OptionReader<'a> {
    fn new(field: &'a str, field_type: FieldType, options: &'a Map<String, Value>) -> Self {
        Self {
            field,
            field_type,
            options,
            known: Vec::new(),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> FieldDefinitionError {
        FieldDefinitionError::new(self.field, DefinitionErrorKind::MalformedOption, message)
    }

    fn get(&mut self, key: &'static str) -> Option<&'a Value> {
        self.known.push(key);
        self.options.get(key).filter(|v| !v.is_null())
    }

    fn int(&mut self, key: &'static str) -> Result<Option<i128>, FieldDefinitionError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let n = value.as_i64().map(i128::from).or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i128)
        });
        n.map(Some)
            .ok_or_else(|| self.malformed(format!("{} must be an integer", key)))
    }

    fn positive_int(&mut self, key: &'static str) -> Result<Option<u64>, FieldDefinitionError> {
        match self.int(key)? {
            Some(n) if n > 0 => Ok(Some(n as u64)),
            Some(_) => Err(self.malformed(format!("{} must be a positive integer", key))),
            None => Ok(None),
        }
    }

    fn non_negative_int(&mut self, key: &'static str) -> Result<Option<u64>, FieldDefinitionError> {
        match self.int(key)? {
            Some(n) if n >= 0 => Ok(Some(n as u64)),
            Some(_) => Err(self.malformed(format!("{} must be a non-negative integer", key))),
            None => Ok(None),
        }
    }

    fn number(&mut self, key: &'static str) -> Result<Option<f64>, FieldDefinitionError> {
        match self.get(key) {
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.malformed(format!("{} must be a number", key))),
            None => Ok(None),
        }
    }

    fn boolean(&mut self, key: &'static str) -> Result<Option<bool>, FieldDefinitionError> {
        match self.get(key) {
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.malformed(format!("{} must be a boolean", key))),
            None => Ok(None),
        }
    }

    fn string(&mut self, key: &'static str) -> Result<Option<String>, FieldDefinitionError> {
        match self.get(key) {
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.malformed(format!("{} must be a string", key))),
            None => Ok(None),
        }
    }

    fn non_empty_string(&mut self, key: &'static str) -> Result<Option<String>, FieldDefinitionError> {
        match self.string(key)? {
            Some(s) if s.trim().is_empty() => {
                Err(self.malformed(format!("{} must be a non-empty string", key)))
            }
            other => Ok(other),
        }
    }

    /// Non-empty array of strings.
    fn string_array(&mut self, key: &'static str) -> Result<Option<Vec<String>>, FieldDefinitionError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| self.malformed(format!("{} must be a non-empty array of strings", key)))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.malformed(format!("{} must contain only strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn finish(self) -> Result<(), FieldDefinitionError> {
        let mut unknown: Vec<&String> = self
            .options
            .keys()
            .filter(|k| !self.known.contains(&k.as_str()))
            .collect();
        if self.field_type == FieldType::Password {
            unknown.retain(|k| k.as_str() != "default");
        }
        match unknown.first() {
            None => Ok(()),
            Some(key) => Err(FieldDefinitionError::new(
                self.field,
                DefinitionErrorKind::UnknownOption,
                format!("option '{}' is not valid for {} fields", key, self.field_type),
            )),
        }
    }
}
