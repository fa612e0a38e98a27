//! Plugin configuration schemas
//!
//! A plugin may declare the shape of the configuration it accepts in one of
//! two formats:
//! - Standard JSON Schema
//! - Simplified property format (more intuitive for YAML users)
//!
//! Both are compiled to a JSON Schema validator once, when the plugin is
//! registered, and checked against the merged configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result, SchemaErrorInfo};

/// Property type in the simplified format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

/// Simplified definition of a single configuration property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleProperty {
    #[serde(rename = "type")]
    pub prop_type: PropertyType,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Allowed values
    #[serde(default, rename = "enum")]
    pub enum_values: Option<Vec<JsonValue>>,

    /// Regex for strings
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default)]
    pub min_length: Option<usize>,

    #[serde(default)]
    pub max_length: Option<usize>,

    /// Nested properties for objects
    #[serde(default)]
    pub properties: Option<IndexMap<String, SimpleProperty>>,

    /// Item schema for arrays
    #[serde(default)]
    pub items: Option<Box<SimpleProperty>>,
}

/// Root of a simplified schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleSchema {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Reject keys not listed in `properties`
    #[serde(default)]
    pub strict: bool,

    pub properties: IndexMap<String, SimpleProperty>,
}

/// Declared shape of a plugin's configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSchema {
    /// Standard JSON Schema
    JsonSchema(JsonValue),
    /// Simplified property format
    Simple(SimpleSchema),
}

impl ConfigSchema {
    /// Interpret a schema document, auto-detecting its format
    ///
    /// Documents carrying `$schema`, `$id` or a root `type` are JSON Schema;
    /// anything else must parse as the simplified format.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| CoreError::InvalidSchema {
            message: "config schema must be an object".to_string(),
        })?;

        if obj.contains_key("$schema") || obj.contains_key("$id") || obj.contains_key("type") {
            return Ok(ConfigSchema::JsonSchema(value));
        }

        let simple: SimpleSchema =
            serde_json::from_value(value).map_err(|e| CoreError::InvalidSchema {
                message: format!("not a JSON Schema and not a simplified schema: {}", e),
            })?;
        Ok(ConfigSchema::Simple(simple))
    }

    /// Load a simplified schema from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Convert to JSON Schema for validation
    pub fn to_json_schema(&self) -> JsonValue {
        match self {
            ConfigSchema::JsonSchema(v) => v.clone(),
            ConfigSchema::Simple(s) => convert_simple_to_json_schema(s),
        }
    }

    /// Compile into a reusable validator
    pub fn compile(self) -> Result<CompiledSchema> {
        CompiledSchema::new(self)
    }
}

fn convert_simple_to_json_schema(simple: &SimpleSchema) -> JsonValue {
    let mut schema = Map::new();

    schema.insert("type".into(), JsonValue::String("object".into()));

    if let Some(title) = &simple.title {
        schema.insert("title".into(), JsonValue::String(title.clone()));
    }
    if let Some(desc) = &simple.description {
        schema.insert("description".into(), JsonValue::String(desc.clone()));
    }

    let (properties, required) = convert_properties(&simple.properties);
    schema.insert("properties".into(), properties);

    if !required.is_empty() {
        schema.insert(
            "required".into(),
            JsonValue::Array(required.into_iter().map(JsonValue::String).collect()),
        );
    }
    if simple.strict {
        schema.insert("additionalProperties".into(), JsonValue::Bool(false));
    }

    JsonValue::Object(schema)
}

fn convert_properties(props: &IndexMap<String, SimpleProperty>) -> (JsonValue, Vec<String>) {
    let mut json_props = Map::new();
    let mut required = Vec::new();

    for (name, prop) in props {
        json_props.insert(name.clone(), convert_property(prop));
        if prop.required {
            required.push(name.clone());
        }
    }

    (JsonValue::Object(json_props), required)
}

fn convert_property(prop: &SimpleProperty) -> JsonValue {
    let mut json = Map::new();

    let type_str = match prop.prop_type {
        PropertyType::String => Some("string"),
        PropertyType::Number => Some("number"),
        PropertyType::Integer => Some("integer"),
        PropertyType::Boolean => Some("boolean"),
        PropertyType::Array => Some("array"),
        PropertyType::Object => Some("object"),
        // JSON Schema has no "any": leave the type open
        PropertyType::Any => None,
    };
    if let Some(type_str) = type_str {
        json.insert("type".into(), JsonValue::String(type_str.into()));
    }

    if let Some(desc) = &prop.description {
        json.insert("description".into(), JsonValue::String(desc.clone()));
    }
    if let Some(enum_vals) = &prop.enum_values {
        json.insert("enum".into(), JsonValue::Array(enum_vals.clone()));
    }
    if let Some(pattern) = &prop.pattern {
        json.insert("pattern".into(), JsonValue::String(pattern.clone()));
    }
    if let Some(min) = prop.min {
        json.insert("minimum".into(), JsonValue::from(min));
    }
    if let Some(max) = prop.max {
        json.insert("maximum".into(), JsonValue::from(max));
    }
    if let Some(min_len) = prop.min_length {
        json.insert("minLength".into(), JsonValue::from(min_len));
    }
    if let Some(max_len) = prop.max_length {
        json.insert("maxLength".into(), JsonValue::from(max_len));
    }

    if let Some(nested_props) = &prop.properties {
        let (nested_json, nested_required) = convert_properties(nested_props);
        json.insert("properties".into(), nested_json);
        if !nested_required.is_empty() {
            json.insert(
                "required".into(),
                JsonValue::Array(nested_required.into_iter().map(JsonValue::String).collect()),
            );
        }
    }

    if let Some(items) = &prop.items {
        json.insert("items".into(), convert_property(items));
    }

    JsonValue::Object(json)
}

/// Schema with its compiled validator
pub struct CompiledSchema {
    schema: ConfigSchema,
    compiled: jsonschema::Validator,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    pub fn new(schema: ConfigSchema) -> Result<Self> {
        let json_schema = schema.to_json_schema();
        let compiled =
            jsonschema::validator_for(&json_schema).map_err(|e| CoreError::InvalidSchema {
                message: format!("Invalid schema: {}", e),
            })?;

        Ok(Self { schema, compiled })
    }

    /// Validate a configuration object, returning every violation found
    pub fn validate(&self, config: &Map<String, JsonValue>) -> Vec<SchemaErrorInfo> {
        let instance = JsonValue::Object(config.clone());
        if self.compiled.is_valid(&instance) {
            return Vec::new();
        }

        self.compiled
            .iter_errors(&instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                SchemaErrorInfo {
                    path: if path.is_empty() {
                        "(root)".to_string()
                    } else {
                        path
                    },
                    message: e.to_string().replace('"', "'"),
                }
            })
            .collect()
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }
}
