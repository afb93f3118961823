//! Declarative output schemas and validation
//!
//! A [`Schema`] describes the shape a structured completion must take: named
//! fields, their types, per-field descriptions and enum constraints. It is used
//! twice per call: rendered to JSON Schema to request structured output from the
//! model, then to validate whatever the model actually returned. Model output is
//! untrusted, so validation never assumes the provider enforced the schema.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::schema::{Field, FieldType, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::new("route")
//!     .field(Field::string("reason").describe("Why this route was chosen"))
//!     .field(Field::enumeration("assistant_id", ["math", "story"]));
//!
//! let result = schema
//!     .validate(&json!({"reason": "it is a story", "assistant_id": "story"}))
//!     .unwrap();
//! assert_eq!(result.get_str("assistant_id"), Some("story"));
//!
//! assert!(schema.validate(&json!({"reason": "x", "assistant_id": "poem"})).is_err());
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Type of a schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// String constrained to a fixed set of values
    Enum(Vec<String>),
    /// Homogeneous array
    Array(Box<FieldType>),
    /// Nested object
    Object(Schema),
}

impl FieldType {
    /// Human-readable type name used in violations
    pub fn describe(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Enum(values) => format!("one of [{}]", values.join(", ")),
            FieldType::Array(item) => format!("array<{}>", item.describe()),
            FieldType::Object(schema) => format!("object `{}`", schema.name),
        }
    }

    fn to_json_schema(&self, description: Option<&str>) -> Value {
        let mut node = match self {
            FieldType::String => json!({"type": "string"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::Boolean => json!({"type": "boolean"}),
            FieldType::Enum(values) => json!({"type": "string", "enum": values}),
            FieldType::Array(item) => json!({"type": "array", "items": item.to_json_schema(None)}),
            FieldType::Object(schema) => schema.to_json_schema(),
        };

        if let (Some(desc), Value::Object(obj)) = (description, &mut node) {
            obj.insert("description".to_string(), Value::String(desc.to_string()));
        }

        node
    }

    fn is_strict(&self) -> bool {
        match self {
            FieldType::Array(item) => item.is_strict(),
            FieldType::Object(schema) => schema.is_strict(),
            _ => true,
        }
    }
}

/// A named field within a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

impl Field {
    /// Create a required field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
            required: true,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// String field constrained to `values`
    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldType::Enum(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn array(name: impl Into<String>, item: FieldType) -> Self {
        Self::new(name, FieldType::Array(Box::new(item)))
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldType::Object(schema))
    }

    /// Attach a description for the model
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the field as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Declarative description of an expected structured result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Set the schema description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a field
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of all declared fields, in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Whether every field at every depth is required.
    ///
    /// Providers that support strict structured output require this.
    pub fn is_strict(&self) -> bool {
        self.fields
            .iter()
            .all(|f| f.required && f.field_type.is_strict())
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                field.field_type.to_json_schema(field.description.as_deref()),
            );
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });

        if let (Some(desc), Value::Object(obj)) = (&self.description, &mut schema) {
            obj.insert("description".to_string(), Value::String(desc.clone()));
        }

        schema
    }

    /// Validate a value and produce a conforming result.
    ///
    /// Undeclared fields are dropped so the result carries exactly the
    /// declared names. Types are checked without coercion: `"3"` is not an
    /// integer and `3.0` is not an integer either.
    pub fn validate(&self, value: &Value) -> Result<StructuredResult, SchemaViolation> {
        let fields = self.validate_object("", value)?;
        Ok(StructuredResult { fields })
    }

    fn validate_object(&self, path: &str, value: &Value) -> Result<Map<String, Value>, SchemaViolation> {
        let obj = value.as_object().ok_or_else(|| {
            SchemaViolation::type_mismatch(display_path(path), "object", value)
        })?;

        let mut out = Map::new();
        for field in &self.fields {
            let field_path = join_path(path, &field.name);
            match obj.get(&field.name) {
                None | Some(Value::Null) if !field.required => {}
                None => {
                    return Err(SchemaViolation {
                        field: field_path,
                        expected: field.field_type.describe(),
                        actual: "missing".to_string(),
                        kind: ViolationKind::Missing,
                    });
                }
                Some(v) => {
                    let checked = validate_value(&field_path, &field.field_type, v)?;
                    out.insert(field.name.clone(), checked);
                }
            }
        }

        Ok(out)
    }
}

fn validate_value(path: &str, field_type: &FieldType, value: &Value) -> Result<Value, SchemaViolation> {
    match field_type {
        FieldType::String if value.is_string() => Ok(value.clone()),
        FieldType::Integer if value.is_i64() || value.is_u64() => Ok(value.clone()),
        FieldType::Number if value.is_number() => Ok(value.clone()),
        FieldType::Boolean if value.is_boolean() => Ok(value.clone()),
        FieldType::Enum(values) => match value.as_str() {
            Some(s) if values.iter().any(|v| v == s) => Ok(value.clone()),
            Some(s) => Err(SchemaViolation {
                field: path.to_string(),
                expected: field_type.describe(),
                actual: format!("\"{}\"", s),
                kind: ViolationKind::NotInEnum {
                    value: s.to_string(),
                },
            }),
            None => Err(SchemaViolation::type_mismatch(path, field_type.describe(), value)),
        },
        FieldType::Array(item) => {
            let items = value
                .as_array()
                .ok_or_else(|| SchemaViolation::type_mismatch(path, field_type.describe(), value))?;
            let checked = items
                .iter()
                .enumerate()
                .map(|(i, v)| validate_value(&format!("{}[{}]", path, i), item, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(checked))
        }
        FieldType::Object(schema) => Ok(Value::Object(schema.validate_object(path, value)?)),
        _ => Err(SchemaViolation::type_mismatch(path, field_type.describe(), value)),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "$" } else { path }
}

/// JSON type name of a value
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What went wrong with a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent
    Missing,
    /// The value has the wrong JSON type
    TypeMismatch,
    /// A string outside the permitted enum
    NotInEnum { value: String },
    /// The response was not parseable as a JSON object at all
    Malformed { detail: String },
}

/// A structured response that failed schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// Dotted path of the offending field (`$` for the whole response)
    pub field: String,
    /// Expected type description
    pub expected: String,
    /// Actual type (or value, for enum violations)
    pub actual: String,
    pub kind: ViolationKind,
}

impl SchemaViolation {
    fn type_mismatch(path: &str, expected: impl Into<String>, value: &Value) -> Self {
        Self {
            field: path.to_string(),
            expected: expected.into(),
            actual: json_type_name(value).to_string(),
            kind: ViolationKind::TypeMismatch,
        }
    }

    /// The response text could not be parsed as JSON
    pub fn malformed(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            field: "$".to_string(),
            expected: "JSON object".to_string(),
            actual: "unparseable text".to_string(),
            kind: ViolationKind::Malformed { detail },
        }
    }

    /// The rejected value, if this is an enum violation
    pub fn rejected_enum_value(&self) -> Option<&str> {
        match &self.kind {
            ViolationKind::NotInEnum { value } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Malformed { detail } => {
                write!(f, "response is not a JSON object: {}", detail)
            }
            _ => write!(
                f,
                "field `{}`: expected {}, got {}",
                self.field, self.expected, self.actual
            ),
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// A schema-conforming mapping from field name to value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredResult {
    fields: Map<String, Value>,
}

impl StructuredResult {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_array(&self, field: &str) -> Option<&Vec<Value>> {
        self.fields.get(field).and_then(Value::as_array)
    }

    /// Field names present in the result
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Deserialize into a typed struct
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe_schema() -> Schema {
        let ingredient = Schema::new("ingredient")
            .field(Field::string("name").describe("name of the ingredient"))
            .field(Field::string("amount").describe("amount of the ingredient"));

        Schema::new("recipe")
            .describe("recipe for a tasteful meal")
            .field(Field::string("reasoning"))
            .field(Field::string("name"))
            .field(Field::array("ingredients", FieldType::Object(ingredient)))
            .field(Field::array("instructions", FieldType::String))
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = Schema::new("verdict")
            .field(Field::string("feedback").describe("Detailed feedback"))
            .field(Field::enumeration("verdict", ["PASS", "FAIL"]));

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["additionalProperties"], false);
        assert_eq!(rendered["required"], json!(["feedback", "verdict"]));
        assert_eq!(rendered["properties"]["feedback"]["description"], "Detailed feedback");
        assert_eq!(rendered["properties"]["verdict"]["enum"], json!(["PASS", "FAIL"]));
    }

    #[test]
    fn test_nested_validation() {
        let value = json!({
            "reasoning": "kids like eggs",
            "name": "omurice",
            "ingredients": [{"name": "egg", "amount": "2"}, {"name": "rice", "amount": "1 cup"}],
            "instructions": ["cook rice", "wrap in omelette"]
        });

        let result = recipe_schema().validate(&value).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(result.get_array("ingredients").unwrap().len(), 2);
    }

    #[test]
    fn test_nested_violation_reports_path() {
        let value = json!({
            "reasoning": "r",
            "name": "n",
            "ingredients": [{"name": "egg", "amount": 2}],
            "instructions": []
        });

        let err = recipe_schema().validate(&value).unwrap_err();
        assert_eq!(err.field, "ingredients[0].amount");
        assert_eq!(err.expected, "string");
        assert_eq!(err.actual, "integer");
        assert_eq!(err.kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = Schema::new("gen")
            .field(Field::string("thoughts"))
            .field(Field::string("code"));

        let err = schema.validate(&json!({"thoughts": "hmm"})).unwrap_err();
        assert_eq!(err.field, "code");
        assert_eq!(err.kind, ViolationKind::Missing);
    }

    #[test]
    fn test_no_coercion() {
        let schema = Schema::new("n").field(Field::integer("count"));

        assert!(schema.validate(&json!({"count": 3})).is_ok());
        assert!(schema.validate(&json!({"count": "3"})).is_err());
        assert!(schema.validate(&json!({"count": 3.5})).is_err());
    }

    #[test]
    fn test_enum_violation_exposes_value() {
        let schema = Schema::new("route").field(Field::enumeration("id", ["a", "b"]));
        let err = schema.validate(&json!({"id": "c"})).unwrap_err();
        assert_eq!(err.rejected_enum_value(), Some("c"));
    }

    #[test]
    fn test_optional_and_extra_fields() {
        let schema = Schema::new("s")
            .field(Field::string("a"))
            .field(Field::string("b").optional());

        let result = schema.validate(&json!({"a": "x", "b": null, "extra": 1})).unwrap();
        assert_eq!(result.field_names().collect::<Vec<_>>(), vec!["a"]);
        assert!(!schema.is_strict());
    }

    #[test]
    fn test_non_object_response() {
        let schema = Schema::new("s").field(Field::string("a"));
        let err = schema.validate(&json!(["a"])).unwrap_err();
        assert_eq!(err.field, "$");
        assert_eq!(err.actual, "array");
    }

    #[test]
    fn test_deserialize_typed() {
        #[derive(Deserialize)]
        struct Generated {
            thoughts: String,
            code: String,
        }

        let schema = Schema::new("gen")
            .field(Field::string("thoughts"))
            .field(Field::string("code"));
        let result = schema
            .validate(&json!({"thoughts": "t", "code": "fn main() {}"}))
            .unwrap();

        let generated: Generated = result.deserialize().unwrap();
        assert_eq!(generated.thoughts, "t");
        assert_eq!(generated.code, "fn main() {}");
    }
}
