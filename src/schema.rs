//! The fixed output contract the extraction backend must honour.
//!
//! An [`ExtractionSchema`] is configuration, not user input: it is built once
//! at start-up (the built-in [`ExtractionSchema::plan_review`] or a JSON file
//! loaded by the binary) and shared read-only by every request.
//!
//! The schema plays two roles:
//!
//! 1. [`ExtractionSchema::to_json_schema`] emits a strict JSON Schema sent with
//!    every extraction call, so the backend is contractually bound to it.
//! 2. [`ExtractionSchema::check`] re-verifies the parsed reply, because a
//!    contract is not a guarantee.
//!
//! Strict-mode backends insist that every property is listed as required.
//! Optional fields are therefore emitted as required-but-nullable, and the
//! local check treats a `null` or absent optional field the same way.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a single schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    StringArray,
}

impl FieldType {
    fn json_type(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::StringArray => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }
}

/// One field of the output object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Must be present and non-null in the reply.
    #[serde(default)]
    pub required: bool,
    /// Filled in when an optional field is absent or null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Versioned description of the structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    /// Schema name sent to the backend (`[A-Za-z0-9_-]`).
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSpec>,
    /// When false, keys not listed in `fields` are rejected.
    #[serde(default)]
    pub additional_properties: bool,
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self::plan_review()
    }
}

impl ExtractionSchema {
    /// Built-in schema for residential site and utility plan review.
    ///
    /// Only `quick_summary` is required. The `*_length_method` fields are
    /// optional without a default: some plan sets never state how a service
    /// length was derived, and a deployment that needs them can mark them
    /// required (or give them a default) in its own schema file.
    pub fn plan_review() -> Self {
        use FieldType::*;
        let mut fields = vec![
            FieldSpec::required(
                "quick_summary",
                String,
                "Two or three sentences describing what the document shows.",
            ),
            FieldSpec::optional("document_type", String, "Kind of sheet or document."),
            FieldSpec::optional("project_name", String, "Project or subdivision name."),
            FieldSpec::optional("address", String, "Street address of the lot."),
            FieldSpec::optional("lot_number", String, "Lot and block identifier."),
            FieldSpec::optional("builder", String, "Builder named on the plan."),
            FieldSpec::optional("sheet_count", Integer, "Number of sheets in the set."),
        ];
        for service in ["water", "sewer", "gas", "electric"] {
            fields.push(FieldSpec::optional(
                &format!("{service}_service_length_ft"),
                Number,
                &format!("Length of the {service} service line in feet."),
            ));
            fields.push(FieldSpec::optional(
                &format!("{service}_length_method"),
                String,
                &format!("How the {service} length was derived (dimensioned, scaled, estimated)."),
            ));
        }
        fields.push(FieldSpec::optional(
            "notes",
            StringArray,
            "Other observations relevant to utility installation.",
        ));

        Self {
            name: "plan_review".to_string(),
            version: "2".to_string(),
            description: "Structured summary of a site or utility plan.".to_string(),
            fields,
            additional_properties: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Emit a strict JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for f in &self.fields {
            let mut prop = if f.field_type == FieldType::StringArray {
                json!({ "items": { "type": "string" } })
            } else {
                json!({})
            };
            let ty = if f.required {
                json!(f.field_type.json_type())
            } else {
                json!([f.field_type.json_type(), "null"])
            };
            prop["type"] = ty;
            if !f.description.is_empty() {
                prop["description"] = json!(f.description);
            }
            properties.insert(f.name.clone(), prop);
        }

        let required: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// Verify `value` is shaped like this schema and fill in defaults.
    ///
    /// Returns the (possibly default-filled) value, or a description of the
    /// first mismatch found.
    pub fn check(&self, value: Value) -> Result<Value, String> {
        let Value::Object(mut obj) = value else {
            return Err(format!("expected a JSON object, got {}", type_name(&value)));
        };

        if !self.additional_properties {
            if let Some(unknown) = obj.keys().find(|k| self.field(k).is_none()) {
                return Err(format!("unexpected field '{unknown}'"));
            }
        }

        for f in &self.fields {
            match obj.get(&f.name) {
                None | Some(Value::Null) if f.required => {
                    return Err(format!("missing required field '{}'", f.name));
                }
                None | Some(Value::Null) => {
                    if let Some(default) = &f.default {
                        obj.insert(f.name.clone(), default.clone());
                    }
                }
                Some(v) if !f.field_type.matches(v) => {
                    return Err(format!(
                        "field '{}' should be {}, got {}",
                        f.name,
                        f.field_type.json_type(),
                        type_name(v)
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(Value::Object(obj))
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
