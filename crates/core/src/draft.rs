#![forbid(unsafe_code)]

use crate::hierarchy::LevelDef;
use crate::ids::ClientId;
use crate::node::Fields;
use std::collections::BTreeMap;

/// Pending payload for a child that has not been committed yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Draft {
    pub fields: Fields,
}

impl Draft {
    /// Overlays `partial` onto the draft. No validation happens here.
    pub fn merge(&mut self, partial: Fields) {
        for (key, value) in partial {
            self.fields.insert(key, value);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("draft for level {level} rejected ({} field errors)", errors.len())]
pub struct ValidationFailure {
    pub level: String,
    pub errors: Vec<FieldError>,
}

/// Result of committing a draft. A rejection leaves the draft untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum DraftOutcome {
    Committed { client_id: ClientId },
    Rejected(ValidationFailure),
}

/// Field-level schema checks for a level, owned by the embedding application.
pub trait SchemaValidator {
    fn validate(&self, level: &LevelDef, payload: &Fields) -> Result<(), ValidationFailure>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl SchemaValidator for AcceptAll {
    fn validate(&self, _level: &LevelDef, _payload: &Fields) -> Result<(), ValidationFailure> {
        Ok(())
    }
}

/// Requires non-null, non-blank values for the listed fields of each level.
#[derive(Clone, Debug, Default)]
pub struct RequiredFields {
    by_level: BTreeMap<String, Vec<String>>,
}

impl RequiredFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, level: &str, fields: &[&str]) -> Self {
        self.by_level
            .entry(level.to_string())
            .or_default()
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }
}

impl SchemaValidator for RequiredFields {
    fn validate(&self, level: &LevelDef, payload: &Fields) -> Result<(), ValidationFailure> {
        let Some(required) = self.by_level.get(&level.name) else {
            return Ok(());
        };
        let errors: Vec<FieldError> = required
            .iter()
            .filter(|field| match payload.get(field.as_str()) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| FieldError {
                field: field.clone(),
                message: "required".to_string(),
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                level: level.name.clone(),
                errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_and_extends() {
        let mut draft = Draft::default();
        draft.merge(json!({"title": "a", "body": "x"}).as_object().cloned().unwrap());
        draft.merge(json!({"title": "b"}).as_object().cloned().unwrap());
        assert_eq!(draft.fields.get("title"), Some(&json!("b")));
        assert_eq!(draft.fields.get("body"), Some(&json!("x")));
    }

    #[test]
    fn required_fields_reports_every_blank_field() {
        let validator = RequiredFields::new().require("section", &["title", "kind"]);
        let level = LevelDef::new("section", true);
        let payload = json!({"title": "  "}).as_object().cloned().unwrap();
        let failure = validator.validate(&level, &payload).unwrap_err();
        let names: Vec<_> = failure.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(names, vec!["title", "kind"]);

        let other = LevelDef::new("document", false);
        assert!(validator.validate(&other, &Fields::new()).is_ok());
    }
}
