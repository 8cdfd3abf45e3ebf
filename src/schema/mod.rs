//! Register and custom-field schemas
//!
//! A schema is an ordered [`FieldList`]. Registers own one each; the
//! facility-wide custom patient fields are another. Mutations validate
//! first and only then touch the list, so a failed call leaves the schema
//! exactly as it was.

pub mod field_type;

pub use field_type::{FieldType, RawValue, RawValueMap, WidgetKind};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calc::{self, CalcError};
use crate::error::SchemaError;
use crate::validation::constraint::Constraint;

/// Serialized values keyed by field name, as stored on an entry.
pub type FormData = BTreeMap<String, String>;

/// One configurable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Label and storage key at once.
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Comma-separated options for selection types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: impl Into<FieldType>) -> Self {
        FieldSpec {
            name: name.to_string(),
            field_type: field_type.into(),
            required: false,
            default: String::new(),
            constraint: None,
            choices: None,
            calc: None,
            label: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = default.to_string();
        self
    }

    pub fn with_constraint(mut self, constraint: &str) -> Self {
        self.constraint = Some(constraint.to_string());
        self
    }

    pub fn with_choices(mut self, choices: &str) -> Self {
        self.choices = Some(choices.to_string());
        self
    }

    pub fn with_calc(mut self, formula: &str) -> Self {
        self.calc = Some(formula.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn display_label(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.name,
        }
    }

    pub fn choice_list(&self) -> Vec<String> {
        self.choices
            .as_deref()
            .map(field_type::parse_choices)
            .unwrap_or_default()
    }

    /// The constraint text, if it holds anything but whitespace.
    pub fn constraint_text(&self) -> Option<&str> {
        self.constraint.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Checks the field-local invariants: a name, choices for selection
    /// types, a constraint that parses, and a formula within the size limits.
    ///
    /// Formulas are otherwise free-form here. One that does not parse, or
    /// names a field added later, just calculates to an empty value.
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyFieldName);
        }

        if self.field_type.requires_choices() && self.choice_list().is_empty() {
            return Err(SchemaError::MissingChoices(self.name.clone()));
        }

        if let Some(text) = self.constraint_text() {
            Constraint::parse(text).map_err(|e| SchemaError::InvalidConstraint {
                field: self.name.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.field_type == FieldType::Calculate {
            let parsed = self.calc.as_deref().map(|f| calc::parser::parse(f, &[]));
            if let Some(Err(e @ (CalcError::TooDeep | CalcError::TooLong))) = parsed {
                return Err(SchemaError::InvalidFormula {
                    field: self.name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// An ordered list of fields with unique names.
///
/// Order only drives rendering; fields are identified by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldList(Vec<FieldSpec>);

impl FieldList {
    pub fn new() -> Self {
        FieldList(Vec::new())
    }

    /// Builds a list from specs, applying the same checks as `add_field`.
    pub fn from_specs(specs: impl IntoIterator<Item = FieldSpec>) -> Result<Self, SchemaError> {
        let mut list = FieldList::new();
        for spec in specs {
            list.add_field(spec)?;
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldSpec> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FieldSpec] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&FieldSpec> {
        self.0.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&FieldSpec> {
        self.0.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.name.clone()).collect()
    }

    pub fn add_field(&mut self, spec: FieldSpec) -> Result<(), SchemaError> {
        spec.check()?;
        if self.find(&spec.name).is_some() {
            return Err(SchemaError::DuplicateFieldName(spec.name));
        }
        self.0.push(spec);
        Ok(())
    }

    /// Replaces the field at `index`, returning the old spec.
    pub fn update_field(&mut self, index: usize, spec: FieldSpec) -> Result<FieldSpec, SchemaError> {
        self.check_index(index)?;
        spec.check()?;

        let clash = self
            .0
            .iter()
            .enumerate()
            .any(|(i, f)| i != index && f.name == spec.name);
        if clash {
            return Err(SchemaError::DuplicateFieldName(spec.name));
        }

        Ok(std::mem::replace(&mut self.0[index], spec))
    }

    /// Removes the field at `index`. Values already captured under its name
    /// are left alone wherever they are stored.
    pub fn delete_field(&mut self, index: usize) -> Result<FieldSpec, SchemaError> {
        self.check_index(index)?;
        Ok(self.0.remove(index))
    }

    /// Swaps the field with its neighbour. Returns `false` when the field is
    /// already at that end of the list.
    pub fn move_field(&mut self, index: usize, direction: Direction) -> Result<bool, SchemaError> {
        self.check_index(index)?;

        let target = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < self.0.len() => index + 1,
            _ => return Ok(false),
        };

        self.0.swap(index, target);
        Ok(true)
    }

    fn check_index(&self, index: usize) -> Result<(), SchemaError> {
        if index >= self.0.len() {
            return Err(SchemaError::FieldIndexOutOfRange {
                index,
                len: self.0.len(),
            });
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a FieldSpec;
    type IntoIter = std::slice::Iter<'a, FieldSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A named form schema for one kind of service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    pub name: String,
    #[serde(default)]
    pub fields: FieldList,
    /// Users allowed to capture into this register. Empty means everyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_users: Vec<String>,
}

impl Register {
    pub fn new(name: &str) -> Self {
        Register {
            name: name.to_string(),
            fields: FieldList::new(),
            assigned_users: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: FieldList) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_assigned_users(mut self, users: Vec<String>) -> Self {
        self.assigned_users = users;
        self
    }

    pub fn is_available_to(&self, username: &str) -> bool {
        self.assigned_users.is_empty() || self.assigned_users.iter().any(|u| u == username)
    }
}

/// Which schema a field operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTarget<'a> {
    Register(&'a str),
    PatientFields,
}
