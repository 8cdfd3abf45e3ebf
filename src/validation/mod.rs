//! Field validation
//!
//! [`validate_field`] applies, in order: the required check, the
//! future-date guard for date types, and the field's type and constraint
//! clauses. [`resolve`] runs it over a whole submission and then fills in
//! calculated fields.

pub mod constraint;

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::calc;
use crate::schema::{FieldList, FieldSpec, FieldType, FormData, RawValue, RawValueMap};
use constraint::{parse_number, Constraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldErrorKind {
    RequiredFieldMissing,
    FutureDateNotAllowed,
    ConstraintViolation,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FieldErrorKind::RequiredFieldMissing => "required field missing",
            FieldErrorKind::FutureDateNotAllowed => "future date not allowed",
            FieldErrorKind::ConstraintViolation => "constraint violation",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    fn new(spec: &FieldSpec, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        FieldError {
            field: spec.name.clone(),
            kind,
            message: message.into(),
        }
    }
}

/// Every failing field of one submission, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }

    pub fn kind_of(&self, field: &str) -> Option<FieldErrorKind> {
        self.errors.iter().find(|e| e.field == field).map(|e| e.kind)
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }
}

/// Validates one serialized value against its field.
pub fn validate_field(spec: &FieldSpec, value: &str, today: NaiveDate) -> Result<(), FieldError> {
    if value.is_empty() {
        if spec.required {
            return Err(FieldError::new(
                spec,
                FieldErrorKind::RequiredFieldMissing,
                format!("{} is required", spec.display_label()),
            ));
        }
        return Ok(());
    }

    if spec.field_type.is_date() {
        match parse_calendar_date(&spec.field_type, value) {
            Some(date) if date > today => {
                return Err(FieldError::new(
                    spec,
                    FieldErrorKind::FutureDateNotAllowed,
                    format!("{} cannot be after {}", value, today),
                ));
            }
            Some(_) => {}
            None => {
                return Err(FieldError::new(
                    spec,
                    FieldErrorKind::ConstraintViolation,
                    format!("{} is not a valid date", value),
                ));
            }
        }
    }

    check_shape(spec, value)
        .map_err(|message| FieldError::new(spec, FieldErrorKind::ConstraintViolation, message))?;

    if let Some(text) = spec.constraint_text() {
        match Constraint::parse(text) {
            Ok(constraint) => constraint.check(value).map_err(|message| {
                FieldError::new(spec, FieldErrorKind::ConstraintViolation, message)
            })?,
            // unparseable constraints only exist in legacy documents
            Err(e) => log::warn!(
                "ignoring unparseable constraint '{}' on field '{}': {}",
                text,
                spec.name,
                e
            ),
        }
    }

    Ok(())
}

/// Type checks the input widget would otherwise enforce.
fn check_shape(spec: &FieldSpec, value: &str) -> Result<(), String> {
    match &spec.field_type {
        FieldType::Integer => value
            .trim()
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| "must be a whole number".to_string()),
        FieldType::Decimal => parse_number(value)
            .map(|_| ())
            .ok_or_else(|| "must be a number".to_string()),
        FieldType::Time => parse_time(value)
            .map(|_| ())
            .ok_or_else(|| format!("{} is not a valid time", value)),
        FieldType::SelectOne => {
            let choices = spec.choice_list();
            if choices.iter().any(|c| c == value) {
                Ok(())
            } else {
                Err(format!("{} is not one of the choices", value))
            }
        }
        FieldType::SelectMultiple => {
            let choices = spec.choice_list();
            match crate::schema::field_type::split_multi_choice(value)
                .into_iter()
                .find(|selected| !choices.contains(selected))
            {
                Some(unknown) => Err(format!("{} is not one of the choices", unknown)),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// The calendar day a date or date-time value falls on.
fn parse_calendar_date(field_type: &FieldType, value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if *field_type != FieldType::DateTime {
        return None;
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Serializes, validates and calculates one submission against a schema.
///
/// Every collected field is checked, without stopping at the first
/// failure, so the caller can flag all invalid inputs at once. Calculated
/// fields are evaluated afterwards, in schema order, from the resolved
/// values. A missing raw value counts as empty.
pub fn resolve(
    fields: &FieldList,
    raw: &RawValueMap,
    today: NaiveDate,
) -> Result<FormData, ValidationReport> {
    let mut form_data = FormData::new();
    let mut report = ValidationReport::default();
    let empty = RawValue::Text(String::new());

    for spec in fields.iter().filter(|f| f.field_type.is_collected()) {
        let submitted = raw.get(&spec.name).unwrap_or(&empty);
        let Some(value) = spec.field_type.serialize(submitted) else {
            continue;
        };

        if let Err(error) = validate_field(spec, &value, today) {
            report.push(error);
        }
        form_data.insert(spec.name.clone(), value);
    }

    if !report.is_valid() {
        return Err(report);
    }

    for spec in fields.iter().filter(|f| f.field_type == FieldType::Calculate) {
        let value = calc::calculate(spec.calc.as_deref(), &spec.name, &form_data);
        form_data.insert(spec.name.clone(), value);
    }

    Ok(form_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn kind(spec: &FieldSpec, value: &str) -> Option<FieldErrorKind> {
        validate_field(spec, value, today()).err().map(|e| e.kind)
    }

    #[test]
    fn required_fields_must_be_filled() {
        let spec = FieldSpec::new("name", "text").required();
        assert_eq!(kind(&spec, ""), Some(FieldErrorKind::RequiredFieldMissing));
        assert_eq!(kind(&spec, "Ama"), None);

        let optional = FieldSpec::new("notes", "text").with_constraint("min=3");
        assert_eq!(kind(&optional, ""), None);
    }

    #[test]
    fn dates_after_today_are_rejected() {
        let spec = FieldSpec::new("visit", "date");
        assert_eq!(kind(&spec, "2024-06-15"), None);
        assert_eq!(kind(&spec, "2024-06-16"), Some(FieldErrorKind::FutureDateNotAllowed));
        assert_eq!(kind(&spec, "15/06/2024"), Some(FieldErrorKind::ConstraintViolation));
    }

    #[test]
    fn datetimes_compare_by_calendar_day() {
        let spec = FieldSpec::new("onset", "datetime");
        assert_eq!(kind(&spec, "2024-06-15T23:30"), None);
        assert_eq!(kind(&spec, "2024-06-16T00:05"), Some(FieldErrorKind::FutureDateNotAllowed));
        assert_eq!(kind(&spec, "2024-06-14"), None);
    }

    #[test]
    fn constraint_bounds_apply_to_numbers() {
        let spec = FieldSpec::new("score", "integer").with_constraint("min=0,max=100");
        assert_eq!(kind(&spec, "150"), Some(FieldErrorKind::ConstraintViolation));
        assert_eq!(kind(&spec, "50"), None);
    }

    #[test]
    fn widget_shapes_are_enforced() {
        let dose = FieldSpec::new("dose", "integer");
        assert_eq!(kind(&dose, "2.5"), Some(FieldErrorKind::ConstraintViolation));

        let vaccine = FieldSpec::new("vaccine", "select_one").with_choices("BCG,OPV");
        assert_eq!(kind(&vaccine, "MMR"), Some(FieldErrorKind::ConstraintViolation));

        let symptoms = FieldSpec::new("symptoms", "select_multiple").with_choices("Fever,Cough");
        assert_eq!(kind(&symptoms, "Fever, Cough"), None);
        assert_eq!(kind(&symptoms, "Fever, Rash"), Some(FieldErrorKind::ConstraintViolation));

        let at = FieldSpec::new("at", "time");
        assert_eq!(kind(&at, "08:30"), None);
        assert_eq!(kind(&at, "25:00"), Some(FieldErrorKind::ConstraintViolation));
    }

    #[test]
    fn resolve_reports_every_failing_field() {
        let fields = FieldList::from_specs(vec![
            FieldSpec::new("a", "integer").required(),
            FieldSpec::new("b", "date"),
            FieldSpec::new("c", "text").required(),
        ])
        .unwrap();

        let mut raw = RawValueMap::new();
        raw.insert("b".to_string(), RawValue::from("2030-01-01"));

        let report = resolve(&fields, &raw, today()).unwrap_err();
        assert_eq!(report.field_names(), vec!["a", "b", "c"]);
        assert_eq!(report.kind_of("b"), Some(FieldErrorKind::FutureDateNotAllowed));
    }

    #[test]
    fn resolve_calculates_after_collecting() {
        let fields = FieldList::from_specs(vec![
            FieldSpec::new("total", "calculate").with_calc("a + b"),
            FieldSpec::new("a", "integer"),
            FieldSpec::new("b", "integer"),
            FieldSpec::new("heading", "note"),
        ])
        .unwrap();

        let mut raw = RawValueMap::new();
        raw.insert("a".to_string(), RawValue::from("10"));
        raw.insert("b".to_string(), RawValue::from("5"));
        raw.insert("heading".to_string(), RawValue::from("ignored"));
        raw.insert("stray".to_string(), RawValue::from("ignored"));

        let data = resolve(&fields, &raw, today()).unwrap();
        let expected: FormData = [("a", "10"), ("b", "5"), ("total", "15")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(data, expected);
    }
}
