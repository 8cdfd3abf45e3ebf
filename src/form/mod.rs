//! Form rendering
//!
//! [`render`] turns a schema and optional prior values into a [`WidgetSet`],
//! one widget per field in schema order. The host UI writes user input
//! back with [`WidgetSet::set_value`] and hands [`WidgetSet::collect`] to the
//! save path. No validation happens here; [`WidgetSet::apply_report`]
//! only mirrors a validation result onto the widgets for highlighting.

use chrono::NaiveDate;
use serde::Serialize;

use crate::schema::field_type::split_multi_choice;
use crate::schema::{FieldList, FieldSpec, FieldType, FormData, RawValue, RawValueMap, WidgetKind};
use crate::validation::{FieldErrorKind, ValidationReport};

/// Facts about the current patient and day that shape prefill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub today: NaiveDate,
    /// Prefills fields named like "age" when they have no prior value.
    pub patient_age: Option<String>,
}

impl RenderContext {
    pub fn new(today: NaiveDate) -> Self {
        RenderContext {
            today,
            patient_age: None,
        }
    }

    pub fn with_patient_age(mut self, age: impl Into<String>) -> Self {
        self.patient_age = Some(age.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub read_only: bool,
    pub control: WidgetKind,
    pub value: RawValue,
    pub invalid: Option<FieldErrorKind>,
}

impl Widget {
    fn from_spec(spec: &FieldSpec, prefill: String, today: NaiveDate) -> Self {
        let control = spec.field_type.widget(&spec.choice_list(), &prefill, today);
        let value = match &spec.field_type {
            FieldType::SelectMultiple => RawValue::Many(split_multi_choice(&prefill)),
            t if t.is_file_like() => RawValue::File {
                file_name: Some(prefill).filter(|name| !name.is_empty()),
            },
            _ => RawValue::Text(prefill),
        };

        Widget {
            name: spec.name.clone(),
            label: spec.display_label().to_string(),
            field_type: spec.field_type.clone(),
            required: spec.required,
            read_only: !spec.field_type.is_collected(),
            control,
            value,
            invalid: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WidgetSet {
    widgets: Vec<Widget>,
}

impl WidgetSet {
    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn get(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.name == name)
    }

    /// Records user input. Read-only widgets and unknown names are refused.
    pub fn set_value(&mut self, name: &str, value: impl Into<RawValue>) -> bool {
        match self.widgets.iter_mut().find(|w| w.name == name) {
            Some(widget) if !widget.read_only => {
                widget.value = value.into();
                true
            }
            _ => false,
        }
    }

    /// The raw values of every editable widget.
    pub fn collect(&self) -> RawValueMap {
        self.widgets
            .iter()
            .filter(|w| !w.read_only)
            .map(|w| (w.name.clone(), w.value.clone()))
            .collect()
    }

    /// Flags the widgets named in `report` and clears every other flag.
    pub fn apply_report(&mut self, report: &ValidationReport) {
        for widget in &mut self.widgets {
            widget.invalid = report.kind_of(&widget.name);
        }
    }

    pub fn invalid_names(&self) -> Vec<&str> {
        self.widgets
            .iter()
            .filter(|w| w.invalid.is_some())
            .map(|w| w.name.as_str())
            .collect()
    }
}

/// Renders `fields` in order, prefilling each widget from the prior value,
/// else the patient's age for age fields, else the field default.
///
/// An empty prior value counts as no value.
pub fn render(fields: &FieldList, prior: Option<&FormData>, ctx: &RenderContext) -> WidgetSet {
    let widgets = fields
        .iter()
        .map(|spec| {
            let prior_value = prior
                .and_then(|values| values.get(&spec.name))
                .filter(|v| !v.is_empty())
                .cloned();
            let age = ctx.patient_age.clone().filter(|_| is_age_field(&spec.name));
            let prefill = prior_value
                .or(age)
                .unwrap_or_else(|| spec.default.clone());
            Widget::from_spec(spec, prefill, ctx.today)
        })
        .collect();

    WidgetSet { widgets }
}

/// Whether a field name contains the word "age" ("Age", "age_years",
/// "Age at visit"), not merely the letters ("dosage", "page").
fn is_age_field(name: &str) -> bool {
    name.split(|c: char| !c.is_alphanumeric())
        .flat_map(split_camel_case)
        .any(|word| word.eq_ignore_ascii_case("age"))
}

fn split_camel_case(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in word.char_indices().skip(1) {
        if c.is_uppercase() {
            parts.push(&word[start..i]);
            start = i;
        }
    }
    parts.push(&word[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::resolve;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn anc_fields() -> FieldList {
        FieldList::from_specs(vec![
            FieldSpec::new("gravida", "integer").with_default("1"),
            FieldSpec::new("ageYears", "integer"),
            FieldSpec::new("risks", "select_multiple").with_choices("Anaemia,Hypertension,None"),
            FieldSpec::new("scan", "image"),
            FieldSpec::new("instructions", "note").with_default("Counsel on nutrition"),
            FieldSpec::new("ga", "calculate").with_calc("gravida * 2"),
        ])
        .unwrap()
    }

    #[test]
    fn prefill_prefers_prior_then_age_then_default() {
        let mut prior = FormData::new();
        prior.insert("risks".to_string(), "Anaemia, None".to_string());
        prior.insert("gravida".to_string(), String::new());
        prior.insert("scan".to_string(), "scan1.png".to_string());

        let ctx = RenderContext::new(today()).with_patient_age("27");
        let set = render(&anc_fields(), Some(&prior), &ctx);

        assert_eq!(set.get("gravida").unwrap().value, RawValue::from("1"));
        assert_eq!(set.get("ageYears").unwrap().value, RawValue::from("27"));
        assert_eq!(
            set.get("risks").unwrap().value,
            RawValue::Many(vec!["Anaemia".to_string(), "None".to_string()])
        );
        assert_eq!(set.get("scan").unwrap().value, RawValue::file("scan1.png"));
    }

    #[test]
    fn widgets_follow_schema_order_and_read_only_rules() {
        let set = render(&anc_fields(), None, &RenderContext::new(today()));
        let names: Vec<_> = set.widgets().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["gravida", "ageYears", "risks", "scan", "instructions", "ga"]);

        assert!(set.get("instructions").unwrap().read_only);
        assert!(set.get("ga").unwrap().read_only);
        assert_eq!(set.get("ga").unwrap().control, WidgetKind::Computed);
    }

    #[test]
    fn collect_skips_read_only_widgets() {
        let mut set = render(&anc_fields(), None, &RenderContext::new(today()));
        assert!(set.set_value("gravida", "3"));
        assert!(!set.set_value("ga", "99"));
        assert!(!set.set_value("nope", "1"));

        let raw = set.collect();
        assert_eq!(raw.get("gravida"), Some(&RawValue::from("3")));
        assert!(!raw.contains_key("ga"));
        assert!(!raw.contains_key("instructions"));

        let data = resolve(&anc_fields(), &raw, today()).unwrap();
        assert_eq!(data.get("ga").map(String::as_str), Some("6"));
    }

    #[test]
    fn report_flags_and_clears_widgets() {
        let fields = FieldList::from_specs(vec![
            FieldSpec::new("a", "text").required(),
            FieldSpec::new("b", "text").required(),
        ])
        .unwrap();
        let mut set = render(&fields, None, &RenderContext::new(today()));

        let report = resolve(&fields, &set.collect(), today()).unwrap_err();
        set.apply_report(&report);
        assert_eq!(set.invalid_names(), vec!["a", "b"]);

        set.set_value("a", "filled");
        let report = resolve(&fields, &set.collect(), today()).unwrap_err();
        set.apply_report(&report);
        assert_eq!(set.invalid_names(), vec!["b"]);
        assert_eq!(
            set.get("b").unwrap().invalid,
            Some(FieldErrorKind::RequiredFieldMissing)
        );
    }

    #[test]
    fn age_detection_matches_words_only() {
        assert!(is_age_field("Age"));
        assert!(is_age_field("age_years"));
        assert!(is_age_field("Age at visit"));
        assert!(is_age_field("patientAge"));
        assert!(!is_age_field("dosage"));
        assert!(!is_age_field("page"));
        assert!(!is_age_field("Stage"));
    }
}
