//! Field type catalog
//!
//! Each [`FieldType`] fixes the widget a field renders as, how a submitted
//! [`RawValue`] is reduced to the single stored string, and whether the
//! field needs a choice list.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Separator used when a multiple-choice selection is stored as one string.
pub const MULTI_CHOICE_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    DateTime,
    Time,
    SelectOne,
    SelectMultiple,
    Note,
    Calculate,
    Image,
    Audio,
    Video,
    File,
    Barcode,
    Qr,
    GeoPoint,
    GeoTrace,
    GeoShape,
    /// A type string this catalog does not know. Kept verbatim so the schema
    /// round-trips, and handled exactly like `Text`.
    Other(String),
}

impl FieldType {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "text" => FieldType::Text,
            "integer" => FieldType::Integer,
            "decimal" | "number" => FieldType::Decimal,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "time" => FieldType::Time,
            "select_one" => FieldType::SelectOne,
            "select_multiple" => FieldType::SelectMultiple,
            "note" => FieldType::Note,
            "calculate" => FieldType::Calculate,
            "image" => FieldType::Image,
            "audio" => FieldType::Audio,
            "video" => FieldType::Video,
            "file" => FieldType::File,
            "barcode" => FieldType::Barcode,
            "qr" | "qr_code" => FieldType::Qr,
            "geo" | "geopoint" => FieldType::GeoPoint,
            "geotrace" => FieldType::GeoTrace,
            "geoshape" => FieldType::GeoShape,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Time => "time",
            FieldType::SelectOne => "select_one",
            FieldType::SelectMultiple => "select_multiple",
            FieldType::Note => "note",
            FieldType::Calculate => "calculate",
            FieldType::Image => "image",
            FieldType::Audio => "audio",
            FieldType::Video => "video",
            FieldType::File => "file",
            FieldType::Barcode => "barcode",
            FieldType::Qr => "qr",
            FieldType::GeoPoint => "geopoint",
            FieldType::GeoTrace => "geotrace",
            FieldType::GeoShape => "geoshape",
            FieldType::Other(name) => name,
        }
    }

    pub fn requires_choices(&self) -> bool {
        matches!(self, FieldType::SelectOne | FieldType::SelectMultiple)
    }

    /// Whether a value for this type is taken from the submission.
    /// Notes are display-only and calculated fields are derived.
    pub fn is_collected(&self) -> bool {
        !matches!(self, FieldType::Note | FieldType::Calculate)
    }

    /// Date-valued types, subject to the future-date guard.
    pub fn is_date(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime)
    }

    pub fn is_file_like(&self) -> bool {
        matches!(
            self,
            FieldType::Image | FieldType::Audio | FieldType::Video | FieldType::File
        )
    }

    pub fn is_geo(&self) -> bool {
        matches!(
            self,
            FieldType::GeoPoint | FieldType::GeoTrace | FieldType::GeoShape
        )
    }

    /// Builds the widget description for a field of this type.
    ///
    /// `value` is the already-resolved prefill; selection widgets use it to
    /// mark the selected options.
    pub fn widget(&self, choices: &[String], value: &str, today: NaiveDate) -> WidgetKind {
        match self {
            FieldType::Integer => WidgetKind::NumberInput { whole: true },
            FieldType::Decimal => WidgetKind::NumberInput { whole: false },
            FieldType::Date => WidgetKind::DatePicker {
                include_time: false,
                max: today,
            },
            FieldType::DateTime => WidgetKind::DatePicker {
                include_time: true,
                max: today,
            },
            FieldType::Time => WidgetKind::TimePicker,
            FieldType::SelectOne => WidgetKind::SingleChoice {
                options: choices
                    .iter()
                    .map(|c| ChoiceOption::new(c, c == value.trim()))
                    .collect(),
            },
            FieldType::SelectMultiple => {
                let selected = split_multi_choice(value);
                WidgetKind::MultipleChoice {
                    options: choices
                        .iter()
                        .map(|c| ChoiceOption::new(c, selected.contains(c)))
                        .collect(),
                }
            }
            FieldType::Note => WidgetKind::Display,
            FieldType::Calculate => WidgetKind::Computed,
            FieldType::Image => WidgetKind::FilePicker {
                accept: Some("image/*".to_string()),
            },
            FieldType::Audio => WidgetKind::FilePicker {
                accept: Some("audio/*".to_string()),
            },
            FieldType::Video => WidgetKind::FilePicker {
                accept: Some("video/*".to_string()),
            },
            FieldType::File => WidgetKind::FilePicker { accept: None },
            FieldType::Barcode | FieldType::Qr => WidgetKind::TextInput {
                placeholder: Some("Scan/Enter code".to_string()),
            },
            FieldType::GeoPoint => WidgetKind::GeoInput {
                placeholder: "Latitude,Longitude".to_string(),
                capture_location: true,
            },
            FieldType::GeoTrace | FieldType::GeoShape => WidgetKind::GeoInput {
                placeholder: "Latitude,Longitude; ...".to_string(),
                capture_location: false,
            },
            FieldType::Text | FieldType::Other(_) => WidgetKind::TextInput { placeholder: None },
        }
    }

    /// Reduces a submitted value to the string that gets stored.
    ///
    /// Returns `None` for types that are never collected from a submission.
    pub fn serialize(&self, raw: &RawValue) -> Option<String> {
        if !self.is_collected() {
            return None;
        }

        let value = match (self, raw) {
            (FieldType::SelectMultiple, RawValue::Many(items)) => join_multi_choice(items),
            (FieldType::SelectMultiple, RawValue::Text(text)) => {
                join_multi_choice(&split_multi_choice(text))
            }
            (FieldType::SelectOne, RawValue::Text(text)) => text.trim().to_string(),
            (
                FieldType::Integer
                | FieldType::Decimal
                | FieldType::Date
                | FieldType::DateTime
                | FieldType::Time,
                RawValue::Text(text),
            ) => text.trim().to_string(),
            // binary content is never persisted, only the display name
            (_, RawValue::File { file_name }) => file_name.clone().unwrap_or_default(),
            (_, RawValue::Many(items)) => items.join(MULTI_CHOICE_SEPARATOR),
            (_, RawValue::Text(text)) => text.clone(),
        };

        Some(value)
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        FieldType::parse(&s)
    }
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        FieldType::parse(s)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value as submitted by the form, before serialization.
///
/// Numbers and booleans are accepted as their text, and `null` as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "SubmittedValue")]
pub enum RawValue {
    Text(String),
    Many(Vec<String>),
    File {
        #[serde(rename = "fileName")]
        file_name: Option<String>,
    },
}

/// Every JSON shape a client may send for one field.
#[derive(Deserialize)]
#[serde(untagged)]
enum SubmittedValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
    Many(Vec<String>),
    File {
        #[serde(rename = "fileName")]
        file_name: Option<String>,
    },
    Null(()),
}

impl From<SubmittedValue> for RawValue {
    fn from(value: SubmittedValue) -> Self {
        match value {
            SubmittedValue::Text(text) => RawValue::Text(text),
            SubmittedValue::Number(n) => RawValue::Text(n.to_string()),
            SubmittedValue::Flag(flag) => RawValue::Text(flag.to_string()),
            SubmittedValue::Many(items) => RawValue::Many(items),
            SubmittedValue::File { file_name } => RawValue::File { file_name },
            SubmittedValue::Null(()) => RawValue::Text(String::new()),
        }
    }
}

impl RawValue {
    pub fn file(name: impl Into<String>) -> Self {
        RawValue::File {
            file_name: Some(name.into()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(items: Vec<String>) -> Self {
        RawValue::Many(items)
    }
}

pub type RawValueMap = BTreeMap<String, RawValue>;

/// Renderable description of an input control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum WidgetKind {
    TextInput {
        placeholder: Option<String>,
    },
    NumberInput {
        whole: bool,
    },
    DatePicker {
        include_time: bool,
        max: NaiveDate,
    },
    TimePicker,
    SingleChoice {
        options: Vec<ChoiceOption>,
    },
    MultipleChoice {
        options: Vec<ChoiceOption>,
    },
    /// Read-only text, never collected.
    Display,
    /// Read-only computed value.
    Computed,
    FilePicker {
        accept: Option<String>,
    },
    GeoInput {
        placeholder: String,
        capture_location: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceOption {
    pub value: String,
    pub selected: bool,
}

impl ChoiceOption {
    fn new(value: &str, selected: bool) -> Self {
        ChoiceOption {
            value: value.to_string(),
            selected,
        }
    }
}

/// Splits an administrator's comma-separated choice list.
pub fn parse_choices(choices: &str) -> Vec<String> {
    choices
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits a stored multiple-choice value back into its selections.
pub fn split_multi_choice(value: &str) -> Vec<String> {
    parse_choices(value)
}

fn join_multi_choice(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(MULTI_CHOICE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_parse_to_catalog_types() {
        assert_eq!(FieldType::parse("number"), FieldType::Decimal);
        assert_eq!(FieldType::parse("qr_code"), FieldType::Qr);
        assert_eq!(FieldType::parse("geo"), FieldType::GeoPoint);
        assert_eq!(
            FieldType::parse("signature"),
            FieldType::Other("signature".to_string())
        );
    }

    #[test]
    fn unknown_type_round_trips_and_behaves_as_text() {
        let field_type: FieldType = serde_json::from_str("\"signature\"").unwrap();
        assert_eq!(serde_json::to_string(&field_type).unwrap(), "\"signature\"");

        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            field_type.widget(&[], "", today),
            FieldType::Text.widget(&[], "", today)
        );
        assert_eq!(
            field_type.serialize(&RawValue::from("  as typed ")),
            Some("  as typed ".to_string())
        );
    }

    #[test]
    fn multiple_choice_is_stored_as_one_string() {
        let raw = RawValue::Many(vec!["Fever".to_string(), " Cough".to_string()]);
        assert_eq!(
            FieldType::SelectMultiple.serialize(&raw),
            Some("Fever, Cough".to_string())
        );

        let raw = RawValue::from("Fever,Cough");
        assert_eq!(
            FieldType::SelectMultiple.serialize(&raw),
            Some("Fever, Cough".to_string())
        );
    }

    #[test]
    fn files_keep_only_the_display_name() {
        assert_eq!(
            FieldType::Image.serialize(&RawValue::file("xray.png")),
            Some("xray.png".to_string())
        );
        assert_eq!(
            FieldType::File.serialize(&RawValue::File { file_name: None }),
            Some(String::new())
        );
    }

    #[test]
    fn notes_and_calculations_are_not_collected() {
        assert_eq!(FieldType::Note.serialize(&RawValue::from("x")), None);
        assert_eq!(FieldType::Calculate.serialize(&RawValue::from("x")), None);
    }

    #[test]
    fn choice_widgets_mark_the_selection() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let choices = parse_choices("BCG, OPV ,,Penta");
        assert_eq!(choices, vec!["BCG", "OPV", "Penta"]);

        match FieldType::SelectMultiple.widget(&choices, "BCG, Penta", today) {
            WidgetKind::MultipleChoice { options } => {
                let selected: Vec<_> = options
                    .iter()
                    .filter(|o| o.selected)
                    .map(|o| o.value.as_str())
                    .collect();
                assert_eq!(selected, vec!["BCG", "Penta"]);
            }
            other => panic!("unexpected widget {:?}", other),
        }
    }

    #[test]
    fn raw_values_decode_from_json_shapes() {
        let map: RawValueMap = serde_json::from_str(
            r#"{"a": "1", "b": ["x", "y"], "c": {"fileName": "scan.pdf"}}"#,
        )
        .unwrap();
        assert_eq!(map["a"], RawValue::from("1"));
        assert_eq!(
            map["b"],
            RawValue::Many(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(map["c"], RawValue::file("scan.pdf"));
    }

    #[test]
    fn json_scalars_are_read_as_text() {
        let map: RawValueMap = serde_json::from_str(
            r#"{"dose": 2, "weight": 2.5, "consent": true, "note": null}"#,
        )
        .unwrap();
        assert_eq!(map["dose"], RawValue::from("2"));
        assert_eq!(map["weight"], RawValue::from("2.5"));
        assert_eq!(map["consent"], RawValue::from("true"));
        assert_eq!(map["note"], RawValue::from(""));

        let stored = serde_json::to_string(&map["dose"]).unwrap();
        assert_eq!(stored, r#""2""#);
    }
}
