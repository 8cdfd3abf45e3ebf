//! Captured register entries
//!
//! An [`Entry`] is identified by (register, patient, visit). Saving the same
//! triple again overwrites the entry in place; see
//! [`crate::storage::EntryLog::upsert`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{FieldList, FormData};

/// Visit identifiers are the visit's creation timestamp in milliseconds.
pub type VisitId = i64;

/// Values of the facility-wide custom patient fields for one patient.
pub type PatientCustomFieldValues = FormData;

/// Who and what an entry was captured for, besides the form itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default)]
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
}

impl EntryMetadata {
    pub fn for_patient(patient_name: &str) -> Self {
        EntryMetadata {
            patient_name: patient_name.to_string(),
            ..Default::default()
        }
    }

    pub fn on(mut self, visit_date: NaiveDate) -> Self {
        self.visit_date = Some(visit_date);
        self
    }

    pub fn by(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn at(mut self, facility: &str) -> Self {
        self.facility = Some(facility.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub register_name: String,
    pub patient_id: String,
    pub visit_id: VisitId,
}

impl EntryKey {
    pub fn new(register_name: &str, patient_id: &str, visit_id: VisitId) -> Self {
        EntryKey {
            register_name: register_name.to_string(),
            patient_id: patient_id.to_string(),
            visit_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub register_name: String,
    #[serde(rename = "patientID")]
    pub patient_id: String,
    #[serde(rename = "visitID")]
    pub visit_id: VisitId,
    #[serde(flatten)]
    pub metadata: EntryMetadata,
    pub form_data: FormData,
    pub saved_at: DateTime<Utc>,
}

impl Entry {
    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.register_name, &self.patient_id, self.visit_id)
    }

    pub fn matches(&self, key: &EntryKey) -> bool {
        self.register_name == key.register_name
            && self.patient_id == key.patient_id
            && self.visit_id == key.visit_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub action: SaveAction,
    pub entry: Entry,
}

/// Number of rows a line list shows unless asked otherwise.
pub const DEFAULT_LINE_LIST_LIMIT: usize = 20;

/// Tabular view of a register's most recent entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineList {
    pub columns: Vec<String>,
    pub rows: Vec<LineListRow>,
    /// Entries in the register, shown or not.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineListRow {
    pub visit_date: Option<NaiveDate>,
    pub patient_name: String,
    #[serde(rename = "patientID")]
    pub patient_id: String,
    pub user: Option<String>,
    /// One cell per column; values for fields the entry lacks are empty.
    pub values: Vec<String>,
}

impl LineList {
    /// The last `limit` of `entries` (insertion order), newest first, with
    /// one column per current field.
    pub fn build(fields: &FieldList, entries: &[Entry], limit: usize) -> Self {
        let columns = fields.names();
        let rows = entries
            .iter()
            .rev()
            .take(limit)
            .map(|entry| LineListRow {
                visit_date: entry.metadata.visit_date,
                patient_name: entry.metadata.patient_name.clone(),
                patient_id: entry.patient_id.clone(),
                user: entry.metadata.user.clone(),
                values: columns
                    .iter()
                    .map(|c| entry.form_data.get(c).cloned().unwrap_or_default())
                    .collect(),
            })
            .collect();

        LineList {
            columns,
            rows,
            total: entries.len(),
        }
    }
}
