//! Core storage
//!
//! Everything the engine persists lives in one [`Document`]:
//! - register schemas and the custom patient field list
//! - captured entries, grouped per register
//! - custom field values per patient
//!
//! A [`DocumentStore`] reads and writes it whole.

mod entries;
pub mod persistence;

pub use entries::EntryLog;
pub use persistence::{DocumentStore, JsonFileStore, MemoryStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::records::{Entry, EntryKey, PatientCustomFieldValues, SaveAction};
use crate::schema::{FieldList, Register, SchemaTarget};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub registers: Vec<Register>,
    pub custom_patient_fields: FieldList,
    /// Keyed by register name. Survives removal of the register itself.
    pub service_entries: BTreeMap<String, EntryLog>,
    /// Keyed by patient ID.
    pub patient_custom_fields: BTreeMap<String, PatientCustomFieldValues>,
}

impl Document {
    pub fn register(&self, name: &str) -> Result<&Register, SchemaError> {
        self.registers
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| SchemaError::RegisterNotFound(name.to_string()))
    }

    pub fn register_mut(&mut self, name: &str) -> Result<&mut Register, SchemaError> {
        self.registers
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| SchemaError::RegisterNotFound(name.to_string()))
    }

    pub fn schema(&self, target: SchemaTarget<'_>) -> Result<&FieldList, SchemaError> {
        match target {
            SchemaTarget::Register(name) => Ok(&self.register(name)?.fields),
            SchemaTarget::PatientFields => Ok(&self.custom_patient_fields),
        }
    }

    pub fn schema_mut(&mut self, target: SchemaTarget<'_>) -> Result<&mut FieldList, SchemaError> {
        match target {
            SchemaTarget::Register(name) => Ok(&mut self.register_mut(name)?.fields),
            SchemaTarget::PatientFields => Ok(&mut self.custom_patient_fields),
        }
    }

    pub fn entries(&self, register_name: &str) -> &[Entry] {
        self.service_entries
            .get(register_name)
            .map(EntryLog::as_slice)
            .unwrap_or(&[])
    }

    pub fn find_entry(&self, key: &EntryKey) -> Option<&Entry> {
        self.service_entries
            .get(&key.register_name)
            .and_then(|log| log.find(key))
    }

    pub fn upsert_entry(&mut self, entry: Entry) -> SaveAction {
        self.service_entries
            .entry(entry.register_name.clone())
            .or_default()
            .upsert(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_document_with_missing_sections() {
        let document: Document = serde_json::from_str(
            r#"{"registers":[{"name":"OPD","fields":[{"name":"complaint","type":"text"}]}]}"#,
        )
        .unwrap();

        assert_eq!(document.register("OPD").unwrap().fields.len(), 1);
        assert!(document.custom_patient_fields.is_empty());
        assert!(document.entries("OPD").is_empty());
    }

    #[test]
    fn unknown_register_is_reported() {
        let document = Document::default();
        assert_eq!(
            document.schema(SchemaTarget::Register("Lab")).unwrap_err(),
            SchemaError::RegisterNotFound("Lab".to_string())
        );
        assert!(document.schema(SchemaTarget::PatientFields).is_ok());
    }
}
