use serde::{Deserialize, Serialize};

use crate::records::{Entry, EntryKey, SaveAction};

/// The entries captured for one register, in insertion order.
///
/// Holds at most one entry per (register, patient, visit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryLog {
    entries: Vec<Entry>,
}

impl EntryLog {
    pub fn new() -> Self {
        EntryLog {
            entries: Vec::new(),
        }
    }

    /// Overwrites the entry with the same key in place, keeping its
    /// position, or appends a new one.
    pub fn upsert(&mut self, entry: Entry) -> SaveAction {
        let key = entry.key();
        match self.entries.iter_mut().find(|e| e.matches(&key)) {
            Some(existing) => {
                *existing = entry;
                SaveAction::Updated
            }
            None => {
                self.entries.push(entry);
                SaveAction::Created
            }
        }
    }

    pub fn find(&self, key: &EntryKey) -> Option<&Entry> {
        self.entries.iter().find(|e| e.matches(key))
    }

    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EntryMetadata;
    use crate::schema::FormData;
    use chrono::{TimeZone, Utc};

    fn entry(patient: &str, visit: i64, value: &str) -> Entry {
        let mut form_data = FormData::new();
        form_data.insert("v".to_string(), value.to_string());
        Entry {
            register_name: "OPD".to_string(),
            patient_id: patient.to_string(),
            visit_id: visit,
            metadata: EntryMetadata::default(),
            form_data,
            saved_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut log = EntryLog::new();
        assert_eq!(log.upsert(entry("P1", 1, "a")), SaveAction::Created);
        assert_eq!(log.upsert(entry("P2", 1, "b")), SaveAction::Created);
        assert_eq!(log.upsert(entry("P1", 1, "c")), SaveAction::Updated);

        assert_eq!(log.len(), 2);
        assert_eq!(log.as_slice()[0].form_data["v"], "c");
        assert_eq!(log.as_slice()[1].patient_id, "P2");
    }

    #[test]
    fn different_visits_are_different_entries() {
        let mut log = EntryLog::new();
        log.upsert(entry("P1", 1, "a"));
        log.upsert(entry("P1", 2, "b"));

        assert_eq!(log.len(), 2);
        let key = EntryKey::new("OPD", "P1", 2);
        assert_eq!(log.find(&key).unwrap().form_data["v"], "b");
    }
}
