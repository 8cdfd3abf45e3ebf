//! The engine owns the document, the store it persists to and the clock.
//!
//! It is constructed once and passed to whoever needs it. Every mutation is
//! applied to a copy of the document, written out in full, and only then
//! made current, so a failed operation leaves no trace in memory or on disk.

use log::{info, warn};

use crate::clock::Clock;
use crate::error::{Result, SchemaError};
use crate::form::{self, RenderContext, WidgetSet};
use crate::records::{
    Entry, EntryKey, EntryMetadata, LineList, PatientCustomFieldValues, SaveOutcome, VisitId,
};
use crate::schema::{Direction, FieldList, FieldSpec, RawValueMap, Register, SchemaTarget};
use crate::storage::{Document, DocumentStore};
use crate::validation;

pub struct Engine {
    document: Document,
    store: Box<dyn DocumentStore>,
    clock: Box<dyn Clock>,
    facility: Option<String>,
}

impl Engine {
    /// Loads the stored document, or starts empty if there is none.
    pub fn open(store: impl DocumentStore + 'static, clock: impl Clock + 'static) -> Result<Self> {
        let document = store.load()?.unwrap_or_default();
        info!(
            "opened document with {} registers and {} custom patient fields",
            document.registers.len(),
            document.custom_patient_fields.len()
        );

        Ok(Engine {
            document,
            store: Box::new(store),
            clock: Box::new(clock),
            facility: None,
        })
    }

    /// Facility name stamped on entries whose metadata has none.
    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = Some(facility.into());
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn commit<R>(&mut self, mutate: impl FnOnce(&mut Document) -> Result<R>) -> Result<R> {
        let mut draft = self.document.clone();
        let result = mutate(&mut draft)?;
        self.store.save(&draft)?;
        self.document = draft;
        Ok(result)
    }

    // --- registers ---

    pub fn registers(&self) -> &[Register] {
        &self.document.registers
    }

    pub fn register(&self, name: &str) -> Result<&Register> {
        Ok(self.document.register(name)?)
    }

    /// Registers the user may capture into.
    pub fn registers_for_user(&self, username: &str) -> Vec<&Register> {
        self.document
            .registers
            .iter()
            .filter(|r| r.is_available_to(username))
            .collect()
    }

    pub fn create_register(&mut self, register: Register) -> Result<()> {
        if register.name.trim().is_empty() {
            return Err(SchemaError::EmptyRegisterName.into());
        }
        // re-check the fields as if they were added one by one
        let fields = FieldList::from_specs(register.fields.iter().cloned())?;
        let register = Register { fields, ..register };

        self.commit(|doc| {
            if doc.register(&register.name).is_ok() {
                return Err(SchemaError::DuplicateRegisterName(register.name.clone()).into());
            }
            info!("created register '{}'", register.name);
            doc.registers.push(register);
            Ok(())
        })
    }

    /// Removes a register's schema. Entries captured into it are kept.
    pub fn remove_register(&mut self, name: &str) -> Result<Register> {
        self.commit(|doc| {
            let index = doc
                .registers
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| SchemaError::RegisterNotFound(name.to_string()))?;
            info!("removed register '{}'", name);
            Ok(doc.registers.remove(index))
        })
    }

    pub fn assign_users(&mut self, name: &str, users: Vec<String>) -> Result<()> {
        self.commit(|doc| {
            doc.register_mut(name)?.assigned_users = users;
            Ok(())
        })
    }

    // --- fields ---

    pub fn fields(&self, target: SchemaTarget<'_>) -> Result<&FieldList> {
        Ok(self.document.schema(target)?)
    }

    pub fn add_field(&mut self, target: SchemaTarget<'_>, spec: FieldSpec) -> Result<()> {
        self.commit(|doc| {
            let name = spec.name.clone();
            doc.schema_mut(target)?.add_field(spec)?;
            info!("added field '{}' to {:?}", name, target);
            Ok(())
        })
    }

    pub fn update_field(&mut self, target: SchemaTarget<'_>, index: usize, spec: FieldSpec) -> Result<FieldSpec> {
        self.commit(|doc| {
            let old = doc.schema_mut(target)?.update_field(index, spec)?;
            info!("updated field '{}' at {} in {:?}", old.name, index, target);
            Ok(old)
        })
    }

    /// Removes a field from the schema. Stored entries and patient values
    /// keep whatever they hold under its name.
    pub fn delete_field(&mut self, target: SchemaTarget<'_>, index: usize) -> Result<FieldSpec> {
        self.commit(|doc| {
            let removed = doc.schema_mut(target)?.delete_field(index)?;
            info!("deleted field '{}' from {:?}", removed.name, target);
            Ok(removed)
        })
    }

    pub fn move_field(&mut self, target: SchemaTarget<'_>, index: usize, direction: Direction) -> Result<bool> {
        // nothing to persist when the field is already at the end
        let mut candidate = self.document.schema(target)?.clone();
        if !candidate.move_field(index, direction)? {
            return Ok(false);
        }

        self.commit(|doc| doc.schema_mut(target)?.move_field(index, direction).map_err(Into::into))
    }

    // --- forms ---

    pub fn render_context(&self) -> RenderContext {
        RenderContext::new(self.clock.today())
    }

    /// Renders a register's form, prefilled from the entry already saved for
    /// this patient and visit, if any.
    pub fn render_entry_form(
        &self,
        register_name: &str,
        patient_id: &str,
        visit_id: VisitId,
        patient_age: Option<&str>,
    ) -> Result<WidgetSet> {
        let register = self.document.register(register_name)?;
        let prior = self
            .entry(register_name, patient_id, visit_id)
            .map(|e| &e.form_data);

        let mut ctx = self.render_context();
        if let Some(age) = patient_age {
            ctx = ctx.with_patient_age(age);
        }

        Ok(form::render(&register.fields, prior, &ctx))
    }

    pub fn render_patient_fields(&self, patient_id: &str) -> WidgetSet {
        form::render(
            &self.document.custom_patient_fields,
            self.patient_fields(patient_id),
            &self.render_context(),
        )
    }

    // --- records ---

    /// Validates a submission and upserts the entry for
    /// (`register_name`, `patient_id`, `visit_id`).
    ///
    /// On `ValidationFailed` nothing is stored.
    pub fn save(
        &mut self,
        register_name: &str,
        patient_id: &str,
        visit_id: VisitId,
        raw: &RawValueMap,
        metadata: EntryMetadata,
    ) -> Result<SaveOutcome> {
        let register = self.document.register(register_name)?;

        let form_data = validation::resolve(&register.fields, raw, self.clock.today()).map_err(|report| {
            warn!(
                "rejected '{}' entry for patient {} visit {}: invalid fields {:?}",
                register_name,
                patient_id,
                visit_id,
                report.field_names()
            );
            report
        })?;

        let mut metadata = metadata;
        if metadata.facility.is_none() {
            metadata.facility = self.facility.clone();
        }

        let entry = Entry {
            register_name: register_name.to_string(),
            patient_id: patient_id.to_string(),
            visit_id,
            metadata,
            form_data,
            saved_at: self.clock.now(),
        };

        self.commit(|doc| {
            let action = doc.upsert_entry(entry.clone());
            info!(
                "{:?} '{}' entry for patient {} visit {}",
                action, register_name, patient_id, visit_id
            );
            Ok(SaveOutcome { action, entry })
        })
    }

    /// All entries of a register, in insertion order.
    pub fn list(&self, register_name: &str) -> &[Entry] {
        self.document.entries(register_name)
    }

    pub fn entry(&self, register_name: &str, patient_id: &str, visit_id: VisitId) -> Option<&Entry> {
        self.document
            .find_entry(&EntryKey::new(register_name, patient_id, visit_id))
    }

    pub fn line_list(&self, register_name: &str, limit: usize) -> Result<LineList> {
        let register = self.document.register(register_name)?;
        Ok(LineList::build(
            &register.fields,
            self.document.entries(register_name),
            limit,
        ))
    }

    // --- patient custom fields ---

    pub fn patient_fields(&self, patient_id: &str) -> Option<&PatientCustomFieldValues> {
        self.document.patient_custom_fields.get(patient_id)
    }

    /// Validates and stores a patient's custom field values, replacing any
    /// previous ones.
    pub fn save_patient_fields(&mut self, patient_id: &str, raw: &RawValueMap) -> Result<PatientCustomFieldValues> {
        let values = validation::resolve(
            &self.document.custom_patient_fields,
            raw,
            self.clock.today(),
        )?;

        self.commit(|doc| {
            doc.patient_custom_fields
                .insert(patient_id.to_string(), values.clone());
            info!("saved custom fields for patient {}", patient_id);
            Ok(values)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{EngineError, PersistenceError};
    use crate::records::SaveAction;
    use crate::schema::RawValue;
    use crate::storage::MemoryStore;
    use chrono::NaiveDate;

    struct BrokenStore;

    impl DocumentStore for BrokenStore {
        fn load(&self) -> std::result::Result<Option<Document>, PersistenceError> {
            Ok(None)
        }

        fn save(&mut self, _document: &Document) -> std::result::Result<(), PersistenceError> {
            Err(PersistenceError::io(
                "broken",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        }
    }

    fn clock() -> FixedClock {
        FixedClock::on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn raw(pairs: &[(&str, &str)]) -> RawValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::from(*v)))
            .collect()
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let mut engine = Engine::open(BrokenStore, clock()).unwrap();

        let err = engine.create_register(Register::new("OPD")).unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(engine.registers().is_empty());
    }

    #[test]
    fn duplicate_register_names_are_rejected() {
        let mut engine = Engine::open(MemoryStore::new(), clock()).unwrap();
        engine.create_register(Register::new("OPD")).unwrap();

        let err = engine.create_register(Register::new("OPD")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Schema(SchemaError::DuplicateRegisterName(_))
        ));
        assert_eq!(engine.registers().len(), 1);
    }

    #[test]
    fn facility_is_filled_in_when_missing() {
        let mut engine = Engine::open(MemoryStore::new(), clock())
            .unwrap()
            .with_facility("Afya Clinic");
        engine.create_register(Register::new("OPD")).unwrap();

        let outcome = engine
            .save("OPD", "P1", 1, &raw(&[]), EntryMetadata::for_patient("Ama"))
            .unwrap();
        assert_eq!(outcome.action, SaveAction::Created);
        assert_eq!(outcome.entry.metadata.facility.as_deref(), Some("Afya Clinic"));

        let outcome = engine
            .save("OPD", "P1", 1, &raw(&[]), EntryMetadata::for_patient("Ama").at("Outreach"))
            .unwrap();
        assert_eq!(outcome.action, SaveAction::Updated);
        assert_eq!(outcome.entry.metadata.facility.as_deref(), Some("Outreach"));
    }

    #[test]
    fn move_at_the_edge_does_not_write() {
        let store = MemoryStore::new();
        let mut engine = Engine::open(store.clone(), clock()).unwrap();
        assert_eq!(
            engine
                .move_field(SchemaTarget::PatientFields, 0, Direction::Up)
                .unwrap_err()
                .to_string(),
            "Field index 0 is out of range for a schema of 0 fields"
        );

        engine
            .add_field(SchemaTarget::PatientFields, FieldSpec::new("nhis", "text"))
            .unwrap();
        let before = store.saved_json();
        assert!(!engine
            .move_field(SchemaTarget::PatientFields, 0, Direction::Up)
            .unwrap());
        assert_eq!(store.saved_json(), before);
    }

    #[test]
    fn saved_entry_prefills_the_form_again() {
        let mut engine = Engine::open(MemoryStore::new(), clock()).unwrap();
        let fields = FieldList::from_specs(vec![
            FieldSpec::new("complaint", "text"),
            FieldSpec::new("age", "integer"),
        ])
        .unwrap();
        engine
            .create_register(Register::new("OPD").with_fields(fields))
            .unwrap();

        let form = engine.render_entry_form("OPD", "P1", 7, Some("30")).unwrap();
        assert_eq!(form.get("age").unwrap().value, RawValue::from("30"));

        engine
            .save("OPD", "P1", 7, &raw(&[("complaint", "Headache"), ("age", "31")]), EntryMetadata::default())
            .unwrap();

        let form = engine.render_entry_form("OPD", "P1", 7, Some("30")).unwrap();
        assert_eq!(form.get("complaint").unwrap().value, RawValue::from("Headache"));
        assert_eq!(form.get("age").unwrap().value, RawValue::from("31"));
    }
}
