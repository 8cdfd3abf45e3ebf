//! AfyaDB: a schema-driven register and form engine
//!
//! AfyaDB lets a facility define registers (named form schemas), render
//! them as forms, validate and calculate submissions, and keep one entry per
//! patient visit and register. Everything is persisted as a single JSON
//! document through a host supplied [`storage::DocumentStore`].

pub mod api;
pub mod calc;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod form;
pub mod records;
pub mod schema;
pub mod storage;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::Engine;
pub use error::{EngineError, PersistenceError, SchemaError};
pub use records::{Entry, EntryMetadata, SaveAction, SaveOutcome};
pub use schema::{Direction, FieldList, FieldSpec, FieldType, RawValue, RawValueMap, Register, SchemaTarget};
pub use storage::{Document, DocumentStore, JsonFileStore, MemoryStore};
pub use validation::{FieldErrorKind, ValidationReport};
