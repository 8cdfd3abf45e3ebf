use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;

use log::error;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

use crate::engine::Engine;
use crate::error::{EngineError, SchemaError};
use crate::records::{EntryMetadata, SaveAction, VisitId, DEFAULT_LINE_LIST_LIMIT};
use crate::schema::{Direction, FieldSpec, RawValueMap, Register, SchemaTarget};

/// The engine shared by all requests. Each request holds the lock for its
/// whole read-modify-write, so saves to one (register, patient, visit) never
/// interleave.
pub type SharedEngine = Arc<Mutex<Engine>>;

type Response = WithStatus<Json>;

const MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterQuery {
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FormQuery {
    pub patient: String,
    pub visit: VisitId,
    pub age: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub patient: Option<String>,
    pub visit: Option<VisitId>,
}

#[derive(Debug, Deserialize)]
pub struct LineListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub direction: Direction,
}

#[derive(Debug, Deserialize)]
pub struct UsersRequest {
    pub users: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntryRequest {
    #[serde(rename = "patientID")]
    pub patient_id: String,
    #[serde(rename = "visitID")]
    pub visit_id: VisitId,
    #[serde(default)]
    pub values: RawValueMap,
    #[serde(flatten)]
    pub metadata: EntryMetadata,
}

/// Which schema a field route edits.
#[derive(Debug, Clone)]
pub enum FieldTarget {
    Register(String),
    PatientFields,
}

impl FieldTarget {
    fn as_target(&self) -> SchemaTarget<'_> {
        match self {
            FieldTarget::Register(name) => SchemaTarget::Register(name),
            FieldTarget::PatientFields => SchemaTarget::PatientFields,
        }
    }
}

pub struct RestApi {
    engine: SharedEngine,
}

impl RestApi {
    pub fn new(engine: SharedEngine) -> Self {
        RestApi { engine }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
        self.register_routes()
            .or(self.entry_routes())
            .or(self.field_routes())
            .or(self.patient_routes())
            .recover(handle_rejection)
    }

    fn with_engine(&self) -> impl Filter<Extract = (SharedEngine,), Error = Infallible> + Clone {
        let engine = Arc::clone(&self.engine);
        warp::any().map(move || Arc::clone(&engine))
    }

    fn register_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = warp::path!("registers")
            .and(warp::get())
            .and(warp::query::<RegisterQuery>())
            .and(self.with_engine())
            .and_then(list_registers);

        let create = warp::path!("registers")
            .and(warp::post())
            .and(json_body::<Register>())
            .and(self.with_engine())
            .and_then(create_register);

        let remove = register_name()
            .and(warp::path::end())
            .and(warp::delete())
            .and(self.with_engine())
            .and_then(remove_register);

        let assign = register_name()
            .and(warp::path!("users"))
            .and(warp::put())
            .and(json_body::<UsersRequest>())
            .and(self.with_engine())
            .and_then(assign_users);

        let form = register_name()
            .and(warp::path!("form"))
            .and(warp::get())
            .and(warp::query::<FormQuery>())
            .and(self.with_engine())
            .and_then(render_form);

        list.or(create).or(remove).or(assign).or(form)
    }

    fn entry_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let list = register_name()
            .and(warp::path!("entries"))
            .and(warp::get())
            .and(warp::query::<EntryQuery>())
            .and(self.with_engine())
            .and_then(list_entries);

        let save = register_name()
            .and(warp::path!("entries"))
            .and(warp::post())
            .and(json_body::<SaveEntryRequest>())
            .and(self.with_engine())
            .and_then(save_entry);

        let latest = register_name()
            .and(warp::path!("line-list"))
            .and(warp::get())
            .and(warp::query::<LineListQuery>())
            .and(self.with_engine())
            .and_then(line_list);

        list.or(save).or(latest)
    }

    /// Field editing, shared by register schemas and the patient field list.
    fn field_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let register_fields = register_name()
            .and(warp::path("fields"))
            .map(FieldTarget::Register);
        let patient_fields = warp::path("patient-fields").map(|| FieldTarget::PatientFields);
        let target = register_fields.or(patient_fields).unify();

        let list = target
            .clone()
            .and(warp::path::end())
            .and(warp::get())
            .and(self.with_engine())
            .and_then(list_fields);

        let add = target
            .clone()
            .and(warp::path::end())
            .and(warp::post())
            .and(json_body::<FieldSpec>())
            .and(self.with_engine())
            .and_then(add_field);

        let update = target
            .clone()
            .and(warp::path!(usize))
            .and(warp::put())
            .and(json_body::<FieldSpec>())
            .and(self.with_engine())
            .and_then(update_field);

        let delete = target
            .clone()
            .and(warp::path!(usize))
            .and(warp::delete())
            .and(self.with_engine())
            .and_then(delete_field);

        let reorder = target
            .and(warp::path!(usize / "move"))
            .and(warp::post())
            .and(json_body::<MoveRequest>())
            .and(self.with_engine())
            .and_then(move_field);

        list.or(add).or(update).or(delete).or(reorder)
    }

    fn patient_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let patient = warp::path("patients")
            .and(path_segment())
            .and(warp::path!("fields"));

        let get = patient
            .clone()
            .and(warp::get())
            .and(self.with_engine())
            .and_then(patient_fields);

        let put = patient
            .and(warp::put())
            .and(json_body::<RawValueMap>())
            .and(self.with_engine())
            .and_then(save_patient_fields);

        get.or(put)
    }
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// A path segment that is not valid percent-encoded UTF-8.
#[derive(Debug)]
struct InvalidPathSegment(String);

impl warp::reject::Reject for InvalidPathSegment {}

/// One percent-decoded path segment. Register names may contain spaces.
fn path_segment() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::path::param::<String>().and_then(|raw: String| async move {
        percent_decode_str(&raw)
            .decode_utf8()
            .map(Cow::into_owned)
            .map_err(|_| warp::reject::custom(InvalidPathSegment(raw.clone())))
    })
}

fn register_name() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::path("registers").and(path_segment())
}

// --- responses ---

fn success<T: Serialize>(status: StatusCode, message: impl Into<String>, data: T) -> Response {
    let response = ApiResponse {
        status: "success".to_string(),
        message: message.into(),
        data: Some(data),
    };
    warp::reply::with_status(warp::reply::json(&response), status)
}

fn failure<T: Serialize>(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Response {
    let response = ApiResponse {
        status: "error".to_string(),
        message: message.into(),
        data,
    };
    warp::reply::with_status(warp::reply::json(&response), status)
}

fn engine_failure(err: EngineError) -> Response {
    match err {
        EngineError::ValidationFailed(report) => {
            failure(StatusCode::UNPROCESSABLE_ENTITY, report_message(&report), Some(report))
        }
        EngineError::Schema(e @ SchemaError::RegisterNotFound(_)) => {
            failure::<()>(StatusCode::NOT_FOUND, e.to_string(), None)
        }
        EngineError::Schema(e) => failure::<()>(StatusCode::BAD_REQUEST, e.to_string(), None),
        EngineError::Persistence(e) => {
            error!("failed to persist document: {}", e);
            failure::<()>(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
        }
    }
}

fn report_message(report: &crate::validation::ValidationReport) -> String {
    format!("Validation failed for fields: {}", report.field_names().join(", "))
}

fn reply(result: Result<Response, EngineError>) -> Result<Response, Infallible> {
    Ok(result.unwrap_or_else(engine_failure))
}

/// Runs a mutation on the blocking pool. Every mutation ends in a
/// synchronous write of the whole document.
async fn mutate<F>(engine: SharedEngine, apply: F) -> Result<Response, Infallible>
where
    F: FnOnce(&mut Engine) -> Result<Response, EngineError> + Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(move || {
        let mut engine = engine.blocking_lock();
        apply(&mut engine)
    })
    .await;

    match outcome {
        Ok(result) => reply(result),
        Err(e) => {
            error!("engine task failed: {}", e);
            Ok(failure::<()>(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", None))
        }
    }
}

async fn handle_rejection(rejection: warp::Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(InvalidPathSegment(raw)) = rejection.find::<InvalidPathSegment>() {
        (StatusCode::BAD_REQUEST, format!("Invalid path segment '{}'", raw))
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query: {}", e))
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else {
        error!("unhandled rejection: {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };

    Ok(failure::<()>(status, message, None))
}

// --- registers ---

async fn list_registers(query: RegisterQuery, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;
    let registers: Vec<&Register> = match query.user.as_deref() {
        Some(user) => engine.registers_for_user(user),
        None => engine.registers().iter().collect(),
    };
    Ok(success(
        StatusCode::OK,
        format!("{} registers", registers.len()),
        registers,
    ))
}

async fn create_register(register: Register, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let name = register.name.clone();
        engine.create_register(register)?;
        let created = engine.register(&name)?;
        Ok(success(StatusCode::CREATED, "Register created", created))
    })
    .await
}

async fn remove_register(name: String, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let removed = engine.remove_register(&name)?;
        Ok(success(StatusCode::OK, "Register removed", removed))
    })
    .await
}

async fn assign_users(name: String, request: UsersRequest, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        engine.assign_users(&name, request.users)?;
        let register = engine.register(&name)?;
        Ok(success(StatusCode::OK, "Users assigned", register))
    })
    .await
}

async fn render_form(name: String, query: FormQuery, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;
    reply(
        engine
            .render_entry_form(&name, &query.patient, query.visit, query.age.as_deref())
            .map(|form| success(StatusCode::OK, "Form rendered", form)),
    )
}

// --- entries ---

async fn list_entries(name: String, query: EntryQuery, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;

    if let (Some(patient), Some(visit)) = (query.patient.as_deref(), query.visit) {
        return Ok(match engine.entry(&name, patient, visit) {
            Some(entry) => success(StatusCode::OK, "Entry found", entry),
            None => failure::<()>(StatusCode::NOT_FOUND, "No entry for this patient visit", None),
        });
    }

    let entries: Vec<_> = engine
        .list(&name)
        .iter()
        .filter(|e| query.patient.as_deref().map_or(true, |p| e.patient_id == p))
        .collect();
    Ok(success(StatusCode::OK, format!("{} entries", entries.len()), entries))
}

async fn save_entry(name: String, request: SaveEntryRequest, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let outcome = engine.save(
            &name,
            &request.patient_id,
            request.visit_id,
            &request.values,
            request.metadata,
        )?;
        Ok(match outcome.action {
            SaveAction::Created => success(StatusCode::CREATED, "Entry created", outcome),
            SaveAction::Updated => success(StatusCode::OK, "Entry updated", outcome),
        })
    })
    .await
}

async fn line_list(name: String, query: LineListQuery, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;
    let limit = query.limit.unwrap_or(DEFAULT_LINE_LIST_LIMIT);
    reply(
        engine
            .line_list(&name, limit)
            .map(|list| success(StatusCode::OK, format!("{} of {} entries", list.rows.len(), list.total), list)),
    )
}

// --- fields ---

async fn list_fields(target: FieldTarget, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;
    reply(
        engine
            .fields(target.as_target())
            .map(|fields| success(StatusCode::OK, format!("{} fields", fields.len()), fields)),
    )
}

async fn add_field(target: FieldTarget, spec: FieldSpec, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        engine.add_field(target.as_target(), spec)?;
        let fields = engine.fields(target.as_target())?;
        Ok(success(StatusCode::CREATED, "Field added", fields))
    })
    .await
}

async fn update_field(
    target: FieldTarget,
    index: usize,
    spec: FieldSpec,
    engine: SharedEngine,
) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        engine.update_field(target.as_target(), index, spec)?;
        let fields = engine.fields(target.as_target())?;
        Ok(success(StatusCode::OK, "Field updated", fields))
    })
    .await
}

async fn delete_field(target: FieldTarget, index: usize, engine: SharedEngine) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let removed = engine.delete_field(target.as_target(), index)?;
        Ok(success(StatusCode::OK, "Field deleted", removed))
    })
    .await
}

async fn move_field(
    target: FieldTarget,
    index: usize,
    request: MoveRequest,
    engine: SharedEngine,
) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let moved = engine.move_field(target.as_target(), index, request.direction)?;
        let fields = engine.fields(target.as_target())?;
        let message = if moved { "Field moved" } else { "Field already at the end" };
        Ok(success(StatusCode::OK, message, fields))
    })
    .await
}

// --- patients ---

async fn patient_fields(patient_id: String, engine: SharedEngine) -> Result<Response, Infallible> {
    let engine = engine.lock().await;
    Ok(success(
        StatusCode::OK,
        "Patient fields rendered",
        engine.render_patient_fields(&patient_id),
    ))
}

async fn save_patient_fields(
    patient_id: String,
    raw: RawValueMap,
    engine: SharedEngine,
) -> Result<Response, Infallible> {
    mutate(engine, move |engine| {
        let values = engine.save_patient_fields(&patient_id, &raw)?;
        Ok(success(StatusCode::OK, "Patient fields saved", values))
    })
    .await
}
