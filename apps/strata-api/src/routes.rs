use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use strata_domain::{EntryDraft, EntryPatch, MemoryEntry, ScopeKind, ScopeRef, writegate};
use strata_service::{
	ConsolidationReport, ConsolidationRequest, ContextPackage, ContextRequest, Contradiction,
	ContradictionRequest, ContradictionResponse, CreateResponse, DeleteRequest, DeleteResponse,
	Error as ServiceError, HandoffRequest, HandoffResponse, LifecycleCommand, LifecycleRequest,
	LifecycleResponse, QueryRequest, QueryResponse, RebuildReport, SweepReport,
	UpdateConflictRequest, UpdateConflictResponse, UpdateRequest, UpdateResponse,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/entries", post(create))
		.route("/v1/entries/{id}", get(read))
		.route("/v1/entries/{id}/update", post(update))
		.route("/v1/entries/{id}/delete", post(delete))
		.route("/v1/entries/{id}/lifecycle", post(lifecycle))
		.route("/v1/query", post(query))
		.route("/v1/context", post(context))
		.route("/v1/handoff", post(handoff))
		.route("/v1/conflicts/update", post(resolve_update_conflict))
		.route("/v1/conflicts/contradiction", post(resolve_contradiction))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/rebuild", post(rebuild))
		.route("/v1/admin/sweep", post(sweep))
		.route("/v1/admin/consolidate", post(consolidate))
		.route("/v1/admin/contradictions/{scope}/{scope_id}", get(contradictions))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
	pub expected_version: u64,
	pub actor: String,
	pub patch: EntryPatch,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBody {
	pub actor: String,
	#[serde(default)]
	pub hard: bool,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleBody {
	pub command: LifecycleCommand,
	pub actor: String,
}

/// Narrows a rebuild to one scope. Both parameters absent means every scope.
#[derive(Debug, Default, Deserialize)]
pub struct RebuildParams {
	pub scope: Option<String>,
	pub scope_id: Option<String>,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn create(
	State(state): State<AppState>,
	Json(payload): Json<EntryDraft>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
	let response = state.service.create(payload).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn read(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<MemoryEntry>, ApiError> {
	let entry = state.service.read(id).await?;

	Ok(Json(entry))
}

async fn update(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
	Json(payload): Json<UpdateBody>,
) -> Result<Json<UpdateResponse>, ApiError> {
	let response = state
		.service
		.update(UpdateRequest {
			id,
			expected_version: payload.expected_version,
			actor: payload.actor,
			patch: payload.patch,
		})
		.await?;

	Ok(Json(response))
}

async fn delete(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
	Json(payload): Json<DeleteBody>,
) -> Result<Json<DeleteResponse>, ApiError> {
	let response =
		state.service.delete(DeleteRequest { id, actor: payload.actor, hard: payload.hard }).await?;

	Ok(Json(response))
}

async fn lifecycle(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
	Json(payload): Json<LifecycleBody>,
) -> Result<Json<LifecycleResponse>, ApiError> {
	let response = state
		.service
		.lifecycle(LifecycleRequest { id, command: payload.command, actor: payload.actor })
		.await?;

	Ok(Json(response))
}

async fn query(
	State(state): State<AppState>,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
	let response = state.service.resolve(payload).await?;

	Ok(Json(response))
}

async fn context(
	State(state): State<AppState>,
	Json(payload): Json<ContextRequest>,
) -> Result<Json<ContextPackage>, ApiError> {
	let response = state.service.pack_context(payload).await?;

	Ok(Json(response))
}

async fn handoff(
	State(state): State<AppState>,
	Json(payload): Json<HandoffRequest>,
) -> Result<(StatusCode, Json<HandoffResponse>), ApiError> {
	let response = state.service.handoff(payload).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn resolve_update_conflict(
	State(state): State<AppState>,
	Json(payload): Json<UpdateConflictRequest>,
) -> Result<Json<UpdateConflictResponse>, ApiError> {
	let response = state.service.resolve_update_conflict(payload).await?;

	Ok(Json(response))
}

async fn resolve_contradiction(
	State(state): State<AppState>,
	Json(payload): Json<ContradictionRequest>,
) -> Result<Json<ContradictionResponse>, ApiError> {
	let response = state.service.resolve_contradiction(payload).await?;

	Ok(Json(response))
}

async fn rebuild(
	State(state): State<AppState>,
	Query(params): Query<RebuildParams>,
) -> Result<Json<RebuildReport>, ApiError> {
	let scope = match (params.scope, params.scope_id) {
		(None, None) => None,
		(Some(scope), scope_id) => Some(parse_scope(&scope, scope_id.as_deref().unwrap_or(""))?),
		(None, Some(_)) =>
			return Err(json_error(
				StatusCode::BAD_REQUEST,
				"REJECT_INVALID_SCOPE",
				"scope_id requires scope.",
				Some(vec!["scope".to_string()]),
			)),
	};
	let response = state.service.rebuild_indexes(scope).await?;

	Ok(Json(response))
}

async fn sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
	let response = state.service.sweep().await?;

	Ok(Json(response))
}

async fn consolidate(
	State(state): State<AppState>,
	Json(payload): Json<ConsolidationRequest>,
) -> Result<Json<ConsolidationReport>, ApiError> {
	let response = state.service.consolidate(payload).await?;

	Ok(Json(response))
}

async fn contradictions(
	State(state): State<AppState>,
	Path((scope, scope_id)): Path<(String, String)>,
) -> Result<Json<Vec<Contradiction>>, ApiError> {
	let scope = parse_scope(&scope, &scope_id)?;
	let response = state.service.detect_contradictions(&scope).await?;

	Ok(Json(response))
}

fn parse_scope(scope: &str, scope_id: &str) -> Result<ScopeRef, ApiError> {
	let Some(kind) = ScopeKind::parse(scope) else {
		return Err(json_error(
			StatusCode::BAD_REQUEST,
			"REJECT_INVALID_SCOPE",
			format!("Unknown scope {scope:?}."),
			Some(vec!["scope".to_string()]),
		));
	};

	writegate::normalize_scope(kind, scope_id).map_err(|code| {
		json_error(
			StatusCode::BAD_REQUEST,
			code.as_str(),
			"scope_id must be 1-64 letters, digits, '_' or '-'.",
			Some(vec!["scope_id".to_string()]),
		)
	})
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	current: Option<Box<MemoryEntry>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	attempted: Option<Box<EntryPatch>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
	current: Option<Box<MemoryEntry>>,
	attempted: Option<Box<EntryPatch>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self {
			status,
			error_code: error_code.into(),
			message: message.into(),
			fields,
			current: None,
			attempted: None,
		}
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.to_string();

		match err {
			ServiceError::Validation { reason_code, message } =>
				json_error(StatusCode::BAD_REQUEST, &reason_code, message, None),
			ServiceError::InvalidQuery { message } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_QUERY", message, None),
			ServiceError::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
			ServiceError::Conflict { current, attempted, .. } => {
				let mut error =
					json_error(StatusCode::CONFLICT, "VERSION_CONFLICT", message, None);

				error.current = Some(current);
				error.attempted = Some(attempted);

				error
			},
			ServiceError::SizeLimitExceeded { .. } => json_error(
				StatusCode::PAYLOAD_TOO_LARGE,
				"SIZE_LIMIT_EXCEEDED",
				message,
				Some(vec!["content".to_string()]),
			),
			ServiceError::Timeout { .. } =>
				json_error(StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT", message, None),
			ServiceError::IndexInconsistency { .. } =>
				json_error(StatusCode::INTERNAL_SERVER_ERROR, "INDEX_INCONSISTENCY", message, None),
			ServiceError::ConsolidationFailure { .. } => json_error(
				StatusCode::INTERNAL_SERVER_ERROR,
				"CONSOLIDATION_FAILURE",
				message,
				None,
			),
			ServiceError::Storage { .. } =>
				json_error(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", message, None),
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status.is_server_error() {
			tracing::error!(error_code = %self.error_code, detail = %self.message, "Request failed.");
		}

		let body = ErrorBody {
			error_code: self.error_code,
			message: self.message,
			fields: self.fields,
			current: self.current,
			attempted: self.attempted,
		};

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}
