use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, RuleViolation};
use crate::model::*;
use crate::observability;

// ── Errors ───────────────────────────────────────────────────────

/// Wire shape of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(&'static str),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<RuleViolation> for ApiError {
    fn from(v: RuleViolation) -> Self {
        ApiError::Engine(EngineError::Rule(v))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Engine(EngineError::NotFound(entity, id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                format!("{entity} {id} not found"),
            ),
            // Every business rule violation is a 400; 403 is reserved for
            // the boundary's own authorization checks.
            ApiError::Engine(EngineError::Rule(v)) => {
                metrics::counter!(observability::RULE_VIOLATIONS_TOTAL, "code" => v.code())
                    .increment(1);
                (
                    StatusCode::BAD_REQUEST,
                    v.code().to_string(),
                    v.message().to_string(),
                )
            }
            ApiError::Engine(EngineError::LimitExceeded(what)) => (
                StatusCode::BAD_REQUEST,
                "LIMIT_EXCEEDED".to_string(),
                what.to_string(),
            ),
            ApiError::Engine(EngineError::JournalError(detail)) => {
                tracing::error!("journal failure serving request: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL".to_string(),
                    "internal error".to_string(),
                )
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED".to_string(),
                msg.to_string(),
            ),
            ApiError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN".to_string(),
                msg.to_string(),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                msg.to_string(),
            ),
        };
        (status, Json(ErrorBody { code, message })).into_response()
    }
}

// ── Principal extraction ─────────────────────────────────────────

/// Authenticated caller, taken from the `x-user-id` / `x-user-role` headers
/// set by the fronting auth proxy. Unknown role strings are rejected here so
/// the engines only ever see the closed enum.
pub struct AuthPrincipal(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Ulid::from_string(s).ok())
            .ok_or(ApiError::Unauthorized("missing or malformed x-user-id"))?;
        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or(ApiError::Unauthorized("missing or unknown x-user-role"))?;
        Ok(AuthPrincipal(Principal { user_id, role }))
    }
}

/// Like [`AuthPrincipal`] but tolerates anonymous callers: absent headers
/// yield None, while present-but-malformed credentials are still rejected.
pub struct MaybePrincipal(pub Option<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for MaybePrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.headers.get("x-user-id").is_none() && parts.headers.get("x-user-role").is_none() {
            return Ok(MaybePrincipal(None));
        }
        let AuthPrincipal(p) = AuthPrincipal::from_request_parts(parts, state).await?;
        Ok(MaybePrincipal(Some(p)))
    }
}

// ── Request/query DTOs ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CourseQuery {
    audience: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookRequest {
    counselor_id: Ulid,
    start_time: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreateCourseRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    target_audience: String,
    #[serde(default)]
    modules: Vec<ModuleDraft>,
}

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    course_id: Ulid,
}

#[derive(Debug, Deserialize)]
struct CompleteModuleRequest {
    module_id: Ulid,
}

#[derive(Debug, Deserialize)]
struct RegisterUserRequest {
    email: String,
    password: String,
    name: Option<String>,
    role: String,
}

#[derive(Debug, Deserialize)]
struct ProfileRequest {
    specialization: String,
    qualifications: Option<String>,
    bio: Option<String>,
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/users", post(register_user))
        .route("/api/counselors", get(list_counselors))
        .route("/api/counselors/{user_id}/profile", put(upsert_profile))
        .route("/api/appointments", get(list_appointments).post(book))
        .route("/api/appointments/{id}/status", post(update_status))
        .route("/api/courses", get(list_courses).post(create_course))
        .route("/api/courses/register", post(enroll))
        .route("/api/courses/my-progress", get(my_progress))
        .route(
            "/api/courses/{id}",
            get(course_detail).delete(deactivate_course),
        )
        .route("/api/courses/{id}/complete-module", post(complete_module))
        .with_state(engine)
}

/// RED metrics around one operation.
async fn timed<T, F>(op: &'static str, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    let start = Instant::now();
    let result = fut.await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    result
}

// ── Handlers ─────────────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

async fn register_user(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    timed("register_user", async {
        let role = Role::parse(&req.role).ok_or(ApiError::BadRequest("unknown role"))?;
        let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
            .map_err(|_| ApiError::BadRequest("unhashable password"))?;
        let user = engine
            .register_user(&req.email, &password_hash, req.name, role)
            .await?;
        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": user.id,
                "email": user.email,
                "name": user.name,
                "role": user.role,
            })),
        ))
    })
    .await
}

async fn list_counselors(State(engine): State<Arc<Engine>>) -> Json<Vec<CounselorListing>> {
    Json(engine.list_counselors())
}

async fn upsert_profile(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<Ulid>,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<CounselorProfile>, ApiError> {
    timed("upsert_profile", async {
        if principal.role != Role::Admin && principal.user_id != user_id {
            return Err(ApiError::Forbidden("not your profile"));
        }
        let profile = engine
            .upsert_counselor_profile(user_id, &req.specialization, req.qualifications, req.bio)
            .await?;
        Ok(Json(profile))
    })
    .await
}

async fn book(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<BookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    timed("book_appointment", async {
        let receipt = engine
            .create_appointment(&principal, req.counselor_id, &req.start_time, &req.reason)
            .await?;
        Ok((StatusCode::CREATED, Json(receipt)))
    })
    .await
}

async fn list_appointments(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<AppointmentView>>, ApiError> {
    timed("list_appointments", async {
        let page = engine
            .list_appointments(
                &principal,
                q.page.unwrap_or(1),
                q.per_page.unwrap_or(crate::limits::DEFAULT_PAGE_SIZE),
            )
            .await?;
        Ok(Json(page))
    })
    .await
}

async fn update_status(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Ulid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<AppointmentView>, ApiError> {
    timed("update_status", async {
        let requested = AppointmentStatus::parse(&req.status)
            .ok_or(ApiError::BadRequest("unknown status"))?;
        let view = engine.update_status(&principal, id, requested).await?;
        Ok(Json(view))
    })
    .await
}

async fn list_courses(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<CourseQuery>,
) -> Json<Vec<CourseSummary>> {
    Json(engine.list_courses(q.audience.as_deref(), q.search.as_deref()))
}

async fn create_course(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    timed("create_course", async {
        if principal.role != Role::Admin {
            return Err(ApiError::Forbidden("admin only"));
        }
        let detail = engine
            .create_course(&req.title, &req.description, &req.target_audience, req.modules)
            .await?;
        Ok((StatusCode::CREATED, Json(detail)))
    })
    .await
}

async fn deactivate_course(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    timed("deactivate_course", async {
        if principal.role != Role::Admin {
            return Err(ApiError::Forbidden("admin only"));
        }
        engine.deactivate_course(id).await?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

async fn course_detail(
    State(engine): State<Arc<Engine>>,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<Ulid>,
) -> Result<Json<CourseDetail>, ApiError> {
    timed("course_detail", async {
        let detail = engine
            .course_detail(id, principal.map(|p| p.user_id))
            .await?;
        Ok(Json(detail))
    })
    .await
}

async fn enroll(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    timed("enroll", async {
        let progress = engine.enroll(principal.user_id, req.course_id).await?;
        Ok((StatusCode::CREATED, Json(progress)))
    })
    .await
}

async fn complete_module(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(course_id): Path<Ulid>,
    Json(req): Json<CompleteModuleRequest>,
) -> Result<Json<CompletionOutcome>, ApiError> {
    timed("complete_module", async {
        let outcome = engine
            .complete_module(principal.user_id, course_id, req.module_id)
            .await?;
        Ok(Json(outcome))
    })
    .await
}

async fn my_progress(
    State(engine): State<Arc<Engine>>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Vec<ProgressSummary>>, ApiError> {
    timed("my_progress", async {
        Ok(Json(engine.progress_overview(principal.user_id).await))
    })
    .await
}
