//! JSON-over-HTTP surface. Handlers parse and shape data; every rule lives
//! in the engine.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::error;
use ulid::Ulid;

use crate::config::parse_clock_time;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::MAX_BODY_BYTES;
use crate::model::*;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Run the expiry sweep before answering reads.
    pub sweep_on_read: bool,
}

// ── Wire types ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateAppointmentRequest {
    pub service: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub customer_id: Option<UserId>,
    pub customer_name: Option<String>,
    pub barber_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
    pub price_cents: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub service: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub price_cents: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignRequest {
    pub barber_id: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub unassigned: Option<bool>,
    pub barber_id: Option<UserId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub barber_id: Option<UserId>,
}

/// An appointment as clients see it: date and time split, `HH:MM` precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentView {
    pub id: Ulid,
    pub appointment_date: String,
    pub appointment_time: String,
    pub status: AppointmentStatus,
    pub service: String,
    pub price_cents: Option<u64>,
    pub customer_id: UserId,
    pub customer_name: Option<String>,
    pub barber_id: Option<UserId>,
    pub branch_id: Option<BranchId>,
    pub booked_at: NaiveDateTime,
}

impl From<Appointment> for AppointmentView {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            appointment_date: a.date().format("%Y-%m-%d").to_string(),
            appointment_time: a.time().format("%H:%M").to_string(),
            status: a.status,
            service: a.service,
            price_cents: a.price_cents,
            customer_id: a.customer_id,
            customer_name: a.customer_name,
            barber_id: a.barber_id,
            branch_id: a.branch_id,
            booked_at: a.booked_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityView {
    pub date: NaiveDate,
    pub barber_id: Option<UserId>,
    pub times: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

// ── Errors ───────────────────────────────────────────────

/// HTTP error wrapper that implements `IntoResponse`.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { message: self.message })).into_response()
    }
}

impl From<EngineError> for HttpError {
    fn from(err: EngineError) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::State => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => {
                error!(error = %err, "request failed");
                return Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".into(),
                };
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for HttpError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

// ── Parsing ──────────────────────────────────────────────

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, EngineError> {
    value.ok_or(EngineError::MissingField(field))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, HttpError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HttpError::bad_request(format!("invalid {field} {raw:?}: expected YYYY-MM-DD")))
}

fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, HttpError> {
    parse_clock_time(raw).map_err(|reason| HttpError::bad_request(format!("invalid {field} {raw:?}: {reason}")))
}

/// Unknown or malformed ids are simply not found.
fn parse_id(raw: &str) -> Result<Ulid, HttpError> {
    raw.parse().map_err(|_| HttpError {
        status: StatusCode::NOT_FOUND,
        message: format!("appointment not found: {raw}"),
    })
}

async fn sweep_before_read(state: &AppState) -> Result<(), HttpError> {
    if state.sweep_on_read {
        state.engine.sweep().await?;
    }
    Ok(())
}

fn views(appointments: Vec<Appointment>) -> Vec<AppointmentView> {
    appointments.into_iter().map(AppointmentView::from).collect()
}

// ── Handlers ─────────────────────────────────────────────

/// POST `/appointments`
async fn handle_create(
    State(state): State<AppState>,
    body: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AppointmentView>), HttpError> {
    let Json(req) = body?;
    let service = require(req.service, "service")?;
    let date = parse_date("appointment_date", &require(req.appointment_date, "appointment_date")?)?;
    let time = parse_time("appointment_time", &require(req.appointment_time, "appointment_time")?)?;
    let customer_id = require(req.customer_id, "customer_id")?;

    let appt = state
        .engine
        .book(NewAppointment {
            date,
            time,
            service,
            price_cents: req.price_cents,
            customer_id,
            customer_name: req.customer_name,
            barber_id: req.barber_id,
            branch_id: req.branch_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(appt.into())))
}

/// GET `/appointments[?unassigned=true][&barber_id=N]`
async fn handle_list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<AppointmentView>>, HttpError> {
    let Query(q) = query?;
    sweep_before_read(&state).await?;
    let filter = match (q.unassigned, q.barber_id) {
        (Some(true), _) => AppointmentFilter::Unassigned,
        (_, Some(barber_id)) => AppointmentFilter::Barber(barber_id),
        _ => AppointmentFilter::All,
    };
    Ok(Json(views(state.engine.list(filter).await)))
}

/// GET `/appointments/customer/{customer_id}`
async fn handle_list_by_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<AppointmentView>>, HttpError> {
    let customer_id: UserId = customer_id
        .parse()
        .map_err(|_| HttpError::bad_request(format!("invalid customer_id {customer_id:?}")))?;
    sweep_before_read(&state).await?;
    let appointments = state.engine.list(AppointmentFilter::Customer(customer_id)).await;
    Ok(Json(views(appointments)))
}

/// GET `/appointments/{id}`
async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    sweep_before_read(&state).await?;
    Ok(Json(state.engine.find(id).await?.into()))
}

/// PUT `/appointments/{id}`: reschedule and/or change the service.
async fn handle_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateAppointmentRequest>, JsonRejection>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    let Json(req) = body?;
    let changes = AppointmentChanges {
        date: req
            .appointment_date
            .as_deref()
            .map(|d| parse_date("appointment_date", d))
            .transpose()?,
        time: req
            .appointment_time
            .as_deref()
            .map(|t| parse_time("appointment_time", t))
            .transpose()?,
        service: req.service,
        price_cents: req.price_cents,
    };
    Ok(Json(state.engine.reschedule(id, changes).await?.into()))
}

/// DELETE `/appointments/{id}`
async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.delete(id).await?.into()))
}

/// PUT `/appointments/{id}/assign`
async fn handle_assign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    let Json(req) = body?;
    let barber_id = require(req.barber_id, "barber_id")?;
    Ok(Json(state.engine.assign(id, barber_id).await?.into()))
}

/// PUT `/appointments/{id}/cancel`: staff releases the appointment.
async fn handle_unassign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.unassign(id).await?.into()))
}

/// PUT `/appointments/{id}/customer-cancel`
async fn handle_customer_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AppointmentView>, HttpError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.customer_cancel(id).await?.into()))
}

/// GET `/appointments/availability?date=YYYY-MM-DD[&barber_id=N]`
async fn handle_availability(
    State(state): State<AppState>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityView>, HttpError> {
    let Query(q) = query?;
    let date = parse_date("date", &require(q.date, "date")?)?;
    sweep_before_read(&state).await?;
    let times = state.engine.available_slots(date, q.barber_id).await?;
    Ok(Json(AvailabilityView {
        date,
        barber_id: q.barber_id,
        times: times.iter().map(|t| t.format("%H:%M").to_string()).collect(),
    }))
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |p| p.as_str().to_owned());
    let started = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());
    response
}

/// Builds the application router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/appointments", get(handle_list).post(handle_create))
        .route("/appointments/availability", get(handle_availability))
        .route("/appointments/customer/{customer_id}", get(handle_list_by_customer))
        .route(
            "/appointments/{id}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route("/appointments/{id}/assign", put(handle_assign))
        .route("/appointments/{id}/cancel", put(handle_unassign))
        .route("/appointments/{id}/customer-cancel", put(handle_customer_cancel))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
