use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, http::header::USER_AGENT, web};
use chrono::{DateTime, Days, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult, is_duplicate_key, is_serialization_failure},
    model::attendance::{
        AttendanceEvent, AttendanceSession, ClockAction, GeoPoint, SESSION_COLUMNS, SessionView,
        TransitionError, check_transition,
    },
    model::employee::EmployeeStatus,
    utils::{
        multipart::{FormUpload, collect_form},
        storage::{ImageKind, PhotoStore, StoredPhoto, validate_image},
    },
};

const MAX_USER_AGENT_LEN: usize = 512;
const MAX_NETWORK_TYPE_LEN: usize = 32;

/// Multipart body shared by clock-in/out and break-in/out.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ClockEventUpload {
    #[schema(example = 23.8103)]
    latitude: Option<f64>,
    #[schema(example = 90.4125)]
    longitude: Option<f64>,
    /// Metres, as reported by the browser geolocation API
    #[schema(example = 12.5)]
    accuracy: Option<f64>,
    #[schema(example = "wifi")]
    network_type: Option<String>,
    /// Camera capture (jpeg, png or webp)
    #[schema(value_type = Option<String>, format = Binary)]
    photo: Option<Vec<u8>>,
}

#[derive(Serialize, ToSchema)]
pub struct ClockEventResponse {
    #[schema(example = "Clocked in")]
    pub message: String,
    pub session: SessionView,
    pub photo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SessionQuery {
    /// HR/Admin only; defaults to the caller
    pub employee_id: Option<u64>,
    /// Inclusive start date (UTC)
    #[param(value_type = Option<String>, format = Date)]
    pub from: Option<NaiveDate>,
    /// Inclusive end date (UTC)
    #[param(value_type = Option<String>, format = Date)]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionListResponse {
    pub data: Vec<SessionView>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

/// What the browser captured alongside an attendance action.
#[derive(Debug)]
struct EventCapture<'a> {
    location: Option<GeoPoint>,
    network_type: Option<String>,
    photo: Option<(ImageKind, &'a [u8])>,
}

fn parse_capture<'a>(form: &'a FormUpload, config: &Config) -> ApiResult<EventCapture<'a>> {
    let latitude = form.parse::<f64>("latitude")?;
    let longitude = form.parse::<f64>("longitude")?;
    let accuracy = form.parse::<f64>("accuracy")?;

    let location = match (latitude, longitude, accuracy) {
        (Some(lat), Some(lon), Some(acc)) => Some(GeoPoint::new(lat, lon, acc)?),
        (None, None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "latitude, longitude and accuracy must be sent together",
            ));
        }
    };
    if location.is_none() && config.attendance_require_location {
        return Err(ApiError::bad_request("Location is required"));
    }

    let network_type = match form.text("network_type") {
        Some(n) if n.len() > MAX_NETWORK_TYPE_LEN => {
            return Err(ApiError::bad_request("network_type is too long"));
        }
        Some(n) => Some(n.to_ascii_lowercase()),
        None => None,
    };

    let photo = match &form.file {
        Some(file) => {
            let kind = validate_image(&file.bytes, file.content_type.as_deref(), config.max_photo_bytes)?;
            Some((kind, file.bytes.as_slice()))
        }
        None => None,
    };
    if photo.is_none() && config.attendance_require_photo {
        return Err(ApiError::bad_request("Photo is required"));
    }

    Ok(EventCapture {
        location,
        network_type,
        photo,
    })
}

/// Network metadata taken from the request itself.
struct ClientInfo {
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl ClientInfo {
    fn from_request(req: &HttpRequest) -> Self {
        let ip_address = req.connection_info().realip_remote_addr().map(str::to_string);
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());
        Self {
            ip_address,
            user_agent,
        }
    }
}

fn action_message(action: ClockAction) -> &'static str {
    match action {
        ClockAction::ClockIn => "Clocked in",
        ClockAction::BreakIn => "Break started",
        ClockAction::BreakOut => "Break ended",
        ClockAction::ClockOut => "Clocked out",
    }
}

/// Row lock that serialises attendance actions of one employee. Without it two
/// clock-ins that both see no open session deadlock on the insert.
const LOCK_EMPLOYEE_SQL: &str = "SELECT status FROM employees WHERE id = ? FOR UPDATE";

fn ensure_can_record(status: EmployeeStatus) -> ApiResult<()> {
    match status {
        EmployeeStatus::Active => Ok(()),
        other => Err(ApiError::forbidden(format!("Employee is {other}"))),
    }
}

/// A failed session insert means another clock-in got there first.
fn clock_in_error(e: sqlx::Error) -> ApiError {
    if is_duplicate_key(&e) || is_serialization_failure(&e) {
        TransitionError::AlreadyClockedIn.into()
    } else {
        ApiError::from(e)
    }
}

async fn open_session_for_update(
    tx: &mut Transaction<'_, MySql>,
    employee_id: u64,
) -> Result<Option<AttendanceSession>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE employee_id = ? AND clock_out_at IS NULL FOR UPDATE"
    ))
    .bind(employee_id)
    .fetch_optional(&mut **tx)
    .await
}

/// Writes the transition and its event row; returns the session as it now stands.
async fn apply_action(
    tx: &mut Transaction<'_, MySql>,
    employee_id: u64,
    open: Option<AttendanceSession>,
    action: ClockAction,
    now: DateTime<Utc>,
) -> ApiResult<AttendanceSession> {
    let session = match (action, open) {
        (ClockAction::ClockIn, _) => {
            let inserted = sqlx::query(
                "INSERT INTO attendance_sessions (employee_id, clock_in_at) VALUES (?, ?)",
            )
            .bind(employee_id)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(clock_in_error)?;

            AttendanceSession {
                id: inserted.last_insert_id(),
                employee_id,
                clock_in_at: now,
                break_in_at: None,
                break_out_at: None,
                clock_out_at: None,
            }
        }
        (_, None) => return Err(TransitionError::NotClockedIn.into()),
        (action, Some(mut session)) => {
            let column = match action {
                ClockAction::BreakIn => {
                    session.break_in_at = Some(now);
                    "break_in_at"
                }
                ClockAction::BreakOut => {
                    session.break_out_at = Some(now);
                    "break_out_at"
                }
                _ => {
                    session.clock_out_at = Some(now);
                    "clock_out_at"
                }
            };
            sqlx::query(&format!("UPDATE attendance_sessions SET {column} = ? WHERE id = ?"))
                .bind(now)
                .bind(session.id)
                .execute(&mut **tx)
                .await?;
            session
        }
    };

    Ok(session)
}

async fn insert_event(
    tx: &mut Transaction<'_, MySql>,
    session: &AttendanceSession,
    action: ClockAction,
    now: DateTime<Utc>,
    capture: &EventCapture<'_>,
    client: &ClientInfo,
    photo_url: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO attendance_events
            (session_id, employee_id, kind, occurred_at, latitude, longitude, accuracy_m,
             ip_address, user_agent, network_type, photo_url)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id)
    .bind(session.employee_id)
    .bind(action.as_ref())
    .bind(now)
    .bind(capture.location.map(|g| g.latitude))
    .bind(capture.location.map(|g| g.longitude))
    .bind(capture.location.map(|g| g.accuracy_m))
    .bind(client.ip_address.as_deref())
    .bind(client.user_agent.as_deref())
    .bind(capture.network_type.as_deref())
    .bind(photo_url)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn record(
    action: ClockAction,
    auth: AuthUser,
    req: HttpRequest,
    pool: &MySqlPool,
    store: &PhotoStore,
    config: &Config,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let employee_id = auth.require_employee()?;

    let form = collect_form(payload, "photo", config.max_photo_bytes).await?;
    let capture = parse_capture(&form, config)?;
    let client = ClientInfo::from_request(&req);

    let mut tx = pool.begin().await?;

    let status = sqlx::query_scalar::<_, String>(LOCK_EMPLOYEE_SQL)
        .bind(employee_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee not found"))?;
    let status = EmployeeStatus::try_from(status)
        .map_err(|e| ApiError::internal(format!("Unexpected employee status: {e}")))?;
    ensure_can_record(status)?;

    let open = open_session_for_update(&mut tx, employee_id).await?;
    check_transition(open.as_ref(), action)?;

    let stored: Option<StoredPhoto> = match capture.photo {
        Some((kind, bytes)) => Some(store.save("attendance", employee_id, kind, bytes).await?),
        None => None,
    };

    let now = Utc::now().trunc_subsecs(0);
    let written = async {
        let session = apply_action(&mut tx, employee_id, open, action, now).await?;
        let photo_url = stored.as_ref().map(|p| p.url.as_str());
        insert_event(&mut tx, &session, action, now, &capture, &client, photo_url).await?;
        tx.commit().await?;
        Ok::<_, ApiError>(session)
    }
    .await;

    let session = match written {
        Ok(session) => session,
        Err(e) => {
            if let Some(photo) = &stored {
                store.discard(&photo.key).await;
            }
            if !matches!(e, ApiError::Conflict(_)) {
                warn!(employee_id, action = %action, "Attendance write failed");
            }
            return Err(e);
        }
    };

    info!(
        employee_id,
        session_id = session.id,
        action = %action,
        has_location = capture.location.is_some(),
        has_photo = stored.is_some(),
        "Attendance recorded"
    );

    Ok(HttpResponse::Ok().json(ClockEventResponse {
        message: action_message(action).to_string(),
        session: SessionView::at(session, now),
        photo_url: stored.map(|p| p.url),
    }))
}

macro_rules! attendance_endpoint {
    ($name:ident, $action:expr, $path:literal, $summary:literal) => {
        #[doc = $summary]
        #[utoipa::path(
            post,
            path = $path,
            request_body(content = ClockEventUpload, content_type = "multipart/form-data"),
            responses(
                (status = 200, description = "Event recorded", body = ClockEventResponse),
                (status = 400, description = "Missing or invalid location/photo"),
                (status = 401, description = "Unauthorized"),
                (status = 403, description = "No employee profile or employee not active"),
                (status = 409, description = "Action not allowed in the current session state", body = Object, example = json!({
                    "message": "Already clocked in"
                })),
                (status = 413, description = "Photo too large")
            ),
            security(("bearer_auth" = [])),
            tag = "Attendance"
        )]
        pub async fn $name(
            auth: AuthUser,
            req: HttpRequest,
            pool: web::Data<MySqlPool>,
            store: web::Data<PhotoStore>,
            config: web::Data<Config>,
            payload: Multipart,
        ) -> ApiResult<HttpResponse> {
            record($action, auth, req, &pool, &store, &config, payload).await
        }
    };
}

attendance_endpoint!(clock_in, ClockAction::ClockIn, "/api/attendance/clock-in", "Clock in");
attendance_endpoint!(clock_out, ClockAction::ClockOut, "/api/attendance/clock-out", "Clock out");
attendance_endpoint!(break_in, ClockAction::BreakIn, "/api/attendance/break-in", "Start a break");
attendance_endpoint!(break_out, ClockAction::BreakOut, "/api/attendance/break-out", "End a break");

/// The caller's open session
#[utoipa::path(
    get,
    path = "/api/attendance/current",
    responses(
        (status = 200, description = "Open session, or null when clocked out", body = SessionView),
        (status = 403, description = "No employee profile")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn current_session(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let employee_id = auth.require_employee()?;

    let open = sqlx::query_as::<_, AttendanceSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE employee_id = ? AND clock_out_at IS NULL"
    ))
    .bind(employee_id)
    .fetch_optional(pool.get_ref())
    .await?;

    let now = Utc::now();
    Ok(HttpResponse::Ok().json(open.map(|s| SessionView::at(s, now))))
}

/// Builds the WHERE clause for session history.
fn session_filters(
    employee_id: Option<u64>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> ApiResult<(String, Vec<SessionBind>)> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::bad_request("from cannot be after to"));
        }
    }

    let mut conditions = Vec::new();
    let mut bindings = Vec::new();

    if let Some(id) = employee_id {
        conditions.push("employee_id = ?");
        bindings.push(SessionBind::Id(id));
    }
    if let Some(from) = from {
        conditions.push("clock_in_at >= ?");
        bindings.push(SessionBind::At(from.and_time(Default::default()).and_utc()));
    }
    if let Some(to) = to {
        let end = to
            .checked_add_days(Days::new(1))
            .ok_or_else(|| ApiError::bad_request("to is out of range"))?;
        conditions.push("clock_in_at < ?");
        bindings.push(SessionBind::At(end.and_time(Default::default()).and_utc()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    Ok((clause, bindings))
}

#[derive(Debug, PartialEq)]
enum SessionBind {
    Id(u64),
    At(DateTime<Utc>),
}

/// Attendance history, newest first
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(SessionQuery),
    responses(
        (status = 200, description = "Paginated sessions", body = SessionListResponse),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Employees may only list their own sessions")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_sessions(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<SessionQuery>,
) -> ApiResult<HttpResponse> {
    let employee_id = match query.employee_id {
        Some(id) if auth.can_view_employee(id) => Some(id),
        Some(_) => return Err(ApiError::forbidden("Employees may only list their own sessions")),
        None if auth.role.is_hr_or_admin() => None,
        None => Some(auth.require_employee()?),
    };

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) as u64 * per_page as u64;

    let (where_clause, bindings) = session_filters(employee_id, query.from, query.to)?;

    let count_sql = format!("SELECT COUNT(*) FROM attendance_sessions {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for b in &bindings {
        count_query = match b {
            SessionBind::Id(v) => count_query.bind(*v),
            SessionBind::At(v) => count_query.bind(*v),
        };
    }
    let total = count_query.fetch_one(pool.get_ref()).await?;

    let data_sql = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions {where_clause} ORDER BY clock_in_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    debug!(sql = %data_sql, page, per_page, "Fetching attendance sessions");

    let mut data_query = sqlx::query_as::<_, AttendanceSession>(&data_sql);
    for b in &bindings {
        data_query = match b {
            SessionBind::Id(v) => data_query.bind(*v),
            SessionBind::At(v) => data_query.bind(*v),
        };
    }
    let sessions = data_query
        .bind(per_page as u64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    let now = Utc::now();
    Ok(HttpResponse::Ok().json(SessionListResponse {
        data: sessions.into_iter().map(|s| SessionView::at(s, now)).collect(),
        page,
        per_page,
        total,
    }))
}

/// Event log of one session
#[utoipa::path(
    get,
    path = "/api/attendance/{session_id}/events",
    params(("session_id" = u64, Path, description = "Attendance session ID")),
    responses(
        (status = 200, description = "Events in order", body = [AttendanceEvent]),
        (status = 404, description = "Attendance session not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn session_events(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let session_id = path.into_inner();

    let owner = sqlx::query_scalar::<_, u64>("SELECT employee_id FROM attendance_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(pool.get_ref())
        .await?;

    // other employees' sessions look the same as missing ones
    let Some(owner) = owner.filter(|id| auth.can_view_employee(*id)) else {
        return Err(ApiError::not_found("Attendance session not found"));
    };

    let events = sqlx::query_as::<_, AttendanceEvent>(
        r#"
        SELECT id, session_id, employee_id, kind, occurred_at, latitude, longitude, accuracy_m,
               ip_address, user_agent, network_type, photo_url
        FROM attendance_events
        WHERE session_id = ?
        ORDER BY occurred_at, id
        "#,
    )
    .bind(session_id)
    .fetch_all(pool.get_ref())
    .await?;

    debug!(session_id, owner, count = events.len(), "Fetched attendance events");
    Ok(HttpResponse::Ok().json(events))
}
