use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult, constraint_error},
    model::{
        department::Department,
        employee::{EMPLOYEE_SELECT, Employee, EmployeeStatus},
        job_title::JobTitle,
    },
    utils::{
        db_utils::{FieldKind, UpdateField, build_update_sql, execute_update},
        storage::PhotoStore,
    },
};

/// Storage folders holding per-employee photos.
const EMPLOYEE_PHOTO_FOLDERS: [&str; 2] = ["profile", "attendance"];

const DUPLICATE_EMPLOYEE: &str = "Employee code or email already exists";
const UNKNOWN_REFERENCE: &str = "Unknown department or job title";

const STATUS_VALUES: &[&str] = &["active", "inactive", "suspended"];

/// Columns HR may change through `PUT /employees/{id}`.
const EMPLOYEE_UPDATE_FIELDS: &[UpdateField] = &[
    UpdateField { column: "employee_code", kind: FieldKind::Text },
    UpdateField { column: "first_name", kind: FieldKind::Text },
    UpdateField { column: "last_name", kind: FieldKind::Text },
    UpdateField { column: "email", kind: FieldKind::Text },
    UpdateField { column: "phone", kind: FieldKind::OptionalText },
    UpdateField { column: "department_id", kind: FieldKind::OptionalId },
    UpdateField { column: "job_title_id", kind: FieldKind::OptionalId },
    UpdateField { column: "position", kind: FieldKind::OptionalText },
    UpdateField { column: "status", kind: FieldKind::OneOf(STATUS_VALUES) },
    UpdateField { column: "joining_date", kind: FieldKind::Date },
];

#[derive(Deserialize, Serialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "John")]
    pub first_name: String,
    #[schema(example = "Doe")]
    pub last_name: String,
    #[schema(example = "john@company.com", format = "email")]
    pub email: String,
    #[schema(example = "+8801712345678")]
    pub phone: Option<String>,
    #[schema(example = 1)]
    pub department_id: Option<u64>,
    #[schema(example = 2)]
    pub job_title_id: Option<u64>,
    #[schema(example = "Senior")]
    pub position: Option<String>,
    /// Defaults to `active`
    pub status: Option<EmployeeStatus>,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub joining_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeSort {
    JoiningDate,
    #[default]
    CreatedAt,
    Name,
    Id,
}

impl EmployeeSort {
    fn columns(self) -> &'static [&'static str] {
        match self {
            EmployeeSort::JoiningDate => &["e.joining_date"],
            EmployeeSort::CreatedAt => &["e.created_at"],
            EmployeeSort::Name => &["e.first_name", "e.last_name"],
            EmployeeSort::Id => &["e.id"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct EmployeeQuery {
    /// Page number, starting at 1
    pub page: Option<u32>,
    /// Items per page (1-100)
    pub per_page: Option<u32>,
    pub department_id: Option<u64>,
    pub job_title_id: Option<u64>,
    pub position: Option<String>,
    pub status: Option<EmployeeStatus>,
    /// Substring of first name, last name, email or employee code
    pub search: Option<String>,
    pub sort: Option<EmployeeSort>,
    pub order: Option<SortOrder>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeListResponse {
    pub data: Vec<Employee>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 10)]
    pub total: i64,
}

// Helper enum for typed SQLx binding
#[derive(Debug, PartialEq)]
enum FilterValue {
    U64(u64),
    Str(String),
}

/// WHERE clause (possibly empty) and its bindings, in placeholder order.
fn employee_filters(query: &EmployeeQuery) -> (String, Vec<FilterValue>) {
    let mut conditions = Vec::new();
    let mut bindings = Vec::new();

    if let Some(department_id) = query.department_id {
        conditions.push("e.department_id = ?");
        bindings.push(FilterValue::U64(department_id));
    }

    if let Some(job_title_id) = query.job_title_id {
        conditions.push("e.job_title_id = ?");
        bindings.push(FilterValue::U64(job_title_id));
    }

    if let Some(position) = query.position.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        conditions.push("e.position = ?");
        bindings.push(FilterValue::Str(position.to_string()));
    }

    if let Some(status) = query.status {
        conditions.push("e.status = ?");
        bindings.push(FilterValue::Str(status.as_ref().to_string()));
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(e.first_name LIKE ? OR e.last_name LIKE ? OR e.email LIKE ? OR e.employee_code LIKE ?)",
        );
        let like = format!("%{}%", escape_like(search));
        for _ in 0..4 {
            bindings.push(FilterValue::Str(like.clone()));
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, bindings)
}

fn order_clause(sort: EmployeeSort, order: SortOrder) -> String {
    let dir = order.sql();
    let mut parts: Vec<String> = sort.columns().iter().map(|c| format!("{c} {dir}")).collect();
    if !matches!(sort, EmployeeSort::Id) {
        // stable paging when the sort key ties
        parts.push(format!("e.id {dir}"));
    }
    format!("ORDER BY {}", parts.join(", "))
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn validate_email(email: &str) -> ApiResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Invalid email address"))
    }
}

async fn ensure_reference(pool: &MySqlPool, table: &'static str, id: u64) -> ApiResult<()> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)");
    let exists = sqlx::query_scalar::<_, i64>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(ApiError::bad_request(format!("Unknown {table} id {id}")));
    }
    Ok(())
}

pub(crate) async fn fetch_employee(pool: &MySqlPool, id: u64) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(&format!("{EMPLOYEE_SELECT} WHERE e.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "HR/Admin only"),
        (status = 409, description = "Employee code or email already exists", body = Object, example = json!({
            "message": "Employee code or email already exists"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;

    let code = payload.employee_code.trim();
    let first_name = payload.first_name.trim();
    let last_name = payload.last_name.trim();
    let email = payload.email.trim();

    if code.is_empty() || first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::bad_request(
            "employee_code, first_name and last_name must not be empty",
        ));
    }
    validate_email(email)?;

    if let Some(id) = payload.department_id {
        ensure_reference(&pool, "departments", id).await?;
    }
    if let Some(id) = payload.job_title_id {
        ensure_reference(&pool, "job_titles", id).await?;
    }

    let status = payload.status.unwrap_or(EmployeeStatus::Active);
    let clean = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let result = sqlx::query(
        r#"
        INSERT INTO employees
        (employee_code, first_name, last_name, email, phone, department_id, job_title_id, position, status, joining_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(code)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(clean(&payload.phone))
    .bind(payload.department_id)
    .bind(payload.job_title_id)
    .bind(clean(&payload.position))
    .bind(status.as_ref())
    .bind(payload.joining_date)
    .execute(pool.get_ref())
    .await;

    let id = result
        .map_err(|e| constraint_error(e, DUPLICATE_EMPLOYEE, UNKNOWN_REFERENCE))?
        .last_insert_id();

    info!(employee_id = id, created_by = auth.user_id, "Employee created");

    let employee = fetch_employee(&pool, id)
        .await?
        .ok_or_else(|| ApiError::internal("Created employee not readable"))?;
    Ok(HttpResponse::Created().json(employee))
}

/// List employees
#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee directory", body = EmployeeListResponse),
        (status = 400, description = "Invalid filter value"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) as u64 * per_page as u64;

    let (where_clause, bindings) = employee_filters(&query);

    // ---------- total count ----------
    let count_sql = format!("SELECT COUNT(*) FROM employees e {where_clause}");
    debug!(sql = %count_sql, bindings = ?bindings, "Counting employees");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for b in &bindings {
        count_query = match b {
            FilterValue::U64(v) => count_query.bind(*v),
            FilterValue::Str(v) => count_query.bind(v.as_str()),
        };
    }
    let total = count_query.fetch_one(pool.get_ref()).await?;

    // ---------- data query ----------
    let data_sql = format!(
        "{EMPLOYEE_SELECT} {where_clause} {} LIMIT ? OFFSET ?",
        order_clause(query.sort.unwrap_or_default(), query.order.unwrap_or_default())
    );
    debug!(sql = %data_sql, page, per_page, offset, "Fetching employees");

    let mut data_query = sqlx::query_as::<_, Employee>(&data_sql);
    for b in &bindings {
        data_query = match b {
            FilterValue::U64(v) => data_query.bind(*v),
            FilterValue::Str(v) => data_query.bind(v.as_str()),
        };
    }
    let employees = data_query
        .bind(per_page as u64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(EmployeeListResponse {
        data: employees,
        page,
        per_page,
        total,
    }))
}

/// Get Employee by ID
#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    _auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let employee_id = path.into_inner();

    match fetch_employee(&pool, employee_id).await? {
        Some(emp) => Ok(HttpResponse::Ok().json(emp)),
        None => Err(ApiError::not_found("Employee not found")),
    }
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    request_body(content = Object, description = "Any subset of: employee_code, first_name, last_name, email, phone, department_id, job_title_id, position, status, joining_date", example = json!({
        "position": "Lead",
        "status": "suspended"
    })),
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 400, description = "Unknown field or invalid value"),
        (status = 403, description = "HR/Admin only"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Employee code or email already exists")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let update = build_update_sql("employees", &body, EMPLOYEE_UPDATE_FIELDS, "id", employee_id)?;

    if let Some(email) = body.get("email").and_then(Value::as_str) {
        validate_email(email.trim())?;
    }
    if let Some(id) = body.get("department_id").and_then(Value::as_u64) {
        ensure_reference(&pool, "departments", id).await?;
    }
    if let Some(id) = body.get("job_title_id").and_then(Value::as_u64) {
        ensure_reference(&pool, "job_titles", id).await?;
    }

    execute_update(pool.get_ref(), update)
        .await
        .map_err(|e| constraint_error(e, DUPLICATE_EMPLOYEE, UNKNOWN_REFERENCE))?;

    // MySQL reports 0 affected rows for no-op updates, so re-read instead
    let employee = fetch_employee(&pool, employee_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee not found"))?;

    info!(employee_id, updated_by = auth.user_id, "Employee updated");
    Ok(HttpResponse::Ok().json(employee))
}

/// Delete Employee
#[utoipa::path(
    delete,
    path = "/api/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Successfully deleted", body = Object, example = json!({
            "message": "Successfully deleted"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    store: web::Data<PhotoStore>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let employee_id = path.into_inner();

    let res = sqlx::query("DELETE FROM employees WHERE id = ?")
        .bind(employee_id)
        .execute(pool.get_ref())
        .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Employee not found"));
    }

    // photo rows are gone with the cascade; the files are not
    for folder in EMPLOYEE_PHOTO_FOLDERS {
        store.discard_owner(folder, employee_id).await;
    }

    info!(employee_id, deleted_by = auth.user_id, "Employee deleted");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

/// Departments for directory filters
#[utoipa::path(
    get,
    path = "/api/departments",
    responses((status = 200, description = "All departments", body = [Department])),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_departments(_auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let rows = sqlx::query_as::<_, Department>("SELECT id, name FROM departments ORDER BY name")
        .fetch_all(pool.get_ref())
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// Job titles for directory filters
#[utoipa::path(
    get,
    path = "/api/job-titles",
    responses((status = 200, description = "All job titles", body = [JobTitle])),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_job_titles(_auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let rows = sqlx::query_as::<_, JobTitle>("SELECT id, title FROM job_titles ORDER BY title")
        .fetch_all(pool.get_ref())
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_filters_no_where() {
        let (clause, bindings) = employee_filters(&EmployeeQuery::default());
        assert!(clause.is_empty());
        assert!(bindings.is_empty());
    }

    #[test]
    fn filters_bind_in_placeholder_order() {
        let query = EmployeeQuery {
            department_id: Some(3),
            status: Some(EmployeeStatus::Suspended),
            search: Some(" ann ".to_string()),
            ..Default::default()
        };
        let (clause, bindings) = employee_filters(&query);

        assert_eq!(clause.matches('?').count(), bindings.len());
        assert!(clause.starts_with("WHERE e.department_id = ? AND e.status = ? AND ("));
        assert_eq!(bindings[0], FilterValue::U64(3));
        assert_eq!(bindings[1], FilterValue::Str("suspended".to_string()));
        assert_eq!(bindings[2], FilterValue::Str("%ann%".to_string()));
        assert_eq!(bindings.len(), 6);
    }

    #[test]
    fn blank_search_is_ignored() {
        let query = EmployeeQuery {
            search: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(employee_filters(&query).0.is_empty());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn ordering() {
        assert_eq!(
            order_clause(EmployeeSort::JoiningDate, SortOrder::Asc),
            "ORDER BY e.joining_date ASC, e.id ASC"
        );
        assert_eq!(
            order_clause(EmployeeSort::Name, SortOrder::Desc),
            "ORDER BY e.first_name DESC, e.last_name DESC, e.id DESC"
        );
        assert_eq!(order_clause(EmployeeSort::Id, SortOrder::Desc), "ORDER BY e.id DESC");
        assert_eq!(
            order_clause(EmployeeSort::default(), SortOrder::default()),
            "ORDER BY e.created_at DESC, e.id DESC"
        );
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("jane@corp.io").is_ok());
        assert!(validate_email("jane@corp").is_err());
        assert!(validate_email("@corp.io").is_err());
        assert!(validate_email("ja ne@corp.io").is_err());
        assert!(validate_email("jane.corp.io").is_err());
    }

    #[test]
    fn update_whitelist_excludes_identity_and_audit_columns() {
        for column in ["id", "created_at", "profile_photo_url"] {
            assert!(EMPLOYEE_UPDATE_FIELDS.iter().all(|f| f.column != column));
        }
    }
}
