use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EmployeeStatus {
    Active,
    Inactive,
    Suspended,
}

impl TryFrom<String> for EmployeeStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Directory row: employee columns plus the resolved department and job title names.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "employee_code": "EMP-001",
        "first_name": "John",
        "last_name": "Doe",
        "email": "john.doe@company.com",
        "phone": "+8801712345678",
        "department_id": 10,
        "department": "Engineering",
        "job_title_id": 3,
        "job_title": "Backend Engineer",
        "position": "Senior",
        "status": "active",
        "joining_date": "2024-01-01",
        "profile_photo_url": "/media/profile/1/4f7c.png",
        "created_at": "2024-01-01T09:00:00Z"
    })
)]
pub struct Employee {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "EMP-001")]
    pub employee_code: String,

    #[schema(example = "John")]
    pub first_name: String,

    #[schema(example = "Doe")]
    pub last_name: String,

    #[schema(example = "john.doe@company.com")]
    pub email: String,

    #[schema(example = "+8801712345678", nullable = true)]
    pub phone: Option<String>,

    #[schema(example = 10, nullable = true)]
    pub department_id: Option<u64>,

    #[schema(example = "Engineering", nullable = true)]
    pub department: Option<String>,

    #[schema(example = 3, nullable = true)]
    pub job_title_id: Option<u64>,

    #[schema(example = "Backend Engineer", nullable = true)]
    pub job_title: Option<String>,

    #[schema(example = "Senior", nullable = true)]
    pub position: Option<String>,

    #[sqlx(try_from = "String")]
    pub status: EmployeeStatus,

    #[schema(example = "2024-01-01", value_type = String, format = "date")]
    pub joining_date: NaiveDate,

    #[schema(nullable = true)]
    pub profile_photo_url: Option<String>,

    #[schema(example = "2024-01-01T09:00:00Z", value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const EMPLOYEE_SELECT: &str = r#"
    SELECT
        e.id,
        e.employee_code,
        e.first_name,
        e.last_name,
        e.email,
        e.phone,
        e.department_id,
        d.name AS department,
        e.job_title_id,
        j.title AS job_title,
        e.position,
        e.status,
        e.joining_date,
        e.profile_photo_url,
        e.created_at
    FROM employees e
    LEFT JOIN departments d ON d.id = e.department_id
    LEFT JOIN job_titles j ON j.id = e.job_title_id
"#;
