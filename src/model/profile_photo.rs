use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Whose photo a `/v1/both/profile-photo/{userType}` request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserType {
    /// The caller's own linked employee record
    Employee,
    /// Any employee, chosen by `employee_id`; HR/Admin only
    Admin,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "employee_id": 1,
    "url": "/media/profile/1/0b6f2a1e-8a63-4a4e-9a0e-1f1b2c3d4e5f.png",
    "content_type": "image/png",
    "size_bytes": 20480,
    "uploaded_at": "2026-01-05T09:00:00Z"
}))]
pub struct ProfilePhoto {
    pub employee_id: u64,
    #[serde(skip)]
    pub storage_key: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[schema(value_type = String, format = "date-time")]
    pub uploaded_at: DateTime<Utc>,
}
