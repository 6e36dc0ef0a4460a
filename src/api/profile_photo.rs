use std::str::FromStr;

use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{ApiError, ApiResult},
    model::profile_photo::{ProfilePhoto, UserType},
    utils::{
        multipart::collect_form,
        storage::{PhotoStore, validate_image},
    },
};

/// Multipart body of a profile photo upload.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ProfilePhotoUpload {
    /// Required when `userType` is `admin`
    #[schema(example = 42)]
    employee_id: Option<u64>,
    #[schema(value_type = String, format = Binary)]
    photo: Vec<u8>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PhotoQuery {
    /// Required when `userType` is `admin`
    pub employee_id: Option<u64>,
}

const PHOTO_COLUMNS: &str = "employee_id, storage_key, url, content_type, size_bytes, uploaded_at";

fn parse_user_type(raw: &str) -> ApiResult<UserType> {
    UserType::from_str(raw)
        .map_err(|_| ApiError::bad_request(format!("Invalid user type: {raw}")))
}

/// Resolves whose photo the request addresses.
fn target_employee(auth: &AuthUser, user_type: UserType, requested: Option<u64>) -> ApiResult<u64> {
    match user_type {
        UserType::Employee => {
            let own = auth.require_employee()?;
            match requested {
                Some(id) if id != own => Err(ApiError::forbidden(
                    "Employees may only manage their own photo",
                )),
                _ => Ok(own),
            }
        }
        UserType::Admin => {
            auth.require_hr_or_admin()?;
            requested.ok_or_else(|| ApiError::bad_request("employee_id is required"))
        }
    }
}

/// Upload a profile photo
#[utoipa::path(
    post,
    path = "/api/v1/both/profile-photo/{userType}/upload",
    params(("userType" = String, Path, description = "`employee` for the caller, `admin` for any employee")),
    request_body(content = ProfilePhotoUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Photo stored", body = ProfilePhoto),
        (status = 400, description = "Invalid user type, missing employee_id or unsupported image"),
        (status = 403, description = "Not allowed to change this photo"),
        (status = 404, description = "Employee not found"),
        (status = 413, description = "Photo too large")
    ),
    security(("bearer_auth" = [])),
    tag = "Profile Photo"
)]
pub async fn upload_profile_photo(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    store: web::Data<PhotoStore>,
    config: web::Data<Config>,
    path: web::Path<String>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let user_type = parse_user_type(&path)?;

    let form = collect_form(payload, "photo", config.max_photo_bytes).await?;
    let employee_id = target_employee(&auth, user_type, form.parse::<u64>("employee_id")?)?;

    let file = form
        .file
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("photo is required"))?;
    let kind = validate_image(&file.bytes, file.content_type.as_deref(), config.max_photo_bytes)?;
    debug!(employee_id, file_name = ?file.file_name, kind = kind.mime(), "Profile photo accepted");

    let mut tx = pool.begin().await?;

    let exists = sqlx::query_scalar::<_, u64>("SELECT id FROM employees WHERE id = ? FOR UPDATE")
        .bind(employee_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("Employee not found"));
    }

    let previous = sqlx::query_scalar::<_, String>(
        "SELECT storage_key FROM profile_photos WHERE employee_id = ? FOR UPDATE",
    )
    .bind(employee_id)
    .fetch_optional(&mut *tx)
    .await?;

    let stored = store.save("profile", employee_id, kind, &file.bytes).await?;
    let photo = ProfilePhoto {
        employee_id,
        storage_key: stored.key.clone(),
        url: stored.url.clone(),
        content_type: stored.kind.mime().to_string(),
        size_bytes: stored.size as u64,
        uploaded_at: Utc::now().trunc_subsecs(0),
    };

    let written = async {
        sqlx::query(
            r#"
            INSERT INTO profile_photos (employee_id, storage_key, url, content_type, size_bytes, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                storage_key = VALUES(storage_key),
                url = VALUES(url),
                content_type = VALUES(content_type),
                size_bytes = VALUES(size_bytes),
                uploaded_at = VALUES(uploaded_at)
            "#,
        )
        .bind(photo.employee_id)
        .bind(&photo.storage_key)
        .bind(&photo.url)
        .bind(&photo.content_type)
        .bind(photo.size_bytes)
        .bind(photo.uploaded_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE employees SET profile_photo_url = ? WHERE id = ?")
            .bind(&photo.url)
            .bind(employee_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
    .await;

    if let Err(e) = written {
        warn!(employee_id, error = %e, "Profile photo write failed");
        store.discard(&stored.key).await;
        return Err(e.into());
    }

    if let Some(old) = previous.filter(|old| *old != stored.key) {
        store.discard(&old).await;
    }

    info!(
        employee_id,
        uploaded_by = auth.user_id,
        content_type = %photo.content_type,
        size = photo.size_bytes,
        "Profile photo updated"
    );
    Ok(HttpResponse::Ok().json(photo))
}

/// Current profile photo descriptor
#[utoipa::path(
    get,
    path = "/api/v1/both/profile-photo/{userType}",
    params(
        ("userType" = String, Path, description = "`employee` for the caller, `admin` for any employee"),
        PhotoQuery
    ),
    responses(
        (status = 200, description = "Photo descriptor", body = ProfilePhoto),
        (status = 400, description = "Invalid user type or missing employee_id"),
        (status = 403, description = "Not allowed to view this photo"),
        (status = 404, description = "No photo uploaded")
    ),
    security(("bearer_auth" = [])),
    tag = "Profile Photo"
)]
pub async fn get_profile_photo(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    query: web::Query<PhotoQuery>,
) -> ApiResult<HttpResponse> {
    let user_type = parse_user_type(&path)?;
    let employee_id = target_employee(&auth, user_type, query.employee_id)?;

    let photo = sqlx::query_as::<_, ProfilePhoto>(&format!(
        "SELECT {PHOTO_COLUMNS} FROM profile_photos WHERE employee_id = ?"
    ))
    .bind(employee_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("No profile photo"))?;

    Ok(HttpResponse::Ok().json(photo))
}

/// Remove a profile photo
#[utoipa::path(
    delete,
    path = "/api/v1/both/profile-photo/{userType}",
    params(
        ("userType" = String, Path, description = "`employee` for the caller, `admin` for any employee"),
        PhotoQuery
    ),
    responses(
        (status = 200, description = "Photo removed", body = Object, example = json!({
            "message": "Profile photo removed"
        })),
        (status = 400, description = "Invalid user type or missing employee_id"),
        (status = 403, description = "Not allowed to change this photo"),
        (status = 404, description = "No photo uploaded")
    ),
    security(("bearer_auth" = [])),
    tag = "Profile Photo"
)]
pub async fn delete_profile_photo(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    store: web::Data<PhotoStore>,
    path: web::Path<String>,
    query: web::Query<PhotoQuery>,
) -> ApiResult<HttpResponse> {
    let user_type = parse_user_type(&path)?;
    let employee_id = target_employee(&auth, user_type, query.employee_id)?;

    let mut tx = pool.begin().await?;

    let key = sqlx::query_scalar::<_, String>(
        "SELECT storage_key FROM profile_photos WHERE employee_id = ? FOR UPDATE",
    )
    .bind(employee_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("No profile photo"))?;

    sqlx::query("DELETE FROM profile_photos WHERE employee_id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE employees SET profile_photo_url = NULL WHERE id = ?")
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    store.discard(&key).await;

    info!(employee_id, removed_by = auth.user_id, "Profile photo removed");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Profile photo removed"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use rstest::rstest;

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 9,
            username: "someone".to_string(),
            role,
            employee_id,
        }
    }

    #[test]
    fn unknown_user_type_is_bad_request() {
        assert!(matches!(parse_user_type("manager"), Err(ApiError::BadRequest(_))));
        assert_eq!(parse_user_type("admin").unwrap(), UserType::Admin);
    }

    #[rstest]
    #[case(None, 5)]
    #[case(Some(5), 5)]
    fn employee_targets_own_record(#[case] requested: Option<u64>, #[case] expected: u64) {
        let caller = user(Role::Employee, Some(5));
        assert_eq!(target_employee(&caller, UserType::Employee, requested).unwrap(), expected);
    }

    #[test]
    fn employee_cannot_target_someone_else() {
        let caller = user(Role::Employee, Some(5));
        assert!(matches!(
            target_employee(&caller, UserType::Employee, Some(6)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            target_employee(&caller, UserType::Admin, Some(6)),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn unlinked_account_has_no_own_photo() {
        let caller = user(Role::Hr, None);
        assert!(matches!(
            target_employee(&caller, UserType::Employee, None),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[rstest]
    #[case(Role::Admin)]
    #[case(Role::Hr)]
    fn admin_mode_needs_employee_id(#[case] role: Role) {
        let caller = user(role, None);
        assert_eq!(target_employee(&caller, UserType::Admin, Some(12)).unwrap(), 12);
        assert!(matches!(
            target_employee(&caller, UserType::Admin, None),
            Err(ApiError::BadRequest(_))
        ));
    }
}
