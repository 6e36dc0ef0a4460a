use actix_web::{HttpRequest, HttpResponse, http::header::AUTHORIZATION, web};
use chrono::{TimeZone, Utc};
use serde_json::json;
use sqlx::{Executor, MySql, MySqlPool};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        auth::AuthUser,
        jwt::{TokenSubject, bearer_token, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, verify_password},
    },
    config::Config,
    error::{ApiError, ApiResult, constraint_error},
    model::role::Role,
    models::{Claims, LoginReqDto, RegisterReq, TokenPair, TokenType, UserSql},
    utils::username_index::UsernameIndex,
};

const MIN_PASSWORD_LEN: usize = 8;

fn token_error(e: jsonwebtoken::errors::Error) -> ApiError {
    ApiError::internal(format!("Token encoding failed: {e}"))
}

/// Refresh claims from the `Authorization` header, if it carries a valid refresh token.
fn refresh_claims(req: &HttpRequest, secret: &str) -> Option<Claims> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = bearer_token(header)?;
    verify_token(token, secret)
        .ok()
        .filter(|claims| claims.token_type == TokenType::Refresh)
}

async fn store_refresh_token<'e, E>(executor: E, user_id: u64, claims: &Claims) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    let expires_at = Utc
        .timestamp_opt(claims.exp as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);

    sqlx::query("INSERT INTO refresh_tokens (user_id, jti, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&claims.jti)
        .bind(expires_at)
        .execute(executor)
        .await?;
    Ok(())
}

async fn issue_pair(pool: &MySqlPool, config: &Config, subject: &TokenSubject) -> ApiResult<TokenPair> {
    let access_token =
        generate_access_token(subject, &config.jwt_secret, config.access_token_ttl).map_err(token_error)?;
    let (refresh_token, refresh) =
        generate_refresh_token(subject, &config.jwt_secret, config.refresh_token_ttl).map_err(token_error)?;

    debug!(user_id = subject.user_id, jti = %refresh.jti, "Storing refresh token");
    store_refresh_token(pool, subject.user_id, &refresh).await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Register a user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered", body = Object, example = json!({
            "message": "User registered successfully"
        })),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Employee code not found"),
        (status = 409, description = "Username taken or employee already linked")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_register", skip(pool, index, user), fields(username = %user.username))]
pub async fn register(
    user: web::Json<RegisterReq>,
    pool: web::Data<MySqlPool>,
    index: web::Data<UsernameIndex>,
) -> ApiResult<HttpResponse> {
    let username = user.username.trim().to_lowercase();

    if username.is_empty() || user.password.is_empty() {
        return Err(ApiError::bad_request("Username and password must not be empty"));
    }
    if user.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if !index.is_available(&username, pool.get_ref()).await? {
        return Err(ApiError::conflict("Username already taken"));
    }

    let employee_id = match user.employee_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => Some(
            sqlx::query_scalar::<_, u64>("SELECT id FROM employees WHERE employee_code = ?")
                .bind(code)
                .fetch_optional(pool.get_ref())
                .await?
                .ok_or_else(|| ApiError::not_found("Employee code not found"))?,
        ),
        None => None,
    };

    let hashed = hash_password(&user.password)
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {e}")))?;

    let result = sqlx::query(
        "INSERT INTO users (username, password, role_id, employee_id) VALUES (?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(&hashed)
    .bind(Role::Employee.id())
    .bind(employee_id)
    .execute(pool.get_ref())
    .await;

    // username or employee link may collide with a concurrent registration,
    // and the linked employee may have been deleted since the lookup
    result.map_err(|e| {
        constraint_error(
            e,
            "Username taken or employee already linked",
            "Employee record no longer exists",
        )
    })?;

    index.mark_taken(&username).await;
    info!(employee_id = ?employee_id, "User registered");
    Ok(HttpResponse::Created().json(json!({
        "message": "User registered successfully"
    })))
}

/// Log in and receive an access/refresh token pair
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = TokenPair),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(pool, config, user), fields(username = %user.username))]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        return Err(ApiError::bad_request("Username or password required"));
    }

    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());

    let db_user = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password, role_id, employee_id, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(user.username.trim().to_lowercase())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| {
        info!("Invalid credentials: user not found");
        invalid()
    })?;

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(invalid());
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: account inactive");
        return Err(ApiError::Unauthorized("Account is inactive".to_string()));
    }

    let subject = TokenSubject {
        user_id: db_user.id,
        username: db_user.username.clone(),
        role: db_user.role_id,
        employee_id: db_user.employee_id,
    };
    let tokens = issue_pair(pool.get_ref(), &config, &subject).await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        // not worth failing the login over
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = db_user.id, "Login successful");
    Ok(HttpResponse::Ok().json(tokens))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Missing, invalid, revoked or expired refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let unauthorized = || ApiError::Unauthorized("Invalid refresh token".to_string());
    let claims = refresh_claims(&req, &config.jwt_secret).ok_or_else(unauthorized)?;

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        Some((_, user_id, true)) => {
            warn!(user_id, jti = %claims.jti, "Revoked refresh token presented");
            return Err(unauthorized());
        }
        None => return Err(unauthorized()),
    };

    // account may have been disabled since the token was issued
    let active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(false);
    if !active {
        return Err(unauthorized());
    }

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    let subject = TokenSubject::from(&claims);
    let access_token = generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)
        .map_err(token_error)?;
    let (new_refresh_token, new_claims) =
        generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)
            .map_err(token_error)?;

    store_refresh_token(&mut *tx, user_id, &new_claims).await?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(TokenPair {
        access_token,
        refresh_token: new_refresh_token,
    }))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out (also when the token was unknown)")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let Some(claims) = refresh_claims(&req, &config.jwt_secret) else {
        return HttpResponse::NoContent().finish();
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

/// Identity of the bearer
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Caller identity", body = AuthUser),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(auth)
}
