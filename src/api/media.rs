use actix_web::{
    HttpResponse,
    http::header::{CacheControl, CacheDirective},
    web,
};
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult},
    utils::storage::PhotoStore,
};

/// Serve a stored photo
#[utoipa::path(
    get,
    path = "/media/{key}",
    params(("key" = String, Path, description = "Storage key, e.g. `profile/42/<uuid>.png`")),
    responses(
        (status = 200, description = "Image bytes", content_type = "image/*"),
        (status = 404, description = "Not found")
    ),
    tag = "Media"
)]
pub async fn serve_media(store: web::Data<PhotoStore>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let key = path.into_inner();

    let Some((kind, bytes)) = store.read(&key).await? else {
        debug!(key = %key, "Media not found");
        return Err(ApiError::not_found("Not found"));
    };

    // keys are never reused, so the content under one never changes
    Ok(HttpResponse::Ok()
        .content_type(kind.mime())
        .insert_header(CacheControl(vec![
            CacheDirective::Public,
            CacheDirective::MaxAge(86_400),
        ]))
        .body(bytes))
}
