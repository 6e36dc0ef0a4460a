use crate::{
    api::{attendance, employee, media, profile_photo},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;
use tracing::warn;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / burst as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            warn!(requests_per_min, "Invalid rate limit, using governor defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(register_limiter.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // /media/{key} serves stored photos; keys are validated by the store
    cfg.service(web::resource("/media/{key:.*}").route(web::get().to(media::serve_media)));

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(employee::update_employee))
                            .route(web::get().to(employee::get_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(web::resource("/departments").route(web::get().to(employee::list_departments)))
            .service(web::resource("/job-titles").route(web::get().to(employee::list_job_titles)))
            .service(
                web::scope("/attendance")
                    // /attendance
                    .service(web::resource("").route(web::get().to(attendance::list_sessions)))
                    .service(web::resource("/current").route(web::get().to(attendance::current_session)))
                    .service(web::resource("/clock-in").route(web::post().to(attendance::clock_in)))
                    .service(web::resource("/clock-out").route(web::post().to(attendance::clock_out)))
                    .service(web::resource("/break-in").route(web::post().to(attendance::break_in)))
                    .service(web::resource("/break-out").route(web::post().to(attendance::break_out)))
                    // /attendance/{session_id}/events
                    .service(
                        web::resource("/{session_id}/events")
                            .route(web::get().to(attendance::session_events)),
                    ),
            )
            .service(
                web::scope("/v1/both/profile-photo/{user_type}")
                    // /v1/both/profile-photo/{user_type}
                    .service(
                        web::resource("")
                            .route(web::get().to(profile_photo::get_profile_photo))
                            .route(web::delete().to(profile_photo::delete_profile_photo)),
                    )
                    // /v1/both/profile-photo/{user_type}/upload
                    .service(
                        web::resource("/upload")
                            .route(web::post().to(profile_photo::upload_profile_photo)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns new access_token + rotated refresh_token

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::jwt::{TokenSubject, generate_access_token, generate_refresh_token},
        model::role::Role,
        utils::{
            multipart::test_support,
            storage::{ImageKind, PhotoStore, test_images::PNG},
            username_index::UsernameIndex,
        },
    };
    use actix_web::{
        App,
        http::{StatusCode, header},
        test,
        web::Data,
    };
    use serde_json::{Value, json};
    use sqlx::mysql::MySqlPoolOptions;
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn subject(role: Role, employee_id: Option<u64>) -> TokenSubject {
        TokenSubject {
            user_id: 3,
            username: "tester".to_string(),
            role: role.id(),
            employee_id,
        }
    }

    fn bearer(role: Role, employee_id: Option<u64>) -> (header::HeaderName, String) {
        let token = generate_access_token(&subject(role, employee_id), "test-secret", 900).unwrap();
        (header::AUTHORIZATION, format!("Bearer {token}"))
    }

    // No handler exercised here reaches the database.
    macro_rules! app {
        ($config:expr, $store:expr) => {{
            let config: Config = $config;
            let pool = MySqlPoolOptions::new()
                .connect_lazy("mysql://nobody@127.0.0.1:1/none")
                .unwrap();
            test::init_service(
                App::new()
                    .app_data(Data::new(pool))
                    .app_data(Data::new(config.clone()))
                    .app_data(Data::new($store))
                    .app_data(Data::new(UsernameIndex::default()))
                    .configure(|cfg| configure(cfg, config.clone())),
            )
            .await
        }};
        () => {{
            let config = Config::for_tests();
            let store = PhotoStore::from_config(&config);
            app!(config, store)
        }};
    }

    #[actix_web::test]
    async fn protected_routes_need_a_token() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/employees")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Missing Authorization header");
    }

    #[actix_web::test]
    async fn refresh_token_is_not_an_access_token() {
        let app = app!();
        let (token, _) = generate_refresh_token(&subject(Role::Admin, None), "test-secret", 3600).unwrap();
        let req = test::TestRequest::get()
            .uri("/api/me")
            .peer_addr(peer())
            .insert_header((header::AUTHORIZATION, format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn access_token_cannot_refresh() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .peer_addr(peer())
            .insert_header(bearer(Role::Employee, Some(11)))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Invalid refresh token");
    }

    #[actix_web::test]
    async fn me_returns_caller_identity() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/me")
            .peer_addr(peer())
            .insert_header(bearer(Role::Employee, Some(11)))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["username"], "tester");
        assert_eq!(body["employee_id"], 11);
    }

    #[actix_web::test]
    async fn employees_cannot_delete_employees() {
        let app = app!();
        let req = test::TestRequest::delete()
            .uri("/api/employees/5")
            .peer_addr(peer())
            .insert_header(bearer(Role::Employee, Some(1)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn clock_in_needs_an_employee_profile() {
        let app = app!();
        let raw = test_support::body(&[], None);
        let req = test::TestRequest::post()
            .uri("/api/attendance/clock-in")
            .peer_addr(peer())
            .insert_header(bearer(Role::Hr, None))
            .insert_header((header::CONTENT_TYPE, test_support::content_type()))
            .set_payload(raw)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "No employee profile");
    }

    #[actix_web::test]
    async fn profile_photo_user_type_is_checked() {
        let app = app!();

        let req = test::TestRequest::get()
            .uri("/api/v1/both/profile-photo/admin?employee_id=2")
            .peer_addr(peer())
            .insert_header(bearer(Role::Employee, Some(1)))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri("/api/v1/both/profile-photo/manager")
            .peer_addr(peer())
            .insert_header(bearer(Role::Admin, None))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn register_rejects_short_passwords() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/auth/register")
            .peer_addr(peer())
            .set_json(json!({ "username": "newbie", "password": "short" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn media_serves_stored_photos_only() {
        let config = Config::for_tests();
        let store = PhotoStore::from_config(&config);
        let stored = store.save("profile", 4, ImageKind::Png, PNG).await.unwrap();
        let app = app!(config, store);

        let req = test::TestRequest::get().uri(&stored.url).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(test::read_body(resp).await, PNG);

        for uri in ["/media/profile/4/missing.png", "/media/..%2F..%2Fetc%2Fpasswd"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        }
    }
}
