use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

pub mod auth;
pub mod dashboard;
pub mod devices;
pub mod files;
pub mod health;
pub mod inspections;
pub mod maintenance;
pub mod sync;
pub mod users;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub pages: i64,
    pub per_page: i64,
    pub total: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64, total: i64) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            page,
            pages,
            per_page,
            total,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }
}

pub fn page_window(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, per_page)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/verify-email", post(auth::verify_email))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/change-password", post(auth::change_password))
        .route("/validate-token", post(auth::validate_token))
        .route("/me", get(auth::me))
        .route(
            "/profile",
            get(auth::get_profile).put(auth::update_profile),
        );

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/roles", get(users::list_roles))
        .route("/departments", get(users::list_departments))
        .route("/stats", get(users::user_stats))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:id/activate", post(users::activate_user))
        .route("/:id/deactivate", post(users::deactivate_user))
        .route("/:id/reset-password", post(users::admin_reset_password));

    let devices_routes = Router::new()
        .route("/", get(devices::list_devices).post(devices::create_device))
        .route("/types", get(devices::list_device_types))
        .route("/locations", get(devices::list_device_locations))
        .route("/stats", get(devices::device_stats))
        .route("/bulk", post(devices::bulk_create_devices))
        .route(
            "/:id",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        );

    let inspections_routes = Router::new()
        .route(
            "/",
            get(inspections::list_inspections).post(inspections::create_inspection),
        )
        .route("/stats", get(inspections::inspection_stats))
        .route("/bulk", post(inspections::bulk_create_inspections))
        .route(
            "/:id",
            get(inspections::get_inspection)
                .put(inspections::update_inspection)
                .delete(inspections::delete_inspection),
        );

    let maintenance_routes = Router::new()
        .route(
            "/",
            get(maintenance::list_tasks).post(maintenance::create_task),
        )
        .route("/stats", get(maintenance::task_stats))
        .route("/schedule", get(maintenance::schedule))
        .route("/bulk", post(maintenance::bulk_create_tasks))
        .route(
            "/:id",
            get(maintenance::get_task)
                .put(maintenance::update_task)
                .delete(maintenance::delete_task),
        );

    let files_routes = Router::new()
        .route("/", get(files::list_files))
        .route("/upload", post(files::upload_files))
        .route("/stats", get(files::file_stats))
        .route("/categories", get(files::list_categories))
        .route(
            "/:id",
            get(files::get_file)
                .put(files::update_file)
                .delete(files::delete_file),
        )
        .route("/:id/download", get(files::download_file))
        .route("/:id/thumbnail", get(files::file_thumbnail));

    let dashboard_routes = Router::new()
        .route("/stats", get(dashboard::stats))
        .route("/activity", get(dashboard::activity))
        .route("/alerts", get(dashboard::alerts))
        .route("/summary", get(dashboard::summary))
        .route("/charts/inspections", get(dashboard::inspections_chart))
        .route("/charts/maintenance", get(dashboard::maintenance_chart));

    let sync_routes = Router::new()
        .route("/save", post(sync::save))
        .route("/restore", get(sync::restore))
        .route("/all", get(sync::all))
        .route("/export", get(sync::export))
        .route("/import", post(sync::import))
        .route("/clear", post(sync::clear))
        .route("/cleanup", post(sync::cleanup))
        .route("/stats", get(sync::stats));

    let body_limit = state.config.max_upload_bytes + 1024 * 1024;

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/users", users_routes)
        .nest("/api/devices", devices_routes)
        .nest("/api/inspections", inspections_routes)
        .nest("/api/maintenance", maintenance_routes)
        .nest("/api/files", files_routes)
        .nest("/api/dashboard", dashboard_routes)
        .nest("/api/sync", sync_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
