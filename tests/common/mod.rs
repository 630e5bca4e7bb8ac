use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use firewarden::auth::jwt::TokenService;
use firewarden::auth::password::hash_password;
use firewarden::config::AppConfig;
use firewarden::db::{self, PgPool};
use firewarden::domain::Role;
use firewarden::models::NewUser;
use firewarden::routes;
use firewarden::state::AppState;
use firewarden::storage::ObjectStorage;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn contains(&self, key: &str) -> bool {
        let guard = self.objects.lock().await;
        guard.contains_key(key)
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            session_token_expiry_hours: 24,
            remember_me_expiry_days: 30,
            verification_token_expiry_hours: 24,
            reset_token_expiry_minutes: 60,
            upload_dir: PathBuf::from("/tmp/firewarden-test-uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            cors_allowed_origin: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let tokens = TokenService::from_config(&config);
        let state = AppState::new(pool.clone(), config, storage_for_state, tokens);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, email: &str, password: &str, role: Role) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                password_hash: hash_password(&password)?,
                name: "Test User".to_string(),
                role,
                department: None,
                phone: None,
                is_active: true,
                is_verified: true,
                verification_token: None,
            };
            diesel::insert_into(firewarden::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> Result<()> {
        self.with_conn(move |conn| {
            use firewarden::schema::users::dsl;
            diesel::update(dsl::users.find(user_id))
                .set(dsl::is_active.eq(is_active))
                .execute(conn)
                .context("failed to update user")?;
            Ok(())
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/files/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;

        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE autosave_records, uploaded_files, maintenance_tasks, inspections, devices, user_sessions, user_profiles, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
