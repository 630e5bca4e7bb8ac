use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::TokenPurpose,
        password::{hash_password, verify_password},
        AuthenticatedUser,
    },
    domain::Role,
    error::{AppError, AppResult},
    models::{NewUser, NewUserProfile, NewUserSession, User, UserProfile},
    schema::{user_profiles, user_sessions, users},
    state::AppState,
};

use super::users::UserResponse;

pub const MIN_PASSWORD_LENGTH: usize = 6;

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty()
        && tld.len() >= 2
        && email
            .chars()
            .all(|ch| !ch.is_whitespace() && ch.is_ascii())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Option<Role>,
    pub department: Option<String>,
    pub phone: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub verification_token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let email = payload.email.trim().to_lowercase();
    let name = payload.name.trim().to_string();

    if email.is_empty() || name.is_empty() {
        return Err(AppError::bad_request("email and name are required"));
    }
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("email is not valid"));
    }
    validate_password(&payload.password)?;

    let user_id = Uuid::new_v4();
    let verification_token = state.tokens.verification_token(user_id)?;

    let new_user = NewUser {
        id: user_id,
        email: email.clone(),
        password_hash: hash_password(&payload.password)?,
        name,
        role: payload.role.unwrap_or_default(),
        department: payload.department.map(|d| d.trim().to_string()),
        phone: payload.phone.map(|p| p.trim().to_string()),
        is_active: true,
        is_verified: false,
        verification_token: Some(verification_token.clone()),
    };

    let mut conn = state.db()?;
    let inserted = conn.transaction::<User, diesel::result::Error, _>(|conn| {
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(conn)?;
        diesel::insert_into(user_profiles::table)
            .values(&NewUserProfile {
                id: Uuid::new_v4(),
                user_id,
            })
            .execute(conn)?;
        users::table.find(user_id).first(conn)
    });

    let user = match inserted {
        Ok(user) => user,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict("email is already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    info!(user_id = %user.id, email = %user.email, "registered new account");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(user),
            verification_token,
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("email is not valid"));
    }

    let mut conn = state.db()?;
    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    let user = user.ok_or_else(AppError::unauthorized)?;
    let valid = verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(email = %email, "login rejected: bad credentials");
        return Err(AppError::unauthorized());
    }
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }

    let now = Utc::now();
    diesel::update(users::table.find(user.id))
        .set(users::last_login.eq(now.naive_utc()))
        .execute(&mut conn)?;

    let token = state.tokens.session_token(user.id, payload.remember_me)?;
    let duration = state.tokens.session_duration(payload.remember_me);

    // Remember-me also stores an opaque session row. It exists only so
    // logout can invalidate persisted sessions in bulk; the signed token
    // itself stays valid until its embedded expiry.
    if payload.remember_me {
        let opaque = generate_session_token();
        let session = NewUserSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_session_token(&opaque),
            ip_address: headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(',').next().unwrap_or(value).trim().to_string()),
            user_agent: headers
                .get("user-agent")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string()),
            expires_at: (now + duration).naive_utc(),
        };
        diesel::insert_into(user_sessions::table)
            .values(&session)
            .execute(&mut conn)?;
    }

    info!(user_id = %user.id, remember_me = payload.remember_me, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: duration.num_seconds(),
        user: UserResponse::from(user),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    diesel::delete(user_sessions::table.filter(user_sessions::user_id.eq(user.id())))
        .execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> AppResult<Json<Value>> {
    let claims = state
        .tokens
        .verify(&payload.token, TokenPurpose::EmailVerification)
        .map_err(|_| AppError::bad_request("verification token is invalid or expired"))?;

    let mut conn = state.db()?;
    let updated = diesel::update(users::table.find(claims.sub))
        .set((
            users::is_verified.eq(true),
            users::verification_token.eq::<Option<String>>(None),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::bad_request("verification token is invalid or expired"));
    }

    Ok(Json(json!({ "message": "email verified" })))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::bad_request("email is required"));
    }
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("email is not valid"));
    }

    let mut conn = state.db()?;
    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    // The response is identical whether or not the account exists.
    if let Some(user) = user {
        let reset_token = state.tokens.reset_token(user.id)?;
        let expires = Utc::now() + state.tokens.reset_duration();
        diesel::update(users::table.find(user.id))
            .set((
                users::reset_token.eq(Some(reset_token)),
                users::reset_token_expires.eq(Some(expires.naive_utc())),
            ))
            .execute(&mut conn)?;
        info!(user_id = %user.id, "password reset token issued");
    }

    Ok(Json(json!({
        "message": "if the email is registered, a reset link has been sent"
    })))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    if payload.new_password != payload.confirm_password {
        return Err(AppError::bad_request("passwords do not match"));
    }
    validate_password(&payload.new_password)?;

    let claims = state
        .tokens
        .verify(&payload.token, TokenPurpose::PasswordReset)
        .map_err(|_| AppError::bad_request("reset token is invalid or expired"))?;

    let mut conn = state.db()?;
    let updated = diesel::update(users::table.find(claims.sub))
        .set((
            users::password_hash.eq(hash_password(&payload.new_password)?),
            users::reset_token.eq::<Option<String>>(None),
            users::reset_token_expires.eq::<Option<chrono::NaiveDateTime>>(None),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::bad_request("reset token is invalid or expired"));
    }

    Ok(Json(json!({ "message": "password has been reset" })))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    if payload.current_password.is_empty()
        || payload.new_password.is_empty()
        || payload.confirm_password.is_empty()
    {
        return Err(AppError::bad_request("all password fields are required"));
    }

    let valid = verify_password(&payload.current_password, &user.user.password_hash)?;
    if !valid {
        return Err(AppError::bad_request("current password is incorrect"));
    }
    if payload.new_password != payload.confirm_password {
        return Err(AppError::bad_request("passwords do not match"));
    }
    validate_password(&payload.new_password)?;

    let mut conn = state.db()?;
    diesel::update(users::table.find(user.id()))
        .set((
            users::password_hash.eq(hash_password(&payload.new_password)?),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    Ok(Json(json!({ "message": "password changed" })))
}

pub async fn validate_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let claims = match state.tokens.verify(&payload.token, TokenPurpose::Session) {
        Ok(claims) => claims,
        Err(_) => {
            return Ok((StatusCode::UNAUTHORIZED, Json(json!({ "valid": false }))));
        }
    };

    let mut conn = state.db()?;
    let user: Option<User> = users::table.find(claims.sub).first(&mut conn).optional()?;

    match user {
        Some(user) if user.is_active => Ok((
            StatusCode::OK,
            Json(json!({
                "valid": true,
                "user": UserResponse::from(user),
            })),
        )),
        _ => Ok((StatusCode::UNAUTHORIZED, Json(json!({ "valid": false })))),
    }
}

pub async fn me(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(UserResponse::from(user.user))
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user: UserResponse,
    pub profile: ProfileBody,
}

#[derive(Serialize)]
pub struct ProfileBody {
    pub id: Uuid,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub preferences: Value,
}

impl From<UserProfile> for ProfileBody {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            avatar_url: profile.avatar_url,
            bio: profile.bio,
            address: profile.address,
            emergency_contact: profile.emergency_contact,
            emergency_phone: profile.emergency_phone,
            preferences: profile.preferences,
        }
    }
}

fn load_or_create_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<UserProfile, diesel::result::Error> {
    let existing: Option<UserProfile> = user_profiles::table
        .filter(user_profiles::user_id.eq(user_id))
        .first(conn)
        .optional()?;

    match existing {
        Some(profile) => Ok(profile),
        None => {
            let new_profile = NewUserProfile {
                id: Uuid::new_v4(),
                user_id,
            };
            diesel::insert_into(user_profiles::table)
                .values(&new_profile)
                .execute(conn)?;
            user_profiles::table.find(new_profile.id).first(conn)
        }
    }
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let profile = load_or_create_profile(&mut conn, user.id())?;

    Ok(Json(ProfileResponse {
        user: UserResponse::from(user.user),
        profile: ProfileBody::from(profile),
    }))
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub emergency_phone: Option<String>,
    pub preferences: Option<Value>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    if let Some(ref name) = payload.name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        diesel::update(users::table.find(user.id()))
            .set((users::name.eq(trimmed), users::updated_at.eq(now)))
            .execute(&mut conn)?;
    }
    if let Some(ref department) = payload.department {
        diesel::update(users::table.find(user.id()))
            .set((
                users::department.eq(Some(department.trim().to_string())),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }
    if let Some(ref phone) = payload.phone {
        diesel::update(users::table.find(user.id()))
            .set((
                users::phone.eq(Some(phone.trim().to_string())),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }

    let profile = load_or_create_profile(&mut conn, user.id())?;
    diesel::update(user_profiles::table.find(profile.id))
        .set((
            payload
                .avatar_url
                .map(|value| user_profiles::avatar_url.eq(Some(value))),
            payload.bio.map(|value| user_profiles::bio.eq(Some(value))),
            payload
                .address
                .map(|value| user_profiles::address.eq(Some(value))),
            payload
                .emergency_contact
                .map(|value| user_profiles::emergency_contact.eq(Some(value))),
            payload
                .emergency_phone
                .map(|value| user_profiles::emergency_phone.eq(Some(value))),
            payload
                .preferences
                .map(|value| user_profiles::preferences.eq(value)),
            user_profiles::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let refreshed_user: User = users::table.find(user.id()).first(&mut conn)?;
    let refreshed_profile: UserProfile = user_profiles::table.find(profile.id).first(&mut conn)?;

    Ok(Json(ProfileResponse {
        user: UserResponse::from(refreshed_user),
        profile: ProfileBody::from(refreshed_profile),
    }))
}
