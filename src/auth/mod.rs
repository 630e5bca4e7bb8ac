pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::Role,
    error::AppError,
    models::User,
    schema::users,
    state::AppState,
};

use self::jwt::TokenPurpose;

/// The resolved caller of a request. Extraction fails with 401 for a
/// missing/invalid/expired bearer token and 403 for a deactivated account.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
}

impl AuthenticatedUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_admin(&self) -> bool {
        self.user.role.is_admin()
    }

    pub fn is_safety_manager(&self) -> bool {
        self.user.role.is_safety_manager()
    }

    pub fn can_manage_users(&self) -> bool {
        self.user.role.can_manage_users()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .tokens
            .verify(bearer.token(), TokenPurpose::Session)
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let user: Option<User> = users::table
            .find(claims.sub)
            .first(&mut conn)
            .optional()?;

        let user = user.ok_or_else(AppError::unauthorized)?;
        if !user.is_active {
            return Err(AppError::forbidden("account is deactivated"));
        }

        Ok(AuthenticatedUser { user })
    }
}
