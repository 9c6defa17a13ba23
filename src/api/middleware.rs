//! Shared request plumbing
//!
//! Contains:
//! - `AppState`, the services every handler can reach
//! - session token extraction (Bearer header or session cookie)
//! - `SessionCookie`, which formats the `Set-Cookie` values
//! - mapping of `AuthError` onto HTTP responses

use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::config::SessionConfig;
use crate::services::{AuthError, AuthService};
use crate::views::{FormKind, IndexPage, Views};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub views: Arc<Views>,
    pub cookie: SessionCookie,
}

/// Formats the session cookie
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
    max_age_secs: i64,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, secure: bool, max_age_secs: i64) -> Self {
        Self {
            name: name.into(),
            secure,
            max_age_secs,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.cookie_name.clone(),
            config.secure_cookie,
            config.ttl_minutes * 60,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Set-Cookie` value carrying `token`
    pub fn issue(&self, token: &str) -> String {
        self.format(token, self.max_age_secs)
    }

    /// `Set-Cookie` value that removes the cookie
    pub fn clear(&self) -> String {
        self.format("", 0)
    }

    fn format(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Pull the session token from `Authorization: Bearer` or the session cookie.
///
/// The header wins when both are present. Empty values are ignored.
pub fn extract_session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_str) = cookie_header.to_str() else {
            continue;
        };
        for cookie in cookie_str.split(';') {
            if let Some((name, value)) = cookie.trim().split_once('=') {
                if name == cookie_name && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

/// HTTP status for a failed form submission
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::DuplicateIdentity(_) => StatusCode::CONFLICT,
        AuthError::IdentityNotFound | AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
        AuthError::SessionInvalid => StatusCode::UNAUTHORIZED,
        AuthError::AccessDenied => StatusCode::FORBIDDEN,
        AuthError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
        AuthError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Re-render the landing page with the error's user-facing message.
///
/// Session errors redirect to `/` instead of rendering.
pub fn form_failure(views: &Views, form: FormKind, err: &AuthError) -> Response {
    match err {
        AuthError::SessionInvalid | AuthError::AccessDenied => {
            return Redirect::to("/").into_response();
        }
        AuthError::StorageUnavailable(e) => {
            tracing::error!("Storage failure during {:?}: {:#}", form, e);
        }
        _ => {}
    }

    let message = err.user_message();
    let html = views.render_index(&IndexPage::with_error(form, &message));
    (status_for(err), Html(html)).into_response()
}
