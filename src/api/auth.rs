//! Page handlers for the login/register flow
//!
//! - `GET /`            landing page with both forms
//! - `POST /register`   create an identity, open a session, go to `/{username}`
//! - `POST /login`      verify credentials, open a session, go to `/{username}`
//! - `POST /logout`     close the session, go to `/`
//! - `GET /{username}`  greeting, only for the identity that owns the name

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;

use super::middleware::{extract_session_token, form_failure, AppState};
use crate::models::{Identity, Session};
use crate::services::{LoginInput, RegisterInput};
use crate::views::{FormKind, IndexPage};

/// Registration form body
#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Login form body
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// GET / - Landing page
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.views.render_index(&IndexPage::default()))
}

/// POST /register - Create an identity and log it in
pub async fn register(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Response {
    let input = RegisterInput::new(form.username, form.email, form.password);

    match state.auth.register(input).await {
        Ok((identity, session)) => signed_in(&state, &identity, &session),
        Err(e) => form_failure(&state.views, FormKind::Register, &e),
    }
}

/// POST /login - Verify credentials and open a session
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let input = LoginInput::new(form.username, form.password);

    match state.auth.login(input).await {
        Ok((identity, session)) => signed_in(&state, &identity, &session),
        Err(e) => form_failure(&state.views, FormKind::Login, &e),
    }
}

/// POST /logout - Close the current session
///
/// Always clears the cookie and returns to `/`, even without a session.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_session_token(&headers, state.cookie.name()) {
        if let Err(e) = state.auth.logout(&token).await {
            tracing::warn!("Logout failed: {}", e);
        }
    }

    (
        [(header::SET_COOKIE, state.cookie.clear())],
        Redirect::to("/"),
    )
        .into_response()
}

/// GET /{username} - Greeting page for the owner of `username`
///
/// Anyone else, logged in or not, is sent back to `/` without learning
/// whether the name exists.
pub async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Response {
    let token = extract_session_token(&headers, state.cookie.name());

    match state.auth.authorize_profile(token.as_deref(), &username).await {
        Ok(identity) => {
            Html(state.views.render_index(&IndexPage::logged_in(&identity.username)))
                .into_response()
        }
        Err(e) => {
            tracing::debug!("Profile access refused: {}", e);
            Redirect::to("/").into_response()
        }
    }
}

fn signed_in(state: &AppState, identity: &Identity, session: &Session) -> Response {
    (
        [(header::SET_COOKIE, state.cookie.issue(&session.token))],
        Redirect::to(&format!("/{}", identity.username)),
    )
        .into_response()
}
