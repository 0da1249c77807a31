use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use habit_tracker::api::{create_router, AppState, SharedState};
use habit_tracker::config::Config;
use habit_tracker::security::signer::TokenKind;
use habit_tracker::users::NewUser;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for Router::oneshot

fn test_config(accept_raw_tokens: bool) -> Arc<Config> {
    let mut config = Config::default();
    config.auth.signing_key = "integration-test-key".to_string();
    config.auth.accept_raw_tokens = accept_raw_tokens;
    Arc::new(config)
}

fn test_app(accept_raw_tokens: bool) -> (Router, SharedState) {
    let state = Arc::new(AppState::new(test_config(accept_raw_tokens)));
    (create_router(state.clone()), state)
}

async fn seed_user(state: &SharedState, email: &str) -> u64 {
    state
        .users
        .register(NewUser {
            email: email.to_string(),
            password: "pass1234".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            plan: None,
        })
        .await
        .unwrap()
        .id
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn login(app: &Router, email: &str) -> (String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/token",
        None,
        Some(json!({"email": email, "password": "pass1234"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (
        body["access"].as_str().unwrap().to_string(),
        body["refresh"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn login_returns_opaque_handles_that_authenticate() {
    let (app, state) = test_app(true);
    seed_user(&state, "user@example.com").await;

    let (access, refresh) = login(&app, "user@example.com").await;
    // handles are not signed tokens
    assert!(!access.contains('.'));
    assert!(!refresh.contains('.'));

    let (status, me) = send(&app, "GET", "/users/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "user@example.com");
    assert!(me.get("password").is_none());
}

#[tokio::test]
async fn refresh_handle_resolves_to_users_refresh_token() {
    let (app, state) = test_app(true);
    let user_id = seed_user(&state, "user@example.com").await;
    let (_, refresh) = login(&app, "user@example.com").await;

    let raw = state.store.get(&refresh).await.unwrap();
    let token = state.issuer.signer().verify(&raw).unwrap();
    assert_eq!(token.subject(), user_id);
    assert_eq!(token.kind(), TokenKind::Refresh);
}

#[tokio::test]
async fn login_with_wrong_password_is_401() {
    let (app, state) = test_app(true);
    seed_user(&state, "user@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/token",
        None,
        Some(json!({"email": "user@example.com", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["detail"],
        "No active account found with the given credentials."
    );
}

#[tokio::test]
async fn refresh_requires_a_handle() {
    let (app, _) = test_app(true);

    let (status, body) = send(&app, "POST", "/token/refresh", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No refresh token provided.");

    let (status, _) = send(&app, "POST", "/token/refresh", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_with_unknown_handle_is_401() {
    let (app, _) = test_app(true);
    let (status, body) = send(
        &app,
        "POST",
        "/token/refresh",
        None,
        Some(json!({"refresh": "no-such-handle"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid or expired refresh token.");
}

#[tokio::test]
async fn refresh_rotates_single_use_handles() {
    let (app, state) = test_app(true);
    seed_user(&state, "user@example.com").await;
    let (_, h1) = login(&app, "user@example.com").await;

    let (status, first) = send(
        &app,
        "POST",
        "/token/refresh",
        None,
        Some(json!({"refresh": h1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let h2 = first["refresh"].as_str().unwrap().to_string();
    assert_ne!(h1, h2);

    // replaying the rotated-out handle fails
    let (status, _) = send(
        &app,
        "POST",
        "/token/refresh",
        None,
        Some(json!({"refresh": h1})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/token/refresh",
        None,
        Some(json!({"refresh": h2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let new_access = first["access"].as_str().unwrap();
    let (status, _) = send(&app, "GET", "/users/me", Some(new_access), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_handle_is_not_a_bearer() {
    let (app, state) = test_app(true);
    seed_user(&state, "user@example.com").await;
    let (_, refresh) = login(&app, "user@example.com").await;

    let (status, body) = send(&app, "GET", "/users/me", Some(&refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Token invalid.");
}

#[tokio::test]
async fn missing_authorization_is_401() {
    let (app, _) = test_app(true);
    let (status, body) = send(&app, "GET", "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Authentication credentials were not provided.");
}

#[tokio::test]
async fn raw_signed_tokens_follow_passthrough_setting() {
    let (app, state) = test_app(true);
    let user_id = seed_user(&state, "user@example.com").await;
    let raw = state
        .issuer
        .signer()
        .issue(user_id, TokenKind::Access)
        .unwrap();
    let (status, _) = send(&app, "GET", "/users/me", Some(raw.as_str()), None).await;
    assert_eq!(status, StatusCode::OK);

    let (strict_app, strict_state) = test_app(false);
    let user_id = seed_user(&strict_state, "user@example.com").await;
    let raw = strict_state
        .issuer
        .signer()
        .issue(user_id, TokenKind::Access)
        .unwrap();
    let (status, _) = send(&strict_app, "GET", "/users/me", Some(raw.as_str()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // garbage never passes, passthrough or not
    let (status, _) = send(&app, "GET", "/users/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
