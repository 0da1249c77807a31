pub mod auth;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::habits::{CompletionOutcome, Habit, HabitBook, HabitLog, NewHabit};
use crate::leagues::{League, LeagueBoard, LeagueDraft, LeagueParticipant};
use crate::progress::{ProgressLedger, ProgressReport};
use crate::security::credential_store::{spawn_sweeper, CredentialStore, InMemoryCredentialStore};
use crate::security::issuer::{TokenIssuer, TokenPair};
use crate::security::resolver::TokenResolver;
use crate::security::rotator::TokenRotator;
use crate::security::signer::TokenSigner;
use crate::users::plans::{Plan, PlanCatalog};
use crate::users::{NewUser, ProfileUpdate, UserDirectory, UserView};
use auth::AuthUser;

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CredentialStore>,
    pub issuer: TokenIssuer,
    pub resolver: TokenResolver,
    pub rotator: TokenRotator,
    pub progress: ProgressLedger,
    pub users: UserDirectory,
    pub habits: HabitBook,
    pub leagues: LeagueBoard,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_store(config, Arc::new(InMemoryCredentialStore::new()))
    }

    /// Build state around an externally provided credential store.
    pub fn with_store(config: Arc<Config>, store: Arc<dyn CredentialStore>) -> Self {
        let key = if config.auth.signing_key.is_empty() {
            warn!("No signing key configured; generated an ephemeral key, tokens will not survive a restart");
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            STANDARD.encode(bytes).into_bytes()
        } else {
            config.auth.signing_key.clone().into_bytes()
        };
        let signer = Arc::new(TokenSigner::new(
            key,
            config.auth.access_lifetime(),
            config.auth.refresh_lifetime(),
        ));

        let issuer = TokenIssuer::new(signer.clone(), store.clone());
        let resolver = TokenResolver::new(signer, store.clone(), config.auth.accept_raw_tokens);
        let rotator = TokenRotator::new(issuer.clone());

        let progress = ProgressLedger::new(config.progression.curve());
        let users = UserDirectory::new(PlanCatalog::default(), progress.clone());
        let habits = HabitBook::new(progress.clone(), config.progression.xp_per_completion);

        Self {
            config,
            store,
            issuer,
            resolver,
            rotator,
            progress,
            users,
            habits,
            leagues: LeagueBoard::new(),
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Deserialize)]
pub struct SetHabitsRequest {
    #[serde(default)]
    pub habits: Vec<u64>,
}

#[derive(Deserialize, Default)]
pub struct LogRequest {
    #[serde(default)]
    pub completed: bool,
}

// Health check
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn obtain_token(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state
        .issuer
        .login(&state.users, &req.email, &req.password)
        .await?;
    Ok(Json(pair))
}

// A body that is missing or not JSON counts as "no refresh token".
async fn refresh_token(
    State(state): State<SharedState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, ApiError> {
    let handle = body.ok().and_then(|Json(req)| req.refresh);
    let pair = state.rotator.rotate(handle.as_deref()).await?;
    Ok(Json(pair))
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    let user = state.users.register(req).await?;
    Ok((StatusCode::CREATED, Json(state.users.view(&user))))
}

async fn current_user(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> Json<UserView> {
    Json(state.users.view(&user))
}

async fn update_current_user(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserView>, ApiError> {
    let updated = state.users.update_profile(user.id, update).await?;
    Ok(Json(state.users.view(&updated)))
}

async fn delete_current_user(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, ApiError> {
    state.users.delete(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_user(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<u64>,
) -> Result<Json<UserView>, ApiError> {
    let user = state.users.require(id).await?;
    Ok(Json(state.users.view(&user)))
}

async fn current_progress(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> Json<ProgressReport> {
    let progress = state.progress.open(user.id).await;
    Json(progress.report(state.progress.curve()))
}

async fn set_habits(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(req): Json<SetHabitsRequest>,
) -> Result<Json<UserView>, ApiError> {
    let updated = state
        .users
        .set_habits(user.id, &req.habits, &state.habits)
        .await?;
    Ok(Json(state.users.view(&updated)))
}

async fn list_plans(State(state): State<SharedState>) -> Json<Vec<Plan>> {
    Json(state.users.plans().list().to_vec())
}

async fn get_plan(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<Json<Plan>, ApiError> {
    state
        .users
        .plans()
        .get(id)
        .cloned()
        .map(Json)
        .ok_or(ApiError::NotFound("Plan"))
}

async fn list_habits(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Json<Vec<Habit>> {
    Json(state.habits.list_habits().await)
}

async fn get_habit(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<u64>,
) -> Result<Json<Habit>, ApiError> {
    state
        .habits
        .get_habit(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound("Habit"))
}

async fn create_habit(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(req): Json<NewHabit>,
) -> Result<(StatusCode, Json<Habit>), ApiError> {
    let habit = state.habits.create_habit(&req.name, &req.description).await?;
    Ok((StatusCode::CREATED, Json(habit)))
}

async fn log_habit(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(habit_id): Path<u64>,
    body: Result<Json<LogRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<HabitLog>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let log = state
        .habits
        .log_habit(user.id, habit_id, req.completed, Utc::now().date_naive())
        .await?;
    Ok((StatusCode::CREATED, Json(log)))
}

async fn my_logs(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> Json<Vec<HabitLog>> {
    Json(state.habits.logs_for(user.id).await)
}

async fn update_log(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(log_id): Path<u64>,
    Json(req): Json<LogRequest>,
) -> Result<Json<CompletionOutcome>, ApiError> {
    let outcome = state
        .habits
        .set_completed(user.id, log_id, req.completed)
        .await?;
    Ok(Json(outcome))
}

async fn list_leagues(State(state): State<SharedState>) -> Json<Vec<League>> {
    Json(state.leagues.list().await)
}

async fn get_league(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
) -> Result<Json<League>, ApiError> {
    state
        .leagues
        .get(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound("League"))
}

async fn create_league(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(draft): Json<LeagueDraft>,
) -> Result<(StatusCode, Json<League>), ApiError> {
    let league = state
        .leagues
        .create(
            user.id,
            state.users.plan_of(&user),
            draft,
            &state.habits,
            Utc::now().date_naive(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(league)))
}

async fn enter_league(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<u64>,
) -> Result<Json<LeagueParticipant>, ApiError> {
    Ok(Json(state.leagues.join(id, user.id).await?))
}

async fn league_leaderboard(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<u64>,
) -> Result<Json<Vec<LeagueParticipant>>, ApiError> {
    Ok(Json(state.leagues.leaderboard(id).await?))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/token", post(obtain_token))
        .route("/token/refresh", post(refresh_token))
        .route("/users", post(register))
        .route(
            "/users/me",
            get(current_user)
                .patch(update_current_user)
                .delete(delete_current_user),
        )
        .route("/users/{id}", get(get_user))
        .route("/users/me/progress", get(current_progress))
        .route("/users/me/habits", put(set_habits))
        .route("/plans", get(list_plans))
        .route("/plans/{id}", get(get_plan))
        .route("/habits", get(list_habits).post(create_habit))
        .route("/habits/{id}", get(get_habit))
        .route("/habits/{id}/logs", post(log_habit))
        .route("/logs", get(my_logs))
        .route("/logs/{id}", patch(update_log))
        .route("/leagues", get(list_leagues).post(create_league))
        .route("/leagues/{id}", get(get_league))
        .route("/leagues/{id}/enter", post(enter_league))
        .route("/leagues/{id}/leaderboard", get(league_leaderboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config, port: u16) -> Result<()> {
    let sweep_interval = config.auth.sweep_interval();
    let state = Arc::new(AppState::new(Arc::new(config)));

    spawn_sweeper(state.store.clone(), sweep_interval);

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
