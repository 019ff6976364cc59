//! REST routes: accounts, spaces, message history and invites.
//!
//! Everything except register/login needs a bearer token.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use eligos_core::{Invite, InviteId, Space, SpaceId, StoredMessage, User, UserId};
use eligos_store::StoreError;

use crate::auth::{AuthError, CurrentUser};
use crate::error::ApiError;
use crate::server::AppState;
use crate::ws;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/ping", get(ping))
        .route("/user", get(current_user))
        .route("/space/create", post(create_space))
        .route("/space/adduser", post(add_user))
        .route("/space/leave", post(leave_space))
        .route("/space/spaces", get(list_spaces))
        .route("/space/messages", get(list_messages))
        .route("/invite/create", post(create_invite))
        .route("/invite/accept", post(accept_invite))
        .route("/invite/reject", post(reject_invite))
        .route("/invite/get", get(list_invites))
        .route("/ws", get(ws::ws_handler))
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSpaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    pub email: String,
    pub space_id: SpaceId,
}

#[derive(Debug, Deserialize)]
pub struct SpaceRequest {
    pub space_id: SpaceId,
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub space_id: SpaceId,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub id: InviteId,
}

async fn register(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Result<impl IntoResponse, ApiError> {
    let name = form.name.trim();
    let email = form.email.trim();
    if name.is_empty() || form.password.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("name, email and password are required"));
    }

    let hash = state.auth.hash_password(form.password).await?;
    let user = state.users.create(name, email, &hash)?.into_user();
    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .users
        .get_by_email(form.email.trim())?
        .ok_or(AuthError::InvalidCredentials)?;

    if !state.auth.verify_password(form.password, row.password_hash).await? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let jwt = state.auth.issue_token(&row.id)?;
    debug!(user_id = %row.id, "login succeeded");
    Ok(Json(json!({ "message": "success", "jwt": jwt })))
}

async fn ping(_user: CurrentUser) -> &'static str {
    "pong"
}

async fn current_user(State(state): State<AppState>, CurrentUser(id): CurrentUser) -> Result<Json<User>, ApiError> {
    Ok(Json(load_user(&state, &id)?))
}

async fn create_space(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<CreateSpaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("space name is required"));
    }
    let space = state.spaces.create(name, &id)?;
    info!(space_id = %space.id, user_id = %id, "space created");
    Ok((StatusCode::CREATED, Json(space)))
}

async fn add_user(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<AddUserRequest>,
) -> Result<Json<Vec<User>>, ApiError> {
    require_member(&state, &req.space_id, &id)?;
    let invitee = state
        .users
        .get_by_email(&req.email)?
        .ok_or_else(|| ApiError::not_found(format!("user with email {}", req.email)))?;

    state.spaces.add_member(&req.space_id, &invitee.id)?;
    info!(space_id = %req.space_id, user_id = %invitee.id, added_by = %id, "member added");
    Ok(Json(state.spaces.members(&req.space_id)?))
}

async fn leave_space(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<SpaceRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.spaces.remove_member(&req.space_id, &id)? {
        return Err(ApiError::not_found(format!("membership in space {}", req.space_id)));
    }
    info!(space_id = %req.space_id, user_id = %id, "member left");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_spaces(State(state): State<AppState>, CurrentUser(id): CurrentUser) -> Result<Json<Vec<Space>>, ApiError> {
    Ok(Json(state.users.spaces_of(&id)?))
}

async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Query(req): Query<SpaceRequest>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    require_member(&state, &req.space_id, &id)?;
    Ok(Json(state.messages.list(&req.space_id)?))
}

async fn create_invite(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_member(&state, &req.space_id, &id)?;
    let space = state.spaces.get(&req.space_id)?;
    let invitee = state
        .users
        .get_by_email(&req.email)?
        .ok_or_else(|| ApiError::not_found(format!("user with email {}", req.email)))?;
    if state.spaces.is_member(&space.id, &invitee.id)? {
        return Err(ApiError::Conflict(format!("{} is already a member", invitee.email)));
    }

    let invite = state.invites.create(&space.id, &space.name, &invitee.email)?;
    info!(invite_id = %invite.id, space_id = %space.id, "invite created");

    let payload = serde_json::to_value(&invite).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Err(e) = state.hub.notify(invitee.id, "invite", payload) {
        debug!(error = %e, "invite notification not sent");
    }
    Ok((StatusCode::CREATED, Json(invite)))
}

async fn accept_invite(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<InviteRequest>,
) -> Result<Json<Space>, ApiError> {
    let user = load_user(&state, &id)?;
    let invite = addressed_invite(&state, &req.id, &user)?;

    match state.spaces.add_member(&invite.space_id, &user.id) {
        Ok(()) | Err(StoreError::Conflict(_)) => {}
        Err(e) => return Err(e.into()),
    }
    state.invites.delete(&invite.id)?;
    info!(invite_id = %invite.id, space_id = %invite.space_id, user_id = %user.id, "invite accepted");
    Ok(Json(state.spaces.get(&invite.space_id)?))
}

async fn reject_invite(
    State(state): State<AppState>,
    CurrentUser(id): CurrentUser,
    Json(req): Json<InviteRequest>,
) -> Result<StatusCode, ApiError> {
    let user = load_user(&state, &id)?;
    let invite = addressed_invite(&state, &req.id, &user)?;
    state.invites.delete(&invite.id)?;
    info!(invite_id = %invite.id, user_id = %user.id, "invite rejected");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_invites(State(state): State<AppState>, CurrentUser(id): CurrentUser) -> Result<Json<Vec<Invite>>, ApiError> {
    let user = load_user(&state, &id)?;
    Ok(Json(state.invites.list_for_email(&user.email)?))
}

/// A valid token whose user no longer exists is treated as unauthenticated.
fn load_user(state: &AppState, id: &UserId) -> Result<User, ApiError> {
    match state.users.get(id) {
        Ok(row) => Ok(row.into_user()),
        Err(StoreError::NotFound(_)) => Err(ApiError::Unauthorized(format!("unknown user {id}"))),
        Err(e) => Err(e.into()),
    }
}

fn require_member(state: &AppState, space: &SpaceId, user: &UserId) -> Result<(), ApiError> {
    if !state.spaces.exists(space)? {
        return Err(ApiError::not_found(format!("space {space}")));
    }
    if !state.spaces.is_member(space, user)? {
        return Err(ApiError::forbidden(format!("not a member of space {space}")));
    }
    Ok(())
}

fn addressed_invite(state: &AppState, id: &InviteId, user: &User) -> Result<Invite, ApiError> {
    let invite = state.invites.get(id)?;
    if invite.email != user.email {
        return Err(ApiError::forbidden("invite is addressed to someone else"));
    }
    Ok(invite)
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::TestApp;
    use axum::http::StatusCode;
    use eligos_core::InviteId;
    use serde_json::json;

    #[tokio::test]
    async fn register_then_login() {
        let app = TestApp::new();
        let (status, user) = app
            .post_form("/api/auth/register", "name=Ada&email=Ada%40Example.com&password=pw")
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["email"], "ada@example.com");
        assert!(user.get("password_hash").is_none());

        let (status, body) = app.post_form("/api/auth/login", "email=ada%40example.com&password=pw").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "success");
        let jwt = body["jwt"].as_str().unwrap();

        let (status, me) = app.get("/api/user", Some(jwt)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], user["id"]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = TestApp::new();
        let form = "name=Ada&email=ada%40example.com&password=pw";
        assert_eq!(app.post_form("/api/auth/register", form).await.0, StatusCode::CREATED);
        assert_eq!(app.post_form("/api/auth/register", form).await.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn bad_registration_rejected() {
        let app = TestApp::new();
        let (status, _) = app.post_form("/api/auth/register", "name=&email=x&password=pw").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = TestApp::new();
        app.post_form("/api/auth/register", "name=Ada&email=ada%40example.com&password=pw")
            .await;

        let (status, body) = app.post_form("/api/auth/login", "email=ada%40example.com&password=nope").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _) = app.post_form("/api/auth/login", "email=ghost%40example.com&password=pw").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_need_token() {
        let app = TestApp::new();
        assert_eq!(app.get("/api/ping", None).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(app.get("/api/ping", Some("garbage")).await.0, StatusCode::UNAUTHORIZED);

        let (_, token) = app.user("Ada");
        let (status, body) = app.get("/api/ping", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn space_lifecycle() {
        let app = TestApp::new();
        let (_, ada) = app.user("Ada");
        let (bob, bob_token) = app.user("Bob");

        let (status, space) = app.post_json("/api/space/create", &ada, json!({"name": "general"})).await;
        assert_eq!(status, StatusCode::CREATED);
        let space_id = space["id"].as_str().unwrap().to_string();

        let (status, members) = app
            .post_json("/api/space/adduser", &ada, json!({"email": bob.email, "space_id": space_id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(members.as_array().unwrap().len(), 2);

        let (status, _) = app
            .post_json("/api/space/adduser", &ada, json!({"email": bob.email, "space_id": space_id}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, spaces) = app.get("/api/space/spaces", Some(&bob_token)).await;
        assert_eq!(spaces[0]["name"], "general");

        let (status, _) = app.post_json("/api/space/leave", &bob_token, json!({"space_id": space_id})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.post_json("/api/space/leave", &bob_token, json!({"space_id": space_id})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_members_manage_or_read_a_space() {
        let app = TestApp::new();
        let (ada, ada_token) = app.user("Ada");
        let (_, eve_token) = app.user("Eve");
        let space = app.state.spaces.create("private", &ada.id).unwrap();

        let uri = format!("/api/space/messages?space_id={}", space.id);
        assert_eq!(app.get(&uri, Some(&eve_token)).await.0, StatusCode::FORBIDDEN);
        assert_eq!(app.get(&uri, Some(&ada_token)).await.0, StatusCode::OK);
        assert_eq!(
            app.get("/api/space/messages?space_id=spc_missing", Some(&ada_token)).await.0,
            StatusCode::NOT_FOUND
        );

        let (status, _) = app
            .post_json("/api/space/adduser", &eve_token, json!({"email": "eve@example.com", "space_id": space.id}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn message_history_in_order() {
        let app = TestApp::new();
        let (ada, token) = app.user("Ada");
        let space = app.state.spaces.create("general", &ada.id).unwrap();
        app.state.messages.create(&ada.id, &space.id, "first").unwrap();
        app.state.messages.create(&ada.id, &space.id, "second").unwrap();

        let (status, history) = app.get(&format!("/api/space/messages?space_id={}", space.id), Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        let bodies: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn invite_accept_flow() {
        let app = TestApp::new();
        let (ada, ada_token) = app.user("Ada");
        let (bob, bob_token) = app.user("Bob");
        let (_, eve_token) = app.user("Eve");
        let space = app.state.spaces.create("general", &ada.id).unwrap();

        let (status, invite) = app
            .post_json("/api/invite/create", &ada_token, json!({"space_id": space.id, "email": bob.email}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invite["space_name"], "general");

        let (_, pending) = app.get("/api/invite/get", Some(&bob_token)).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let id = invite["id"].clone();
        let (status, _) = app.post_json("/api/invite/accept", &eve_token, json!({"id": id})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, joined) = app.post_json("/api/invite/accept", &bob_token, json!({"id": id})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["id"], space.id.as_str());
        assert!(app.state.spaces.is_member(&space.id, &bob.id).unwrap());

        let (_, pending) = app.get("/api/invite/get", Some(&bob_token)).await;
        assert!(pending.as_array().unwrap().is_empty());

        let (status, _) = app
            .post_json("/api/invite/create", &ada_token, json!({"space_id": space.id, "email": bob.email}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invite_reject_and_unknowns() {
        let app = TestApp::new();
        let (ada, ada_token) = app.user("Ada");
        let (bob, bob_token) = app.user("Bob");
        let space = app.state.spaces.create("general", &ada.id).unwrap();
        let invite = app.state.invites.create(&space.id, &space.name, &bob.email).unwrap();

        let (status, _) = app.post_json("/api/invite/reject", &bob_token, json!({"id": invite.id})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!app.state.spaces.is_member(&space.id, &bob.id).unwrap());

        let (status, _) = app
            .post_json("/api/invite/accept", &bob_token, json!({"id": InviteId::new()}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .post_json("/api/invite/create", &ada_token, json!({"space_id": space.id, "email": "ghost@example.com"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn token_for_deleted_user_is_unauthorized() {
        let app = TestApp::new();
        let token = app.state.auth.issue_token(&eligos_core::UserId::from_raw("usr_gone")).unwrap();
        assert_eq!(app.get("/api/user", Some(&token)).await.0, StatusCode::UNAUTHORIZED);
    }
}
