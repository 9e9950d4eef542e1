use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};
use tower_http::trace::TraceLayer;

use crate::{
    middleware::{enforce_program_scope, require_auth},
    state::AppState,
};

pub mod auth;
pub mod evaluations;
pub mod health;
pub mod hierarchy;
pub mod notifications;
pub mod programs;
pub mod questionnaires;
pub mod roles;
pub mod settings;
pub mod users;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .merge(health::router())
        .merge(auth::public_router())
        .merge(evaluations::public_router());

    // program scope reads the user that require_auth inserts, so it sits inside it
    let protected = Router::new()
        .merge(auth::router())
        .merge(programs::router())
        .merge(roles::router())
        .merge(users::router())
        .merge(hierarchy::router(&state))
        .merge(evaluations::router())
        .merge(questionnaires::router())
        .merge(notifications::router())
        .merge(settings::router())
        .layer(from_fn(enforce_program_scope))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", public.merge(protected))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
