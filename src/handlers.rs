use crate::errors::AppError;
use crate::models::{StatusEntry, UpdateRequest, UpdateResponse};
use crate::state::AppState;
use crate::status;
use crate::ui::render_page;
use axum::{Json, extract::State, response::Html};
use chrono::Utc;
use std::sync::Arc;

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let event = state.graph.initial_event(state.layout.defaults());
    let initial = state.graph.dispatch(&event, Arc::clone(&state.dashboard)).await;
    Html(render_page(&state.layout, &state.base_path, &initial))
}

pub async fn update(
    State(state): State<AppState>,
    Json(payload): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, AppError> {
    let event = state.graph.event(payload.inputs, payload.changed)?;
    let response = state.graph.dispatch(&event, Arc::clone(&state.dashboard)).await;
    Ok(Json(response))
}

pub async fn data_status(State(state): State<AppState>) -> Json<Vec<StatusEntry>> {
    let plotter = &state.dashboard.plotter;
    Json(status::check(plotter, &state.status, Utc::now()).await)
}

pub async fn healthz() -> &'static str {
    "ok"
}
