use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    response::Redirect,
    routing::{get, post},
};

/// Routes live under the deployment's base path, e.g. `/app/des_export/`.
pub fn router(state: AppState) -> Router {
    let base = state.base_path.to_string();
    let bare = base.trim_end_matches('/').to_string();

    let mut router = Router::new()
        .route(&base, get(handlers::index))
        .route(&format!("{base}_update"), post(handlers::update))
        .route(&format!("{base}_status"), get(handlers::data_status))
        .route("/healthz", get(handlers::healthz));
    if !bare.is_empty() {
        let target = base.clone();
        router = router.route(&bare, get(move || async move { Redirect::to(&target) }));
    }
    router.with_state(state)
}
