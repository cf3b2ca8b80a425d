use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use crate::AppContext;

pub mod events;
pub mod jobs;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .nest("/jobs", jobs::jobs_router(ctx.job_manager.clone()))
        .route("/events", get(events::events).with_state(ctx.job_manager.clone()))
}
