pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;

use crate::queue::CampaignScheduler;

pub use error::AppError;

pub struct AppState {
    pub db: DatabaseConnection,
    pub scheduler: Arc<CampaignScheduler>,
}

pub fn create_axum_router(db: DatabaseConnection, scheduler: Arc<CampaignScheduler>) -> Router {
    let app_state = Arc::new(AppState { db, scheduler });

    Router::new()
        .merge(routes::health_routes::health_router())
        .with_state(app_state)
}
