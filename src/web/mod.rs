//! Read-only JSON API over the store, for scoreboards and dashboards.

mod scores;

use std::net::SocketAddr;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::db::Db;

pub fn router(db: Db) -> Router {
    Router::new()
        .route("/api/teams", get(scores::list_teams))
        .route("/api/teams/scores", get(scores::score_matrix))
        .route("/api/teams/:team_id/scores", get(scores::team_scores))
        .route("/api/teams/:team_id/total", get(scores::team_total))
        .with_state(db)
}

pub async fn serve(db: Db, bind: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "read api listening");
    axum::serve(listener, router(db)).await?;
    Ok(())
}
