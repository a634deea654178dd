use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::db::Db;
use crate::models::{MatrixEntry, ServiceScore, Team};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub(super) async fn list_teams(State(db): State<Db>) -> ApiResult<Vec<Team>> {
    db.all_teams().await.map(Json).map_err(internal)
}

pub(super) async fn score_matrix(State(db): State<Db>) -> ApiResult<Vec<MatrixEntry>> {
    db.score_matrix().await.map(Json).map_err(internal)
}

pub(super) async fn team_scores(
    State(db): State<Db>,
    Path(team_id): Path<i64>,
) -> ApiResult<Vec<ServiceScore>> {
    db.team_score_breakdown(team_id)
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Serialize)]
pub(super) struct TeamTotal {
    team_id: i64,
    points: i64,
}

pub(super) async fn team_total(
    State(db): State<Db>,
    Path(team_id): Path<i64>,
) -> ApiResult<TeamTotal> {
    db.team_total(team_id)
        .await
        .map(|points| Json(TeamTotal { team_id, points }))
        .map_err(internal)
}
