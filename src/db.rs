//! Store access. One `Db` handle wraps the SQLite pool; every probe outcome
//! goes through the atomic [`Db::commit_check`] transaction.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::{TeamConfig, VmConfig};
use crate::models::{MatrixEntry, ServiceCheck, ServiceScore, Team, TeamService, TeamStanding};

/// Retained history per service row.
pub const CHECK_HISTORY: i64 = 10;

#[derive(Clone, Debug)]
pub struct Db(SqlitePool);

impl Db {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url:?}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("could not open the scoring database")?;
        Ok(Db(pool))
    }

    /// Single-connection in-memory store, used by tests and dry runs.
    pub async fn memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("could not open the in-memory database")?;
        Ok(Db(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.0)
            .await
            .context("migration failed")
    }

    /// Inserts a team if absent; restarts and reloads are no-ops.
    pub async fn upsert_team(&self, team: &TeamConfig) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO teams (team_id, team_name, team_password, team_color)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(&team.password)
        .bind(&team.color)
        .execute(&self.0)
        .await
        .with_context(|| format!("could not insert team {}", team.name))?;
        Ok(())
    }

    /// Expansion step: one catalog row per `<vm>_<kind>` and one join row per
    /// (team, catalog service), both upsert-on-conflict so init is idempotent.
    pub async fn populate_team_services(
        &self,
        team_id: i64,
        vm_name: &str,
        vm: &VmConfig,
    ) -> Result<()> {
        for kind in vm.services.keys() {
            let service_name = format!("{vm_name}_{kind}");

            sqlx::query(
                "
                INSERT INTO services (service_name, box_name)
                VALUES (?, ?)
                ON CONFLICT (service_name, box_name) DO NOTHING
                ",
            )
            .bind(&service_name)
            .bind(vm_name)
            .execute(&self.0)
            .await
            .with_context(|| format!("could not insert service {service_name}"))?;

            let service_id: i64 = sqlx::query_scalar(
                "SELECT service_id FROM services WHERE service_name = ? AND box_name = ?",
            )
            .bind(&service_name)
            .bind(vm_name)
            .fetch_one(&self.0)
            .await
            .with_context(|| format!("could not look up service {service_name}"))?;

            sqlx::query(
                "
                INSERT INTO team_services (team_id, service_id, points, is_up)
                VALUES (?, ?, 0, 0)
                ON CONFLICT (team_id, service_id) DO NOTHING
                ",
            )
            .bind(team_id)
            .bind(service_id)
            .execute(&self.0)
            .await
            .with_context(|| {
                format!("could not link team {team_id} to service {service_name}")
            })?;
        }
        Ok(())
    }

    pub async fn all_teams(&self) -> Result<Vec<Team>> {
        sqlx::query_as("SELECT team_id, team_name, team_color FROM teams ORDER BY team_id")
            .fetch_all(&self.0)
            .await
            .context("could not list teams")
    }

    pub async fn team_by_name(&self, name: &str) -> Result<Option<Team>> {
        sqlx::query_as("SELECT team_id, team_name, team_color FROM teams WHERE team_name = ?")
            .bind(name)
            .fetch_optional(&self.0)
            .await
            .with_context(|| format!("could not look up team {name}"))
    }

    pub async fn create_team(&self, team: &TeamConfig) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO teams (team_id, team_name, team_password, team_color)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(&team.password)
        .bind(&team.color)
        .execute(&self.0)
        .await
        .with_context(|| format!("could not create team {}", team.name))?;
        Ok(())
    }

    pub async fn next_team_id(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(team_id) FROM teams")
            .fetch_one(&self.0)
            .await
            .context("could not allocate a team id")?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub async fn update_team_color(&self, team_id: i64, color: &str) -> Result<()> {
        sqlx::query("UPDATE teams SET team_color = ? WHERE team_id = ?")
            .bind(color)
            .bind(team_id)
            .execute(&self.0)
            .await
            .with_context(|| format!("could not recolor team {team_id}"))?;
        Ok(())
    }

    pub async fn update_team_password(&self, team_id: i64, password: &str) -> Result<()> {
        sqlx::query("UPDATE teams SET team_password = ? WHERE team_id = ?")
            .bind(password)
            .bind(team_id)
            .execute(&self.0)
            .await
            .with_context(|| format!("could not update password for team {team_id}"))?;
        Ok(())
    }

    pub async fn team_services(&self, team_id: i64) -> Result<Vec<TeamService>> {
        sqlx::query_as(
            "
            SELECT ts.team_service_id, ts.service_id, s.service_name, s.box_name, s.disabled,
                   ts.points, ts.is_up, ts.total_checks, ts.successful_checks
            FROM team_services ts
            JOIN services s ON s.service_id = ts.service_id
            WHERE ts.team_id = ?
            ORDER BY s.service_name
            ",
        )
        .bind(team_id)
        .fetch_all(&self.0)
        .await
        .with_context(|| format!("could not list services for team {team_id}"))
    }

    /// Commits one probe outcome: counter update, check-record insert and
    /// history trim in a single transaction. Readers never observe a counter
    /// bump without its check record.
    pub async fn commit_check(&self, team_service_id: i64, award: i64, status: bool) -> Result<()> {
        let delta = if status { award } else { 0 };
        let mut tx = self.0.begin().await.context("could not begin transaction")?;

        sqlx::query(
            "
            UPDATE team_services
            SET points = points + ?,
                is_up = ?,
                total_checks = total_checks + 1,
                successful_checks = successful_checks + ?
            WHERE team_service_id = ?
            ",
        )
        .bind(delta)
        .bind(status)
        .bind(i64::from(status))
        .bind(team_service_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("could not update counters for row {team_service_id}"))?;

        sqlx::query(
            "INSERT INTO service_checks (team_service_id, status, timestamp) VALUES (?, ?, ?)",
        )
        .bind(team_service_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("could not record check for row {team_service_id}"))?;

        sqlx::query(
            "
            DELETE FROM service_checks
            WHERE team_service_id = ?1
              AND check_id NOT IN (
                  SELECT check_id FROM service_checks
                  WHERE team_service_id = ?1
                  ORDER BY timestamp DESC, check_id DESC
                  LIMIT ?2
              )
            ",
        )
        .bind(team_service_id)
        .bind(CHECK_HISTORY)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("could not trim history for row {team_service_id}"))?;

        tx.commit().await.context("could not commit check")
    }

    pub async fn standings(&self) -> Result<Vec<TeamStanding>> {
        sqlx::query_as(
            "
            SELECT t.team_id, t.team_name, t.team_color,
                   COALESCE(SUM(ts.points), 0) AS points
            FROM teams t
            LEFT JOIN team_services ts ON ts.team_id = t.team_id
            GROUP BY t.team_id, t.team_name, t.team_color
            ORDER BY points DESC, t.team_id
            ",
        )
        .fetch_all(&self.0)
        .await
        .context("could not compute standings")
    }

    pub async fn team_total(&self, team_id: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0) FROM team_services WHERE team_id = ?",
        )
        .bind(team_id)
        .fetch_one(&self.0)
        .await
        .with_context(|| format!("could not total team {team_id}"))
    }

    pub async fn team_score_breakdown(&self, team_id: i64) -> Result<Vec<ServiceScore>> {
        sqlx::query_as(
            "
            SELECT s.service_name, s.box_name, ts.points, ts.is_up,
                   ts.total_checks, ts.successful_checks
            FROM team_services ts
            JOIN services s ON s.service_id = ts.service_id
            WHERE ts.team_id = ?
            ORDER BY s.service_name
            ",
        )
        .bind(team_id)
        .fetch_all(&self.0)
        .await
        .with_context(|| format!("could not break down scores for team {team_id}"))
    }

    pub async fn score_matrix(&self) -> Result<Vec<MatrixEntry>> {
        sqlx::query_as(
            "
            SELECT t.team_id, t.team_name, t.team_color, s.service_name, s.box_name,
                   ts.points, ts.is_up, ts.total_checks, ts.successful_checks
            FROM team_services ts
            JOIN teams t ON t.team_id = ts.team_id
            JOIN services s ON s.service_id = ts.service_id
            ORDER BY t.team_id, s.service_name
            ",
        )
        .fetch_all(&self.0)
        .await
        .context("could not build the score matrix")
    }

    pub async fn recent_checks(&self, team_service_id: i64, limit: i64) -> Result<Vec<ServiceCheck>> {
        sqlx::query_as(
            "
            SELECT check_id, team_service_id, status, timestamp
            FROM service_checks
            WHERE team_service_id = ?
            ORDER BY timestamp DESC, check_id DESC
            LIMIT ?
            ",
        )
        .bind(team_service_id)
        .bind(limit)
        .fetch_all(&self.0)
        .await
        .with_context(|| format!("could not read history for row {team_service_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use std::collections::HashMap;

    fn team(id: i64, name: &str) -> TeamConfig {
        TeamConfig {
            id,
            name: name.to_owned(),
            password: "pw".to_owned(),
            color: "#336699".to_owned(),
        }
    }

    fn vm_with(kinds: &[&str]) -> VmConfig {
        let services = kinds
            .iter()
            .map(|kind| {
                (
                    (*kind).to_owned(),
                    ServiceConfig {
                        port: 21,
                        user: None,
                        password: None,
                        query_file: None,
                        query_dir: None,
                        award: 1,
                        partial: false,
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        VmConfig {
            ip_schema: "10.20.T.5".to_owned(),
            services,
        }
    }

    async fn seeded_db() -> (Db, i64) {
        let db = Db::memory().await.unwrap();
        db.migrate().await.unwrap();
        db.upsert_team(&team(1, "Alpha")).await.unwrap();
        db.populate_team_services(1, "web", &vm_with(&["ftp", "web80"]))
            .await
            .unwrap();
        let rows = db.team_services(1).await.unwrap();
        (db, rows[0].team_service_id)
    }

    #[tokio::test]
    async fn expansion_is_idempotent() {
        let (db, _) = seeded_db().await;
        let before = db.team_services(1).await.unwrap();

        db.upsert_team(&team(1, "Alpha")).await.unwrap();
        db.populate_team_services(1, "web", &vm_with(&["ftp", "web80"]))
            .await
            .unwrap();

        let after = db.team_services(1).await.unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.team_service_id, a.team_service_id);
            assert_eq!(b.points, a.points);
            assert_eq!(b.total_checks, a.total_checks);
        }
    }

    #[tokio::test]
    async fn expansion_uses_vm_qualified_names() {
        let (db, _) = seeded_db().await;
        let names: Vec<String> = db
            .team_services(1)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.service_name)
            .collect();
        assert_eq!(names, vec!["web_ftp".to_owned(), "web_web80".to_owned()]);
    }

    #[tokio::test]
    async fn successful_check_awards_points() {
        let (db, row) = seeded_db().await;
        db.commit_check(row, 3, true).await.unwrap();

        let rows = db.team_services(1).await.unwrap();
        let updated = rows.iter().find(|r| r.team_service_id == row).unwrap();
        assert_eq!(updated.points, 3);
        assert!(updated.is_up);
        assert_eq!(updated.total_checks, 1);
        assert_eq!(updated.successful_checks, 1);
    }

    #[tokio::test]
    async fn failed_check_awards_nothing() {
        let (db, row) = seeded_db().await;
        db.commit_check(row, 3, true).await.unwrap();
        db.commit_check(row, 3, false).await.unwrap();

        let rows = db.team_services(1).await.unwrap();
        let updated = rows.iter().find(|r| r.team_service_id == row).unwrap();
        assert_eq!(updated.points, 3);
        assert!(!updated.is_up);
        assert_eq!(updated.total_checks, 2);
        assert_eq!(updated.successful_checks, 1);
    }

    #[tokio::test]
    async fn counters_never_regress_past_totals() {
        let (db, row) = seeded_db().await;
        for i in 0..7 {
            db.commit_check(row, 1, i % 2 == 0).await.unwrap();
            let rows = db.team_services(1).await.unwrap();
            let r = rows.iter().find(|r| r.team_service_id == row).unwrap();
            assert!(r.successful_checks <= r.total_checks);
            assert!(r.points >= 0);
        }
    }

    #[tokio::test]
    async fn history_ring_keeps_ten_most_recent() {
        let (db, row) = seeded_db().await;
        for n in 1..=12 {
            db.commit_check(row, 1, true).await.unwrap();
            let checks = db.recent_checks(row, 20).await.unwrap();
            assert_eq!(checks.len(), std::cmp::min(n, 10));
        }

        let checks = db.recent_checks(row, 20).await.unwrap();
        let min_id = checks.iter().map(|c| c.check_id).min().unwrap();
        assert_eq!(min_id, 3, "the two oldest records should be trimmed");
    }

    #[tokio::test]
    async fn standings_order_by_points_descending() {
        let (db, _) = seeded_db().await;
        db.upsert_team(&team(2, "Bravo")).await.unwrap();
        db.populate_team_services(2, "web", &vm_with(&["ftp", "web80"]))
            .await
            .unwrap();

        let bravo_rows = db.team_services(2).await.unwrap();
        db.commit_check(bravo_rows[0].team_service_id, 5, true)
            .await
            .unwrap();

        let standings = db.standings().await.unwrap();
        assert_eq!(standings[0].team_name, "Bravo");
        assert_eq!(standings[0].points, 5);
        assert_eq!(standings[1].team_name, "Alpha");
        assert_eq!(standings[1].points, 0);
    }

    #[tokio::test]
    async fn matrix_joins_names_and_colors() {
        let (db, row) = seeded_db().await;
        db.commit_check(row, 2, true).await.unwrap();

        let matrix = db.score_matrix().await.unwrap();
        assert_eq!(matrix.len(), 2);
        assert!(matrix.iter().all(|m| m.team_name == "Alpha"));
        assert!(matrix.iter().all(|m| m.team_color == "#336699"));
        assert_eq!(matrix.iter().map(|m| m.points).sum::<i64>(), 2);
    }

    #[tokio::test]
    async fn next_team_id_advances() {
        let (db, _) = seeded_db().await;
        assert_eq!(db.next_team_id().await.unwrap(), 2);
    }
}
