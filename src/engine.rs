//! The scoring engine: lifecycle flags driven by the operator shell, the
//! periodic round loop, and the per-round fan-out over every non-disabled
//! (team, service) pair.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::future;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::addr;
use crate::config::{GameConfig, TeamConfig};
use crate::db::Db;
use crate::models::TeamService;
use crate::probes::{self, ProbeContext};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(15);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already paused")]
    AlreadyPaused,

    #[error("engine is not paused")]
    NotPaused,

    #[error("engine has been stopped and cannot be restarted")]
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineStatus::Running => "running",
            EngineStatus::Paused => "paused",
            EngineStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct EngineState {
    enabled: bool,
    paused: bool,
    killed: bool,
    iteration: u64,
    refresh: Duration,
}

/// A point-in-time view of the flags, for the operator shell.
#[derive(Clone, Copy, Debug)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub iteration: u64,
    pub refresh: Duration,
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<GameConfig>,
    db: Db,
    ctx: Arc<ProbeContext>,
    state: Arc<Mutex<EngineState>>,
    width: usize,
}

impl Engine {
    pub fn new(
        config: GameConfig,
        db: Db,
        ctx: Arc<ProbeContext>,
        refresh: Duration,
        width: usize,
    ) -> Self {
        Engine {
            config: Arc::new(config),
            db,
            ctx,
            state: Arc::new(Mutex::new(EngineState {
                enabled: false,
                paused: false,
                killed: false,
                iteration: 0,
                refresh,
            })),
            width,
        }
    }

    pub fn database(&self) -> Db {
        self.db.clone()
    }

    /// Expansion: materialize every (team, VM, service) triple into the
    /// store. Upserts throughout, so re-running after a restart or after
    /// teams were added between rounds is a no-op for existing rows.
    pub async fn init(&self) -> Result<()> {
        for team in self.config.teams.values() {
            self.db.upsert_team(team).await?;
            for (vm_name, vm) in &self.config.virtual_machines {
                self.db
                    .populate_team_services(team.id, vm_name, vm)
                    .await?;
            }
            info!(team = %team.name, "team loaded");
        }
        Ok(())
    }

    /// Adds a team at runtime and materializes its service rows; the next
    /// round picks it up.
    pub async fn enroll_team(&self, team: &TeamConfig) -> Result<()> {
        self.db.create_team(team).await?;
        for (vm_name, vm) in &self.config.virtual_machines {
            self.db
                .populate_team_services(team.id, vm_name, vm)
                .await?;
        }
        info!(team = %team.name, "team enrolled");
        Ok(())
    }

    // Operator transitions.

    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.killed {
            return Err(EngineError::Stopped);
        }
        if state.enabled {
            return Err(EngineError::AlreadyRunning);
        }
        state.enabled = true;
        state.paused = false;
        info!("engine started");
        Ok(())
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(EngineError::NotRunning);
        }
        if state.paused {
            return Err(EngineError::AlreadyPaused);
        }
        state.paused = true;
        info!("engine paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(EngineError::NotRunning);
        }
        if !state.paused {
            return Err(EngineError::NotPaused);
        }
        state.paused = false;
        info!("engine resumed");
        Ok(())
    }

    /// Terminal: the loop exits at its next wake and the engine cannot be
    /// restarted within this process.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return Err(EngineError::NotRunning);
        }
        state.enabled = false;
        state.paused = false;
        state.killed = true;
        info!("engine stopped");
        Ok(())
    }

    /// Process-teardown path: kills the loop unconditionally, bypassing the
    /// operator transition preconditions.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.enabled = false;
        state.paused = false;
        state.killed = true;
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock().unwrap();
        let status = if state.enabled {
            if state.paused {
                EngineStatus::Paused
            } else {
                EngineStatus::Running
            }
        } else {
            EngineStatus::Stopped
        };
        EngineSnapshot {
            status,
            iteration: state.iteration,
            refresh: state.refresh,
        }
    }

    /// The scheduler loop. Sleeps the refresh period between wakes; scores a
    /// round when enabled and not paused; exits once killed. Rounds never
    /// overlap: each runs to completion before the next sleep.
    pub async fn run(&self) -> Result<()> {
        loop {
            let refresh = self.state.lock().unwrap().refresh;
            sleep(refresh).await;

            let (score, killed) = {
                let state = self.state.lock().unwrap();
                (state.enabled && !state.paused, state.killed)
            };
            if killed {
                info!("scoring loop exiting");
                return Ok(());
            }
            if !score {
                continue;
            }

            let iteration = {
                let mut state = self.state.lock().unwrap();
                state.iteration += 1;
                state.iteration
            };
            info!(iteration, "scoring round started");
            match self.round().await {
                Ok(()) => info!(iteration, "scoring round finished"),
                Err(err) => error!(iteration, error = %err, "scoring round failed"),
            }
        }
    }

    /// One scoring round: probe every non-disabled (team, service) pair and
    /// commit each outcome. Probes across pairs run in parallel, bounded by
    /// the probe width.
    pub async fn round(&self) -> Result<()> {
        let teams = self.db.all_teams().await?;
        let limiter = Arc::new(Semaphore::new(self.width));
        let mut probes = Vec::new();

        for team in teams {
            let rows = match self.db.team_services(team.team_id).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!(team = team.team_id, error = %err, "could not read team services");
                    continue;
                }
            };

            for row in rows {
                if row.disabled {
                    continue;
                }
                let engine = self.clone();
                let limiter = limiter.clone();
                let team_id = team.team_id;
                probes.push(async move {
                    let _permit = match limiter.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    engine.score_row(team_id, row).await;
                });
            }
        }

        future::join_all(probes).await;
        Ok(())
    }

    /// Scores a single service row and commits the outcome. Skips (without
    /// committing) rows whose configuration has drifted out from under the
    /// store; commits `is_up = false` for ordinary probe failures.
    async fn score_row(&self, team_id: i64, row: TeamService) {
        let Some((vm_name, kind)) = row.split_name() else {
            warn!(team = team_id, service = %row.service_name, "malformed service name");
            return;
        };

        let Some(vm) = self.config.vm(vm_name) else {
            warn!(team = team_id, vm = vm_name, "no configuration for vm");
            return;
        };
        let Some(svc) = vm.services.get(kind) else {
            warn!(team = team_id, vm = vm_name, kind, "no configuration for service");
            return;
        };

        let address = match addr::resolve(&vm.ip_schema, team_id) {
            Ok(address) => address,
            Err(err) => {
                warn!(team = team_id, vm = vm_name, error = %err, "could not resolve address");
                return;
            }
        };

        let Some(probe) = probes::dispatch(kind) else {
            warn!(team = team_id, kind, "unknown service kind at scoring time");
            return;
        };

        let (award, status) = match probe(self.ctx.clone(), svc.clone(), address).await {
            Ok(outcome) => (outcome.award, outcome.up),
            Err(err) => {
                debug!(team = team_id, service = %row.service_name, error = %err, "probe failed");
                (0, false)
            }
        };

        if let Err(err) = self
            .db
            .commit_check(row.team_service_id, award, status)
            .await
        {
            error!(team = team_id, service = %row.service_name, error = %err, "could not commit check");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, TeamConfig, VmConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn test_config() -> GameConfig {
        let mut services = HashMap::new();
        services.insert(
            "ftp".to_owned(),
            ServiceConfig {
                port: 9,
                user: None,
                password: None,
                query_file: None,
                query_dir: None,
                award: 2,
                partial: false,
            },
        );
        let mut vms = HashMap::new();
        vms.insert(
            "web".to_owned(),
            VmConfig {
                // loopback, no team token: probes dial the local host
                ip_schema: "127.0.0.1".to_owned(),
                services,
            },
        );
        let mut teams = HashMap::new();
        teams.insert(
            "alpha".to_owned(),
            TeamConfig {
                id: 1,
                name: "Alpha".to_owned(),
                password: "pw".to_owned(),
                color: "#ff0000".to_owned(),
            },
        );
        GameConfig {
            virtual_machines: vms,
            official_virtual_machines: HashMap::new(),
            teams,
        }
    }

    async fn test_engine(refresh: Duration) -> Engine {
        let db = Db::memory().await.unwrap();
        db.migrate().await.unwrap();
        let ctx = Arc::new(ProbeContext::new(StdRng::seed_from_u64(1)));
        Engine::new(test_config(), db, ctx, refresh, 4)
    }

    #[tokio::test]
    async fn lifecycle_transitions_follow_the_contract() {
        let engine = test_engine(DEFAULT_REFRESH).await;
        assert_eq!(engine.snapshot().status, EngineStatus::Stopped);

        engine.start().unwrap();
        assert_eq!(engine.snapshot().status, EngineStatus::Running);
        assert_eq!(engine.start().unwrap_err(), EngineError::AlreadyRunning);

        engine.pause().unwrap();
        assert_eq!(engine.snapshot().status, EngineStatus::Paused);
        assert_eq!(engine.pause().unwrap_err(), EngineError::AlreadyPaused);

        engine.resume().unwrap();
        assert_eq!(engine.snapshot().status, EngineStatus::Running);
        assert_eq!(engine.resume().unwrap_err(), EngineError::NotPaused);

        engine.stop().unwrap();
        assert_eq!(engine.snapshot().status, EngineStatus::Stopped);
        assert_eq!(engine.start().unwrap_err(), EngineError::Stopped);
    }

    #[tokio::test]
    async fn pause_requires_a_running_engine() {
        let engine = test_engine(DEFAULT_REFRESH).await;
        assert_eq!(engine.pause().unwrap_err(), EngineError::NotRunning);
        assert_eq!(engine.resume().unwrap_err(), EngineError::NotRunning);
        assert_eq!(engine.stop().unwrap_err(), EngineError::NotRunning);
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let engine = test_engine(DEFAULT_REFRESH).await;
        engine.init().await.unwrap();
        engine.init().await.unwrap();

        let rows = engine.database().team_services(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_name, "web_ftp");
        assert_eq!(rows[0].total_checks, 0);
    }

    #[tokio::test]
    async fn enrolled_team_gets_service_rows() {
        let engine = test_engine(DEFAULT_REFRESH).await;
        engine.init().await.unwrap();
        engine
            .enroll_team(&TeamConfig {
                id: 2,
                name: "Bravo".to_owned(),
                password: "pw".to_owned(),
                color: "#0000ff".to_owned(),
            })
            .await
            .unwrap();

        let rows = engine.database().team_services(2).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service_name, "web_ftp");
    }

    #[tokio::test]
    async fn round_commits_a_negative_outcome_for_unreachable_services() {
        let engine = test_engine(DEFAULT_REFRESH).await;
        engine.init().await.unwrap();
        engine.round().await.unwrap();

        let rows = engine.database().team_services(1).await.unwrap();
        assert_eq!(rows[0].total_checks, 1);
        assert_eq!(rows[0].successful_checks, 0);
        assert_eq!(rows[0].points, 0);
        assert!(!rows[0].is_up);

        let checks = engine
            .database()
            .recent_checks(rows[0].team_service_id, 20)
            .await
            .unwrap();
        assert_eq!(checks.len(), 1);
        assert!(!checks[0].status);
    }

    #[tokio::test]
    async fn loop_exits_after_stop() {
        let engine = test_engine(Duration::from_millis(20)).await;
        engine.init().await.unwrap();
        engine.start().unwrap();
        engine.stop().unwrap();

        let runner = engine.clone();
        tokio::time::timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("loop should exit promptly once killed")
            .unwrap();
    }

    #[tokio::test]
    async fn paused_engine_does_not_score() {
        let engine = test_engine(Duration::from_millis(20)).await;
        engine.init().await.unwrap();
        engine.start().unwrap();
        engine.pause().unwrap();

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(engine.snapshot().iteration, 0);
        let rows = engine.database().team_services(1).await.unwrap();
        assert_eq!(rows[0].total_checks, 0);
    }
}
