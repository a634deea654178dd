//! Standings report artifact: a YAML document written beside the logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::TeamStanding;

pub const REPORT_FILE: &str = "report.yaml";

#[derive(Debug, Serialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub teams: Vec<ReportTeam>,
}

#[derive(Debug, Serialize)]
pub struct ReportTeam {
    pub id: i64,
    pub name: String,
    pub points: i64,
}

impl Report {
    /// Builds a report from current standings, ordered by total points
    /// descending.
    pub fn from_standings(standings: &[TeamStanding]) -> Self {
        let mut teams: Vec<ReportTeam> = standings
            .iter()
            .map(|s| ReportTeam {
                id: s.team_id,
                name: s.team_name.clone(),
                points: s.points,
            })
            .collect();
        teams.sort_by(|a, b| b.points.cmp(&a.points).then(a.id.cmp(&b.id)));

        Report {
            timestamp: Utc::now(),
            teams,
        }
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPORT_FILE);
        let yaml = serde_yaml::to_string(self).context("could not serialize report")?;
        fs::write(&path, yaml).with_context(|| format!("could not write {}", path.display()))?;
        Ok(path)
    }
}
