use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct Team {
    pub team_id: i64,
    pub team_name: String,
    pub team_color: String,
}

/// One persisted (team, catalog service) join row with its counters.
#[derive(Clone, Debug, FromRow, Serialize)]
pub struct TeamService {
    pub team_service_id: i64,
    pub service_id: i64,
    /// VM-qualified name, `<vm>_<kind>`.
    pub service_name: String,
    pub box_name: String,
    pub disabled: bool,
    pub points: i64,
    pub is_up: bool,
    pub total_checks: i64,
    pub successful_checks: i64,
}

impl TeamService {
    /// Splits the VM-qualified name into `(vm, kind)` at the first underscore.
    pub fn split_name(&self) -> Option<(&str, &str)> {
        self.service_name.split_once('_')
    }
}

#[derive(Clone, Debug, FromRow, Serialize)]
pub struct ServiceCheck {
    pub check_id: i64,
    pub team_service_id: i64,
    pub status: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate standings entry: one team with its summed points.
#[derive(Clone, Debug, FromRow, Serialize)]
pub struct TeamStanding {
    pub team_id: i64,
    pub team_name: String,
    pub team_color: String,
    pub points: i64,
}

/// Per-service score detail for one team.
#[derive(Clone, Debug, FromRow, Serialize)]
pub struct ServiceScore {
    pub service_name: String,
    pub box_name: String,
    pub points: i64,
    pub is_up: bool,
    pub total_checks: i64,
    pub successful_checks: i64,
}

/// One cell of the global (team, service) matrix.
#[derive(Clone, Debug, FromRow, Serialize)]
pub struct MatrixEntry {
    pub team_id: i64,
    pub team_name: String,
    pub team_color: String,
    pub service_name: String,
    pub box_name: String,
    pub points: i64,
    pub is_up: bool,
    pub total_checks: i64,
    pub successful_checks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_name_uses_first_underscore() {
        let row = TeamService {
            team_service_id: 1,
            service_id: 1,
            service_name: "web_ftp".to_owned(),
            box_name: "web".to_owned(),
            disabled: false,
            points: 0,
            is_up: false,
            total_checks: 0,
            successful_checks: 0,
        };
        assert_eq!(row.split_name(), Some(("web", "ftp")));
    }

    #[test]
    fn split_name_without_underscore_is_none() {
        let row = TeamService {
            team_service_id: 1,
            service_id: 1,
            service_name: "ftp".to_owned(),
            box_name: "web".to_owned(),
            disabled: false,
            points: 0,
            is_up: false,
            total_checks: 0,
            successful_checks: 0,
        };
        assert_eq!(row.split_name(), None);
    }
}
