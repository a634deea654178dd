//! Credentialed database probe: connect, authenticate and run one random
//! statement from the pre-loaded schema file.

use std::sync::Arc;

use sqlx::mysql::MySqlConnectOptions;
use sqlx::ConnectOptions;

use super::{cache, choose_user, with_deadline, Outcome, ProbeContext, ProbeError, SQL_TIMEOUT};
use crate::config::ServiceConfig;

pub(super) async fn login(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let path = svc
        .query_file
        .as_ref()
        .ok_or(ProbeError::MissingField("query_file"))?;
    let statements = cache::sql_statements(path)?;
    let statement = ctx
        .pick(&statements)
        .ok_or_else(|| ProbeError::Sql("schema file has no statements".to_owned()))?
        .clone();
    let (user, pass) = choose_user(&ctx, &svc)?;

    with_deadline(SQL_TIMEOUT, async move {
        let options = MySqlConnectOptions::new()
            .host(&addr)
            .port(svc.port)
            .username(&user)
            .password(&pass);
        let mut conn = options
            .connect()
            .await
            .map_err(|err| ProbeError::Login(format!("database auth failed: {err}")))?;

        sqlx::query(&statement)
            .execute(&mut conn)
            .await
            .map_err(|err| ProbeError::Sql(format!("statement failed: {err}")))?;

        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}
