//! The probe library. Every service kind maps to one bounded-time probe
//! function taking `(service config, resolved address)` and returning the
//! award and up/down verdict. Probes never touch the store; the engine
//! commits outcomes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::ServiceConfig;

pub mod cache;
mod dns;
mod ftp;
mod router;
mod sql;
mod ssh;
mod web;

pub use cache::CacheError;

// Per-kind deadlines, milliseconds.
pub(crate) const FTP_TIMEOUT: Duration = Duration::from_millis(250);
pub(crate) const SSH_TIMEOUT: Duration = Duration::from_millis(250);
pub(crate) const SQL_TIMEOUT: Duration = Duration::from_millis(250);
pub(crate) const ROUTER_TIMEOUT: Duration = Duration::from_millis(750);
pub(crate) const DNS_TIMEOUT: Duration = Duration::from_millis(500);
pub(crate) const WEB_TIMEOUT: Duration = Duration::from_millis(1_500);
pub(crate) const WEB_CONTENT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// What a probe hands back on success: the points to add and the up verdict.
/// `up` implies the full award; the engine commits zero on any failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub award: i64,
    pub up: bool,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("content mismatch: {0}")]
    ContentMismatch(String),

    #[error("http: {0}")]
    Http(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("dns: {0}")]
    Dns(String),

    #[error("icmp: {0}")]
    Icmp(String),

    #[error("sql: {0}")]
    Sql(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("service config is missing {0}")]
    MissingField(&'static str),

    #[error("probe task failed: {0}")]
    Task(String),
}

/// Shared collaborator state threaded through every probe: the process-wide
/// random source. Tests inject a fixed seed for determinism.
pub struct ProbeContext {
    rng: Mutex<StdRng>,
}

impl ProbeContext {
    pub fn new(rng: StdRng) -> Self {
        ProbeContext {
            rng: Mutex::new(rng),
        }
    }

    /// Seeded once at process start.
    pub fn seeded() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub(crate) fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let index = self.rng.lock().unwrap().gen_range(0..items.len());
        items.get(index)
    }
}

/// Resolves the credential pair for a login probe: the single configured
/// user, or a random line from the credentials file.
pub(crate) fn choose_user(
    ctx: &ProbeContext,
    svc: &ServiceConfig,
) -> Result<(String, String), ProbeError> {
    if let Some(user) = &svc.user {
        return Ok((user.clone(), svc.password.clone().unwrap_or_default()));
    }
    let path = svc
        .query_file
        .as_ref()
        .ok_or(ProbeError::MissingField("query_file"))?;
    let pairs = cache::credentials(path)?;
    let (user, pass) = ctx
        .pick(&pairs)
        .ok_or_else(|| ProbeError::Login("credentials file has no usable lines".to_owned()))?;
    Ok((user.clone(), pass.clone()))
}

/// Runs a blocking protocol exchange off the runtime under a deadline.
pub(crate) async fn run_blocking<T, F>(limit: Duration, work: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Err(_) => Err(ProbeError::Timeout(limit)),
        Ok(Err(join)) => Err(ProbeError::Task(join.to_string())),
        Ok(Ok(result)) => result,
    }
}

/// Runs an async probe body under a deadline.
pub(crate) async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Err(_) => Err(ProbeError::Timeout(limit)),
        Ok(result) => result,
    }
}

pub type ProbeFuture = BoxFuture<'static, Result<Outcome, ProbeError>>;
pub type ProbeFn = fn(Arc<ProbeContext>, ServiceConfig, String) -> ProbeFuture;

/// The dispatch table. Adding a service kind means adding one entry here and
/// one probe implementation; configuration validation rejects anything else.
static DISPATCH: LazyLock<HashMap<&'static str, ProbeFn>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, ProbeFn> = HashMap::new();
    table.insert("ftp", |ctx, svc, addr| Box::pin(ftp::liveness(ctx, svc, addr)));
    table.insert("ftplogin", |ctx, svc, addr| Box::pin(ftp::login(ctx, svc, addr)));
    table.insert("ftpread", |ctx, svc, addr| Box::pin(ftp::read(ctx, svc, addr)));
    table.insert("ftpwrite", |ctx, svc, addr| Box::pin(ftp::write(ctx, svc, addr)));
    table.insert("ssh", |ctx, svc, addr| Box::pin(ssh::login(ctx, svc, addr)));
    table.insert("web80", |ctx, svc, addr| Box::pin(web::http_head(ctx, svc, addr)));
    table.insert("webssl", |ctx, svc, addr| Box::pin(web::https_head(ctx, svc, addr)));
    table.insert("webcontent", |ctx, svc, addr| {
        Box::pin(web::content(ctx, svc, addr))
    });
    table.insert("routericmp", |ctx, svc, addr| {
        Box::pin(router::icmp_echo(ctx, svc, addr))
    });
    table.insert("dnsexternalfwd", |ctx, svc, addr| {
        Box::pin(dns::external_forward(ctx, svc, addr))
    });
    table.insert("dnsexternalrev", |ctx, svc, addr| {
        Box::pin(dns::external_reverse(ctx, svc, addr))
    });
    table.insert("dnsinternalfwd", |ctx, svc, addr| {
        Box::pin(dns::internal_forward(ctx, svc, addr))
    });
    table.insert("dnsinternalrev", |ctx, svc, addr| {
        Box::pin(dns::internal_reverse(ctx, svc, addr))
    });
    table.insert("db", |ctx, svc, addr| Box::pin(sql::login(ctx, svc, addr)));
    table
});

pub fn known_kind(kind: &str) -> bool {
    DISPATCH.contains_key(kind)
}

pub fn dispatch(kind: &str) -> Option<ProbeFn> {
    DISPATCH.get(kind).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn svc() -> ServiceConfig {
        ServiceConfig {
            port: 21,
            user: None,
            password: None,
            query_file: None,
            query_dir: None,
            award: 1,
            partial: false,
        }
    }

    #[test]
    fn dispatch_covers_every_documented_kind() {
        for kind in [
            "ftp",
            "ftplogin",
            "ftpread",
            "ftpwrite",
            "ssh",
            "web80",
            "webssl",
            "webcontent",
            "routericmp",
            "dnsexternalfwd",
            "dnsexternalrev",
            "dnsinternalfwd",
            "dnsinternalrev",
            "db",
        ] {
            assert!(known_kind(kind), "missing dispatch entry for {kind}");
        }
    }

    #[test]
    fn unknown_kind_is_not_dispatched() {
        assert!(!known_kind("gopher"));
        assert!(dispatch("gopher").is_none());
    }

    #[test]
    fn single_credential_wins_over_file() {
        let ctx = ProbeContext::new(StdRng::seed_from_u64(7));
        let mut config = svc();
        config.user = Some("admin".to_owned());
        config.password = Some("hunter2".to_owned());
        config.query_file = Some(PathBuf::from("/nonexistent"));

        let (user, pass) = choose_user(&ctx, &config).unwrap();
        assert_eq!(user, "admin");
        assert_eq!(pass, "hunter2");
    }

    #[test]
    fn missing_credential_source_is_an_error() {
        let ctx = ProbeContext::new(StdRng::seed_from_u64(7));
        assert!(matches!(
            choose_user(&ctx, &svc()).unwrap_err(),
            ProbeError::MissingField("query_file")
        ));
    }

    #[test]
    fn pick_is_uniform_over_the_slice() {
        let ctx = ProbeContext::new(StdRng::seed_from_u64(42));
        let items = [1, 2, 3, 4];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(*ctx.pick(&items).unwrap());
        }
        assert_eq!(seen.len(), items.len());
    }

    #[test]
    fn pick_on_empty_slice_is_none() {
        let ctx = ProbeContext::new(StdRng::seed_from_u64(42));
        let items: [u8; 0] = [];
        assert!(ctx.pick(&items).is_none());
    }
}
