//! FTP probes: liveness, credentialed login and payload round-trips.
//! The blocking client runs off the runtime; the deadline covers dial,
//! login and transfer together.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use suppaftp::FtpStream;

use super::{cache, choose_user, run_blocking, Outcome, ProbeContext, ProbeError, FTP_TIMEOUT};
use crate::config::ServiceConfig;

fn dial(addr: &str, port: u16) -> Result<FtpStream, ProbeError> {
    let target: SocketAddr = format!("{addr}:{port}")
        .parse()
        .map_err(|_| ProbeError::Unreachable(format!("invalid target {addr}:{port}")))?;
    let stream = FtpStream::connect_timeout(target, FTP_TIMEOUT)
        .map_err(|err| ProbeError::Unreachable(err.to_string()))?;
    stream
        .get_ref()
        .set_read_timeout(Some(FTP_TIMEOUT))
        .map_err(|err| ProbeError::Unreachable(err.to_string()))?;
    Ok(stream)
}

fn quit(mut conn: FtpStream) -> Result<(), ProbeError> {
    conn.quit()
        .map_err(|err| ProbeError::Transfer(format!("quit failed: {err}")))
}

/// `ftp`: dial and quit cleanly.
pub(super) async fn liveness(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    run_blocking(FTP_TIMEOUT, move || {
        let conn = dial(&addr, svc.port)?;
        quit(conn)?;
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

/// `ftplogin`: dial, authenticate, quit.
pub(super) async fn login(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let (user, pass) = choose_user(&ctx, &svc)?;
    run_blocking(FTP_TIMEOUT, move || {
        let mut conn = dial(&addr, svc.port)?;
        conn.login(&user, &pass)
            .map_err(|err| ProbeError::Login(err.to_string()))?;
        quit(conn)?;
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

/// `ftpread`: retrieve a random payload and compare byte-exact against the
/// in-memory copy.
pub(super) async fn read(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let (name, expected) = pick_payload(&ctx, &svc)?;
    let (user, pass) = choose_user(&ctx, &svc)?;
    run_blocking(FTP_TIMEOUT, move || {
        let mut conn = dial(&addr, svc.port)?;
        conn.login(&user, &pass)
            .map_err(|err| ProbeError::Login(err.to_string()))?;
        let served = conn
            .retr_as_buffer(&name)
            .map_err(|err| ProbeError::Transfer(format!("retr {name} failed: {err}")))?
            .into_inner();
        quit(conn)?;

        if served != expected {
            return Err(ProbeError::ContentMismatch(format!(
                "{name}: served {} bytes differ from expected {}",
                served.len(),
                expected.len()
            )));
        }
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

/// `ftpwrite`: store (overwrite) a random payload on the server.
pub(super) async fn write(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let (name, payload) = pick_payload(&ctx, &svc)?;
    let (user, pass) = choose_user(&ctx, &svc)?;
    run_blocking(FTP_TIMEOUT, move || {
        let mut conn = dial(&addr, svc.port)?;
        conn.login(&user, &pass)
            .map_err(|err| ProbeError::Login(err.to_string()))?;
        conn.put_file(&name, &mut Cursor::new(payload))
            .map_err(|err| ProbeError::Transfer(format!("stor {name} failed: {err}")))?;
        quit(conn)?;
        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}

fn pick_payload(
    ctx: &ProbeContext,
    svc: &ServiceConfig,
) -> Result<(String, Vec<u8>), ProbeError> {
    let dir = svc
        .query_dir
        .as_ref()
        .ok_or(ProbeError::MissingField("query_dir"))?;
    let files = cache::payloads(dir)?;
    let mut names: Vec<&String> = files.keys().collect();
    names.sort();
    let name = ctx
        .pick(&names)
        .ok_or_else(|| ProbeError::Transfer("no payload files loaded".to_owned()))?;
    Ok(((*name).clone(), files[*name].clone()))
}
