//! SSH probe: TCP dial, handshake, password auth and a session open/close.
//! Host keys are deliberately not verified; competitors reimage machines.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use ssh2::Session;

use super::{choose_user, run_blocking, Outcome, ProbeContext, ProbeError, SSH_TIMEOUT};
use crate::config::ServiceConfig;

pub(super) async fn login(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let (user, pass) = choose_user(&ctx, &svc)?;
    run_blocking(SSH_TIMEOUT, move || {
        let target: SocketAddr = format!("{addr}:{}", svc.port)
            .parse()
            .map_err(|_| ProbeError::Unreachable(format!("invalid target {addr}:{}", svc.port)))?;
        let tcp = TcpStream::connect_timeout(&target, SSH_TIMEOUT)
            .map_err(|err| ProbeError::Unreachable(err.to_string()))?;

        let mut session =
            Session::new().map_err(|err| ProbeError::Login(err.to_string()))?;
        session.set_timeout(SSH_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| ProbeError::Login(format!("handshake failed: {err}")))?;
        session
            .userauth_password(&user, &pass)
            .map_err(|err| ProbeError::Login(format!("auth failed for {user}: {err}")))?;

        let mut channel = session
            .channel_session()
            .map_err(|err| ProbeError::Login(format!("session open failed: {err}")))?;
        channel.close().ok();

        Ok(Outcome {
            award: svc.award,
            up: true,
        })
    })
    .await
}
