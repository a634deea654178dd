//! ICMP echo probe for the router. Requires a raw IPv4 socket, so the
//! scoring host runs the engine with CAP_NET_RAW or as root.

use std::net::IpAddr;
use std::sync::Arc;

use surge_ping::{Client, Config, IcmpPacket, PingIdentifier, PingSequence};

use super::{Outcome, ProbeContext, ProbeError, ROUTER_TIMEOUT};
use crate::config::ServiceConfig;

const ECHO_PAYLOAD: &[u8] = b"PING";

pub(super) async fn icmp_echo(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| ProbeError::Icmp(format!("invalid address {addr:?}")))?;

    let client =
        Client::new(&Config::default()).map_err(|err| ProbeError::Icmp(err.to_string()))?;
    let ident = PingIdentifier(std::process::id() as u16);
    let mut pinger = client.pinger(ip, ident).await;
    pinger.timeout(ROUTER_TIMEOUT);

    match pinger.ping(PingSequence(1), ECHO_PAYLOAD).await {
        Ok((IcmpPacket::V4(_), _rtt)) => Ok(Outcome {
            award: svc.award,
            up: true,
        }),
        Ok((packet, _)) => Err(ProbeError::Icmp(format!(
            "unexpected reply packet: {packet:?}"
        ))),
        Err(err) => Err(ProbeError::Icmp(err.to_string())),
    }
}
