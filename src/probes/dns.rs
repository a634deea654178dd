//! DNS probes. Each non-blank query-file line holds four fields:
//! `ext-ip ext-domain int-ip int-domain`, with `<t>` expanding to the team
//! number derived from the resolver address itself (last octet for the
//! external kinds, third octet for the internal ones).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use super::{Outcome, ProbeContext, ProbeError, DNS_TIMEOUT};
use crate::config::ServiceConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Zone {
    /// Fields 1 and 2; team number from the resolver's last octet.
    External,
    /// Fields 3 and 4; team number from the resolver's third octet.
    Internal,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Forward,
    Reverse,
}

pub(super) async fn external_forward(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    check_zone(ctx, svc, addr, Zone::External, Direction::Forward).await
}

pub(super) async fn external_reverse(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    check_zone(ctx, svc, addr, Zone::External, Direction::Reverse).await
}

pub(super) async fn internal_forward(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    check_zone(ctx, svc, addr, Zone::Internal, Direction::Forward).await
}

pub(super) async fn internal_reverse(
    ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
) -> Result<Outcome, ProbeError> {
    check_zone(ctx, svc, addr, Zone::Internal, Direction::Reverse).await
}

async fn check_zone(
    _ctx: Arc<ProbeContext>,
    svc: ServiceConfig,
    addr: String,
    zone: Zone,
    direction: Direction,
) -> Result<Outcome, ProbeError> {
    let team = team_octet(&addr, zone)?;
    let path = svc
        .query_file
        .as_ref()
        .ok_or(ProbeError::MissingField("query_file"))?;
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ProbeError::Dns(format!("failed to read query file: {err}")))?;

    let resolver = resolver(&addr, svc.port)?;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ProbeError::Dns(format!("invalid query file line: {line:?}")));
        }

        let (ip_field, domain_field) = match zone {
            Zone::External => (fields[0], fields[1]),
            Zone::Internal => (fields[2], fields[3]),
        };
        let ip = expand_team_token(ip_field, &team);
        let domain = expand_team_token(domain_field, &team);

        match direction {
            Direction::Forward => check_forward(&resolver, &domain, &ip).await?,
            Direction::Reverse => check_reverse(&resolver, &ip, &domain).await?,
        }
    }

    Ok(Outcome {
        award: svc.award,
        up: true,
    })
}

async fn check_forward(
    resolver: &TokioAsyncResolver,
    domain: &str,
    expected_ip: &str,
) -> Result<(), ProbeError> {
    let answers = resolver
        .ipv4_lookup(domain)
        .await
        .map_err(|err| ProbeError::Dns(format!("A query for {domain} failed: {err}")))?;
    let found = answers
        .iter()
        .any(|record| record.0.to_string() == expected_ip);
    if !found {
        return Err(ProbeError::Dns(format!(
            "forward lookup mismatch for {domain}: expected {expected_ip}"
        )));
    }
    Ok(())
}

async fn check_reverse(
    resolver: &TokioAsyncResolver,
    ip: &str,
    expected_domain: &str,
) -> Result<(), ProbeError> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| ProbeError::Dns(format!("invalid IPv4 address {ip:?} in query file")))?;
    let answers = resolver
        .reverse_lookup(ip)
        .await
        .map_err(|err| ProbeError::Dns(format!("PTR query for {ip} failed: {err}")))?;

    let expected = fqdn(expected_domain);
    let found = answers.iter().any(|name| name.to_string() == expected);
    if !found {
        return Err(ProbeError::Dns(format!(
            "reverse lookup mismatch for {ip}: expected {expected}"
        )));
    }
    Ok(())
}

fn resolver(addr: &str, port: u16) -> Result<TokioAsyncResolver, ProbeError> {
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| ProbeError::Dns(format!("invalid resolver address {addr:?}")))?;
    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(
        SocketAddr::new(ip, port),
        Protocol::Udp,
    ));

    let mut opts = ResolverOpts::default();
    opts.timeout = DNS_TIMEOUT;
    opts.attempts = 1;
    opts.use_hosts_file = false;
    Ok(TokioAsyncResolver::tokio(config, opts))
}

/// Derives the team number from the resolver address: last octet for the
/// external zone, third for the internal one.
fn team_octet(addr: &str, zone: Zone) -> Result<String, ProbeError> {
    let host = addr.split(':').next().unwrap_or(addr);
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() != 4 {
        return Err(ProbeError::Dns(format!("invalid IPv4 address: {host}")));
    }
    let octet = match zone {
        Zone::External => octets[3],
        Zone::Internal => octets[2],
    };
    Ok(octet.to_owned())
}

fn expand_team_token(field: &str, team: &str) -> String {
    field.replace("<t>", team)
}

fn fqdn(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_owned()
    } else {
        format!("{domain}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_team_number_is_the_last_octet() {
        assert_eq!(team_octet("10.10.1.7", Zone::External).unwrap(), "7");
    }

    #[test]
    fn internal_team_number_is_the_third_octet() {
        assert_eq!(team_octet("10.10.1.7", Zone::Internal).unwrap(), "1");
    }

    #[test]
    fn port_suffix_is_ignored() {
        assert_eq!(team_octet("10.10.1.7:53", Zone::External).unwrap(), "7");
    }

    #[test]
    fn short_address_is_rejected() {
        assert!(team_octet("10.10.1", Zone::External).is_err());
    }

    #[test]
    fn team_token_expands_everywhere_in_a_field() {
        assert_eq!(expand_team_token("ext<t>.example", "1"), "ext1.example");
        assert_eq!(expand_team_token("10.10.<t>.7", "3"), "10.10.3.7");
        assert_eq!(expand_team_token("plain.example", "3"), "plain.example");
    }

    #[test]
    fn fqdn_appends_a_single_trailing_dot() {
        assert_eq!(fqdn("ext1.example"), "ext1.example.");
        assert_eq!(fqdn("ext1.example."), "ext1.example.");
    }
}
