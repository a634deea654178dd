//! IP-schema addressing.
//!
//! A schema is a dotted 4-octet string such as `10.20.T.5`. The first two
//! octets are plain integers; at most one of the last two may be the team
//! token `T` (case-insensitive), which substitution replaces with the team's
//! numeric identity.

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("ip schema must have 4 octets, got {0}")]
    OctetCount(usize),

    #[error("octet {index} ({octet:?}) is not a valid number")]
    BadOctet { index: usize, octet: String },

    #[error("octet {index} ({octet:?}) is neither a valid number nor 'T'")]
    BadTailOctet { index: usize, octet: String },

    #[error("only one of the third or fourth octet may be 'T'")]
    MultipleTeamTokens,

    #[error("substituted address {0:?} is not a valid IPv4 literal")]
    NotIpv4(String),
}

fn is_team_token(octet: &str) -> bool {
    octet.eq_ignore_ascii_case("t")
}

/// Checks that a schema is well formed without substituting anything.
pub fn validate_schema(schema: &str) -> Result<(), AddrError> {
    let parts: Vec<&str> = schema.split('.').collect();
    if parts.len() != 4 {
        return Err(AddrError::OctetCount(parts.len()));
    }

    for (i, part) in parts.iter().take(2).enumerate() {
        if part.parse::<u8>().is_err() {
            return Err(AddrError::BadOctet {
                index: i + 1,
                octet: (*part).to_owned(),
            });
        }
    }

    let mut tokens = 0;
    for (i, part) in parts.iter().enumerate().skip(2) {
        if is_team_token(part) {
            tokens += 1;
        } else if part.parse::<u8>().is_err() {
            return Err(AddrError::BadTailOctet {
                index: i + 1,
                octet: (*part).to_owned(),
            });
        }
    }
    if tokens > 1 {
        return Err(AddrError::MultipleTeamTokens);
    }

    Ok(())
}

/// Substitutes the team token and returns the probe target address.
///
/// Pure: the result depends on `(schema, team_id)` only.
pub fn resolve(schema: &str, team_id: i64) -> Result<String, AddrError> {
    validate_schema(schema)?;

    let address = schema
        .split('.')
        .map(|octet| {
            if is_team_token(octet) {
                team_id.to_string()
            } else {
                octet.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(".");

    if address.parse::<Ipv4Addr>().is_err() {
        return Err(AddrError::NotIpv4(address));
    }
    Ok(address)
}
