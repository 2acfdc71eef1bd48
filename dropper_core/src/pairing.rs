//! Drop codes: a short numeric code that both authenticates a request and
//! tells the requester where to find the offering host.
//!
//! A code is `<hostSuffix><secret>`, the last octet of the offering host's
//! outbound IPv4 address followed by a two digit secret. A requester on the
//! same subnet recovers the host as `subnet_prefix.hostSuffix`.

use rand::Rng;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::error::TransferError;

const MIN_SECRET: u8 = 10;
const MAX_SECRET: u8 = 99;

/// Secrets are always two digits, so the host octet is `code / 100`.
const SECRET_MODULUS: u32 = 100;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("can't determine outbound ipv4 address: {0}")]
    NoOutboundAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairingCode(String);

impl PairingCode {
    pub fn from_parts(host_suffix: u8, secret: u8) -> Self {
        Self(format!("{}{}", host_suffix, secret))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host octet encoded in a presented code.
    pub fn host_suffix_of(code: &str) -> Result<u8, TransferError> {
        if !(3..=5).contains(&code.len()) || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TransferError::InvalidPairingCode);
        }
        let value: u32 = code.parse().map_err(|_| TransferError::InvalidPairingCode)?;
        u8::try_from(value / SECRET_MODULUS).map_err(|_| TransferError::InvalidPairingCode)
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of the offering host for `code` on a `/24` given by `subnet_prefix`
/// (e.g. `"192.168.1"`).
pub fn resolve_peer(code: &str, subnet_prefix: &str, port: u16) -> Result<SocketAddr, TransferError> {
    let suffix = PairingCode::host_suffix_of(code)?;
    let ip: Ipv4Addr = format!("{}.{}", subnet_prefix.trim_end_matches('.'), suffix)
        .parse()
        .map_err(|_| TransferError::InvalidPairingCode)?;
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// The address other hosts on the LAN see this machine as.
pub fn outbound_ipv4() -> Result<Ipv4Addr, PairingError> {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(ip)) => Err(PairingError::NoOutboundAddress(format!(
            "outbound address {} is not ipv4",
            ip
        ))),
        Err(e) => Err(PairingError::NoOutboundAddress(e.to_string())),
    }
}

/// Issues and checks the one live code of a session.
#[derive(Debug, Default)]
pub struct PairingCodeAuthority {
    current: Mutex<Option<PairingCode>>,
}

impl PairingCodeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_code(&self) -> Result<PairingCode, PairingError> {
        let ip = outbound_ipv4()?;
        Ok(self.issue_code_for(ip))
    }

    /// Issue a code for a host whose address is already known. Replaces any
    /// previously issued code.
    pub fn issue_code_for(&self, ip: Ipv4Addr) -> PairingCode {
        let secret = rand::rng().random_range(MIN_SECRET..=MAX_SECRET);
        let code = PairingCode::from_parts(ip.octets()[3], secret);
        self.replace(code.clone());
        code
    }

    pub fn validate_code(&self, candidate: &str) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|code| code.as_str() == candidate)
    }

    fn replace(&self, code: PairingCode) {
        *self.lock() = Some(code);
    }

    fn lock(&self) -> MutexGuard<'_, Option<PairingCode>> {
        // The guarded value is a plain string, a panicking holder can't leave it torn.
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_code_format() {
        let authority = PairingCodeAuthority::new();
        let code = authority.issue_code_for(Ipv4Addr::new(192, 168, 1, 73));
        let s = code.as_str();

        assert!(s.starts_with("73"));
        assert_eq!(s.len(), 4);
        let secret: u8 = s[2..].parse().unwrap();
        assert!((MIN_SECRET..=MAX_SECRET).contains(&secret));
    }

    #[test]
    fn test_scenario_exact_match_only() {
        let authority = PairingCodeAuthority::new();
        authority.replace(PairingCode::from_parts(73, 42));

        assert!(authority.validate_code("7342"));
        assert!(!authority.validate_code("7341"));
        assert!(!authority.validate_code(" 7342"));
        assert!(!authority.validate_code("07342"));
        assert!(!authority.validate_code(""));
    }

    #[test]
    fn test_nothing_validates_before_issue() {
        let authority = PairingCodeAuthority::new();
        assert!(!authority.validate_code(""));
        assert!(!authority.validate_code("7342"));
    }

    #[test]
    fn test_reissue_invalidates_previous_code() {
        let authority = PairingCodeAuthority::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);

        let first = authority.issue_code_for(ip);
        // Secrets can collide; draw until the code actually changes.
        let second = loop {
            let next = authority.issue_code_for(ip);
            if next != first {
                break next;
            }
        };

        assert!(!authority.validate_code(first.as_str()));
        assert!(authority.validate_code(second.as_str()));
    }

    #[test]
    fn test_validate_while_issuing_concurrently() {
        let authority = Arc::new(PairingCodeAuthority::new());
        let ip = Ipv4Addr::new(192, 168, 1, 9);

        let issuer = {
            let authority = authority.clone();
            std::thread::spawn(move || {
                let mut last = authority.issue_code_for(ip);
                for _ in 0..1000 {
                    last = authority.issue_code_for(ip);
                }
                last
            })
        };
        for _ in 0..1000 {
            assert!(!authority.validate_code("1"));
        }
        let last = issuer.join().unwrap();
        assert!(authority.validate_code(last.as_str()));
    }

    #[test]
    fn test_host_suffix_of() {
        assert_eq!(PairingCode::host_suffix_of("7342").unwrap(), 73);
        assert_eq!(PairingCode::host_suffix_of("512").unwrap(), 5);
        assert_eq!(PairingCode::host_suffix_of("25599").unwrap(), 255);

        for bad in ["", "12", "25600", "123456", "73a2", "-7342", " 734"] {
            assert!(
                matches!(
                    PairingCode::host_suffix_of(bad),
                    Err(TransferError::InvalidPairingCode)
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_peer() {
        let addr = resolve_peer("7342", "192.168.1", 8551).unwrap();
        assert_eq!(addr, "192.168.1.73:8551".parse().unwrap());

        let addr = resolve_peer("7342", "10.0.0.", 9000).unwrap();
        assert_eq!(addr, "10.0.0.73:9000".parse().unwrap());

        assert!(resolve_peer("7342", "not.a.subnet", 8551).is_err());
    }
}
