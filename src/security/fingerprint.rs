// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client fingerprinting for hijack detection.
//!
//! A fingerprint is the pair (masked client address, user agent). The last
//! octet of an IPv4 address is masked so clients behind CDN or proxy egress
//! pools, whose address churns within a /24, keep their session.
//!
//! Two checks run independently:
//!
//! | check         | when            | hijack if                                       |
//! |---------------|-----------------|-------------------------------------------------|
//! | user agent    | always          | stored UA missing, or differs from request UA   |
//! | address       | flag enabled    | stored address or UA missing, or masked differs |
//!
//! Any triggered check counts as a hijack; a session is only trusted when
//! every enabled check passes.

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use subtle::ConstantTimeEq;

use crate::request::RequestContext;
use crate::store::{SessionData, IP_ADDRESS_KEY, USER_AGENT_KEY};

/// Placeholder for the masked IPv4 octet.
pub const MASKED_OCTET: &str = "x";

/// Why a session was judged compromised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HijackSignal {
    /// No fingerprint has been recorded yet, or part of it is missing.
    MissingFingerprint,
    /// Masked client address differs from the recorded one.
    AddressChanged,
    /// User agent differs from the recorded one.
    UserAgentChanged,
}

impl fmt::Display for HijackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HijackSignal::MissingFingerprint => write!(f, "missing_fingerprint"),
            HijackSignal::AddressChanged => write!(f, "address_changed"),
            HijackSignal::UserAgentChanged => write!(f, "user_agent_changed"),
        }
    }
}

/// Client identity as recorded in session data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Client address exactly as the request reported it.
    pub address: String,
    pub user_agent: String,
}

impl Fingerprint {
    /// Fingerprint of the current request. Absent values are recorded as empty.
    pub fn from_request(request: &RequestContext) -> Self {
        Self {
            address: request.remote_addr.clone().unwrap_or_default(),
            user_agent: request.user_agent.clone().unwrap_or_default(),
        }
    }

    /// Write the fingerprint keys into session data.
    pub fn record(&self, data: &mut SessionData) {
        data.insert(IP_ADDRESS_KEY, self.address.clone());
        data.insert(USER_AGENT_KEY, self.user_agent.clone());
    }

    pub fn masked_address(&self) -> String {
        mask_address(&self.address)
    }
}

/// Replace the last component of an IPv4 address with `x`.
///
/// Anything that does not parse as IPv4 is returned unchanged.
///
/// ```
/// use sessionguard::security::fingerprint::mask_address;
///
/// assert_eq!(mask_address("1.2.3.4"), "1.2.3.x");
/// assert_eq!(mask_address("2001:db8::1"), "2001:db8::1");
/// ```
pub fn mask_address(address: &str) -> String {
    match address.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, c, _] = ip.octets();
            format!("{}.{}.{}.{}", a, b, c, MASKED_OCTET)
        }
        Err(_) => address.to_string(),
    }
}

fn same(stored: &str, current: &str) -> bool {
    stored.as_bytes().ct_eq(current.as_bytes()).into()
}

/// Compare recorded fingerprint data against the current request.
///
/// Returns the first triggered signal, or `None` when all enabled checks pass.
pub fn detect(data: &SessionData, request: &RequestContext, address_check: bool) -> Option<HijackSignal> {
    let current = Fingerprint::from_request(request);
    let stored_address = data.get_str(IP_ADDRESS_KEY);
    let stored_agent = data.get_str(USER_AGENT_KEY);

    if address_check {
        let (Some(stored_address), Some(_)) = (stored_address, stored_agent) else {
            return Some(HijackSignal::MissingFingerprint);
        };
        if !same(&mask_address(stored_address), &current.masked_address()) {
            return Some(HijackSignal::AddressChanged);
        }
    }

    match stored_agent {
        None => Some(HijackSignal::MissingFingerprint),
        Some(agent) if !same(agent, &current.user_agent) => Some(HijackSignal::UserAgentChanged),
        Some(_) => None,
    }
}

/// True when the session should be treated as compromised.
pub fn is_hijack_attempt(data: &SessionData, request: &RequestContext, address_check: bool) -> bool {
    detect(data, request, address_check).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.5; rv:10.0.1) Gecko/20100101 Firefox/10.0.1";

    fn request(addr: &str, ua: &str) -> RequestContext {
        RequestContext::new().with_remote_addr(addr).with_user_agent(ua)
    }

    fn recorded(addr: &str, ua: &str) -> SessionData {
        let mut data = SessionData::new();
        Fingerprint::from_request(&request(addr, ua)).record(&mut data);
        data
    }

    #[test]
    fn test_mask_address() {
        assert_eq!(mask_address("1.2.3.4"), "1.2.3.x");
        assert_eq!(mask_address("10.20.30.40"), "10.20.30.x");
        assert_eq!(mask_address("::1"), "::1");
        assert_eq!(mask_address(""), "");
        assert_eq!(mask_address("not-an-ip"), "not-an-ip");
        assert_eq!(mask_address("1.2.3"), "1.2.3");
    }

    #[test]
    fn test_matching_fingerprint_passes() {
        let data = recorded("1.2.3.4", UA);
        assert_eq!(detect(&data, &request("1.2.3.4", UA), true), None);
        assert_eq!(detect(&data, &request("1.2.3.4", UA), false), None);
    }

    #[test]
    fn test_last_octet_change_tolerated() {
        let data = recorded("1.2.3.4", UA);
        assert!(!is_hijack_attempt(&data, &request("1.2.3.99", UA), true));
    }

    #[test]
    fn test_address_change_detected_when_enabled() {
        let data = recorded("1.2.3.4", UA);
        assert_eq!(
            detect(&data, &request("4.3.2.1", UA), true),
            Some(HijackSignal::AddressChanged)
        );
    }

    #[test]
    fn test_address_change_ignored_when_disabled() {
        let data = recorded("1.2.3.4", UA);
        assert_eq!(detect(&data, &request("4.3.2.1", UA), false), None);
    }

    #[test]
    fn test_user_agent_change_always_detected() {
        let data = recorded("1.2.3.4", UA);
        let other = request("1.2.3.4", "A completely different user agent string");
        assert_eq!(detect(&data, &other, true), Some(HijackSignal::UserAgentChanged));
        assert_eq!(detect(&data, &other, false), Some(HijackSignal::UserAgentChanged));
    }

    #[test]
    fn test_user_agent_compared_exactly() {
        let data = recorded("1.2.3.4", UA);
        let padded = request("1.2.3.4", &format!("{} ", UA));
        assert!(is_hijack_attempt(&data, &padded, false));
    }

    #[test]
    fn test_empty_data_is_missing_fingerprint() {
        let data = SessionData::new();
        let req = request("1.2.3.4", UA);
        assert_eq!(detect(&data, &req, true), Some(HijackSignal::MissingFingerprint));
        assert_eq!(detect(&data, &req, false), Some(HijackSignal::MissingFingerprint));
    }

    #[test]
    fn test_missing_address_only_matters_with_check() {
        let mut data = recorded("1.2.3.4", UA);
        data.remove(IP_ADDRESS_KEY);

        let req = request("1.2.3.4", UA);
        assert_eq!(detect(&data, &req, true), Some(HijackSignal::MissingFingerprint));
        assert_eq!(detect(&data, &req, false), None);
    }

    #[test]
    fn test_absent_request_values_recorded_empty() {
        let bare = RequestContext::new();
        let mut data = SessionData::new();
        Fingerprint::from_request(&bare).record(&mut data);

        assert_eq!(data.get_str(IP_ADDRESS_KEY), Some(""));
        assert_eq!(data.get_str(USER_AGENT_KEY), Some(""));
        assert!(!is_hijack_attempt(&data, &bare, true));
    }

    #[test]
    fn test_ipv6_compared_unmasked() {
        let data = recorded("2001:db8::1", UA);
        assert!(!is_hijack_attempt(&data, &request("2001:db8::1", UA), true));
        assert!(is_hijack_attempt(&data, &request("2001:db8::2", UA), true));
    }
}
