//! Telemetry target string parsing.
//!
//! Clients name their device either in the `x-gnmi-target` metadata
//! header or in the `target` field of the request prefix path. Both
//! carry the same shape: `fqdn[:user[:secret]]`.

use crate::error::{GatewayError, GatewayResult};

/// User name assumed when a target string carries none.
pub const DEFAULT_USER: &str = "admin";

/// A parsed telemetry target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnmiTarget {
    pub fqdn: String,
    pub user: String,
    pub secret: String,
}

impl GnmiTarget {
    /// Parse `fqdn[:user[:secret]]`.
    ///
    /// A missing user defaults to [`DEFAULT_USER`]; a missing secret
    /// defaults to `default_secret`. Anything past the third
    /// colon-separated field is ignored.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the input (or its FQDN field) is empty.
    pub fn parse(target: &str, default_secret: &str) -> GatewayResult<Self> {
        let mut parts = target.split(':');
        let fqdn = parts.next().unwrap_or_default();
        if fqdn.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "empty telemetry target".to_string(),
            ));
        }
        let user = parts.next().filter(|u| !u.is_empty()).unwrap_or(DEFAULT_USER);
        let secret = parts.next().unwrap_or(default_secret);
        Ok(Self {
            fqdn: fqdn.to_string(),
            user: user.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqdn_only_gets_defaults() {
        let t = GnmiTarget::parse("srl1.example.net", "fallback").unwrap();
        assert_eq!(t.fqdn, "srl1.example.net");
        assert_eq!(t.user, "admin");
        assert_eq!(t.secret, "fallback");
    }

    #[test]
    fn fqdn_and_user() {
        let t = GnmiTarget::parse("srl1.example.net:oper", "fallback").unwrap();
        assert_eq!(t.user, "oper");
        assert_eq!(t.secret, "fallback");
    }

    #[test]
    fn fqdn_user_secret() {
        let t = GnmiTarget::parse("srl1.example.net:oper:s3cret", "fallback").unwrap();
        assert_eq!(t.user, "oper");
        assert_eq!(t.secret, "s3cret");
    }

    #[test]
    fn empty_user_field_falls_back() {
        let t = GnmiTarget::parse("srl1::s3cret", "fallback").unwrap();
        assert_eq!(t.user, "admin");
        assert_eq!(t.secret, "s3cret");
    }

    #[test]
    fn trailing_fields_are_ignored() {
        let t = GnmiTarget::parse("srl1:oper:a:b:c", "fallback").unwrap();
        assert_eq!(t.secret, "a");
    }

    #[test]
    fn empty_target_is_invalid() {
        assert!(matches!(
            GnmiTarget::parse("", "fallback"),
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_secret_field_is_kept_literal() {
        // "srl1:oper:" names an explicitly empty secret.
        let t = GnmiTarget::parse("srl1:oper:", "fallback").unwrap();
        assert_eq!(t.secret, "");
    }
}
