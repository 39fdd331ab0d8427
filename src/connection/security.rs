//! Closed sets of HDFS security modes.
//!
//! Both enums parse only their exact upper-case constant names (`SIMPLE`,
//! `KERBEROS`, `TRUE`, `FALSE`) and reject anything else with
//! [`PipelineError::EnumMapping`]; there is no fallback value.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value of `hadoop.security.authentication`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authentication {
    #[default]
    Simple,
    Kerberos,
}

impl Authentication {
    pub const ALL: [Authentication; 2] = [Authentication::Simple, Authentication::Kerberos];

    /// Constant name as written in configuration.
    pub fn name(self) -> &'static str {
        match self {
            Authentication::Simple => "SIMPLE",
            Authentication::Kerberos => "KERBEROS",
        }
    }

    /// Value handed to the Hadoop client.
    pub fn as_str(self) -> &'static str {
        match self {
            Authentication::Simple => "simple",
            Authentication::Kerberos => "kerberos",
        }
    }
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Authentication {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|auth| auth.name() == s)
            .ok_or_else(|| PipelineError::EnumMapping {
                field: "authentication",
                value: s.to_string(),
            })
    }
}

/// Value of `hadoop.security.authorization`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authorization {
    Enabled,
    #[default]
    Disabled,
}

impl Authorization {
    pub const ALL: [Authorization; 2] = [Authorization::Enabled, Authorization::Disabled];

    pub fn name(self) -> &'static str {
        match self {
            Authorization::Enabled => "TRUE",
            Authorization::Disabled => "FALSE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Authorization::Enabled => "true",
            Authorization::Disabled => "false",
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Authorization::Enabled
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Authorization {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|authz| authz.name() == s)
            .ok_or_else(|| PipelineError::EnumMapping {
                field: "authorization",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_parse() {
        assert_eq!("SIMPLE".parse::<Authentication>().unwrap(), Authentication::Simple);
        assert_eq!("KERBEROS".parse::<Authentication>().unwrap(), Authentication::Kerberos);
    }

    #[test]
    fn test_authentication_parse_is_exact() {
        for raw in ["simple", "Kerberos", " SIMPLE", "KERBEROS ", "kerberos"] {
            match raw.parse::<Authentication>() {
                Err(PipelineError::EnumMapping { field, value }) => {
                    assert_eq!(field, "authentication");
                    assert_eq!(value, raw);
                }
                other => panic!("{raw:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_authentication_rejects_unknown() {
        let err = "BOGUS".parse::<Authentication>().unwrap_err();
        match err {
            PipelineError::EnumMapping { field, value } => {
                assert_eq!(field, "authentication");
                assert_eq!(value, "BOGUS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!("".parse::<Authentication>().is_err());
    }

    #[test]
    fn test_authorization_parse() {
        assert_eq!("FALSE".parse::<Authorization>().unwrap(), Authorization::Disabled);
        assert_eq!("TRUE".parse::<Authorization>().unwrap(), Authorization::Enabled);
        assert!("true".parse::<Authorization>().is_err());
        assert!(" FALSE".parse::<Authorization>().is_err());
        assert!("yes".parse::<Authorization>().is_err());
        assert!(Authorization::Enabled.is_enabled());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Authentication::default(), Authentication::Simple);
        assert_eq!(Authorization::default(), Authorization::Disabled);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for auth in Authentication::ALL {
            assert_eq!(auth.to_string().parse::<Authentication>().unwrap(), auth);
        }
        for authz in Authorization::ALL {
            assert_eq!(authz.to_string().parse::<Authorization>().unwrap(), authz);
        }
    }
}
