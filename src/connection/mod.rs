//! HDFS connection descriptor and its validation gate.
//!
//! A [`ConnectionDescriptor`] is built from the flat `hdfs.connection.*`
//! property set, may be adjusted through its setters while the application is
//! still configuring itself, and must pass [`ConnectionDescriptor::validate`]
//! before the sink accepts a single write. After that the sink owns it and only
//! hands out shared references.
//!
//! # Property keys
//!
//! | Key                                | Field            | Default  |
//! |------------------------------------|------------------|----------|
//! | `hdfs.connection.uri`              | address          | required |
//! | `hdfs.connection.port`             | port             | required |
//! | `hdfs.connection.user`             | user             | required |
//! | `hdfs.connection.home`             | home path        | `/`      |
//! | `hdfs.connection.authentication`   | authentication   | `SIMPLE` |
//! | `hdfs.connection.authorization`    | authorization    | `FALSE`  |
//! | `hdfs.connection.timeout`          | RPC timeout (ms) | `10000`  |
//! | `hdfs.connection.dfsSupportAppend` | append support   | `false`  |

pub mod security;

pub use security::{Authentication, Authorization};

use crate::error::{PipelineError, PipelineResult};
use std::collections::HashMap;
use std::time::Duration;

/// Property keys read by [`ConnectionDescriptor::from_properties`].
pub mod keys {
    pub const URI: &str = "hdfs.connection.uri";
    pub const PORT: &str = "hdfs.connection.port";
    pub const AUTHENTICATION: &str = "hdfs.connection.authentication";
    pub const AUTHORIZATION: &str = "hdfs.connection.authorization";
    pub const USER: &str = "hdfs.connection.user";
    pub const HOME: &str = "hdfs.connection.home";
    pub const TIMEOUT: &str = "hdfs.connection.timeout";
    pub const DFS_SUPPORT_APPEND: &str = "hdfs.connection.dfsSupportAppend";
}

/// Default home directory
pub const DEFAULT_HOME_PATH: &str = "/";

/// Default RPC timeout in milliseconds
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;

const URI_SCHEME: &str = "hdfs://";

/// Parameters needed to reach and authenticate against the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    address: String,
    port: u16,
    user: String,
    home_path: String,
    /// `Err` keeps the rejected name until [`validate`](Self::validate) reports it.
    authentication: Result<Authentication, String>,
    authorization: Result<Authorization, String>,
    rpc_timeout_ms: u64,
    dfs_support_append: bool,
}

impl ConnectionDescriptor {
    /// Create a descriptor with defaults for everything but the endpoint and user.
    pub fn new(address: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            user: user.into(),
            home_path: DEFAULT_HOME_PATH.to_string(),
            authentication: Ok(Authentication::default()),
            authorization: Ok(Authorization::default()),
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            dfs_support_append: false,
        }
    }

    /// Build a descriptor from the flat `hdfs.connection.*` property set.
    ///
    /// Never fails. Unparsable numbers and booleans keep their defaults (a
    /// missing or bad port stays 0), and an unrecognised security mode is kept
    /// as written; [`validate`](Self::validate) reports both later.
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let get = |key: &str| props.get(key).map(|v| v.trim());

        let port = get(keys::PORT)
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(0);

        let authentication = match props.get(keys::AUTHENTICATION) {
            None => Ok(Authentication::default()),
            Some(raw) => raw.parse::<Authentication>().map_err(|_| raw.clone()),
        };

        let authorization = match props.get(keys::AUTHORIZATION) {
            None => Ok(Authorization::default()),
            Some(raw) => raw.parse::<Authorization>().map_err(|_| raw.clone()),
        };

        let rpc_timeout_ms = get(keys::TIMEOUT)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MS);

        let dfs_support_append = get(keys::DFS_SUPPORT_APPEND)
            .and_then(|v| v.to_ascii_lowercase().parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            address: get(keys::URI).unwrap_or_default().to_string(),
            port,
            user: get(keys::USER).unwrap_or_default().to_string(),
            home_path: get(keys::HOME).unwrap_or(DEFAULT_HOME_PATH).to_string(),
            authentication,
            authorization,
            rpc_timeout_ms,
            dfs_support_append,
        }
    }

    /// Check every required field, in a fixed order.
    ///
    /// The first failing check is logged and returned naming exactly that
    /// field: [`PipelineError::Configuration`] for a missing value, or
    /// [`PipelineError::EnumMapping`] carrying an unrecognised security mode.
    pub fn validate(&self) -> PipelineResult<()> {
        let failed = if self.address.trim().is_empty() {
            Some("address")
        } else if self.port == 0 {
            Some("port")
        } else if self.user.trim().is_empty() {
            Some("user")
        } else if self.home_path.trim().is_empty() {
            Some("home-path")
        } else {
            None
        };

        if let Some(field) = failed {
            tracing::error!("{} is required value.", field);
            return Err(PipelineError::Configuration { field });
        }

        let unmapped = match (&self.authentication, &self.authorization) {
            (Err(value), _) => Some(("authentication", value)),
            (Ok(_), Err(value)) => Some(("authorization", value)),
            (Ok(_), Ok(_)) => None,
        };
        match unmapped {
            Some((field, value)) => {
                tracing::error!("{} has no mapping for {:?}.", field, value);
                Err(PipelineError::EnumMapping {
                    field,
                    value: value.clone(),
                })
            }
            None => Ok(()),
        }
    }

    /// Canonical connection URI, `hdfs://{address}:{port}/`.
    pub fn uri(&self) -> String {
        format!("{}{}:{}/", URI_SCHEME, self.address, self.port)
    }

    /// Settings handed to the Hadoop client for this connection.
    pub fn hadoop_conf(&self) -> Vec<(&'static str, String)> {
        let mut conf = vec![("fs.defaultFS", self.uri())];
        if let Ok(auth) = self.authentication {
            conf.push(("hadoop.security.authentication", auth.as_str().to_string()));
        }
        if let Ok(authz) = self.authorization {
            conf.push(("hadoop.security.authorization", authz.as_str().to_string()));
        }
        conf.push(("ipc.client.rpc-timeout.ms", self.rpc_timeout_ms.to_string()));
        conf.push(("dfs.support.append", self.dfs_support_append.to_string()));
        conf
    }

    // ── Configuration phase setters ──

    pub fn set_home_path(&mut self, home_path: impl Into<String>) {
        self.home_path = home_path.into();
    }

    pub fn set_rpc_timeout(&mut self, timeout: Duration) {
        self.rpc_timeout_ms = timeout.as_millis() as u64;
    }

    /// Set authentication by name. Unknown names leave the descriptor unchanged.
    pub fn set_authentication(&mut self, name: &str) -> PipelineResult<()> {
        self.authentication = Ok(name.parse()?);
        Ok(())
    }

    /// Set authorization by name (`TRUE`/`FALSE`). Unknown names leave the
    /// descriptor unchanged.
    pub fn set_authorization(&mut self, name: &str) -> PipelineResult<()> {
        self.authorization = Ok(name.parse()?);
        Ok(())
    }

    pub fn set_dfs_support_append(&mut self, enabled: bool) {
        self.dfs_support_append = enabled;
    }

    // ── Accessors ──

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// `None` while an unrecognised mode awaits validation.
    pub fn authentication(&self) -> Option<Authentication> {
        self.authentication.as_ref().ok().copied()
    }

    pub fn authorization(&self) -> Option<Authorization> {
        self.authorization.as_ref().ok().copied()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn dfs_support_append(&self) -> bool {
        self.dfs_support_append
    }
}
