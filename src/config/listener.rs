// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;

use super::security::Security;
use crate::error::{Error, ErrorKind};
use crate::types::ListenerId;

/// One listener entry.
///
/// The socket side of a listener lives outside this crate; routing only
/// needs its identity and, with `per_listener_settings`, its security
/// options.
#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    id: ListenerId,

    /// Bind address, kept for log messages.
    #[serde(default = "Listener::default_address")]
    address: String,

    /// Listener-specific security options. Falls back to the global
    /// section when absent.
    #[serde(default = "Listener::default_security")]
    security: Option<Security>,
}

impl Listener {
    #[must_use]
    pub fn default_address() -> String {
        String::new()
    }

    #[must_use]
    pub const fn default_security() -> Option<Security> {
        None
    }

    #[must_use]
    pub const fn default_listeners() -> Vec<Self> {
        Vec::new()
    }

    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn security(&self) -> Option<&Security> {
        self.security.as_ref()
    }

    /// # Errors
    ///
    /// Returns error if the listener security section is invalid.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(security) = &self.security {
            security.validate()?;
        }
        Ok(())
    }
}

pub(super) fn validate_listeners(listeners: &[Listener]) -> Result<(), Error> {
    for (index, listener) in listeners.iter().enumerate() {
        listener.validate()?;
        if listeners[..index]
            .iter()
            .any(|other| other.id() == listener.id())
        {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("Duplicate listener id: {}", listener.id()),
            ));
        }
    }
    Ok(())
}
