// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::auth::AuthOption;
use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Deserialize)]
pub struct Security {
    /// Determines whether clients that connect without providing a username
    /// are allowed to connect.
    ///
    /// Default is true.
    #[serde(default = "Security::default_allow_anonymous")]
    allow_anonymous: bool,

    /// Control access to the broker using a password file with
    /// `username:$6$salt$hash` lines.
    ///
    /// Default is None.
    #[serde(default = "Security::default_file")]
    password_file: Option<PathBuf>,

    /// Topic access rules. Without this file the default authorizer has no
    /// acl opinion and defers to the plugin chain.
    ///
    /// Default is None.
    #[serde(default = "Security::default_file")]
    acl_file: Option<PathBuf>,

    /// TLS-PSK identities, one `identity:key` line each.
    ///
    /// Default is None.
    #[serde(default = "Security::default_file")]
    psk_file: Option<PathBuf>,

    /// If true, each listener uses its own security options; otherwise one
    /// global set applies to every session.
    ///
    /// Default is false.
    #[serde(default = "Security::default_flag")]
    per_listener_settings: bool,

    /// If true, retained messages are re-checked against their original
    /// publisher on every delivery.
    ///
    /// Default is false.
    #[serde(default = "Security::default_flag")]
    check_retain_source: bool,

    /// If true, retained delivery uses the subscriber's requested QoS
    /// instead of `min(stored, requested)`.
    ///
    /// Default is false.
    #[serde(default = "Security::default_flag")]
    upgrade_outgoing_qos: bool,

    /// Authorizer plugins, consulted in configuration order after the
    /// default authorizer.
    #[serde(default = "Security::default_plugins")]
    plugins: Vec<PluginConfig>,
}

impl Security {
    #[must_use]
    pub const fn default_allow_anonymous() -> bool {
        true
    }

    #[must_use]
    pub const fn default_file() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_flag() -> bool {
        false
    }

    #[must_use]
    pub const fn default_plugins() -> Vec<PluginConfig> {
        Vec::new()
    }

    #[must_use]
    pub const fn allow_anonymous(&self) -> bool {
        self.allow_anonymous
    }

    #[must_use]
    pub fn password_file(&self) -> Option<&Path> {
        self.password_file.as_deref()
    }

    #[must_use]
    pub fn acl_file(&self) -> Option<&Path> {
        self.acl_file.as_deref()
    }

    #[must_use]
    pub fn psk_file(&self) -> Option<&Path> {
        self.psk_file.as_deref()
    }

    #[must_use]
    pub const fn per_listener_settings(&self) -> bool {
        self.per_listener_settings
    }

    #[must_use]
    pub const fn check_retain_source(&self) -> bool {
        self.check_retain_source
    }

    #[must_use]
    pub const fn upgrade_outgoing_qos(&self) -> bool {
        self.upgrade_outgoing_qos
    }

    #[must_use]
    pub fn plugins(&self) -> &[PluginConfig] {
        &self.plugins
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if some options in config are invalid.
    pub fn validate(&self) -> Result<(), Error> {
        for plugin in &self.plugins {
            plugin.validate()?;
        }
        Ok(())
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allow_anonymous: Self::default_allow_anonymous(),
            password_file: Self::default_file(),
            acl_file: Self::default_file(),
            psk_file: Self::default_file(),
            per_listener_settings: Self::default_flag(),
            check_retain_source: Self::default_flag(),
            upgrade_outgoing_qos: Self::default_flag(),
            plugins: Self::default_plugins(),
        }
    }
}

/// One authorizer plugin entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Path of the shared object to load.
    path: PathBuf,

    /// Key/value options handed to the plugin in this order.
    #[serde(default = "PluginConfig::default_options")]
    options: Vec<AuthOption>,

    /// Deny access outright when the client id or username contains `+` or
    /// `#`, protecting pattern-based plugins.
    ///
    /// Default is true.
    #[serde(default = "PluginConfig::default_deny_special_chars")]
    deny_special_chars: bool,
}

impl PluginConfig {
    #[must_use]
    pub const fn default_options() -> Vec<AuthOption> {
        Vec::new()
    }

    #[must_use]
    pub const fn default_deny_special_chars() -> bool {
        true
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn options(&self) -> &[AuthOption] {
        &self.options
    }

    #[must_use]
    pub const fn deny_special_chars(&self) -> bool {
        self.deny_special_chars
    }

    /// # Errors
    ///
    /// Returns error if the plugin path is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "Plugin path must not be empty",
            ));
        }
        Ok(())
    }
}
