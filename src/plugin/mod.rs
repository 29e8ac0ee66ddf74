// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Authorizer plugin loading and lifecycle.

use crate::auth::{AuthOption, Authorizer};
use crate::config::PluginConfig;
use crate::error::{Error, ErrorKind};

pub mod dylib;

/// Lifecycle state of one loaded plugin.
///
/// Normal flow is `Unloaded → Loaded → Initialized → SecurityInitialized`.
/// A reload toggles `SecurityInitialized ⇄ SecurityCleaned`; full teardown
/// continues `SecurityCleaned → Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unloaded,
    Loaded,
    Initialized,
    SecurityInitialized,
    SecurityCleaned,
    Cleaned,
}

/// One authorizer in a chain: the normalized authorizer plus the options
/// and flags that apply to it.
pub struct PluginEntry {
    authorizer: Box<dyn Authorizer>,
    options: Vec<AuthOption>,
    deny_special_chars: bool,
    state: PluginState,
}

impl PluginEntry {
    /// Wrap a freshly loaded authorizer. The entry starts in
    /// [`PluginState::Loaded`]; call [`Self::init`] before using it.
    #[must_use]
    pub fn new(
        authorizer: Box<dyn Authorizer>,
        options: Vec<AuthOption>,
        deny_special_chars: bool,
    ) -> Self {
        Self {
            authorizer,
            options,
            deny_special_chars,
            state: PluginState::Loaded,
        }
    }

    #[must_use]
    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    #[must_use]
    pub const fn deny_special_chars(&self) -> bool {
        self.deny_special_chars
    }

    #[must_use]
    pub const fn state(&self) -> PluginState {
        self.state
    }

    fn expect_state(&self, wanted: &[PluginState], operation: &str) -> Result<(), Error> {
        if wanted.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::from_string(
                ErrorKind::PluginError,
                format!(
                    "Plugin {} cannot {operation} in state {:?}",
                    self.authorizer.name(),
                    self.state
                ),
            ))
        }
    }

    /// Run the plugin's init hook with its configured options.
    ///
    /// # Errors
    ///
    /// Propagates the plugin error; the caller treats it as fatal.
    pub fn init(&mut self) -> Result<(), Error> {
        self.expect_state(&[PluginState::Loaded], "init")?;
        self.authorizer.plugin_init(&self.options)?;
        self.state = PluginState::Initialized;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the plugin error; fatal at broker start, aborts a reload.
    pub fn security_init(&mut self, reload: bool) -> Result<(), Error> {
        if reload {
            self.expect_state(
                &[PluginState::SecurityCleaned, PluginState::SecurityInitialized],
                "security_init",
            )?;
        } else {
            self.expect_state(&[PluginState::Initialized], "security_init")?;
        }
        self.authorizer.security_init(&self.options, reload)?;
        self.state = PluginState::SecurityInitialized;
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the plugin error.
    pub fn security_cleanup(&mut self, reload: bool) -> Result<(), Error> {
        self.expect_state(&[PluginState::SecurityInitialized], "security_cleanup")?;
        self.authorizer.security_cleanup(&self.options, reload)?;
        self.state = PluginState::SecurityCleaned;
        Ok(())
    }

    /// Final cleanup hook before unload.
    ///
    /// # Errors
    ///
    /// Propagates the plugin error; teardown callers log and continue.
    pub fn cleanup(&mut self) -> Result<(), Error> {
        self.expect_state(
            &[PluginState::SecurityCleaned, PluginState::Initialized],
            "cleanup",
        )?;
        self.authorizer.plugin_cleanup(&self.options)?;
        self.state = PluginState::Cleaned;
        Ok(())
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.authorizer.name())
            .field("deny_special_chars", &self.deny_special_chars)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Loads plugin shared objects and adapts them to the [`Authorizer`]
/// interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginRegistry;

impl PluginRegistry {
    /// Load one configured plugin, probe its ABI version, resolve its entry
    /// points and run its init hook.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for broker start: missing library, missing
    /// version symbol, unknown version, missing required entry points, or a
    /// non-zero init return.
    pub fn load(config: &PluginConfig) -> Result<PluginEntry, Error> {
        log::info!("Loading plugin: {:?}", config.path());
        let plugin = dylib::DylibPlugin::load(config.path())?;
        let mut entry = PluginEntry::new(
            Box::new(plugin),
            config.options().to_vec(),
            config.deny_special_chars(),
        );
        entry.init()?;
        Ok(entry)
    }
}
