// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Authorizer interface and the built-in default authorizer.
//!
//! Every source of authorization decisions, the built-in default and each
//! loaded plugin alike, is normalized to the [`Authorizer`] trait. The acl
//! pipeline never sees which plugin ABI version sits behind an entry.

use serde::Deserialize;

use crate::codec::QoS;
use crate::error::Error;
use crate::session::Session;
use crate::store::RetainedMessage;

pub mod acl_file;
mod default;
pub mod passwd;

pub use default::DefaultSecurity;

/// Three-valued authorization verdict.
///
/// `Defer` means "no opinion, ask the next stage"; it never leaves the
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    Defer,
}

/// What a session wants to do with a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Subscribe,
    Unsubscribe,
}

/// Message fields handed to acl checks.
#[derive(Debug, Clone)]
pub struct AclMessage<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> AclMessage<'a> {
    #[must_use]
    pub fn from_retained(message: &'a RetainedMessage) -> Self {
        Self {
            topic: message.topic(),
            payload: message.payload(),
            qos: message.qos(),
            retain: message.retain(),
        }
    }
}

/// Which checks an authorizer actually implements. A missing capability is
/// a permanent defer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub acl: bool,
    pub unpwd: bool,
    pub psk: bool,
    pub extended_auth: bool,
}

/// Outcome of a PSK key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PskVerdict {
    /// Key found for the identity, hex encoded.
    Key(String),
    Deny,
    Defer,
}

/// Outcome of one extended-auth exchange step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedAuthOutcome {
    /// Authentication finished; data goes back to the client in AUTH/CONNACK.
    Success(Vec<u8>),

    /// More exchange needed; data goes back in an AUTH packet.
    Continue(Vec<u8>),

    /// This authorizer does not handle the session's auth method.
    NotSupported,
}

/// One `key value` pair from the plugin section of the config file, passed
/// through to the plugin verbatim and in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthOption {
    pub key: String,
    pub value: String,
}

/// Normalized authorizer capability interface.
///
/// Lifecycle methods default to no-ops and check methods default to defer,
/// so an implementation only writes the parts it supports.
pub trait Authorizer: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Called once after load, before any other hook.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for broker start.
    fn plugin_init(&mut self, _options: &[AuthOption]) -> Result<(), Error> {
        Ok(())
    }

    /// Called once before unload.
    ///
    /// # Errors
    ///
    /// Failures are logged and ignored during teardown.
    fn plugin_cleanup(&mut self, _options: &[AuthOption]) -> Result<(), Error> {
        Ok(())
    }

    /// Load security state. `reload` is true when re-reading configuration
    /// on a running broker.
    ///
    /// # Errors
    ///
    /// A failure at broker start is fatal.
    fn security_init(&mut self, _options: &[AuthOption], _reload: bool) -> Result<(), Error> {
        Ok(())
    }

    /// Drop security state, either for reload or for final teardown.
    ///
    /// # Errors
    ///
    /// Failures during a reload abort the reload.
    fn security_cleanup(&mut self, _options: &[AuthOption], _reload: bool) -> Result<(), Error> {
        Ok(())
    }

    /// # Errors
    ///
    /// An error counts as the authorizer's verdict for this call and stops
    /// the chain.
    fn acl_check(
        &self,
        _session: &Session,
        _msg: &AclMessage,
        _access: AccessType,
    ) -> Result<Verdict, Error> {
        Ok(Verdict::Defer)
    }

    /// Rebind per-session acl state, e.g. after username changes or for a
    /// synthetic retain-source session.
    ///
    /// # Errors
    ///
    /// Propagated to the caller of the delivery path.
    fn acl_attach(&self, _session: &mut Session) -> Result<(), Error> {
        Ok(())
    }

    /// # Errors
    ///
    /// An error counts as the authorizer's verdict for this call.
    fn unpwd_check(
        &self,
        _session: &Session,
        _username: Option<&str>,
        _password: Option<&[u8]>,
    ) -> Result<Verdict, Error> {
        Ok(Verdict::Defer)
    }

    /// # Errors
    ///
    /// An error counts as the authorizer's verdict for this call.
    fn psk_key_get(
        &self,
        _session: &Session,
        _hint: &str,
        _identity: &str,
    ) -> Result<PskVerdict, Error> {
        Ok(PskVerdict::Defer)
    }

    /// # Errors
    ///
    /// Any error other than "not supported" aborts the exchange.
    fn auth_start(
        &self,
        _session: &Session,
        _method: &str,
        _reauth: bool,
        _data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        Ok(ExtendedAuthOutcome::NotSupported)
    }

    /// # Errors
    ///
    /// Any error other than "not supported" aborts the exchange.
    fn auth_continue(
        &self,
        _session: &Session,
        _method: &str,
        _data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        Ok(ExtendedAuthOutcome::NotSupported)
    }
}
