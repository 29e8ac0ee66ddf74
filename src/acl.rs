// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Layered access-control pipeline.
//!
//! Every check runs the same chain: a fixed `$`-topic policy, then the
//! built-in default authorizer, then the configured plugins in order. The
//! first stage with an opinion wins; `Defer` passes the question along.

use std::collections::HashMap;

use crate::auth::{
    AccessType, AclMessage, Authorizer, DefaultSecurity, ExtendedAuthOutcome, PskVerdict,
    Verdict,
};
use crate::config::{Config, Security};
use crate::error::{Error, ErrorKind};
use crate::plugin::{PluginEntry, PluginRegistry};
use crate::session::Session;
use crate::topic;
use crate::types::ListenerId;

/// Default authorizer plus the ordered plugin chain of one scope.
pub struct AuthorizerSet {
    default: Box<dyn Authorizer>,
    plugins: Vec<PluginEntry>,
}

impl AuthorizerSet {
    #[must_use]
    pub fn new(default: Box<dyn Authorizer>) -> Self {
        Self {
            default,
            plugins: Vec::new(),
        }
    }

    pub fn push_plugin(&mut self, entry: PluginEntry) {
        self.plugins.push(entry);
    }

    #[must_use]
    pub fn plugins(&self) -> &[PluginEntry] {
        &self.plugins
    }
}

impl std::fmt::Debug for AuthorizerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizerSet")
            .field("default", &self.default.name())
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// The access-control decision pipeline.
///
/// Holds one [`AuthorizerSet`] globally or one per listener, depending on
/// `per_listener_settings`.
#[derive(Debug)]
pub struct AclPipeline {
    per_listener: bool,
    global: AuthorizerSet,
    listeners: HashMap<ListenerId, AuthorizerSet>,
}

impl AclPipeline {
    /// Load every configured plugin and assemble the chains. This is the
    /// security-module init of broker start; call
    /// [`Self::security_init`] afterwards.
    ///
    /// # Errors
    ///
    /// Any plugin load or init failure aborts broker start.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let per_listener = config.security().per_listener_settings();
        let global = Self::build_set(config.security())?;
        let mut listeners = HashMap::new();
        if per_listener {
            for listener in config.listeners() {
                let security = listener.security().unwrap_or_else(|| config.security());
                listeners.insert(listener.id(), Self::build_set(security)?);
            }
        }
        Ok(Self {
            per_listener,
            global,
            listeners,
        })
    }

    fn build_set(security: &Security) -> Result<AuthorizerSet, Error> {
        let mut set = AuthorizerSet::new(Box::new(DefaultSecurity::new(security)));
        for plugin_config in security.plugins() {
            set.push_plugin(PluginRegistry::load(plugin_config)?);
        }
        Ok(set)
    }

    /// Assemble a pipeline from a prebuilt global chain.
    #[must_use]
    pub fn with_global_set(global: AuthorizerSet) -> Self {
        Self {
            per_listener: false,
            global,
            listeners: HashMap::new(),
        }
    }

    /// Attach a listener-scoped chain and switch to per-listener mode.
    pub fn insert_listener_set(&mut self, listener_id: ListenerId, set: AuthorizerSet) {
        self.per_listener = true;
        self.listeners.insert(listener_id, set);
    }

    fn select(&self, session: &Session) -> &AuthorizerSet {
        if self.per_listener {
            if let Some(set) = session
                .listener()
                .and_then(|listener_id| self.listeners.get(&listener_id))
            {
                return set;
            }
        }
        &self.global
    }

    fn sets_mut(&mut self) -> impl Iterator<Item = &mut AuthorizerSet> {
        std::iter::once(&mut self.global).chain(self.listeners.values_mut())
    }

    /// Run security init on every chain, default authorizer last.
    ///
    /// # Errors
    ///
    /// Fatal at broker start; aborts the reload when `reload` is true.
    pub fn security_init(&mut self, reload: bool) -> Result<(), Error> {
        for set in self.sets_mut() {
            for entry in &mut set.plugins {
                entry.security_init(reload)?;
            }
            set.default.security_init(&[], reload)?;
        }
        Ok(())
    }

    /// Run security cleanup on every chain.
    ///
    /// # Errors
    ///
    /// Propagates the first cleanup failure.
    pub fn security_cleanup(&mut self, reload: bool) -> Result<(), Error> {
        for set in self.sets_mut() {
            for entry in &mut set.plugins {
                entry.security_cleanup(reload)?;
            }
            set.default.security_cleanup(&[], reload)?;
        }
        Ok(())
    }

    /// Full teardown: security cleanup plus every plugin's final cleanup
    /// hook.
    pub fn module_cleanup(&mut self) {
        if let Err(err) = self.security_cleanup(false) {
            log::error!("acl: Security cleanup failed: {err:?}");
        }
        for set in self.sets_mut() {
            for entry in &mut set.plugins {
                if let Err(err) = entry.cleanup() {
                    log::error!("acl: Plugin cleanup failed: {err:?}");
                }
            }
        }
    }

    /// Authorize `access` on the message topic for `session`.
    ///
    /// # Errors
    ///
    /// `AclDenied` when some stage denies or every stage defers behind a
    /// configured plugin chain; other kinds propagate plugin failures.
    pub fn acl_check(
        &self,
        session: &Session,
        msg: &AclMessage,
        access: AccessType,
    ) -> Result<(), Error> {
        if session.id().is_none() {
            return Err(Error::new(
                ErrorKind::AclDenied,
                "Session has no client id",
            ));
        }

        check_dollar(msg.topic, access)?;

        let set = self.select(session);
        match set.default.acl_check(session, msg, access)? {
            Verdict::Allow => return Ok(()),
            Verdict::Deny => {
                return Err(Error::from_string(
                    ErrorKind::AclDenied,
                    format!("Access to {} denied by default authorizer", msg.topic),
                ));
            }
            Verdict::Defer => {}
        }

        // The default authorizer has accepted or deferred at this point.
        // With no plugins configured this is an accept.
        let mut verdict = Verdict::Allow;
        for entry in &set.plugins {
            if entry.deny_special_chars() && has_special_chars(session) {
                log::info!(
                    "acl: Denying access to client with dangerous username/id: {:?}/{:?}",
                    session.username(),
                    session.id()
                );
                return Err(Error::new(
                    ErrorKind::AclDenied,
                    "Client id or username contains wildcard characters",
                ));
            }
            verdict = entry.authorizer().acl_check(session, msg, access)?;
            if verdict != Verdict::Defer {
                break;
            }
        }

        match verdict {
            Verdict::Allow => Ok(()),
            Verdict::Deny | Verdict::Defer => Err(Error::from_string(
                ErrorKind::AclDenied,
                format!("Access to {} denied", msg.topic),
            )),
        }
    }

    /// Rebind per-session acl state in the default authorizer.
    ///
    /// # Errors
    ///
    /// Propagated to the delivery path.
    pub fn acl_attach(&self, session: &mut Session) -> Result<(), Error> {
        self.select(session).default.acl_attach(session)
    }

    /// Credential check: default first, then plugins, first non-defer wins.
    ///
    /// # Errors
    ///
    /// `AuthFailed` when a stage denies or every stage defers.
    pub fn unpwd_check(
        &self,
        session: &Session,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<(), Error> {
        let set = self.select(session);
        match set.default.unpwd_check(session, username, password)? {
            Verdict::Allow => return Ok(()),
            Verdict::Deny => {
                return Err(Error::new(ErrorKind::AuthFailed, "Bad username or password"));
            }
            Verdict::Defer => {}
        }

        let mut verdict = Verdict::Allow;
        for entry in &set.plugins {
            if !entry.authorizer().capabilities().unpwd {
                continue;
            }
            verdict = entry.authorizer().unpwd_check(session, username, password)?;
            if verdict != Verdict::Defer {
                break;
            }
        }

        match verdict {
            Verdict::Allow => Ok(()),
            Verdict::Deny | Verdict::Defer => {
                Err(Error::new(ErrorKind::AuthFailed, "Bad username or password"))
            }
        }
    }

    /// PSK key lookup with the same chain shape.
    ///
    /// # Errors
    ///
    /// `AuthFailed` when a stage denies or no stage produces a key.
    pub fn psk_key_get(
        &self,
        session: &Session,
        hint: &str,
        identity: &str,
    ) -> Result<String, Error> {
        let set = self.select(session);
        match set.default.psk_key_get(session, hint, identity)? {
            PskVerdict::Key(key) => return Ok(key),
            PskVerdict::Deny => {
                return Err(Error::from_string(
                    ErrorKind::AuthFailed,
                    format!("No psk key for identity {identity:?}"),
                ));
            }
            PskVerdict::Defer => {}
        }

        for entry in &set.plugins {
            if !entry.authorizer().capabilities().psk {
                continue;
            }
            match entry.authorizer().psk_key_get(session, hint, identity)? {
                PskVerdict::Key(key) => return Ok(key),
                PskVerdict::Deny => {
                    return Err(Error::from_string(
                        ErrorKind::AuthFailed,
                        format!("No psk key for identity {identity:?}"),
                    ));
                }
                PskVerdict::Defer => {}
            }
        }

        Err(Error::from_string(
            ErrorKind::AuthFailed,
            format!("No psk key for identity {identity:?}"),
        ))
    }

    /// Start an extended-auth exchange on the first plugin that handles the
    /// session's auth method.
    ///
    /// # Errors
    ///
    /// `InvalidInput` without an auth method or listener, `NotSupported`
    /// when no plugin carries the capability.
    pub fn auth_start(
        &self,
        session: &Session,
        reauth: bool,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        let Some(method) = session.auth_method() else {
            return Err(Error::new(ErrorKind::InvalidInput, "Session has no auth method"));
        };
        if session.listener().is_none() {
            return Err(Error::new(ErrorKind::InvalidInput, "Session has no listener"));
        }

        let set = self.select(session);
        for entry in &set.plugins {
            if !entry.authorizer().capabilities().extended_auth {
                continue;
            }
            match entry.authorizer().auth_start(session, method, reauth, data_in)? {
                ExtendedAuthOutcome::NotSupported => {}
                outcome => return Ok(outcome),
            }
        }
        Err(Error::new(
            ErrorKind::NotSupported,
            "No plugin supports extended authentication",
        ))
    }

    /// Continue an extended-auth exchange.
    ///
    /// # Errors
    ///
    /// Same as [`Self::auth_start`].
    pub fn auth_continue(
        &self,
        session: &Session,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        let Some(method) = session.auth_method() else {
            return Err(Error::new(ErrorKind::InvalidInput, "Session has no auth method"));
        };
        if session.listener().is_none() {
            return Err(Error::new(ErrorKind::InvalidInput, "Session has no listener"));
        }

        let set = self.select(session);
        for entry in &set.plugins {
            if !entry.authorizer().capabilities().extended_auth {
                continue;
            }
            match entry.authorizer().auth_continue(session, method, data_in)? {
                ExtendedAuthOutcome::NotSupported => {}
                outcome => return Ok(outcome),
            }
        }
        Err(Error::new(
            ErrorKind::NotSupported,
            "No plugin supports extended authentication",
        ))
    }
}

/// Fixed policy for `$`-prefixed topics, applied before any authorizer.
///
/// Denials are final; everything else falls through to the chain.
fn check_dollar(topic_name: &str, access: AccessType) -> Result<(), Error> {
    if !topic_name.starts_with('$') {
        return Ok(());
    }

    if topic_name.starts_with("$SYS") {
        if access == AccessType::Write {
            // Bridges report their connection state under $SYS; nothing
            // else may publish into the tree.
            if topic::filter_matches("$SYS/broker/connection/+/state", topic_name) {
                Ok(())
            } else {
                Err(Error::from_string(
                    ErrorKind::AclDenied,
                    format!("Write access to {topic_name} denied"),
                ))
            }
        } else {
            Ok(())
        }
    } else if topic_name.starts_with("$share") {
        // TODO: Unsubscribe from $share subscriptions should be allowed
        // here as well.
        if access == AccessType::Subscribe {
            Ok(())
        } else {
            Err(Error::from_string(
                ErrorKind::AclDenied,
                format!("Only subscriptions are allowed on {topic_name}"),
            ))
        }
    } else {
        // Unknown $ topic, leave the decision to the chain.
        Ok(())
    }
}

fn has_special_chars(session: &Session) -> bool {
    let dangerous = |s: &str| s.contains(|c| c == '+' || c == '#');
    session.username().is_some_and(dangerous) || session.id().is_some_and(dangerous)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::Capabilities;
    use crate::codec::QoS;
    use crate::types::Protocol;

    #[derive(Debug)]
    struct FixedAuthorizer {
        verdict: Verdict,
        calls: Arc<AtomicUsize>,
    }

    impl FixedAuthorizer {
        fn new(verdict: Verdict) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    verdict,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Authorizer for FixedAuthorizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                acl: true,
                unpwd: true,
                psk: false,
                extended_auth: false,
            }
        }

        fn acl_check(
            &self,
            _session: &Session,
            _msg: &AclMessage,
            _access: AccessType,
        ) -> Result<Verdict, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }

        fn unpwd_check(
            &self,
            _session: &Session,
            _username: Option<&str>,
            _password: Option<&[u8]>,
        ) -> Result<Verdict, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    fn pipeline_with(verdicts: &[Verdict]) -> (AclPipeline, Vec<Arc<AtomicUsize>>) {
        let mut set = AuthorizerSet::new(Box::new(DefaultSecurity::default()));
        let mut counters = Vec::new();
        for verdict in verdicts {
            let (authorizer, calls) = FixedAuthorizer::new(*verdict);
            counters.push(calls);
            let mut entry = PluginEntry::new(Box::new(authorizer), Vec::new(), false);
            entry.init().unwrap();
            set.push_plugin(entry);
        }
        (AclPipeline::with_global_set(set), counters)
    }

    fn message(topic: &'static str) -> AclMessage<'static> {
        AclMessage {
            topic,
            payload: b"x",
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    #[test]
    fn test_defer_chain_first_opinion_wins() {
        let (pipeline, counters) =
            pipeline_with(&[Verdict::Defer, Verdict::Allow, Verdict::Deny]);
        let session = Session::new("client-1", Protocol::V311);

        pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap();
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_defer_fails_closed() {
        let (pipeline, _) = pipeline_with(&[Verdict::Defer, Verdict::Defer]);
        let session = Session::new("client-1", Protocol::V311);

        let err = pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
    }

    #[test]
    fn test_no_plugins_defaults_accept() {
        let (pipeline, _) = pipeline_with(&[]);
        let session = Session::new("client-1", Protocol::V311);
        pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap();
    }

    #[test]
    fn test_missing_client_id_denied() {
        let (pipeline, counters) = pipeline_with(&[Verdict::Allow]);
        let mut session = Session::new("client-1", Protocol::V311);
        session.set_id(None);

        let err = pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dollar_sys_write_gate() {
        let (pipeline, counters) = pipeline_with(&[Verdict::Deny]);
        let session = Session::new("client-1", Protocol::V311);

        // Denied before any plugin sees the request.
        let err = pipeline
            .acl_check(&session, &message("$SYS/info"), AccessType::Write)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);

        // Bridge state topics stay writable and run through the chain.
        let err = pipeline
            .acl_check(
                &session,
                &message("$SYS/broker/connection/bridge1/state"),
                AccessType::Write,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dollar_sys_write_allowed_without_plugins() {
        let (pipeline, _) = pipeline_with(&[]);
        let session = Session::new("bridge-1", Protocol::V311);
        pipeline
            .acl_check(
                &session,
                &message("$SYS/broker/connection/bridge1/state"),
                AccessType::Write,
            )
            .unwrap();
    }

    #[test]
    fn test_dollar_sys_read_allowed() {
        let (pipeline, _) = pipeline_with(&[Verdict::Allow]);
        let session = Session::new("client-1", Protocol::V311);
        pipeline
            .acl_check(&session, &message("$SYS/uptime"), AccessType::Read)
            .unwrap();
        pipeline
            .acl_check(&session, &message("$SYS/uptime"), AccessType::Subscribe)
            .unwrap();
    }

    #[test]
    fn test_dollar_share_subscribe_only() {
        let (pipeline, _) = pipeline_with(&[Verdict::Allow]);
        let session = Session::new("client-1", Protocol::V311);

        pipeline
            .acl_check(
                &session,
                &message("$share/group/sensors/temp"),
                AccessType::Subscribe,
            )
            .unwrap();
        for access in [AccessType::Read, AccessType::Write, AccessType::Unsubscribe] {
            let err = pipeline
                .acl_check(&session, &message("$share/group/sensors/temp"), access)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AclDenied);
        }
    }

    #[test]
    fn test_deny_special_chars() {
        let mut set = AuthorizerSet::new(Box::new(DefaultSecurity::default()));
        let (authorizer, calls) = FixedAuthorizer::new(Verdict::Allow);
        let mut entry = PluginEntry::new(Box::new(authorizer), Vec::new(), true);
        entry.init().unwrap();
        set.push_plugin(entry);
        let pipeline = AclPipeline::with_global_set(set);

        let mut session = Session::new("client-#", Protocol::V311);
        let err = pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        session.set_id(Some("client-1"));
        session.set_username(Some("user+"));
        let err = pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AclDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        session.set_username(Some("user"));
        pipeline
            .acl_check(&session, &message("sensors/temp"), AccessType::Read)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unpwd_defer_chain() {
        let (pipeline, _) = pipeline_with(&[Verdict::Defer, Verdict::Allow]);
        let session = Session::new("client-1", Protocol::V311);
        pipeline
            .unpwd_check(&session, Some("alice"), Some(b"pw"))
            .unwrap();

        let (pipeline, _) = pipeline_with(&[Verdict::Defer, Verdict::Defer]);
        let err = pipeline
            .unpwd_check(&session, Some("alice"), Some(b"pw"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn test_psk_all_defer_fails() {
        let (pipeline, _) = pipeline_with(&[]);
        let session = Session::new("client-1", Protocol::V311);
        let err = pipeline
            .psk_key_get(&session, "hint", "dev-1")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn test_auth_start_not_supported() {
        let (pipeline, _) = pipeline_with(&[Verdict::Allow]);
        let mut session = Session::new("client-1", Protocol::V5);
        session.set_listener(1);
        session.set_auth_method(Some("SCRAM-SHA-1"));

        let err = pipeline.auth_start(&session, false, b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);

        session.set_auth_method(None);
        let err = pipeline.auth_start(&session, false, b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
