// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The explicitly passed routing state.
//!
//! Everything the routing paths touch lives here: the retain tree, the acl
//! pipeline, the collaborator handles and the counters. One owner drives
//! it; none of the operations suspend.

use std::sync::Arc;

use crate::acl::AclPipeline;
use crate::auth::{AccessType, AclMessage, ExtendedAuthOutcome};
use crate::config::Config;
use crate::error::Error;
use crate::retain::RetainTree;
use crate::session::Session;
use crate::store::{
    DeliveryQueue, MessageStore, PersistenceNotifier, RetainedMessage, TimeSource,
};

/// Retained-delivery knobs from the security section.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingOptions {
    /// Re-check retained messages against their original publisher on
    /// every delivery.
    pub check_retain_source: bool,

    /// Deliver retained messages at the subscriber's requested QoS instead
    /// of `min(stored, requested)`.
    pub upgrade_outgoing_qos: bool,
}

/// Counters the `$SYS` tree reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingMetrics {
    pub retained_count: u64,
}

pub struct RoutingContext {
    pub(crate) retain_tree: RetainTree,
    pub(crate) acl: AclPipeline,
    pub(crate) store: Box<dyn MessageStore>,
    pub(crate) delivery: Box<dyn DeliveryQueue>,
    pub(crate) persistence: Box<dyn PersistenceNotifier>,
    pub(crate) clock: Box<dyn TimeSource>,
    pub(crate) options: RoutingOptions,
    pub(crate) metrics: RoutingMetrics,
}

impl RoutingContext {
    #[must_use]
    pub fn new(
        config: &Config,
        acl: AclPipeline,
        store: Box<dyn MessageStore>,
        delivery: Box<dyn DeliveryQueue>,
        persistence: Box<dyn PersistenceNotifier>,
        clock: Box<dyn TimeSource>,
    ) -> Self {
        Self {
            retain_tree: RetainTree::new(),
            acl,
            store,
            delivery,
            persistence,
            clock,
            options: RoutingOptions {
                check_retain_source: config.security().check_retain_source(),
                upgrade_outgoing_qos: config.security().upgrade_outgoing_qos(),
            },
            metrics: RoutingMetrics::default(),
        }
    }

    /// Store or clear the retained message for its topic.
    ///
    /// Counts as a persistence change unless the topic sits in the `$SYS`
    /// tree.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed topic.
    pub fn retain_store(
        &mut self,
        topic_name: &str,
        message: &Arc<RetainedMessage>,
    ) -> Result<(), Error> {
        let outcome = self
            .retain_tree
            .store(topic_name, message, self.store.as_ref())?;
        if !topic_name.starts_with("$SYS") {
            self.persistence.note_change();
        }
        if outcome.removed {
            self.metrics.retained_count = self.metrics.retained_count.saturating_sub(1);
        }
        if outcome.installed {
            self.metrics.retained_count += 1;
        }
        Ok(())
    }

    /// Authorize `access` for `session` on the message topic.
    ///
    /// # Errors
    ///
    /// See [`AclPipeline::acl_check`].
    pub fn acl_check(
        &self,
        session: &Session,
        msg: &AclMessage,
        access: AccessType,
    ) -> Result<(), Error> {
        self.acl.acl_check(session, msg, access)
    }

    /// # Errors
    ///
    /// See [`AclPipeline::unpwd_check`].
    pub fn unpwd_check(
        &self,
        session: &Session,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.acl.unpwd_check(session, username, password)
    }

    /// # Errors
    ///
    /// See [`AclPipeline::psk_key_get`].
    pub fn psk_key_get(
        &self,
        session: &Session,
        hint: &str,
        identity: &str,
    ) -> Result<String, Error> {
        self.acl.psk_key_get(session, hint, identity)
    }

    /// # Errors
    ///
    /// See [`AclPipeline::auth_start`].
    pub fn auth_start(
        &self,
        session: &Session,
        reauth: bool,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        self.acl.auth_start(session, reauth, data_in)
    }

    /// # Errors
    ///
    /// See [`AclPipeline::auth_continue`].
    pub fn auth_continue(
        &self,
        session: &Session,
        data_in: &[u8],
    ) -> Result<ExtendedAuthOutcome, Error> {
        self.acl.auth_continue(session, data_in)
    }

    #[must_use]
    pub const fn retained_count(&self) -> u64 {
        self.metrics.retained_count
    }

    #[must_use]
    pub const fn acl(&self) -> &AclPipeline {
        &self.acl
    }

    pub fn acl_mut(&mut self) -> &mut AclPipeline {
        &mut self.acl
    }

    /// Release the retain tree and reset the counter.
    pub fn clear(&mut self) {
        self.retain_tree.clear(self.store.as_ref());
        self.metrics.retained_count = 0;
    }
}

impl Drop for RoutingContext {
    fn drop(&mut self) {
        self.acl.module_cleanup();
    }
}
