// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained-message delivery to a newly matching subscription.

use super::RetainNode;
use crate::acl::AclPipeline;
use crate::auth::{AccessType, AclMessage};
use crate::codec::{Property, QoS};
use crate::context::{RoutingContext, RoutingMetrics, RoutingOptions};
use crate::error::{Error, ErrorKind};
use crate::session::Session;
use crate::store::{DeliveryQueue, MessageOrigin, MessageStore};
use crate::topic;

impl RoutingContext {
    /// Queue every retained message matching `filter` for `subscriber`.
    ///
    /// Failures on individual messages are logged and do not stop the
    /// traversal; a session that vanished mid-walk simply loses the rest
    /// of its retained backlog.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed filter.
    pub fn deliver_retained(
        &mut self,
        subscriber: &mut Session,
        filter: &str,
        sub_qos: QoS,
        subscription_identifier: u32,
    ) -> Result<(), Error> {
        let tokens = topic::tokenize_filter(filter)?;
        let now = self.clock.now();

        let Self {
            retain_tree,
            acl,
            store,
            delivery,
            options,
            metrics,
            ..
        } = self;
        retain_tree.match_filter(&tokens, &mut |node| {
            if let Err(err) = deliver_node(
                node,
                subscriber,
                sub_qos,
                subscription_identifier,
                now,
                *options,
                acl,
                store.as_ref(),
                delivery.as_ref(),
                metrics,
            ) {
                log::error!(
                    "retain: Failed to deliver retained message to {:?}, err: {err:?}",
                    subscriber.id()
                );
            }
        });
        Ok(())
    }
}

/// Deliver the retained message of one matched node.
///
/// Denied access and lazy expiry are normal outcomes, not errors.
#[allow(clippy::too_many_arguments)]
pub(crate) fn deliver_node(
    node: &mut RetainNode,
    subscriber: &mut Session,
    sub_qos: QoS,
    subscription_identifier: u32,
    now: u64,
    options: RoutingOptions,
    acl: &AclPipeline,
    store: &dyn MessageStore,
    delivery: &dyn DeliveryQueue,
    metrics: &mut RoutingMetrics,
) -> Result<(), Error> {
    let Some(retained) = node.retained().cloned() else {
        return Ok(());
    };

    // Expired entries are dropped on first visit, no background sweep.
    if retained.message_expiry_time() > 0 && now > retained.message_expiry_time() {
        if let Some(old) = node.take_retained() {
            store.ref_dec(&old);
            metrics.retained_count = metrics.retained_count.saturating_sub(1);
        }
        return Ok(());
    }

    let msg = AclMessage::from_retained(&retained);
    match acl.acl_check(subscriber, &msg, AccessType::Read) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AclDenied => return Ok(()),
        Err(err) => return Err(err),
    }

    // Check for original source access.
    if options.check_retain_source && retained.origin() == MessageOrigin::Client {
        if let Some(source_id) = retained.source_id() {
            let mut publisher = Session::retain_source(
                source_id,
                retained.source_username(),
                retained.source_listener(),
            );
            acl.acl_attach(&mut publisher)?;
            match acl.acl_check(&publisher, &msg, AccessType::Write) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AclDenied => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    let qos = if options.upgrade_outgoing_qos {
        sub_qos
    } else {
        retained.qos().min(sub_qos)
    };
    let mid = if qos > QoS::AtMostOnce {
        subscriber.next_mid()
    } else {
        0
    };
    let mut properties = Vec::new();
    if subscription_identifier > 0 {
        properties.push(Property::SubscriptionIdentifier(subscription_identifier));
    }
    delivery.enqueue(subscriber, mid, qos, true, &retained, properties)
}
