// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Collaborator interfaces the routing core consumes.
//!
//! The message store, the outbound queue, the persistence layer and the
//! clock all live outside this crate; routing reaches them through the
//! traits below so the broker can swap implementations (and tests can
//! record calls).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{PacketId, Property, QoS};
use crate::error::Error;
use crate::session::Session;
use crate::types::ListenerId;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Emitted by the broker itself, e.g. `$SYS` state.
    Broker,

    /// Published by a connected client.
    Client,
}

/// A stored application message plus the metadata routing reads.
///
/// The payload body is shared with the general message store through the
/// reference count the store maintains; this struct is the core's view of
/// one such entry.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
    origin: MessageOrigin,
    source_id: Option<String>,
    source_username: Option<String>,
    source_listener: Option<ListenerId>,

    /// Absolute wall-clock expiry in seconds, 0 means never.
    message_expiry_time: u64,
}

impl RetainedMessage {
    #[must_use]
    pub fn new(topic: &str, payload: Vec<u8>, qos: QoS) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            qos,
            retain: false,
            origin: MessageOrigin::Broker,
            source_id: None,
            source_username: None,
            source_listener: None,
            message_expiry_time: 0,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn origin(&self) -> MessageOrigin {
        self.origin
    }

    pub fn set_origin(&mut self, origin: MessageOrigin) -> &mut Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    #[must_use]
    pub fn source_username(&self) -> Option<&str> {
        self.source_username.as_deref()
    }

    #[must_use]
    pub const fn source_listener(&self) -> Option<ListenerId> {
        self.source_listener
    }

    /// Record which client published this message.
    pub fn set_source(&mut self, session: &Session) -> &mut Self {
        self.origin = MessageOrigin::Client;
        self.source_id = session.id().map(ToString::to_string);
        self.source_username = session.username().map(ToString::to_string);
        self.source_listener = session.listener();
        self
    }

    #[must_use]
    pub const fn message_expiry_time(&self) -> u64 {
        self.message_expiry_time
    }

    pub fn set_message_expiry_time(&mut self, expiry: u64) -> &mut Self {
        self.message_expiry_time = expiry;
        self
    }
}

/// Reference-count bookkeeping of the external message store.
///
/// Every install into the retain tree calls `ref_inc` once; every removal,
/// replacement or tree teardown calls `ref_dec` once for the message that
/// left the tree.
pub trait MessageStore: Send {
    fn ref_inc(&self, message: &Arc<RetainedMessage>);

    fn ref_dec(&self, message: &Arc<RetainedMessage>);
}

/// Outbound delivery queue. Direction is always broker-to-client here.
pub trait DeliveryQueue: Send {
    /// # Errors
    ///
    /// Returns an error if the session's queue is gone, e.g. the session
    /// closed between matching and enqueueing. Routing ignores that.
    fn enqueue(
        &self,
        subscriber: &Session,
        mid: PacketId,
        qos: QoS,
        retain: bool,
        message: &Arc<RetainedMessage>,
        properties: Vec<Property>,
    ) -> Result<(), Error>;
}

/// Persistence layer change counter.
pub trait PersistenceNotifier: Send {
    fn note_change(&self);
}

/// Wall-clock seconds source, swappable in tests.
pub trait TimeSource: Send {
    fn now(&self) -> u64;
}

/// System clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs())
    }
}
