// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::bridge::Bridge;
use crate::codec::PacketId;
use crate::types::{ListenerId, Protocol};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Invalid,
    Connecting,
    Active,
    Disconnecting,
    Disconnected,
}

/// The view of a session the routing core reads.
///
/// Socket streams, in-flight windows and the subscription set are owned by
/// the session layer; routing only needs identity, protocol level, state and
/// the bridge attachment.
#[derive(Debug, Clone)]
pub struct Session {
    id: Option<String>,
    username: Option<String>,
    listener: Option<ListenerId>,
    protocol: Protocol,
    status: Status,
    auth_method: Option<String>,
    bridge: Option<Bridge>,
    retain_available: bool,
    last_mid: PacketId,
}

impl Session {
    #[must_use]
    pub fn new(id: &str, protocol: Protocol) -> Self {
        Self {
            id: Some(id.to_string()),
            username: None,
            listener: None,
            protocol,
            status: Status::Invalid,
            auth_method: None,
            bridge: None,
            retain_available: true,
            last_mid: 0,
        }
    }

    /// Synthetic descriptor for the original publisher of a retained
    /// message, used to re-check write access on delivery.
    #[must_use]
    pub fn retain_source(
        id: &str,
        username: Option<&str>,
        listener: Option<ListenerId>,
    ) -> Self {
        Self {
            id: Some(id.to_string()),
            username: username.map(ToString::to_string),
            listener,
            protocol: Protocol::V311,
            status: Status::Invalid,
            auth_method: None,
            bridge: None,
            retain_available: true,
            last_mid: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<&str>) -> &mut Self {
        self.id = id.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: Option<&str>) -> &mut Self {
        self.username = username.map(ToString::to_string);
        self
    }

    #[must_use]
    pub const fn listener(&self) -> Option<ListenerId> {
        self.listener
    }

    pub fn set_listener(&mut self, listener: ListenerId) -> &mut Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) -> &mut Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn auth_method(&self) -> Option<&str> {
        self.auth_method.as_deref()
    }

    pub fn set_auth_method(&mut self, auth_method: Option<&str>) -> &mut Self {
        self.auth_method = auth_method.map(ToString::to_string);
        self
    }

    #[must_use]
    pub const fn is_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    #[must_use]
    pub const fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    pub fn bridge_mut(&mut self) -> Option<&mut Bridge> {
        self.bridge.as_mut()
    }

    pub fn set_bridge(&mut self, bridge: Bridge) -> &mut Self {
        self.bridge = Some(bridge);
        self
    }

    #[must_use]
    pub const fn retain_available(&self) -> bool {
        self.retain_available
    }

    pub fn set_retain_available(&mut self, retain_available: bool) -> &mut Self {
        self.retain_available = retain_available;
        self
    }

    /// Allocate the next packet identifier, skipping zero on wrap.
    pub fn next_mid(&mut self) -> PacketId {
        self.last_mid = self.last_mid.wrapping_add(1);
        if self.last_mid == 0 {
            self.last_mid = 1;
        }
        self.last_mid
    }
}
