// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;

use crate::codec::QoS;
use crate::session::Session;
use crate::store::RetainedMessage;

/// One topic filter of a SUBSCRIBE frame.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub filter: String,

    /// Maximum QoS the subscriber asked for.
    pub qos: QoS,

    /// MQTT 5 subscription identifier, 0 when absent.
    pub subscription_identifier: u32,
}

#[derive(Debug)]
pub enum ListenerToDispatcherCmd {
    /// Incoming publish: session descriptor plus the stored message.
    Publish(Session, Arc<RetainedMessage>),

    /// Incoming subscribe: filters are processed in frame order.
    Subscribe(Session, Vec<SubscribeRequest>),
}
