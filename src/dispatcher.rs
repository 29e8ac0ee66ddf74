// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Dispatcher app, the single owner of the routing state.
//!
//! Listeners feed it commands over a channel; publishes are serialized
//! here, so a subscriber handled after a store on the same topic observes
//! the new retained message.

use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

use crate::auth::{AccessType, AclMessage};
use crate::commands::{ListenerToDispatcherCmd, SubscribeRequest};
use crate::context::RoutingContext;
use crate::error::{Error, ErrorKind};
use crate::session::Session;
use crate::store::RetainedMessage;

pub struct Dispatcher {
    context: RoutingContext,
    listener_receiver: Receiver<ListenerToDispatcherCmd>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        context: RoutingContext,
        listener_receiver: Receiver<ListenerToDispatcherCmd>,
    ) -> Self {
        Self {
            context,
            listener_receiver,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &RoutingContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RoutingContext {
        &mut self.context
    }

    /// Drain commands until every listener sender is gone.
    pub async fn run_loop(&mut self) {
        while let Some(cmd) = self.listener_receiver.recv().await {
            if let Err(err) = self.handle_listener_cmd(cmd) {
                log::error!("dispatcher: Failed to handle listener cmd: {err:?}");
            }
        }
    }

    fn handle_listener_cmd(&mut self, cmd: ListenerToDispatcherCmd) -> Result<(), Error> {
        match cmd {
            ListenerToDispatcherCmd::Publish(session, message) => {
                self.on_publish(&session, &message)
            }
            ListenerToDispatcherCmd::Subscribe(mut session, requests) => {
                self.on_subscribe(&mut session, &requests)
            }
        }
    }

    /// Publish path: write access first, then retained-state update.
    ///
    /// Live fan-out to current subscribers happens in the subscription
    /// layer; the dispatcher only owns the retained side.
    fn on_publish(
        &mut self,
        session: &Session,
        message: &Arc<RetainedMessage>,
    ) -> Result<(), Error> {
        let msg = AclMessage::from_retained(message);
        match self.context.acl_check(session, &msg, AccessType::Write) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AclDenied => {
                log::info!(
                    "dispatcher: Denied publish to {} from {:?}",
                    message.topic(),
                    session.id()
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if message.retain() {
            self.context.retain_store(message.topic(), message)?;
        }
        Ok(())
    }

    /// Subscribe path: per-filter access check, then retained delivery in
    /// filter order.
    fn on_subscribe(
        &mut self,
        session: &mut Session,
        requests: &[SubscribeRequest],
    ) -> Result<(), Error> {
        for request in requests {
            let msg = AclMessage {
                topic: &request.filter,
                payload: &[],
                qos: request.qos,
                retain: false,
            };
            match self.context.acl_check(session, &msg, AccessType::Subscribe) {
                Ok(()) => {
                    self.context.deliver_retained(
                        session,
                        &request.filter,
                        request.qos,
                        request.subscription_identifier,
                    )?;
                }
                Err(err) if err.kind() == ErrorKind::AclDenied => {
                    log::info!(
                        "dispatcher: Denied subscription to {} from {:?}",
                        request.filter,
                        session.id()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
