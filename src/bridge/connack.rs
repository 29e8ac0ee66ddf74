// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! CONNACK handling for outbound sessions.

use super::BridgeHook;
use crate::codec::{ByteArray, ConnectAckFrame, ConnectReturnCode, ReasonCode};
use crate::error::{Error, ErrorKind};
use crate::session::{Session, Status};
use crate::types::Protocol;

/// Consume a CONNACK variable header on an outbound session.
///
/// On success the session becomes [`Status::Active`] and the session loop
/// continues; any error return tells the caller to close the session and
/// schedule its own retry.
///
/// # Errors
///
/// Returns a `DecodeError` on a malformed frame and a `ProtocolError` for
/// every non-success reason code.
pub fn handle_connect_ack(
    session: &mut Session,
    hook: &dyn BridgeHook,
    payload: &[u8],
) -> Result<(), Error> {
    log::debug!("Received CONNACK on connection {:?}", session.id());
    let mut ba = ByteArray::new(payload);
    let frame = ConnectAckFrame::decode(&mut ba, session.protocol())?;

    if frame.reason_code() == 0 {
        if session.is_bridge() {
            hook.on_connect(session)?;
        }
        session.set_status(Status::Active);
        return Ok(());
    }

    match session.protocol() {
        Protocol::V5 => match ReasonCode::from(frame.reason_code()) {
            ReasonCode::RetainNotSupported => {
                session.set_retain_available(false);
                log::error!("Connection Refused: retain not available (will retry)");
            }
            code => {
                log::error!("Connection Refused: {code:?}");
            }
        },
        Protocol::V311 => match ConnectReturnCode::from(frame.reason_code()) {
            ConnectReturnCode::UnacceptedProtocol => {
                // Downgrade so the next reconnect drops the private marker.
                if let Some(bridge) = session.bridge_mut() {
                    bridge.set_try_private_accepted(false);
                }
                log::error!("Connection Refused: unacceptable protocol version");
            }
            ConnectReturnCode::IdentifierRejected => {
                log::error!("Connection Refused: identifier rejected");
            }
            ConnectReturnCode::ServerUnavailable => {
                log::error!("Connection Refused: broker unavailable");
            }
            ConnectReturnCode::MalformedUsernamePassword => {
                log::error!("Connection Refused: bad username or password");
            }
            ConnectReturnCode::Unauthorized => {
                log::error!("Connection Refused: not authorised");
            }
            _ => {
                log::error!("Connection Refused: unknown reason");
            }
        },
    }

    Err(Error::from_string(
        ErrorKind::ProtocolError,
        format!(
            "CONNACK refused with reason code {}",
            frame.reason_code()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::bridge::{Bridge, NoopBridgeHook};

    #[derive(Default)]
    struct CountingHook {
        calls: Arc<AtomicUsize>,
    }

    impl BridgeHook for CountingHook {
        fn on_connect(&self, _session: &mut Session) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bridge_session(protocol: Protocol) -> Session {
        let mut session = Session::new("bridge-01", protocol);
        session.set_bridge(Bridge::new("bridge-01", true));
        session
    }

    #[test]
    fn test_success_activates_and_runs_hook() {
        let mut session = bridge_session(Protocol::V311);
        let hook = CountingHook::default();
        let calls = Arc::clone(&hook.calls);

        handle_connect_ack(&mut session, &hook, &[0x00, 0x00]).unwrap();
        assert_eq!(session.status(), Status::Active);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_without_bridge_skips_hook() {
        let mut session = Session::new("client-01", Protocol::V311);
        let hook = CountingHook::default();
        let calls = Arc::clone(&hook.calls);

        handle_connect_ack(&mut session, &hook, &[0x00, 0x00]).unwrap();
        assert_eq!(session.status(), Status::Active);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_protocol_version_rejection_downgrades() {
        let mut session = bridge_session(Protocol::V311);
        let err = handle_connect_ack(&mut session, &NoopBridgeHook, &[0x00, 0x01]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(!session.bridge().unwrap().try_private_accepted());
        assert_ne!(session.status(), Status::Active);
    }

    #[test]
    fn test_other_v3_rejections_keep_private_flag() {
        for reason in [0x02, 0x03, 0x04, 0x05, 0x7f] {
            let mut session = bridge_session(Protocol::V311);
            let err =
                handle_connect_ack(&mut session, &NoopBridgeHook, &[0x00, reason]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError);
            assert!(session.bridge().unwrap().try_private_accepted());
        }
    }

    #[test]
    fn test_v5_retain_not_supported() {
        let mut session = bridge_session(Protocol::V5);
        // empty property block after the reason code
        let err =
            handle_connect_ack(&mut session, &NoopBridgeHook, &[0x00, 0x9a, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(!session.retain_available());
    }

    #[test]
    fn test_v5_other_rejection() {
        let mut session = bridge_session(Protocol::V5);
        let err =
            handle_connect_ack(&mut session, &NoopBridgeHook, &[0x00, 0x87, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(session.retain_available());
    }

    #[test]
    fn test_truncated_frame() {
        let mut session = bridge_session(Protocol::V311);
        let err = handle_connect_ack(&mut session, &NoopBridgeHook, &[0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }
}
