// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::byte_array::ByteArray;
use super::error::DecodeError;
use super::property::{self, CONNECT_ACK_PROPERTIES};
use crate::types::Protocol;

/// MQTT 3.1.1 connect return codes.
///
/// If the Server sends a CONNACK packet with a non-zero return code, it MUST
/// close the network connection.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The server does not support the level of the MQTT protocol requested
    /// by the Client.
    UnacceptedProtocol = 1,

    /// The Client identifier is correct UTF-8 but not allowed by the Server.
    IdentifierRejected = 2,

    /// The Network Connection has been made but the MQTT service is
    /// unavailable.
    ServerUnavailable = 3,

    /// The data in the username or password is malformed.
    MalformedUsernamePassword = 4,

    /// The Client is not authorized to connect.
    Unauthorized = 5,

    /// 6-255 are reserved.
    Reserved = 6,
}

impl From<u8> for ConnectReturnCode {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Accepted,
            1 => Self::UnacceptedProtocol,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::MalformedUsernamePassword,
            5 => Self::Unauthorized,
            _ => Self::Reserved,
        }
    }
}

/// MQTT 5.0 reason codes a CONNACK may carry.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    #[default]
    Success = 0x00,
    UnspecifiedError = 0x80,
    MalformedPacket = 0x81,
    ProtocolError = 0x82,
    ImplementationSpecificError = 0x83,
    UnsupportedProtocolVersion = 0x84,
    ClientIdentifierNotValid = 0x85,
    BadUserNameOrPassword = 0x86,
    NotAuthorized = 0x87,
    ServerUnavailable = 0x88,
    ServerBusy = 0x89,
    Banned = 0x8a,
    BadAuthenticationMethod = 0x8c,
    TopicNameInvalid = 0x90,
    PacketTooLarge = 0x95,
    QuotaExceeded = 0x97,
    PayloadFormatInvalid = 0x99,
    RetainNotSupported = 0x9a,
    QoSNotSupported = 0x9b,
    UseAnotherServer = 0x9c,
    ServerMoved = 0x9d,
    ConnectionRateExceeded = 0x9f,

    /// Any value without a name above.
    Reserved = 0xff,
}

impl From<u8> for ReasonCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Success,
            0x80 => Self::UnspecifiedError,
            0x81 => Self::MalformedPacket,
            0x82 => Self::ProtocolError,
            0x83 => Self::ImplementationSpecificError,
            0x84 => Self::UnsupportedProtocolVersion,
            0x85 => Self::ClientIdentifierNotValid,
            0x86 => Self::BadUserNameOrPassword,
            0x87 => Self::NotAuthorized,
            0x88 => Self::ServerUnavailable,
            0x89 => Self::ServerBusy,
            0x8a => Self::Banned,
            0x8c => Self::BadAuthenticationMethod,
            0x90 => Self::TopicNameInvalid,
            0x95 => Self::PacketTooLarge,
            0x97 => Self::QuotaExceeded,
            0x99 => Self::PayloadFormatInvalid,
            0x9a => Self::RetainNotSupported,
            0x9b => Self::QoSNotSupported,
            0x9c => Self::UseAnotherServer,
            0x9d => Self::ServerMoved,
            0x9f => Self::ConnectionRateExceeded,
            _ => Self::Reserved,
        }
    }
}

/// CONNACK variable header, fixed header already stripped.
///
/// Basic layout:
/// ```txt
///  7                       0
/// +-------------------------+
/// | Ack flags               |
/// +-------------------------+
/// | Reason code             |
/// +-------------------------+
/// | Properties (MQTT 5 only)|
/// +-------------------------+
/// ```
///
/// The property block is read and validated but its values are discarded;
/// nothing in it feeds back into session state here.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectAckFrame {
    /// Session Present flag is bit 0 of the ack flags, bits 7-1 are
    /// reserved.
    session_present: bool,

    /// Raw reason byte; interpretation depends on the protocol level.
    reason_code: u8,
}

impl ConnectAckFrame {
    /// # Errors
    ///
    /// Returns a decode error on a truncated buffer or, for MQTT 5, an
    /// invalid property block.
    pub fn decode(ba: &mut ByteArray, protocol: Protocol) -> Result<Self, DecodeError> {
        let ack_flags = ba.read_byte()?;
        let session_present = ack_flags & 0b0000_0001 == 0b0000_0001;
        let reason_code = ba.read_byte()?;
        if protocol == Protocol::V5 {
            property::skip_properties(ba, CONNECT_ACK_PROPERTIES)?;
        }
        Ok(Self {
            session_present,
            reason_code,
        })
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn reason_code(&self) -> u8 {
        self.reason_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_v3() {
        let buf = [0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        let frame = ConnectAckFrame::decode(&mut ba, Protocol::V311).unwrap();
        assert!(frame.session_present());
        assert_eq!(
            ConnectReturnCode::from(frame.reason_code()),
            ConnectReturnCode::Accepted
        );
    }

    #[test]
    fn test_decode_v5_with_properties() {
        // retain-available=0 in the property block
        let buf = [0x00, 0x9a, 0x02, 0x25, 0x00];
        let mut ba = ByteArray::new(&buf);
        let frame = ConnectAckFrame::decode(&mut ba, Protocol::V5).unwrap();
        assert!(!frame.session_present());
        assert_eq!(
            ReasonCode::from(frame.reason_code()),
            ReasonCode::RetainNotSupported
        );
    }

    #[test]
    fn test_decode_truncated() {
        let buf = [0x00];
        let mut ba = ByteArray::new(&buf);
        assert!(ConnectAckFrame::decode(&mut ba, Protocol::V311).is_err());
    }
}
