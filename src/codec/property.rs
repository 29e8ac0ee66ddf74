// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::byte_array::ByteArray;
use super::error::DecodeError;

/// MQTT 5.0 property identifiers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// Properties the broker attaches to outgoing messages.
///
/// Only the ones the routing core produces are represented; everything else
/// is handled by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    SubscriptionIdentifier(u32),
}

/// Properties allowed in a CONNACK packet.
pub const CONNECT_ACK_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumQoS,
    PropertyType::RetainAvailable,
    PropertyType::MaximumPacketSize,
    PropertyType::AssignedClientIdentifier,
    PropertyType::TopicAliasMaximum,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::WildcardSubscriptionAvailable,
    PropertyType::SubscriptionIdentifierAvailable,
    PropertyType::SharedSubscriptionAvailable,
    PropertyType::ServerKeepAlive,
    PropertyType::ResponseInformation,
    PropertyType::ServerReference,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties that may legally appear more than once in one packet.
const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Read a property block, validate it against `allowed`, and discard the
/// values.
///
/// # Errors
///
/// Returns a decode error if the block is truncated, a property identifier
/// is unknown or not in `allowed`, or a single-occurrence property repeats.
pub fn skip_properties(
    ba: &mut ByteArray,
    allowed: &[PropertyType],
) -> Result<(), DecodeError> {
    let total = ba.read_var_int()? as usize;
    if total > ba.remaining_bytes() {
        return Err(DecodeError::OutOfRange);
    }
    let end = ba.remaining_bytes() - total;
    let mut seen: Vec<PropertyType> = Vec::new();
    while ba.remaining_bytes() > end {
        let property_type = PropertyType::try_from(ba.read_byte()?)?;
        if !allowed.contains(&property_type) {
            return Err(DecodeError::PropertyNotAllowed);
        }
        if seen.contains(&property_type) && !MULTIPLE_PROPERTIES.contains(&property_type) {
            return Err(DecodeError::DuplicateProperty);
        }
        seen.push(property_type);
        skip_value(ba, property_type)?;
    }
    Ok(())
}

fn skip_value(ba: &mut ByteArray, property_type: PropertyType) -> Result<(), DecodeError> {
    match property_type {
        PropertyType::PayloadFormatIndicator
        | PropertyType::RequestProblemInformation
        | PropertyType::RequestResponseInformation
        | PropertyType::MaximumQoS
        | PropertyType::RetainAvailable
        | PropertyType::WildcardSubscriptionAvailable
        | PropertyType::SubscriptionIdentifierAvailable
        | PropertyType::SharedSubscriptionAvailable => {
            ba.read_byte().map(drop)?;
        }
        PropertyType::ServerKeepAlive
        | PropertyType::ReceiveMaximum
        | PropertyType::TopicAliasMaximum
        | PropertyType::TopicAlias => {
            ba.read_u16().map(drop)?;
        }
        PropertyType::MessageExpiryInterval
        | PropertyType::SessionExpiryInterval
        | PropertyType::WillDelayInterval
        | PropertyType::MaximumPacketSize => {
            ba.read_u32().map(drop)?;
        }
        PropertyType::SubscriptionIdentifier => {
            ba.read_var_int().map(drop)?;
        }
        PropertyType::ContentType
        | PropertyType::ResponseTopic
        | PropertyType::AssignedClientIdentifier
        | PropertyType::AuthenticationMethod
        | PropertyType::ResponseInformation
        | PropertyType::ServerReference
        | PropertyType::ReasonString => {
            ba.read_string().map(drop)?;
        }
        PropertyType::CorrelationData | PropertyType::AuthenticationData => {
            ba.read_binary().map(drop)?;
        }
        PropertyType::UserProperty => {
            ba.read_string().map(drop)?;
            ba.read_string().map(drop)?;
        }
    }
    Ok(())
}
