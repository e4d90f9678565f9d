//! Device API topics.
//!
//! All traffic of a device session runs over a handful of fixed topics below
//! `v1/devices/me`. Inbound topics are classified into [`InboundTopic`], which
//! carries the id extracted from the topic suffix; outbound topics are built
//! into fixed-capacity [`TopicBuf`]s.

use core::fmt::{Display, Write};

use heapless::String;

use crate::error::ConfigError;
use crate::router::CorrelationId;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// An owned topic string.
pub type TopicBuf = String<MAX_TOPIC_LEN>;

pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
pub const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";
pub const ATTRIBUTES_REQUEST_PREFIX: &str = "v1/devices/me/attributes/request/";
pub const ATTRIBUTES_RESPONSE_PREFIX: &str = "v1/devices/me/attributes/response/";
pub const RPC_REQUEST_PREFIX: &str = "v1/devices/me/rpc/request/";
pub const RPC_RESPONSE_PREFIX: &str = "v1/devices/me/rpc/response/";
pub const CLAIM_TOPIC: &str = "v1/devices/me/claim";

/// Topic filters subscribed right after a successful connect.
pub const SUBSCRIPTIONS: [&str; 4] = [
    ATTRIBUTES_TOPIC,
    "v1/devices/me/attributes/response/+",
    "v1/devices/me/rpc/request/+",
    "v1/devices/me/rpc/response/+",
];

/// The kind of an inbound message, decided by its topic alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    /// A server-initiated RPC; the request id is passed through verbatim.
    RpcRequest(&'a str),
    /// The answer to an RPC call this device made.
    RpcResponse(CorrelationId),
    /// The answer to an attribute request this device made.
    AttributeResponse(CorrelationId),
    /// Shared attributes pushed by the server.
    AttributeUpdate,
}

impl<'a> InboundTopic<'a> {
    /// Classifies `topic`, returning `None` for anything this client does not
    /// handle, including response topics whose suffix is not an integer id.
    pub fn parse(topic: &'a str) -> Option<Self> {
        if let Some(request_id) = topic.strip_prefix(RPC_REQUEST_PREFIX) {
            return (!request_id.is_empty()).then_some(Self::RpcRequest(request_id));
        }
        if let Some(id) = topic.strip_prefix(RPC_RESPONSE_PREFIX) {
            return id.parse().ok().map(Self::RpcResponse);
        }
        if let Some(id) = topic.strip_prefix(ATTRIBUTES_RESPONSE_PREFIX) {
            return id.parse().ok().map(Self::AttributeResponse);
        }
        (topic == ATTRIBUTES_TOPIC).then_some(Self::AttributeUpdate)
    }
}

fn build(prefix: &str, suffix: impl Display) -> Result<TopicBuf, ConfigError> {
    let mut topic = TopicBuf::new();
    write!(topic, "{prefix}{suffix}").map_err(|_| ConfigError::TopicTooLong)?;
    Ok(topic)
}

/// Topic for an RPC call made by this device.
pub fn rpc_request(id: CorrelationId) -> Result<TopicBuf, ConfigError> {
    build(RPC_REQUEST_PREFIX, id)
}

/// Topic for the reply to a server-initiated RPC.
pub fn rpc_response(request_id: &str) -> Result<TopicBuf, ConfigError> {
    build(RPC_RESPONSE_PREFIX, request_id)
}

/// Topic for an attribute request made by this device.
pub fn attribute_request(id: CorrelationId) -> Result<TopicBuf, ConfigError> {
    build(ATTRIBUTES_REQUEST_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fixed_topics() {
        assert_eq!(
            InboundTopic::parse("v1/devices/me/rpc/request/42"),
            Some(InboundTopic::RpcRequest("42"))
        );
        assert_eq!(
            InboundTopic::parse("v1/devices/me/rpc/response/7"),
            Some(InboundTopic::RpcResponse(7))
        );
        assert_eq!(
            InboundTopic::parse("v1/devices/me/attributes/response/3"),
            Some(InboundTopic::AttributeResponse(3))
        );
        assert_eq!(
            InboundTopic::parse("v1/devices/me/attributes"),
            Some(InboundTopic::AttributeUpdate)
        );
    }

    #[test]
    fn rpc_request_id_is_opaque() {
        assert_eq!(
            InboundTopic::parse("v1/devices/me/rpc/request/a-b_c"),
            Some(InboundTopic::RpcRequest("a-b_c"))
        );
        assert_eq!(InboundTopic::parse("v1/devices/me/rpc/request/"), None);
    }

    #[test]
    fn ignores_unknown_and_malformed_topics() {
        assert_eq!(InboundTopic::parse("v1/devices/me/telemetry"), None);
        assert_eq!(InboundTopic::parse("v1/devices/me/attributes/x"), None);
        assert_eq!(InboundTopic::parse("v1/devices/me/attributes/request/1"), None);
        assert_eq!(InboundTopic::parse("v1/devices/me/rpc/response/abc"), None);
        assert_eq!(InboundTopic::parse("v1/devices/me/attributes/response/"), None);
        assert_eq!(InboundTopic::parse("other/topic"), None);
    }

    #[test]
    fn builds_outbound_topics() {
        assert_eq!(rpc_request(1).unwrap().as_str(), "v1/devices/me/rpc/request/1");
        assert_eq!(
            attribute_request(12).unwrap().as_str(),
            "v1/devices/me/attributes/request/12"
        );
        assert_eq!(
            rpc_response("abc").unwrap().as_str(),
            "v1/devices/me/rpc/response/abc"
        );
    }

    #[test]
    fn overlong_reply_topic_is_rejected() {
        let request_id = "x".repeat(MAX_TOPIC_LEN);
        assert_eq!(rpc_response(&request_id), Err(ConfigError::TopicTooLong));
    }
}
