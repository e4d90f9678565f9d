//! JSON payload codec.
//!
//! Payloads are UTF-8 JSON documents. Inbound payloads are decoded into
//! [`serde_json::Value`]s and then checked for the shape their topic demands.

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// An attribute document: attribute name to value.
pub type Attributes = Map<String, Value>;

/// Decodes a payload into a JSON value.
pub fn decode(payload: &[u8]) -> Result<Value, DecodeError> {
    let text = core::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)
}

/// Serializes an outbound value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Requires `value` to be a JSON object.
pub fn into_attributes(value: Value) -> Result<Attributes, DecodeError> {
    match value {
        Value::Object(attributes) => Ok(attributes),
        _ => Err(DecodeError::UnexpectedShape),
    }
}

/// The body of a server-initiated RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    /// `Value::Null` when the server sent no `params`.
    pub params: Value,
}

impl RpcRequest {
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let mut body = into_attributes(value)?;
        let method = match body.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(DecodeError::MissingMethod),
        };
        let params = body.remove("params").unwrap_or(Value::Null);
        Ok(Self { method, params })
    }
}

#[derive(Serialize)]
pub(crate) struct RpcCall<'a, P: ?Sized> {
    pub method: &'a str,
    pub params: &'a P,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttributeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_keys: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_keys: Option<String>,
}

impl AttributeRequest {
    pub fn new(client_keys: &[&str], shared_keys: &[&str]) -> Self {
        Self {
            client_keys: join_keys(client_keys),
            shared_keys: join_keys(shared_keys),
        }
    }
}

fn join_keys(keys: &[&str]) -> Option<String> {
    (!keys.is_empty()).then(|| keys.join(","))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimRequest<'a> {
    pub secret_key: &'a str,
    pub duration_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_rejects_non_json() {
        assert_eq!(decode(b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert_eq!(decode(b"not json"), Err(DecodeError::InvalidJson));
        assert_eq!(decode(&[0xFF, 0xFE]), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn rpc_request_requires_method() {
        let request = RpcRequest::from_value(json!({"method": "setGpio", "params": {"pin": 4}}))
            .unwrap();
        assert_eq!(request.method, "setGpio");
        assert_eq!(request.params, json!({"pin": 4}));

        let request = RpcRequest::from_value(json!({"method": "reboot"})).unwrap();
        assert_eq!(request.params, Value::Null);

        assert_eq!(
            RpcRequest::from_value(json!({"params": {}})),
            Err(DecodeError::MissingMethod)
        );
        assert_eq!(
            RpcRequest::from_value(json!([1, 2])),
            Err(DecodeError::UnexpectedShape)
        );
    }

    #[test]
    fn attribute_request_joins_keys() {
        let body = encode(&AttributeRequest::new(&["myAttr1"], &["myAttr2", "myAttr3"])).unwrap();
        assert_eq!(
            decode(&body).unwrap(),
            json!({"clientKeys": "myAttr1", "sharedKeys": "myAttr2,myAttr3"})
        );

        let body = encode(&AttributeRequest::new(&[], &["s"])).unwrap();
        assert_eq!(decode(&body).unwrap(), json!({"sharedKeys": "s"}));
    }

    #[test]
    fn claim_request_uses_camel_case() {
        let body = encode(&ClaimRequest {
            secret_key: "s3cr3t",
            duration_ms: 30000,
        })
        .unwrap();
        assert_eq!(
            decode(&body).unwrap(),
            json!({"secretKey": "s3cr3t", "durationMs": 30000})
        );
    }
}
