//! RPC packet model.

use bitflags::bitflags;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::{FrameError, RpcError};

bitflags! {
    /// Flag bits of the first header byte. The low two bits hold the body
    /// type and are not flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const STREAM = 0b0000_1000;
        const END = 0b0000_0100;
    }
}

pub(crate) const BODY_TYPE_MASK: u8 = 0b0000_0011;

/// Encoding of a packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BodyType {
    Binary = 0,
    Text = 1,
    Json = 2,
}

impl BodyType {
    /// Body type from the low two bits of the flags byte.
    pub fn from_bits(bits: u8) -> Result<Self, FrameError> {
        match bits & BODY_TYPE_MASK {
            0 => Ok(BodyType::Binary),
            1 => Ok(BodyType::Text),
            2 => Ok(BodyType::Json),
            other => Err(FrameError::UnknownBodyType(other)),
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Binary(Bytes),
    Text(String),
    Json(Value),
}

impl Body {
    pub fn body_type(&self) -> BodyType {
        match self {
            Body::Binary(_) => BodyType::Binary,
            Body::Text(_) => BodyType::Text,
            Body::Json(_) => BodyType::Json,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn to_bytes(&self) -> Result<Bytes, RpcError> {
        match self {
            Body::Binary(bytes) => Ok(bytes.clone()),
            Body::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Body::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(RpcError::Encode),
        }
    }

    pub(crate) fn decode(body_type: BodyType, bytes: Bytes) -> Result<Self, FrameError> {
        match body_type {
            BodyType::Binary => Ok(Body::Binary(bytes)),
            BodyType::Text => Ok(Body::Text(String::from_utf8(bytes.to_vec())?)),
            BodyType::Json => Ok(Body::Json(serde_json::from_slice(&bytes)?)),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Binary(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(bytes))
    }
}

/// One RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream: bool,
    pub end: bool,
    /// Positive for requests, negated request number for responses.
    pub number: i32,
    pub body: Body,
}

impl Packet {
    /// A one-shot request.
    pub fn request(number: i32, body: impl Into<Body>) -> Result<Self, RpcError> {
        Ok(Self {
            stream: false,
            end: false,
            number: check_request_number(number)?,
            body: body.into(),
        })
    }

    /// A request that opens a stream.
    pub fn stream_request(number: i32, body: impl Into<Body>) -> Result<Self, RpcError> {
        Ok(Self {
            stream: true,
            ..Self::request(number, body)?
        })
    }

    /// A response (or stream item) for `request`.
    pub fn response_to(request: &Packet, body: impl Into<Body>) -> Self {
        Self {
            stream: request.stream,
            end: false,
            number: -request.number,
            body: body.into(),
        }
    }

    /// The end marker of a stream: end flag with a JSON `true` body.
    ///
    /// `number` is the request number when closing our own stream, or its
    /// negation when closing a stream the peer opened.
    pub fn end_of_stream(number: i32) -> Self {
        Self {
            stream: true,
            end: true,
            number,
            body: Body::Json(Value::Bool(true)),
        }
    }

    /// An error reply to `request`, ending the call or stream.
    pub fn error_response(request: &Packet, name: &str, message: &str) -> Self {
        Self {
            stream: request.stream,
            end: true,
            number: -request.number,
            body: Body::Json(json!({
                "name": name,
                "message": message,
                "stack": "",
            })),
        }
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::STREAM, self.stream);
        flags.set(Flags::END, self.end);
        flags
    }

    pub fn is_request(&self) -> bool {
        self.number > 0
    }

    pub fn is_response_to(&self, request_number: i32) -> bool {
        crate::request::is_response_to(request_number, self.number)
    }

    /// The `name` of a JSON request as a dotted path, e.g. `blobs.createWants`.
    pub fn method(&self) -> Option<String> {
        let names = self.body.as_json()?.get("name")?.as_array()?;
        let parts: Option<Vec<&str>> = names.iter().map(Value::as_str).collect();
        Some(parts?.join("."))
    }
}

fn check_request_number(number: i32) -> Result<i32, RpcError> {
    if number > 0 {
        Ok(number)
    } else {
        Err(RpcError::InvalidRequestNumber(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_type_bits() {
        assert_eq!(BodyType::from_bits(0).unwrap(), BodyType::Binary);
        assert_eq!(BodyType::from_bits(1).unwrap(), BodyType::Text);
        assert_eq!(BodyType::from_bits(2).unwrap(), BodyType::Json);
        assert!(matches!(
            BodyType::from_bits(3),
            Err(FrameError::UnknownBodyType(3))
        ));
        assert_eq!(BodyType::Json.bits(), 2);
    }

    #[test]
    fn test_request_rejects_non_positive_numbers() {
        assert!(matches!(
            Packet::request(0, "x"),
            Err(RpcError::InvalidRequestNumber(0))
        ));
        assert!(Packet::request(-4, "x").is_err());
        assert!(Packet::stream_request(i32::MIN, "x").is_err());
        assert!(Packet::request(i32::MAX, "x").is_ok());
    }

    #[test]
    fn test_response_negates_number() {
        let request = Packet::stream_request(7, json!({"name": ["createHistoryStream"]})).unwrap();
        let response = Packet::response_to(&request, json!({}));
        assert_eq!(response.number, -7);
        assert!(response.stream);
        assert!(!response.end);
        assert!(response.is_response_to(7));
        assert!(!request.is_response_to(7));
    }

    #[test]
    fn test_end_and_error_responses() {
        let end = Packet::end_of_stream(-3);
        assert_eq!(end.flags(), Flags::STREAM | Flags::END);
        assert_eq!(end.body, Body::Json(Value::Bool(true)));

        let request = Packet::request(5, json!({"name": ["whoami"]})).unwrap();
        let error = Packet::error_response(&request, "Error", "method not supported");
        assert!(error.end);
        assert!(!error.stream);
        assert_eq!(error.number, -5);
        assert_eq!(error.body.as_json().unwrap()["message"], "method not supported");
    }

    #[test]
    fn test_method_name() {
        let request = Packet::request(1, json!({"name": ["blobs", "createWants"]})).unwrap();
        assert_eq!(request.method().as_deref(), Some("blobs.createWants"));
        assert_eq!(Packet::request(1, "text").unwrap().method(), None);
        assert_eq!(Packet::request(1, json!({"name": [1]})).unwrap().method(), None);
    }
}
