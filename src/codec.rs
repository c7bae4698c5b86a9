// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! A codec turns a typed value into an [`Envelope`] and back. Two encodings are
//! provided:
//!
//! - [`JsonCodec`]: structured text, tagged `application/json`. Only as lossy
//!   as JSON itself, so `None` and a missing field decode the same way.
//! - [`CborCodec`]: self-describing binary, tagged `application/cbor`. It does
//!   not depend on memory layout, so values round-trip across processes,
//!   timestamps included.
//!
//! A codec is a plain value handed to the publisher or subscriber; one
//! subscription always decodes with one codec.

use crate::errors::CodecError;
use serde::{de::DeserializeOwned, Serialize};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const CBOR_CONTENT_TYPE: &str = "application/cbor";

/// The unit exchanged between a codec and the broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope tagged with `content_type`.
    pub fn new(content_type: &str, payload: Vec<u8>) -> Self {
        Self {
            content_type: content_type.to_owned(),
            payload,
        }
    }
}

/// An encode/decode pair for any serde-compatible type.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Tag set on every published message.
    const CONTENT_TYPE: &'static str;

    /// Encodes `value` into a tagged envelope.
    ///
    /// # Returns
    /// The envelope, or `CodecError::Encode` when `value` cannot be represented
    fn encode<T: Serialize>(&self, value: &T) -> Result<Envelope, CodecError>;

    /// Decodes an envelope into `T`.
    ///
    /// # Returns
    /// The value, or `CodecError::Decode`/`ContentTypeMismatch` on failure
    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, CodecError>;

    /// Rejects envelopes tagged by another codec. An empty tag is accepted,
    /// since the tag is informational and some publishers omit it.
    fn check_content_type(&self, envelope: &Envelope) -> Result<(), CodecError> {
        if envelope.content_type.is_empty() || envelope.content_type == Self::CONTENT_TYPE {
            return Ok(());
        }

        Err(CodecError::ContentTypeMismatch {
            expected: Self::CONTENT_TYPE.to_owned(),
            found: envelope.content_type.clone(),
        })
    }
}

/// Structured-text codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = JSON_CONTENT_TYPE;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Envelope, CodecError> {
        let payload = serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Envelope::new(Self::CONTENT_TYPE, payload))
    }

    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, CodecError> {
        self.check_content_type(envelope)?;
        serde_json::from_slice(&envelope.payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Binary-object codec backed by `ciborium`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    const CONTENT_TYPE: &'static str = CBOR_CONTENT_TYPE;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Envelope, CodecError> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(value, &mut payload)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Envelope::new(Self::CONTENT_TYPE, payload))
    }

    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, CodecError> {
        self.check_content_type(envelope)?;
        ciborium::de::from_reader(envelope.payload.as_slice())
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}
