//! WebSocket extensions (RFC 6455 Section 9) and their per-leg negotiation.
//!
//! An [`ExtensionRegistry`] is built once at startup and shared read-only by
//! every leg of every Connection. Negotiation never mutates it: each leg gets
//! its own [`Negotiation`], holding freshly created encoder and decoder
//! state, so the client leg and the backend leg of one Connection can end up
//! with different extensions or different parameters.
//!
//! Transforms work on whole messages. Encoding runs before fragmentation
//! and decoding after reassembly, which is what permessage-* extensions
//! require.

pub mod deflate;

use std::fmt;

use crate::config::Limits;
use crate::error::{Error, Result};
pub use crate::protocol::frame::RsvBits;

/// A single extension parameter, `name` or `name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name, e.g. `client_max_window_bits`.
    pub name: String,
    /// Value, absent for flags.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Flag parameter.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                (name.trim(), Some(value.to_string()))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(Error::InvalidExtension("empty parameter name".into()));
        }
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// One element of a `Sec-WebSocket-Extensions` list:
/// `name; param; param=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name.
    pub name: String,
    /// Parameters in the order given.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Offer with parameters.
    pub fn new(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse one offer.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` for an empty name or parameter name.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(Error::InvalidExtension("empty extension name".into()));
        }
        let params = parts.map(ExtensionParam::parse).collect::<Result<_>>()?;
        Ok(Self::new(name, params))
    }

    /// Parse a full header value, a comma-separated list of offers.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` if any element is malformed.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        header.split(',').map(Self::parse).collect()
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in &self.params {
            write!(f, "; {param}")?;
        }
        Ok(())
    }
}

/// Transforms outgoing message payloads; owned by a leg's writer.
pub trait MessageEncoder: Send {
    /// Encode a whole message, setting any reserved bits it claims.
    ///
    /// # Errors
    ///
    /// `Error::Extension` if the transform fails.
    fn encode(&mut self, payload: Vec<u8>, rsv: &mut RsvBits) -> Result<Vec<u8>>;
}

/// Reverses a peer's encoding of incoming messages; owned by a leg's reader.
pub trait MessageDecoder: Send {
    /// Decode a whole message, clearing the reserved bits it handled.
    ///
    /// # Errors
    ///
    /// `Error::Extension` for undecodable input, `Error::MessageTooLarge`
    /// if decoding exceeds the message limit.
    fn decode(&mut self, payload: Vec<u8>, rsv: &mut RsvBits) -> Result<Vec<u8>>;
}

/// Encoder and decoder state created for one leg by one extension.
pub struct Transforms {
    /// Outgoing direction.
    pub encoder: Box<dyn MessageEncoder>,
    /// Incoming direction.
    pub decoder: Box<dyn MessageDecoder>,
}

/// A negotiable extension.
///
/// Implementations hold only static configuration; every successful
/// negotiation returns new [`Transforms`].
pub trait Extension: Send + Sync {
    /// Registered name, as used in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// Reserved bits this extension sets on the first frame of a message.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Parameters a client leg offers.
    fn offer_params(&self) -> Vec<ExtensionParam> {
        Vec::new()
    }

    /// Server side: answer a client's offer.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` to decline the offer.
    fn accept(&self, params: &[ExtensionParam]) -> Result<(Vec<ExtensionParam>, Transforms)>;

    /// Client side: apply the server's response to our offer.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` if the response cannot be honoured.
    fn configure(&self, params: &[ExtensionParam]) -> Result<Transforms>;
}

/// Ordered, read-only list of supported extensions.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
    used_rsv: RsvBits,
}

impl ExtensionRegistry {
    /// Empty registry; nothing is offered or accepted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with permessage-deflate at default settings, bounded by
    /// the message size limit.
    #[must_use]
    pub fn standard(limits: &Limits) -> Self {
        let mut registry = Self::new();
        let deflate = deflate::DeflateExtension::new(
            deflate::DeflateConfig::default().max_message_size(limits.max_message_size),
        );
        // Cannot conflict in an empty registry.
        let _ = registry.add(Box::new(deflate));
        registry
    }

    /// Register an extension.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` if its name is already registered or its
    /// reserved bits overlap an earlier extension's.
    pub fn add(&mut self, extension: Box<dyn Extension>) -> Result<()> {
        let rsv = extension.rsv_bits();
        if self.used_rsv.intersects(rsv) {
            return Err(Error::InvalidExtension(format!(
                "extension '{}' reserved bits conflict with registered extensions",
                extension.name()
            )));
        }
        if self.find(extension.name()).is_some() {
            return Err(Error::InvalidExtension(format!(
                "extension '{}' already registered",
                extension.name()
            )));
        }
        self.used_rsv = self.used_rsv | rsv;
        self.extensions.push(extension);
        Ok(())
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// No extensions registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// `Sec-WebSocket-Extensions` value a client leg sends, if any.
    #[must_use]
    pub fn offer_header(&self) -> Option<String> {
        if self.extensions.is_empty() {
            return None;
        }
        let offers: Vec<String> = self
            .extensions
            .iter()
            .map(|ext| ExtensionOffer::new(ext.name(), ext.offer_params()).to_string())
            .collect();
        Some(offers.join(", "))
    }

    /// Server side: pick from the client's offers.
    ///
    /// Offers are considered in the client's order; the first acceptable
    /// offer per extension wins. Unknown, malformed or unacceptable offers
    /// are declined rather than failing the handshake.
    #[must_use]
    pub fn negotiate(&self, header: Option<&str>) -> Negotiation {
        let mut negotiation = Negotiation::default();
        let Some(header) = header else {
            return negotiation;
        };
        let offers = match ExtensionOffer::parse_header(header) {
            Ok(offers) => offers,
            Err(e) => {
                tracing::debug!(error = %e, "declining malformed extension offer");
                return negotiation;
            }
        };

        for offer in offers {
            if negotiation.contains(&offer.name) {
                continue;
            }
            let Some(ext) = self.find(&offer.name) else {
                continue;
            };
            match ext.accept(&offer.params) {
                Ok((params, transforms)) => {
                    negotiation.push(ExtensionOffer::new(&offer.name, params), ext.rsv_bits(), transforms);
                }
                Err(e) => {
                    tracing::debug!(extension = %offer.name, error = %e, "declined extension offer");
                }
            }
        }
        negotiation
    }

    /// Client side: activate what the server accepted.
    ///
    /// # Errors
    ///
    /// `Error::Handshake` if the response names an extension we did not
    /// offer, names one twice, or carries parameters we cannot honour.
    pub fn activate(&self, header: Option<&str>) -> Result<Negotiation> {
        let mut negotiation = Negotiation::default();
        let Some(header) = header else {
            return Ok(negotiation);
        };
        let handshake = |e: Error| Error::Handshake(e.to_string());

        for response in ExtensionOffer::parse_header(header).map_err(handshake)? {
            let ext = self.find(&response.name).ok_or_else(|| {
                Error::Handshake(format!("backend accepted unoffered extension '{}'", response.name))
            })?;
            if negotiation.contains(&response.name) {
                return Err(Error::Handshake(format!(
                    "extension '{}' accepted twice",
                    response.name
                )));
            }
            let transforms = ext.configure(&response.params).map_err(handshake)?;
            negotiation.push(response, ext.rsv_bits(), transforms);
        }
        Ok(negotiation)
    }

    fn find(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
            .map(|e| e.as_ref())
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.name()))
            .finish()
    }
}

/// Extensions in effect on one leg.
#[derive(Default)]
pub struct Negotiation {
    accepted: Vec<ExtensionOffer>,
    rsv: RsvBits,
    encoders: Vec<Box<dyn MessageEncoder>>,
    decoders: Vec<Box<dyn MessageDecoder>>,
}

impl Negotiation {
    fn push(&mut self, accepted: ExtensionOffer, rsv: RsvBits, transforms: Transforms) {
        self.accepted.push(accepted);
        self.rsv = self.rsv | rsv;
        self.encoders.push(transforms.encoder);
        self.decoders.push(transforms.decoder);
    }

    fn contains(&self, name: &str) -> bool {
        self.accepted.iter().any(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Accepted extensions with their agreed parameters.
    #[must_use]
    pub fn accepted(&self) -> &[ExtensionOffer] {
        &self.accepted
    }

    /// Names of the accepted extensions.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.accepted.iter().map(|a| a.name.clone()).collect()
    }

    /// Reserved bits the peer may set on this leg.
    #[must_use]
    pub const fn rsv(&self) -> RsvBits {
        self.rsv
    }

    /// Value for the server's `Sec-WebSocket-Extensions` response header.
    #[must_use]
    pub fn response_header(&self) -> Option<String> {
        if self.accepted.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.accepted.iter().map(ToString::to_string).collect();
        Some(parts.join(", "))
    }

    /// Split into the writer's and the reader's halves.
    #[must_use]
    pub fn into_pipelines(self) -> (EncoderChain, DecoderChain) {
        (
            EncoderChain {
                stages: self.encoders,
            },
            DecoderChain {
                stages: self.decoders,
            },
        )
    }
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("accepted", &self.accepted)
            .field("rsv", &self.rsv)
            .finish_non_exhaustive()
    }
}

/// Encoders in negotiation order.
#[derive(Default)]
pub struct EncoderChain {
    stages: Vec<Box<dyn MessageEncoder>>,
}

impl EncoderChain {
    /// Run every encoder; returns the payload and the bits to set on the
    /// first frame.
    ///
    /// # Errors
    ///
    /// The first encoder error.
    pub fn encode(&mut self, mut payload: Vec<u8>) -> Result<(Vec<u8>, RsvBits)> {
        let mut rsv = RsvBits::NONE;
        for stage in &mut self.stages {
            payload = stage.encode(payload, &mut rsv)?;
        }
        Ok((payload, rsv))
    }
}

/// Decoders, applied in reverse negotiation order.
#[derive(Default)]
pub struct DecoderChain {
    stages: Vec<Box<dyn MessageDecoder>>,
}

impl DecoderChain {
    /// Undo the peer's encoding.
    ///
    /// # Errors
    ///
    /// Any decoder error, or `Error::ReservedBitsSet` if bits remain that
    /// no decoder handled.
    pub fn decode(&mut self, mut payload: Vec<u8>, mut rsv: RsvBits) -> Result<Vec<u8>> {
        for stage in self.stages.iter_mut().rev() {
            payload = stage.decode(payload, &mut rsv)?;
        }
        if !rsv.is_empty() {
            return Err(Error::ReservedBitsSet);
        }
        Ok(payload)
    }
}
