//! permessage-deflate (RFC 7692).
//!
//! Each negotiation creates one raw-deflate compressor for the outgoing
//! direction and one decompressor for the incoming direction. Both keep
//! their sliding window between messages unless no-context-takeover was
//! agreed for that direction.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::extensions::{
    Extension, ExtensionParam, MessageDecoder, MessageEncoder, RsvBits, Transforms,
};

/// Registered extension name.
pub const NAME: &str = "permessage-deflate";

/// Smallest window zlib can produce raw streams for.
const MIN_WINDOW_BITS: u8 = 9;
const MAX_WINDOW_BITS: u8 = 15;
const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Local preferences for permessage-deflate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    /// As server, always ask to reset our own compressor per message.
    pub server_no_context_takeover: bool,
    /// As server, always ask the client to reset its compressor.
    pub client_no_context_takeover: bool,
    /// As server, the largest window we compress with.
    pub server_max_window_bits: u8,
    /// As server, the window we ask the client to stay within (15 = no ask).
    /// As client, the largest window we compress with.
    pub client_max_window_bits: u8,
    /// zlib level, 0-9.
    pub compression_level: u32,
    /// Bound on an inflated message.
    pub max_message_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
            compression_level: 6,
            max_message_size: 64 * 1024 * 1024,
        }
    }
}

impl DeflateConfig {
    /// Default preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always request `server_no_context_takeover`.
    #[must_use]
    pub const fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    /// Always request `client_no_context_takeover`.
    #[must_use]
    pub const fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// # Errors
    ///
    /// `Error::InvalidExtension` outside 9-15.
    pub fn server_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.server_max_window_bits = check_window_bits(bits)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// `Error::InvalidExtension` outside 9-15.
    pub fn client_max_window_bits(mut self, bits: u8) -> Result<Self> {
        self.client_max_window_bits = check_window_bits(bits)?;
        Ok(self)
    }

    /// # Errors
    ///
    /// `Error::InvalidExtension` above 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {level}"
            )));
        }
        self.compression_level = level;
        Ok(self)
    }

    /// Bound inflated messages.
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

fn check_window_bits(bits: u8) -> Result<u8> {
    if (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        Ok(bits)
    } else {
        Err(Error::InvalidExtension(format!(
            "window bits must be {MIN_WINDOW_BITS}-{MAX_WINDOW_BITS}, got {bits}"
        )))
    }
}

fn parse_window_bits(value: &str) -> Result<u8> {
    // RFC 7692 allows 8 on the wire; zlib's raw deflate does not.
    let bits: u8 = value
        .parse()
        .ok()
        .filter(|b| (8..=MAX_WINDOW_BITS).contains(b) && !value.starts_with('0'))
        .ok_or_else(|| Error::InvalidExtension(format!("invalid window bits {value:?}")))?;
    check_window_bits(bits)
}

/// Parameters as they appeared in one offer or response.
#[derive(Debug, Default)]
struct Params {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    /// Outer `Some` when present; inner value absent for the bare flag.
    client_max_window_bits: Option<Option<u8>>,
}

impl Params {
    fn parse(params: &[ExtensionParam]) -> Result<Self> {
        let mut parsed = Self::default();
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(Error::InvalidExtension(format!(
                    "duplicate parameter {}",
                    param.name
                )));
            }
            match (param.name.as_str(), param.value.as_deref()) {
                (SERVER_NO_CONTEXT_TAKEOVER, None) => parsed.server_no_context_takeover = true,
                (CLIENT_NO_CONTEXT_TAKEOVER, None) => parsed.client_no_context_takeover = true,
                (SERVER_MAX_WINDOW_BITS, Some(v)) => {
                    parsed.server_max_window_bits = Some(parse_window_bits(v)?);
                }
                (CLIENT_MAX_WINDOW_BITS, None) => parsed.client_max_window_bits = Some(None),
                (CLIENT_MAX_WINDOW_BITS, Some(v)) => {
                    parsed.client_max_window_bits = Some(Some(parse_window_bits(v)?));
                }
                _ => {
                    return Err(Error::InvalidExtension(format!(
                        "unsupported parameter {param}"
                    )));
                }
            }
        }
        Ok(parsed)
    }
}

/// permessage-deflate extension with static preferences.
#[derive(Debug, Clone, Default)]
pub struct DeflateExtension {
    config: DeflateConfig,
}

impl DeflateExtension {
    /// Extension with the given preferences.
    #[must_use]
    pub const fn new(config: DeflateConfig) -> Self {
        Self { config }
    }

    fn transforms(
        &self,
        compress_window: u8,
        compress_reset: bool,
        decompress_reset: bool,
    ) -> Transforms {
        Transforms {
            encoder: Box::new(Deflater::new(
                self.config.compression_level,
                compress_window,
                compress_reset,
            )),
            decoder: Box::new(Inflater::new(
                decompress_reset,
                self.config.max_message_size,
            )),
        }
    }
}

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn offer_params(&self) -> Vec<ExtensionParam> {
        let mut params = Vec::new();
        if self.config.server_no_context_takeover {
            params.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if self.config.client_no_context_takeover {
            params.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.config.server_max_window_bits < MAX_WINDOW_BITS {
            params.push(ExtensionParam::new(
                SERVER_MAX_WINDOW_BITS,
                self.config.server_max_window_bits.to_string(),
            ));
        }
        // Tell the server it may limit our window.
        params.push(ExtensionParam::flag(CLIENT_MAX_WINDOW_BITS));
        params
    }

    fn accept(&self, params: &[ExtensionParam]) -> Result<(Vec<ExtensionParam>, Transforms)> {
        let offer = Params::parse(params)?;
        let mut response = Vec::new();

        let server_reset = offer.server_no_context_takeover || self.config.server_no_context_takeover;
        if server_reset {
            response.push(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }

        let client_reset = offer.client_no_context_takeover || self.config.client_no_context_takeover;
        if client_reset {
            response.push(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }

        let server_window = offer
            .server_max_window_bits
            .map_or(self.config.server_max_window_bits, |bits| {
                bits.min(self.config.server_max_window_bits)
            });
        if offer.server_max_window_bits.is_some() || server_window < MAX_WINDOW_BITS {
            response.push(ExtensionParam::new(
                SERVER_MAX_WINDOW_BITS,
                server_window.to_string(),
            ));
        }

        // We may only limit the client's window if it said we could.
        if let Some(offered) = offer.client_max_window_bits {
            let wanted = offered.map_or(self.config.client_max_window_bits, |bits| {
                bits.min(self.config.client_max_window_bits)
            });
            if wanted < MAX_WINDOW_BITS {
                response.push(ExtensionParam::new(CLIENT_MAX_WINDOW_BITS, wanted.to_string()));
            }
        }

        Ok((response, self.transforms(server_window, server_reset, client_reset)))
    }

    fn configure(&self, params: &[ExtensionParam]) -> Result<Transforms> {
        let response = Params::parse(params)?;
        let client_window = match response.client_max_window_bits {
            Some(Some(bits)) => bits.min(self.config.client_max_window_bits),
            Some(None) => {
                return Err(Error::InvalidExtension(
                    "client_max_window_bits in a response needs a value".into(),
                ));
            }
            None => self.config.client_max_window_bits,
        };
        if let Some(bits) = response.server_max_window_bits
            && bits > self.config.server_max_window_bits
        {
            return Err(Error::InvalidExtension(format!(
                "server_max_window_bits={bits} exceeds the offered limit"
            )));
        }
        Ok(self.transforms(
            client_window,
            response.client_no_context_takeover,
            response.server_no_context_takeover,
        ))
    }
}

/// Outgoing half: compresses whole messages and sets RSV1.
pub struct Deflater {
    compress: Compress,
    reset_each_message: bool,
}

impl Deflater {
    /// Raw deflate compressor with the given window.
    #[must_use]
    pub fn new(level: u32, window_bits: u8, reset_each_message: bool) -> Self {
        Self {
            compress: Compress::new_with_window_bits(
                Compression::new(level),
                false,
                window_bits.clamp(MIN_WINDOW_BITS, MAX_WINDOW_BITS),
            ),
            reset_each_message,
        }
    }

    /// Compress one message and strip the sync-flush trailer.
    ///
    /// # Errors
    ///
    /// `Error::Extension` if zlib fails.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let start = self.compress.total_in();
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            let consumed = usize::try_from(self.compress.total_in() - start)
                .map_err(|e| Error::Extension(e.to_string()))?;
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            self.compress
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("deflate failed: {e}")))?;
            let consumed = usize::try_from(self.compress.total_in() - start)
                .map_err(|e| Error::Extension(e.to_string()))?;
            // Spare room left after a sync flush means the flush completed.
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&SYNC_TRAILER) {
            out.truncate(out.len() - SYNC_TRAILER.len());
        }
        if self.reset_each_message {
            self.compress.reset();
        }
        Ok(out)
    }
}

impl MessageEncoder for Deflater {
    fn encode(&mut self, payload: Vec<u8>, rsv: &mut RsvBits) -> Result<Vec<u8>> {
        if payload.is_empty() {
            return Ok(payload);
        }
        let compressed = self.compress(&payload)?;
        *rsv = *rsv | RsvBits::RSV1;
        Ok(compressed)
    }
}

/// Incoming half: inflates messages that arrive with RSV1.
pub struct Inflater {
    decompress: Decompress,
    reset_each_message: bool,
    max_size: usize,
}

impl Inflater {
    /// Raw inflater accepting any window up to 15 bits.
    #[must_use]
    pub fn new(reset_each_message: bool, max_size: usize) -> Self {
        Self {
            decompress: Decompress::new_with_window_bits(false, MAX_WINDOW_BITS),
            reset_each_message,
            max_size,
        }
    }

    /// Inflate one message (trailer already stripped by the sender).
    ///
    /// # Errors
    ///
    /// `Error::Extension` for corrupt data, `Error::MessageTooLarge` if the
    /// output exceeds the bound.
    pub fn decompress(&mut self, mut input: Vec<u8>) -> Result<Vec<u8>> {
        input.extend_from_slice(&SYNC_TRAILER);
        let start = self.decompress.total_in();
        let mut out = Vec::with_capacity((input.len() * 3).min(self.max_size.max(64)));
        let mut stream_end = false;

        loop {
            let consumed = usize::try_from(self.decompress.total_in() - start)
                .map_err(|e| Error::Extension(e.to_string()))?;
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let before_out = out.len();
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("inflate failed: {e}")))?;

            if out.len() > self.max_size {
                return Err(Error::MessageTooLarge {
                    size: out.len(),
                    max: self.max_size,
                });
            }

            let now_consumed = usize::try_from(self.decompress.total_in() - start)
                .map_err(|e| Error::Extension(e.to_string()))?;
            if status == Status::StreamEnd {
                stream_end = true;
                break;
            }
            if now_consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if now_consumed == consumed && out.len() == before_out && out.len() < out.capacity() {
                return Err(Error::Extension("inflate made no progress".into()));
            }
        }

        // A final block ends the stream; the next message starts afresh.
        if self.reset_each_message || stream_end {
            self.decompress.reset(false);
        }
        Ok(out)
    }
}

impl MessageDecoder for Inflater {
    fn decode(&mut self, payload: Vec<u8>, rsv: &mut RsvBits) -> Result<Vec<u8>> {
        if !rsv.contains(RsvBits::RSV1) {
            return Ok(payload);
        }
        *rsv = rsv.difference(RsvBits::RSV1);
        self.decompress(payload)
    }
}
