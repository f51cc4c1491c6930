//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus fuer das feste Frame-Format (48 kHz, Mono, 20 ms,
//! s16-Samples). Wird vom UDP-Transport fuer die Medienpakete genutzt.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use sprechfunk_core::{AudioFrame, CHUNK};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Standard-Bitrate fuer Sprache
pub const STANDARD_BITRATE_BPS: i32 = 32_000;

/// Maximale Groesse eines kodierten Frames
const MAX_PAKET_BYTES: usize = 4000;

/// Opus-Encoder: kodiert einen `AudioFrame` zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
}

impl OpusEncoder {
    pub fn new(bitrate_bps: i32) -> AudioResult<Self> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate_bps))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!(bitrate_bps, "OpusEncoder erstellt");
        Ok(Self { encoder })
    }

    /// Kodiert einen Frame (exakt `CHUNK` Samples)
    pub fn encode(&mut self, frame: &AudioFrame) -> AudioResult<Vec<u8>> {
        let mut output = vec![0u8; MAX_PAKET_BYTES];
        let written = self
            .encoder
            .encode(frame.samples(), &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        output.truncate(written);
        Ok(output)
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu einem `AudioFrame`
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(Self { decoder })
    }

    /// Dekodiert ein Paket zum Frame mit dem gegebenen Zeitstempel
    pub fn decode(&mut self, opus_data: &[u8], pts: u64) -> AudioResult<AudioFrame> {
        let mut output = vec![0i16; CHUNK];
        let decoded = self
            .decoder
            .decode(Some(opus_data), &mut output, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        output.truncate(decoded);
        Ok(AudioFrame::neu(output, pts))
    }

    /// Packet Loss Concealment fuer einen fehlenden Frame
    pub fn decode_plc(&mut self, pts: u64) -> AudioResult<AudioFrame> {
        let mut output = vec![0i16; CHUNK];
        let decoded = self
            .decoder
            .decode(None::<&[u8]>, &mut output, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        output.truncate(decoded);
        Ok(AudioFrame::neu(output, pts))
    }
}
