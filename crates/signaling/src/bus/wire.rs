//! Wire-Format des TCP-Bus
//!
//! Frame-basiert: Laenge (u32 big-endian) + Rumpf.
//!
//! ## Rumpf
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Typ (1 = Abonnieren, 2 = Veroeffentlichen, 3 = Zustellung, 4 = AboBestaetigt)
//!  1       2   Themenlaenge T (big-endian)
//!  3       T   Thema (UTF-8)
//!  3+T     N   Payload (nur Typ 2 und 3, Rest des Frames)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

const TYP_ABONNIEREN: u8 = 1;
const TYP_VEROEFFENTLICHEN: u8 = 2;
const TYP_ZUSTELLUNG: u8 = 3;
const TYP_ABO_BESTAETIGT: u8 = 4;

/// Nachrichten zwischen TCP-Bus-Client und Broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusFrame {
    /// Client -> Broker
    Abonnieren { thema: String },
    /// Client -> Broker
    Veroeffentlichen { thema: String, payload: Bytes },
    /// Broker -> Client
    Zustellung { thema: String, payload: Bytes },
    /// Broker -> Client, Antwort auf `Abonnieren`
    AboBestaetigt { thema: String },
}

impl BusFrame {
    fn typ(&self) -> u8 {
        match self {
            BusFrame::Abonnieren { .. } => TYP_ABONNIEREN,
            BusFrame::Veroeffentlichen { .. } => TYP_VEROEFFENTLICHEN,
            BusFrame::Zustellung { .. } => TYP_ZUSTELLUNG,
            BusFrame::AboBestaetigt { .. } => TYP_ABO_BESTAETIGT,
        }
    }

    fn teile(&self) -> (&str, Option<&Bytes>) {
        match self {
            BusFrame::Abonnieren { thema } | BusFrame::AboBestaetigt { thema } => (thema, None),
            BusFrame::Veroeffentlichen { thema, payload }
            | BusFrame::Zustellung { thema, payload } => (thema, Some(payload)),
        }
    }
}

fn ungueltig(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// tokio-util Codec fuer `BusFrame`
#[derive(Debug, Clone)]
pub struct BusCodec {
    max_frame_size: usize,
}

impl BusCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for BusCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BusCodec {
    type Item = BusFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                length, self.max_frame_size
            )));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let mut rumpf = src.split_to(length);

        if rumpf.len() < 3 {
            return Err(ungueltig("Frame-Rumpf zu kurz"));
        }
        let typ = rumpf.get_u8();
        let themen_laenge = rumpf.get_u16() as usize;
        if rumpf.len() < themen_laenge {
            return Err(ungueltig("Thema laenger als Frame"));
        }
        let thema = String::from_utf8(rumpf.split_to(themen_laenge).to_vec())
            .map_err(|_| ungueltig("Thema ist kein UTF-8"))?;
        let payload = rumpf.freeze();

        let frame = match typ {
            TYP_ABONNIEREN => BusFrame::Abonnieren { thema },
            TYP_VEROEFFENTLICHEN => BusFrame::Veroeffentlichen { thema, payload },
            TYP_ZUSTELLUNG => BusFrame::Zustellung { thema, payload },
            TYP_ABO_BESTAETIGT => BusFrame::AboBestaetigt { thema },
            anderer => return Err(ungueltig(format!("Unbekannter Frame-Typ: {anderer}"))),
        };
        Ok(Some(frame))
    }
}

impl Encoder<BusFrame> for BusCodec {
    type Error = io::Error;

    fn encode(&mut self, item: BusFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (thema, payload) = item.teile();
        if thema.len() > u16::MAX as usize {
            return Err(ungueltig("Thema zu lang"));
        }
        let payload_laenge = payload.map(|p| p.len()).unwrap_or(0);
        let length = 1 + 2 + thema.len() + payload_laenge;
        if length > self.max_frame_size {
            return Err(ungueltig(format!(
                "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                length, self.max_frame_size
            )));
        }

        dst.reserve(LENGTH_FIELD_SIZE + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.typ());
        dst.put_u16(thema.len() as u16);
        dst.put_slice(thema.as_bytes());
        if let Some(payload) = payload {
            dst.put_slice(payload);
        }
        Ok(())
    }
}
