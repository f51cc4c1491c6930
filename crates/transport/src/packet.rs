//! Medienpakete (UDP)
//!
//! ## Paketformat (Header = 16 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version
//!  1       1   PaketTyp (0 = Audio, 1 = Keepalive)
//!  2       2   Flags (big-endian)
//!  4       4   Sequenznummer (big-endian)
//!  8       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//! 12       4   SSRC (big-endian)
//! 16+      N   Nutzdaten (Opus-Bytes, bei Keepalive leer)
//! ```

use crate::error::{TransportError, TransportResult};

/// Aktuelle Paketversion
pub const PAKET_VERSION: u8 = 1;

/// Maximale Nutzdaten-Laenge
pub const MAX_NUTZDATEN_LAENGE: usize = 1280;

/// Bit-Masken fuer das Flags-Feld
pub struct PaketFlags;

impl PaketFlags {
    /// Frame war Stille, Nutzdaten sind leer
    pub const STILLE: u16 = 0x0004;
}

/// Art des Medienpakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PaketTyp {
    Audio = 0,
    Keepalive = 1,
}

impl PaketTyp {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Audio),
            1 => Some(Self::Keepalive),
            _ => None,
        }
    }
}

/// 16-Byte Header eines Medienpakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaketKopf {
    pub version: u8,
    pub typ: PaketTyp,
    pub flags: u16,
    /// Monoton steigend pro Sender
    pub sequenz: u32,
    /// 48 kHz-Ticks
    pub zeitstempel: u32,
    pub ssrc: u32,
}

impl PaketKopf {
    pub const SIZE: usize = 16;

    pub fn neu(typ: PaketTyp, flags: u16, sequenz: u32, zeitstempel: u32, ssrc: u32) -> Self {
        Self {
            version: PAKET_VERSION,
            typ,
            flags,
            sequenz,
            zeitstempel,
            ssrc,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.typ as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequenz.to_be_bytes());
        buf[8..12].copy_from_slice(&self.zeitstempel.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> TransportResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(TransportError::UngueltigesPaket(format!(
                "Header zu kurz: {} Bytes (erwartet {})",
                buf.len(),
                Self::SIZE
            )));
        }
        if buf[0] != PAKET_VERSION {
            return Err(TransportError::UngueltigesPaket(format!(
                "Ungueltige Version: {} (erwartet {})",
                buf[0], PAKET_VERSION
            )));
        }
        let typ = PaketTyp::from_u8(buf[1]).ok_or_else(|| {
            TransportError::UngueltigesPaket(format!("Unbekannter PaketTyp: {}", buf[1]))
        })?;

        Ok(Self {
            version: buf[0],
            typ,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            sequenz: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            zeitstempel: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            ssrc: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    pub fn hat_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// Vollstaendiges Medienpaket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedienPaket {
    pub kopf: PaketKopf,
    pub nutzdaten: Vec<u8>,
}

impl MedienPaket {
    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        if self.nutzdaten.len() > MAX_NUTZDATEN_LAENGE {
            return Err(TransportError::UngueltigesPaket(format!(
                "Nutzdaten zu lang: {} Bytes",
                self.nutzdaten.len()
            )));
        }
        let mut buf = Vec::with_capacity(PaketKopf::SIZE + self.nutzdaten.len());
        buf.extend_from_slice(&self.kopf.encode());
        buf.extend_from_slice(&self.nutzdaten);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> TransportResult<Self> {
        let kopf = PaketKopf::decode(buf)?;
        let nutzdaten = &buf[PaketKopf::SIZE..];
        if nutzdaten.len() > MAX_NUTZDATEN_LAENGE {
            return Err(TransportError::UngueltigesPaket(format!(
                "Nutzdaten zu lang: {} Bytes",
                nutzdaten.len()
            )));
        }
        Ok(Self {
            kopf,
            nutzdaten: nutzdaten.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kopf_ist_big_endian() {
        let kopf = PaketKopf::neu(PaketTyp::Audio, PaketFlags::STILLE, 0x01020304, 960, 7);
        let bytes = kopf.encode();
        assert_eq!(bytes[0], PAKET_VERSION);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[2..4], &[0x00, 0x04]);
        assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);
        assert_eq!(PaketKopf::decode(&bytes).unwrap(), kopf);
        assert!(kopf.hat_flag(PaketFlags::STILLE));
    }

    #[test]
    fn ungueltige_pakete_abgelehnt() {
        assert!(PaketKopf::decode(&[1, 0, 0]).is_err());

        let mut bytes = PaketKopf::neu(PaketTyp::Keepalive, 0, 0, 0, 0).encode();
        bytes[0] = 9;
        assert!(PaketKopf::decode(&bytes).is_err());

        bytes[0] = PAKET_VERSION;
        bytes[1] = 42;
        assert!(PaketKopf::decode(&bytes).is_err());
    }

    #[test]
    fn zu_lange_nutzdaten() {
        let paket = MedienPaket {
            kopf: PaketKopf::neu(PaketTyp::Audio, 0, 1, 0, 1),
            nutzdaten: vec![0; MAX_NUTZDATEN_LAENGE + 1],
        };
        assert!(paket.encode().is_err());
    }

    #[test]
    fn keepalive_ohne_nutzdaten() {
        let paket = MedienPaket {
            kopf: PaketKopf::neu(PaketTyp::Keepalive, 0, 3, 0, 99),
            nutzdaten: Vec::new(),
        };
        let bytes = paket.encode().unwrap();
        assert_eq!(bytes.len(), PaketKopf::SIZE);
        assert_eq!(MedienPaket::decode(&bytes).unwrap(), paket);
    }
}
