//! Audio-Frame-Format und Medien-Traits
//!
//! Ein `AudioFrame` ist ein Block von exakt `CHUNK` Mono-Samples (s16)
//! bei 48 kHz, also 20 ms Audio. Der Zeitstempel zaehlt in Samples
//! (Zeitbasis 1/48000) und steigt pro Frame um `CHUNK`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Abtastrate in Hz
pub const SAMPLE_RATE: u32 = 48_000;
/// Kanalanzahl (Mono)
pub const KANAELE: u16 = 1;
/// Samples pro Frame: 20 ms bei 48 kHz
pub const CHUNK: usize = 960;
/// Dauer eines Frames
pub const FRAME_DAUER: Duration = Duration::from_millis(20);

/// Ein Audio-Block fester Groesse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    pts: u64,
}

impl AudioFrame {
    /// Erstellt einen Frame aus Samples. Zu kurze Daten werden mit Stille
    /// aufgefuellt, zu lange abgeschnitten.
    pub fn neu(mut samples: Vec<i16>, pts: u64) -> Self {
        samples.resize(CHUNK, 0);
        Self { samples, pts }
    }

    /// Stille-Frame mit identischer Form
    pub fn stille(pts: u64) -> Self {
        Self {
            samples: vec![0; CHUNK],
            pts,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Praesentationszeitstempel in Einheiten der Zeitbasis
    pub fn pts(&self) -> u64 {
        self.pts
    }

    /// Zeitbasis als (Zaehler, Nenner)
    pub fn time_base(&self) -> (u32, u32) {
        (1, SAMPLE_RATE)
    }

    /// true wenn alle Samples null sind
    pub fn ist_stille(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Rohe Sample-Bytes (s16 little-endian)
    pub fn als_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Quelle, aus der der Transport im 20-ms-Takt Frames zieht
pub trait FrameQuelle: Send + 'static {
    /// Liefert den naechsten Frame. Darf nie fehlschlagen.
    fn naechster_frame(&mut self) -> AudioFrame;
}

/// Grund, aus dem ein eingehender Track keine Frames mehr liefert
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackEnde {
    #[error("Stream beendet")]
    Beendet,

    #[error("Transportfehler: {0}")]
    Fehler(String),
}

/// Eingehender Audio-Track der Gegenstelle
#[async_trait]
pub trait EingehenderTrack: Send + 'static {
    /// Eindeutige Track-Kennung innerhalb der Session
    fn id(&self) -> &str;

    /// Wartet auf den naechsten dekodierten Frame
    async fn empfangen(&mut self) -> Result<AudioFrame, TrackEnde>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stille_frame_hat_volle_groesse() {
        let f = AudioFrame::stille(960);
        assert_eq!(f.samples().len(), CHUNK);
        assert!(f.ist_stille());
        assert_eq!(f.pts(), 960);
        assert_eq!(f.time_base(), (1, 48_000));
    }

    #[test]
    fn kurze_daten_werden_aufgefuellt() {
        let f = AudioFrame::neu(vec![7; 100], 0);
        assert_eq!(f.samples().len(), CHUNK);
        assert_eq!(f.samples()[99], 7);
        assert_eq!(f.samples()[100], 0);
        assert!(!f.ist_stille());
    }

    #[test]
    fn lange_daten_werden_abgeschnitten() {
        let f = AudioFrame::neu(vec![1; CHUNK * 2], 0);
        assert_eq!(f.samples().len(), CHUNK);
    }

    #[test]
    fn bytes_sind_little_endian() {
        let mut samples = vec![0i16; CHUNK];
        samples[0] = 0x0102;
        let bytes = AudioFrame::neu(samples, 0).als_bytes();
        assert_eq!(bytes.len(), CHUNK * 2);
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
    }

    #[test]
    fn frame_dauer_passt_zu_chunk() {
        assert_eq!(
            FRAME_DAUER.as_micros() as usize,
            CHUNK * 1_000_000 / SAMPLE_RATE as usize
        );
    }
}
