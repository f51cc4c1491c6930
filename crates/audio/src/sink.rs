//! Wiedergabe-Senke fuer einen eingehenden Track
//!
//! Zieht dekodierte Frames in einer Schleife, bis der Track endet oder
//! fehlschlaegt, und schreibt jeden Frame in Reihenfolge auf das
//! Ausgabegeraet. Das Ende des Tracks ist ein normales Stream-Ende,
//! kein Prozessfehler. Danach wird das Geraet geschlossen.

use sprechfunk_core::{EingehenderTrack, TrackEnde};
use tracing::{debug, info};

use crate::device::WiedergabeGeraet;

/// Ergebnis eines Senken-Laufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenkenBericht {
    pub track_id: String,
    /// Geschriebene Frames
    pub frames: u64,
    /// Warum die Schleife endete
    pub ende: TrackEnde,
}

/// Bindet genau einen Track an genau ein Ausgabegeraet
pub struct WiedergabeSenke {
    track: Box<dyn EingehenderTrack>,
    geraet: Box<dyn WiedergabeGeraet>,
}

impl WiedergabeSenke {
    pub fn neu(track: Box<dyn EingehenderTrack>, geraet: Box<dyn WiedergabeGeraet>) -> Self {
        Self { track, geraet }
    }

    /// Laeuft bis zum Ende des Tracks und gibt das Geraet frei
    pub async fn laufen(mut self) -> SenkenBericht {
        let track_id = self.track.id().to_string();
        info!(track = %track_id, "Wiedergabe gestartet");

        let mut frames = 0u64;
        let ende = loop {
            let frame = match self.track.empfangen().await {
                Ok(frame) => frame,
                Err(ende) => break ende,
            };
            if let Err(e) = self.geraet.schreiben(frame.samples()) {
                debug!(track = %track_id, fehler = %e, "Schreiben fehlgeschlagen");
                break TrackEnde::Fehler(e.to_string());
            }
            frames += 1;
        };

        self.geraet.schliessen();
        info!(track = %track_id, frames, grund = %ende, "Wiedergabe beendet");

        SenkenBericht {
            track_id,
            frames,
            ende,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AudioBackend, GeraeteKonfig};
    use crate::sim::SimulationsBackend;
    use async_trait::async_trait;
    use sprechfunk_core::AudioFrame;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    struct ListenTrack {
        frames: VecDeque<AudioFrame>,
        ende: TrackEnde,
    }

    #[async_trait]
    impl EingehenderTrack for ListenTrack {
        fn id(&self) -> &str {
            "test-track"
        }

        async fn empfangen(&mut self) -> Result<AudioFrame, TrackEnde> {
            self.frames.pop_front().ok_or_else(|| self.ende.clone())
        }
    }

    fn track(anzahl: usize, ende: TrackEnde) -> Box<ListenTrack> {
        let frames = (0..anzahl)
            .map(|i| AudioFrame::neu(vec![i as i16 + 1; 960], (i * 960) as u64))
            .collect();
        Box::new(ListenTrack { frames, ende })
    }

    #[tokio::test]
    async fn schreibt_alle_frames_in_reihenfolge() {
        let backend = SimulationsBackend::new();
        let geraet = backend.wiedergabe_oeffnen(&GeraeteKonfig::default()).unwrap();

        let bericht = WiedergabeSenke::neu(track(3, TrackEnde::Beendet), geraet)
            .laufen()
            .await;

        assert_eq!(bericht.frames, 3);
        assert_eq!(bericht.ende, TrackEnde::Beendet);
        let samples = backend.aufgezeichnete_samples();
        assert_eq!(samples.len(), 3 * 960);
        assert_eq!(samples[0], 1);
        assert_eq!(samples[960], 2);
        assert_eq!(samples[2 * 960], 3);
        assert_eq!(
            backend.zaehler().wiedergabe_geschlossen.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn transportfehler_beendet_schleife_normal() {
        let backend = SimulationsBackend::new();
        let geraet = backend.wiedergabe_oeffnen(&GeraeteKonfig::default()).unwrap();
        let ende = TrackEnde::Fehler("Verbindung weg".into());

        let bericht = WiedergabeSenke::neu(track(1, ende.clone()), geraet)
            .laufen()
            .await;

        assert_eq!(bericht.frames, 1);
        assert_eq!(bericht.ende, ende);
        assert_eq!(
            backend.zaehler().wiedergabe_geschlossen.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn schreibfehler_beendet_schleife() {
        let backend = SimulationsBackend::new().mit_defekter_wiedergabe();
        let geraet = backend.wiedergabe_oeffnen(&GeraeteKonfig::default()).unwrap();

        let bericht = WiedergabeSenke::neu(track(5, TrackEnde::Beendet), geraet)
            .laufen()
            .await;

        assert_eq!(bericht.frames, 0);
        assert!(matches!(bericht.ende, TrackEnde::Fehler(_)));
        assert_eq!(
            backend.zaehler().wiedergabe_geschlossen.load(Ordering::SeqCst),
            1
        );
    }
}
