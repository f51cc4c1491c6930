//! Audio-Quelle (ausgehender Track des Callers)
//!
//! Liefert bei jedem Abruf genau einen `AudioFrame`. Der Takt kommt vom
//! Abrufer (Transport, alle 20 ms); der Zeitstempel zaehlt Frames mal
//! `CHUNK`, ohne Wanduhr-Korrektur.
//!
//! - Gate geschlossen: Stille-Frame, das Geraet wird nicht gelesen
//! - Gate offen: genau ein Chunk vom Capture-Geraet
//! - Lesefehler: Frame geht verloren, die Quelle laeuft weiter

use parking_lot::Mutex;
use sprechfunk_core::{AudioFrame, FrameQuelle, CHUNK};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::device::{AudioBackend, CaptureGeraet, GeraeteKonfig};
use crate::error::AudioResult;
use crate::gate::PttGate;

/// Zaehler der Audio-Quelle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuellenStatistik {
    /// Erzeugte Frames insgesamt
    pub frames: u64,
    /// Stille-Frames wegen geschlossenem Gate
    pub stille_frames: u64,
    /// Frames mit Geraete-Lesefehler
    pub lesefehler: u64,
}

struct QuellenZustand {
    capture: Option<Box<dyn CaptureGeraet>>,
    frame_zaehler: u64,
    statistik: QuellenStatistik,
}

/// Audio-Quelle mit PTT-Gate. Clone teilt Geraet und Zaehler.
///
/// Das Capture-Geraet gehoert exklusiv der Quelle; nur `stoppen` gibt es frei.
#[derive(Clone)]
pub struct AudioQuelle {
    gate: PttGate,
    zustand: Arc<Mutex<QuellenZustand>>,
}

impl AudioQuelle {
    /// Oeffnet das Capture-Geraet des Backends
    pub fn oeffnen(
        backend: &dyn AudioBackend,
        konfig: &GeraeteKonfig,
        gate: PttGate,
    ) -> AudioResult<Self> {
        let capture = backend.capture_oeffnen(konfig)?;
        info!(
            sample_rate = konfig.sample_rate,
            chunk = konfig.chunk,
            "Audio-Quelle geoeffnet"
        );
        Ok(Self::aus_geraet(capture, gate))
    }

    /// Uebernimmt ein bereits geoeffnetes Geraet
    pub fn aus_geraet(capture: Box<dyn CaptureGeraet>, gate: PttGate) -> Self {
        Self {
            gate,
            zustand: Arc::new(Mutex::new(QuellenZustand {
                capture: Some(capture),
                frame_zaehler: 0,
                statistik: QuellenStatistik::default(),
            })),
        }
    }

    pub fn gate(&self) -> &PttGate {
        &self.gate
    }

    /// Erzeugt den naechsten Frame
    pub fn frame_erzeugen(&self) -> AudioFrame {
        // Gate vor dem Lock lesen: der kritische Abschnitt des Gates ist
        // ein einzelner atomarer Load
        let sendet = self.gate.is_transmitting();

        let mut zustand = self.zustand.lock();
        let pts = zustand.frame_zaehler * CHUNK as u64;
        zustand.frame_zaehler += 1;
        zustand.statistik.frames += 1;

        if !sendet {
            zustand.statistik.stille_frames += 1;
            return AudioFrame::stille(pts);
        }

        let gelesen = match zustand.capture.as_mut() {
            Some(capture) => capture.lesen(CHUNK),
            None => {
                trace!("Audio-Quelle gestoppt, Stille");
                return AudioFrame::stille(pts);
            }
        };

        match gelesen {
            Ok(samples) => AudioFrame::neu(samples, pts),
            Err(e) => {
                zustand.statistik.lesefehler += 1;
                warn!(fehler = %e, pts, "Capture-Lesefehler, Frame verloren");
                AudioFrame::stille(pts)
            }
        }
    }

    /// Stoppt und schliesst das Capture-Geraet.
    ///
    /// Gibt true zurueck, wenn dieser Aufruf das Geraet geschlossen hat.
    pub fn stoppen(&self) -> bool {
        let capture = self.zustand.lock().capture.take();
        match capture {
            Some(mut capture) => {
                capture.schliessen();
                info!("Audio-Quelle gestoppt");
                true
            }
            None => {
                debug!("Audio-Quelle bereits gestoppt");
                false
            }
        }
    }

    pub fn ist_gestoppt(&self) -> bool {
        self.zustand.lock().capture.is_none()
    }

    pub fn statistik(&self) -> QuellenStatistik {
        self.zustand.lock().statistik.clone()
    }
}

impl FrameQuelle for AudioQuelle {
    fn naechster_frame(&mut self) -> AudioFrame {
        self.frame_erzeugen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulationsBackend;
    use std::sync::atomic::Ordering;

    fn quelle(backend: &SimulationsBackend) -> AudioQuelle {
        AudioQuelle::oeffnen(backend, &GeraeteKonfig::default(), PttGate::new()).unwrap()
    }

    #[test]
    fn ptt_szenario_stille_ton_stille() {
        let backend = SimulationsBackend::new();
        let quelle = quelle(&backend);

        for _ in 0..50 {
            assert!(quelle.frame_erzeugen().ist_stille());
        }

        quelle.gate().set_transmitting(true);
        let frame = quelle.frame_erzeugen();
        assert!(!frame.ist_stille(), "Gate offen: Geraete-Samples erwartet");
        assert_eq!(frame.samples().len(), CHUNK);

        quelle.gate().set_transmitting(false);
        assert!(quelle.frame_erzeugen().ist_stille());

        let statistik = quelle.statistik();
        assert_eq!(statistik.frames, 52);
        assert_eq!(statistik.stille_frames, 51);
    }

    #[test]
    fn zeitstempel_steigen_um_chunk() {
        let backend = SimulationsBackend::new();
        let mut quelle = quelle(&backend);
        let pts: Vec<u64> = (0..4).map(|_| quelle.naechster_frame().pts()).collect();
        assert_eq!(pts, vec![0, 960, 1920, 2880]);
    }

    #[test]
    fn lesefehler_beenden_die_quelle_nicht() {
        let backend = SimulationsBackend::new().mit_defektem_capture();
        let quelle = quelle(&backend);
        quelle.gate().set_transmitting(true);

        for _ in 0..3 {
            let frame = quelle.frame_erzeugen();
            assert_eq!(frame.samples().len(), CHUNK);
        }
        let statistik = quelle.statistik();
        assert_eq!(statistik.lesefehler, 3);
        assert_eq!(statistik.stille_frames, 0);
        assert!(!quelle.ist_gestoppt());
    }

    #[test]
    fn stoppen_ist_idempotent() {
        let backend = SimulationsBackend::new();
        let quelle = quelle(&backend);
        let klon = quelle.clone();

        assert!(quelle.stoppen());
        assert!(!klon.stoppen());
        assert!(quelle.ist_gestoppt());
        assert_eq!(backend.zaehler().capture_geschlossen.load(Ordering::SeqCst), 1);

        // Nach dem Stoppen weiterhin Frames, aber still
        quelle.gate().set_transmitting(true);
        assert!(klon.frame_erzeugen().ist_stille());
    }

    #[test]
    fn gate_wird_nebenlaeufig_gesetzt() {
        let backend = SimulationsBackend::new();
        let quelle = quelle(&backend);
        let gate = quelle.gate().clone();
        std::thread::spawn(move || gate.set_transmitting(true))
            .join()
            .unwrap();
        assert!(!quelle.frame_erzeugen().ist_stille());
    }
}
