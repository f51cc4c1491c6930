//! Simulierte Audio-Geraete
//!
//! Fuer Tests und Betrieb ohne Audio-Hardware: die Aufnahme liefert einen
//! Sinuston, die Wiedergabe zeichnet alle geschriebenen Samples auf.
//! Zaehler halten fest, wie oft Geraete geoeffnet und geschlossen wurden.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::{AudioBackend, CaptureGeraet, GeraeteKonfig, WiedergabeGeraet};
use crate::error::{AudioError, AudioResult};

/// Oeffnungs- und Schliesszaehler aller Geraete eines Backends
#[derive(Debug, Default)]
pub struct GeraeteZaehler {
    pub capture_geoeffnet: AtomicUsize,
    pub capture_geschlossen: AtomicUsize,
    pub wiedergabe_geoeffnet: AtomicUsize,
    pub wiedergabe_geschlossen: AtomicUsize,
}

/// Backend mit simulierten Geraeten
#[derive(Clone)]
pub struct SimulationsBackend {
    frequenz_hz: f32,
    amplitude: i16,
    capture_defekt: bool,
    wiedergabe_defekt: bool,
    zaehler: Arc<GeraeteZaehler>,
    aufzeichnung: Arc<Mutex<Vec<i16>>>,
}

impl Default for SimulationsBackend {
    fn default() -> Self {
        Self {
            frequenz_hz: 440.0,
            amplitude: 8_000,
            capture_defekt: false,
            wiedergabe_defekt: false,
            zaehler: Arc::new(GeraeteZaehler::default()),
            aufzeichnung: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SimulationsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jeder Lesevorgang schlaegt fehl
    pub fn mit_defektem_capture(mut self) -> Self {
        self.capture_defekt = true;
        self
    }

    /// Jeder Schreibvorgang schlaegt fehl
    pub fn mit_defekter_wiedergabe(mut self) -> Self {
        self.wiedergabe_defekt = true;
        self
    }

    pub fn zaehler(&self) -> &GeraeteZaehler {
        &self.zaehler
    }

    /// Kopie aller bisher wiedergegebenen Samples
    pub fn aufgezeichnete_samples(&self) -> Vec<i16> {
        self.aufzeichnung.lock().clone()
    }
}

impl AudioBackend for SimulationsBackend {
    fn capture_oeffnen(&self, konfig: &GeraeteKonfig) -> AudioResult<Box<dyn CaptureGeraet>> {
        self.zaehler.capture_geoeffnet.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TonCapture {
            schritt: self.frequenz_hz / konfig.sample_rate as f32,
            phase: 0.0,
            amplitude: self.amplitude,
            defekt: self.capture_defekt,
            offen: true,
            zaehler: Arc::clone(&self.zaehler),
        }))
    }

    fn wiedergabe_oeffnen(
        &self,
        _konfig: &GeraeteKonfig,
    ) -> AudioResult<Box<dyn WiedergabeGeraet>> {
        self.zaehler
            .wiedergabe_geoeffnet
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(AufzeichnungsWiedergabe {
            defekt: self.wiedergabe_defekt,
            offen: true,
            zaehler: Arc::clone(&self.zaehler),
            aufzeichnung: Arc::clone(&self.aufzeichnung),
        }))
    }
}

/// Aufnahme, die einen Sinuston erzeugt
struct TonCapture {
    /// Phasenschritt pro Sample (Perioden)
    schritt: f32,
    phase: f32,
    amplitude: i16,
    defekt: bool,
    offen: bool,
    zaehler: Arc<GeraeteZaehler>,
}

impl CaptureGeraet for TonCapture {
    fn lesen(&mut self, samples: usize) -> AudioResult<Vec<i16>> {
        if !self.offen {
            return Err(AudioError::GeraetGeschlossen);
        }
        if self.defekt {
            return Err(AudioError::StreamFehler("simulierter Lesefehler".into()));
        }
        let mut puffer = Vec::with_capacity(samples);
        for _ in 0..samples {
            let wert = (self.phase * std::f32::consts::TAU).sin() * self.amplitude as f32;
            // Nullstellen vermeiden, damit jeder Ton-Frame sicher nicht still ist
            let sample = wert as i16;
            puffer.push(if sample == 0 { 1 } else { sample });
            self.phase = (self.phase + self.schritt).fract();
        }
        Ok(puffer)
    }

    fn schliessen(&mut self) {
        if self.offen {
            self.offen = false;
            self.zaehler
                .capture_geschlossen
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Wiedergabe, die Samples aufzeichnet
struct AufzeichnungsWiedergabe {
    defekt: bool,
    offen: bool,
    zaehler: Arc<GeraeteZaehler>,
    aufzeichnung: Arc<Mutex<Vec<i16>>>,
}

impl WiedergabeGeraet for AufzeichnungsWiedergabe {
    fn schreiben(&mut self, samples: &[i16]) -> AudioResult<()> {
        if !self.offen {
            return Err(AudioError::GeraetGeschlossen);
        }
        if self.defekt {
            return Err(AudioError::StreamFehler("simulierter Schreibfehler".into()));
        }
        self.aufzeichnung.lock().extend_from_slice(samples);
        Ok(())
    }

    fn schliessen(&mut self) {
        if self.offen {
            self.offen = false;
            self.zaehler
                .wiedergabe_geschlossen
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}
