//! Audio-Geraete-Schnittstelle und cpal-Backend
//!
//! `AudioBackend` oeffnet Capture- und Wiedergabe-Geraete. Jedes geoeffnete
//! Geraet gehoert genau einer Komponente (Audio-Quelle bzw.
//! Wiedergabe-Senke) und wird von ihr geschlossen.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use sprechfunk_core::{CHUNK, KANAELE, SAMPLE_RATE};
use tracing::{debug, warn};

use crate::capture::CpalCapture;
use crate::error::{AudioError, AudioResult};
use crate::playback::CpalWiedergabe;

/// Parameter beim Oeffnen eines Geraets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeraeteKonfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl
    pub kanaele: u16,
    /// Samples pro Lesevorgang
    pub chunk: usize,
}

impl Default for GeraeteKonfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            kanaele: KANAELE,
            chunk: CHUNK,
        }
    }
}

impl GeraeteKonfig {
    /// Ring-Buffer-Kapazitaet: 2 Sekunden
    pub fn puffer_samples(&self) -> usize {
        self.sample_rate as usize * self.kanaele as usize * 2
    }
}

/// Geoeffnetes Aufnahmegeraet
pub trait CaptureGeraet: Send {
    /// Liest genau `samples` Samples.
    ///
    /// Overflow und Underflow sind keine Fehler: fehlende Samples werden
    /// als Stille geliefert, aufgestaute verworfen.
    fn lesen(&mut self, samples: usize) -> AudioResult<Vec<i16>>;

    /// Stoppt und schliesst das Geraet. Mehrfacher Aufruf ist harmlos.
    fn schliessen(&mut self);
}

/// Geoeffnetes Wiedergabegeraet
pub trait WiedergabeGeraet: Send {
    /// Schreibt Samples in Reihenfolge auf das Ausgabegeraet
    fn schreiben(&mut self, samples: &[i16]) -> AudioResult<()>;

    /// Stoppt und schliesst das Geraet. Mehrfacher Aufruf ist harmlos.
    fn schliessen(&mut self);
}

/// Fabrik fuer Capture- und Wiedergabegeraete
pub trait AudioBackend: Send + Sync + 'static {
    fn capture_oeffnen(&self, konfig: &GeraeteKonfig) -> AudioResult<Box<dyn CaptureGeraet>>;

    fn wiedergabe_oeffnen(&self, konfig: &GeraeteKonfig)
        -> AudioResult<Box<dyn WiedergabeGeraet>>;
}

// ---------------------------------------------------------------------------
// cpal-Backend
// ---------------------------------------------------------------------------

/// Backend fuer echte Audio-Hardware via cpal
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Teilstring des Eingabegeraet-Namens (None = Standard)
    pub eingabegeraet: Option<String>,
    /// Teilstring des Ausgabegeraet-Namens (None = Standard)
    pub ausgabegeraet: Option<String>,
}

impl AudioBackend for CpalBackend {
    fn capture_oeffnen(&self, konfig: &GeraeteKonfig) -> AudioResult<Box<dyn CaptureGeraet>> {
        let capture = CpalCapture::oeffnen(self.eingabegeraet.clone(), konfig.clone())?;
        Ok(Box::new(capture))
    }

    fn wiedergabe_oeffnen(
        &self,
        konfig: &GeraeteKonfig,
    ) -> AudioResult<Box<dyn WiedergabeGeraet>> {
        let wiedergabe = CpalWiedergabe::oeffnen(self.ausgabegeraet.clone(), konfig.clone())?;
        Ok(Box::new(wiedergabe))
    }
}

/// Anzeigeinformationen zu einem Audio-Geraet
#[derive(Debug, Clone)]
pub struct GeraeteInfo {
    pub name: String,
    pub ist_standard: bool,
}

/// Listet alle Eingabegeraete des Standard-Hosts auf
pub fn eingabegeraete_auflisten() -> AudioResult<Vec<GeraeteInfo>> {
    let host = cpal::default_host();
    let standard = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    Ok(geraete_sammeln(devices, standard.as_deref()))
}

/// Listet alle Ausgabegeraete des Standard-Hosts auf
pub fn ausgabegeraete_auflisten() -> AudioResult<Vec<GeraeteInfo>> {
    let host = cpal::default_host();
    let standard = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    Ok(geraete_sammeln(devices, standard.as_deref()))
}

fn geraete_sammeln(devices: impl Iterator<Item = Device>, standard: Option<&str>) -> Vec<GeraeteInfo> {
    let mut result = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) => result.push(GeraeteInfo {
                ist_standard: standard == Some(name.as_str()),
                name,
            }),
            Err(e) => warn!("Geraetename nicht lesbar: {}", e),
        }
    }
    debug!("Gefundene Geraete: {}", result.len());
    result
}

/// Laedt ein cpal-Eingabegeraet anhand eines Namens-Teilstrings
pub(crate) fn cpal_eingabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(n) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            geraet_nach_name(devices, n)
        }
    }
}

/// Laedt ein cpal-Ausgabegeraet anhand eines Namens-Teilstrings
pub(crate) fn cpal_ausgabegeraet_laden(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(n) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            geraet_nach_name(devices, n)
        }
    }
}

fn geraet_nach_name(mut devices: impl Iterator<Item = Device>, name: &str) -> AudioResult<Device> {
    devices
        .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
        .ok_or_else(|| AudioError::GeraetNichtGefunden(name.to_string()))
}
