//! Endpunkt-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Endpunkt ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use sprechfunk_audio::{GeraeteKonfig, PttModus};
use sprechfunk_core::{Rolle, SprechfunkError, ThemenNamen, CHUNK, KANAELE, SAMPLE_RATE};
use sprechfunk_transport::UdpKonfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Vollstaendige Endpunkt-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpunktConfig {
    /// Rolle und Kennung
    pub endpunkt: EndpunktEinstellungen,
    /// Verbindung zum Signaling-Bus
    pub bus: BusEinstellungen,
    /// Bus-Themennamen (beide Parteien muessen uebereinstimmen)
    pub themen: ThemenNamen,
    /// Audio-Geraete
    pub audio: AudioEinstellungen,
    /// Push-to-Talk
    pub ptt: PttEinstellungen,
    /// Medientransport
    pub transport: TransportEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken)
    pub observability: ObservabilityEinstellungen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpunktEinstellungen {
    pub rolle: Rolle,
    /// Kennung in Logs (leer = Rollenname)
    pub client_id: Option<String>,
}

impl Default for EndpunktEinstellungen {
    fn default() -> Self {
        Self {
            rolle: Rolle::Caller,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusEinstellungen {
    /// Adresse des `sprechfunk broker`
    pub broker_adresse: SocketAddr,
    /// Wartezeit zwischen Verbindungsversuchen
    pub reconnect_ms: u64,
}

impl Default for BusEinstellungen {
    fn default() -> Self {
        Self {
            broker_adresse: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1883),
            reconnect_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    pub sample_rate: u32,
    pub kanaele: u16,
    pub chunk: usize,
    /// Teilstring des Eingabegeraet-Namens (leer = Standard)
    pub eingabegeraet: Option<String>,
    /// Teilstring des Ausgabegeraet-Namens (leer = Standard)
    pub ausgabegeraet: Option<String>,
    /// Simulierte Geraete statt Hardware
    pub simulation: bool,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            kanaele: KANAELE,
            chunk: CHUNK,
            eingabegeraet: None,
            ausgabegeraet: None,
            simulation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PttEinstellungen {
    pub modus: PttModus,
    pub abfrage_intervall_ms: u64,
}

impl Default for PttEinstellungen {
    fn default() -> Self {
        Self {
            modus: PttModus::Hold,
            abfrage_intervall_ms: 10,
        }
    }
}

/// Auswahl der Transport-Engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineArt {
    /// Opus ueber UDP zwischen zwei Prozessen
    #[default]
    Udp,
    /// Beide Rollen im selben Prozess (Demo)
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportEinstellungen {
    pub engine: EngineArt,
    /// Lokale UDP-Adresse (Port 0 = beliebig)
    pub bind_adresse: SocketAddr,
    /// In der Beschreibung angekuendigte IP (leer = automatisch)
    pub angekuendigte_ip: Option<IpAddr>,
    pub verbindungs_timeout_ms: u64,
    pub aufbau_timeout_ms: u64,
}

impl Default for TransportEinstellungen {
    fn default() -> Self {
        Self {
            engine: EngineArt::Udp,
            bind_adresse: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            angekuendigte_ip: None,
            verbindungs_timeout_ms: 5_000,
            aufbau_timeout_ms: 15_000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den /metrics-Endpunkt
    pub aktiviert: bool,
    pub bind_adresse: SocketAddr,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            bind_adresse: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9300),
        }
    }
}

fn konfig_fehler(msg: impl Into<String>) -> SprechfunkError {
    SprechfunkError::Konfiguration(msg.into())
}

impl EndpunktConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: impl AsRef<Path>) -> anyhow::Result<Self> {
        let pfad = pfad.as_ref();
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt).map_err(|e| {
                    anyhow::anyhow!("Konfigurationsfehler in '{}': {e}", pfad.display())
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = %pfad.display(),
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{}' nicht lesbar: {e}",
                pfad.display()
            )),
        }
    }

    /// Prueft Werte, auf die sich beide Parteien verlassen
    pub fn validieren(&self) -> sprechfunk_core::Result<()> {
        if self.audio.sample_rate != SAMPLE_RATE {
            return Err(konfig_fehler(format!(
                "audio.sample_rate muss {SAMPLE_RATE} sein, nicht {}",
                self.audio.sample_rate
            )));
        }
        if self.audio.kanaele != KANAELE {
            return Err(konfig_fehler(format!(
                "audio.kanaele muss {KANAELE} sein, nicht {}",
                self.audio.kanaele
            )));
        }
        if self.audio.chunk != CHUNK {
            return Err(konfig_fehler(format!(
                "audio.chunk muss {CHUNK} sein, nicht {}",
                self.audio.chunk
            )));
        }
        if self.ptt.abfrage_intervall_ms == 0 {
            return Err(konfig_fehler("ptt.abfrage_intervall_ms darf nicht 0 sein"));
        }
        if self.bus.reconnect_ms == 0 {
            return Err(konfig_fehler("bus.reconnect_ms darf nicht 0 sein"));
        }
        let themen = [
            &self.themen.offer,
            &self.themen.answer,
            &self.themen.ice_candidate,
        ];
        if themen.iter().any(|t| t.trim().is_empty()) {
            return Err(konfig_fehler("Themennamen duerfen nicht leer sein"));
        }
        if themen[0] == themen[1] || themen[0] == themen[2] || themen[1] == themen[2] {
            return Err(konfig_fehler("Themennamen muessen verschieden sein"));
        }
        Ok(())
    }

    /// Kennung fuer Logs
    pub fn client_id(&self) -> String {
        self.endpunkt
            .client_id
            .clone()
            .unwrap_or_else(|| self.endpunkt.rolle.to_string())
    }

    pub fn geraete_konfig(&self) -> GeraeteKonfig {
        GeraeteKonfig {
            sample_rate: self.audio.sample_rate,
            kanaele: self.audio.kanaele,
            chunk: self.audio.chunk,
        }
    }

    pub fn ptt_intervall(&self) -> Duration {
        Duration::from_millis(self.ptt.abfrage_intervall_ms)
    }

    pub fn udp_konfig(&self) -> UdpKonfig {
        UdpKonfig {
            bind_adresse: self.transport.bind_adresse,
            angekuendigte_ip: self.transport.angekuendigte_ip,
            verbindungs_timeout: Duration::from_millis(self.transport.verbindungs_timeout_ms),
            aufbau_timeout: Duration::from_millis(self.transport.aufbau_timeout_ms),
            ..UdpKonfig::default()
        }
    }
}
