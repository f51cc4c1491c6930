//! Fehlertypen fuer Geraete, PTT und Codec

use thiserror::Error;

/// Fehler der Audio-Schicht
///
/// Fehler beim Lesen oder Schreiben einzelner Frames sind fuer Quelle und
/// Senke kein Prozessfehler: die Quelle liefert Stille, die Senke beendet
/// ihren Track.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Kein Geraet passt zum konfigurierten Namens-Teilstring
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    /// Fehler des Geraete-Streams (oeffnen, lesen, schreiben)
    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    /// Opus-Fehler beim Kodieren oder Dekodieren
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    /// Ungueltige Geraete- oder PTT-Parameter
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Zugriff nach `schliessen`
    #[error("Geraet bereits geschlossen")]
    GeraetGeschlossen,

    /// Thread-Start oder Geraete-IO
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;
