//! Fehlertypen fuer Sprechfunk
//!
//! Fehler, die ueber Crate-Grenzen hinweg auftreten. Transport und
//! Signaling definieren eigene Fehler und nehmen diese via `From` auf.

use thiserror::Error;

/// Globaler Result-Alias fuer Sprechfunk
pub type Result<T> = std::result::Result<T, SprechfunkError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum SprechfunkError {
    // --- Protokoll ---
    #[error("Unbekannte Rolle: {0}")]
    UnbekannteRolle(String),

    /// Leere Session-Beschreibung oder unpassender Typ
    #[error("Ungueltige Session-Beschreibung: {0}")]
    UngueltigeBeschreibung(String),

    /// Signaling-Nachricht konnte nicht an den Bus uebergeben werden
    #[error("Senden fehlgeschlagen: {0}")]
    Senden(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}
