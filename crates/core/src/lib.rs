//! sprechfunk-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sprechfunk-Crates gemeinsam genutzt werden: Rollen, Signaling-
//! Nachrichten, Session-Beschreibungen und das Audio-Frame-Format.

pub mod error;
pub mod frame;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SprechfunkError};
pub use frame::{
    AudioFrame, EingehenderTrack, FrameQuelle, TrackEnde, CHUNK, FRAME_DAUER, KANAELE,
    SAMPLE_RATE,
};
pub use types::{
    BeschreibungsTyp, Rolle, SessionBeschreibung, SignalingAusgang, SignalingNachricht, Thema,
    ThemenNamen, Verbindungszustand,
};
