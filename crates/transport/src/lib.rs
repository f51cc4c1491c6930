//! sprechfunk-transport – Echtzeit-Transport fuer Sprechfunk
//!
//! - `TransportEngine`: Schnittstelle, ueber die die Session verhandelt
//! - Minimale SDP-Beschreibungen (Adresse, SSRC, Medienrichtung)
//! - `UdpEngine`: Opus-Audio ueber UDP mit Keepalives und Timeouts
//! - `LoopbackEngine`: In-Process-Paar ohne Sockets

pub mod beschreibung;
pub mod engine;
pub mod error;
pub mod loopback;
pub mod packet;
pub mod track;
pub mod udp;

pub use beschreibung::{MedienBeschreibung, Richtung};
pub use engine::{EreignisEmpfaenger, TransportEngine, TransportEreignis};
pub use error::{TransportError, TransportResult};
pub use loopback::LoopbackEngine;
pub use track::KanalTrack;
pub use udp::{UdpEngine, UdpKonfig};
