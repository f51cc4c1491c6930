//! Publish/Subscribe-Bus fuer Signaling-Nachrichten
//!
//! Zustellung hoechstens einmal, ohne Bestaetigung auf Anwendungsebene.
//! Rueckrufe laufen im Kontext des Bus (eigene Tasks), nie im
//! Session-Executor.

pub mod broker;
pub mod speicher;
pub mod tcp;
pub mod wire;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::SignalingResult;

pub use broker::BusBroker;
pub use speicher::{SpeicherBus, SpeicherClient};
pub use tcp::{TcpBus, TcpBusKonfig};

/// Eine zugestellte Bus-Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusNachricht {
    pub thema: String,
    pub payload: Bytes,
}

/// Rueckruf fuer zugestellte Nachrichten eines Abos
pub type Rueckruf = Arc<dyn Fn(BusNachricht) + Send + Sync>;

/// Client-Seite eines Nachrichten-Bus
#[async_trait]
pub trait NachrichtenBus: Send + Sync + 'static {
    /// Abonniert ein Thema. Mehrfaches Abonnieren desselben Themas liefert
    /// jede Nachricht an jeden Rueckruf.
    async fn abonnieren(&self, thema: &str, rueckruf: Rueckruf) -> SignalingResult<()>;

    /// Veroeffentlicht eine Nachricht (fire-and-forget)
    fn veroeffentlichen(&self, thema: &str, payload: Bytes) -> SignalingResult<()>;

    /// Wartet, bis Veroeffentlichungen den Bus erreichen koennen. false,
    /// wenn der Bus vorher getrennt wurde.
    async fn bereit(&self) -> bool {
        true
    }

    /// Beendet alle Abos und die Verbindung. Mehrfacher Aufruf ist ein No-op.
    async fn trennen(&self);
}
