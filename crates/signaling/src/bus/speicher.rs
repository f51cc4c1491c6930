//! In-Process-Bus
//!
//! Alle Clients eines `SpeicherBus` teilen sich eine Abo-Tabelle. Jedes
//! Abo bekommt eine eigene Queue und einen eigenen Zustell-Task.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{BusNachricht, NachrichtenBus, Rueckruf};
use crate::error::{SignalingError, SignalingResult};

struct Abo {
    client: u64,
    tx: mpsc::UnboundedSender<BusNachricht>,
}

/// Gemeinsames Medium aller In-Process-Clients
#[derive(Clone, Default)]
pub struct SpeicherBus {
    abos: Arc<DashMap<String, Vec<Abo>>>,
    naechste_id: Arc<AtomicU64>,
}

impl SpeicherBus {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erstellt einen neuen Client auf diesem Bus
    pub fn client(&self) -> SpeicherClient {
        SpeicherClient {
            bus: self.clone(),
            id: self.naechste_id.fetch_add(1, Ordering::Relaxed),
            verbunden: AtomicBool::new(true),
        }
    }

    /// Anzahl Abos eines Themas
    pub fn abonnenten(&self, thema: &str) -> usize {
        self.abos.get(thema).map(|a| a.len()).unwrap_or(0)
    }

    fn zustellen(&self, thema: &str, payload: Bytes) -> usize {
        let Some(mut abos) = self.abos.get_mut(thema) else {
            return 0;
        };
        // Abos mit beendetem Zustell-Task entfernen
        abos.retain(|abo| {
            abo.tx
                .send(BusNachricht {
                    thema: thema.to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
        abos.len()
    }
}

/// Ein Client des In-Process-Bus
pub struct SpeicherClient {
    bus: SpeicherBus,
    id: u64,
    verbunden: AtomicBool,
}

#[async_trait]
impl NachrichtenBus for SpeicherClient {
    async fn abonnieren(&self, thema: &str, rueckruf: Rueckruf) -> SignalingResult<()> {
        if !self.verbunden.load(Ordering::SeqCst) {
            return Err(SignalingError::BusGetrennt);
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<BusNachricht>();
        self.bus
            .abos
            .entry(thema.to_string())
            .or_default()
            .push(Abo { client: self.id, tx });

        let client = self.id;
        tokio::spawn(async move {
            while let Some(nachricht) = rx.recv().await {
                rueckruf(nachricht);
            }
            trace!(client, "Zustell-Task beendet");
        });

        debug!(client = self.id, thema, "Thema abonniert");
        Ok(())
    }

    fn veroeffentlichen(&self, thema: &str, payload: Bytes) -> SignalingResult<()> {
        if !self.verbunden.load(Ordering::SeqCst) {
            return Err(SignalingError::BusGetrennt);
        }
        let empfaenger = self.bus.zustellen(thema, payload);
        trace!(client = self.id, thema, empfaenger, "Nachricht veroeffentlicht");
        Ok(())
    }

    async fn trennen(&self) {
        if !self.verbunden.swap(false, Ordering::SeqCst) {
            return;
        }
        for mut eintrag in self.bus.abos.iter_mut() {
            eintrag.value_mut().retain(|abo| abo.client != self.id);
        }
        debug!(client = self.id, "Vom Bus getrennt");
    }
}
