//! Signaling-Kanal – Bruecke zwischen Bus und Session
//!
//! Eingehend: abonniert die Themen der Rolle und reicht jede Nachricht
//! als `SessionEreignis::Signaling` beim Executor ein. Der Bus-Rueckruf
//! beruehrt die Session nie direkt.
//!
//! Ausgehend: implementiert `SignalingAusgang` und veroeffentlicht unter
//! dem konfigurierten Themennamen.

use bytes::Bytes;
use sprechfunk_core::{
    Result as KernResult, Rolle, SignalingAusgang, SignalingNachricht, SprechfunkError,
    ThemenNamen,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusNachricht, NachrichtenBus, Rueckruf};
use crate::error::SignalingResult;
use crate::executor::{SessionEreignis, SessionHandle};

pub struct SignalingKanal {
    bus: Arc<dyn NachrichtenBus>,
    rolle: Rolle,
    themen: ThemenNamen,
}

impl SignalingKanal {
    pub fn neu(bus: Arc<dyn NachrichtenBus>, rolle: Rolle, themen: ThemenNamen) -> Self {
        Self { bus, rolle, themen }
    }

    pub fn rolle(&self) -> Rolle {
        self.rolle
    }

    /// Abonniert die Themen der Rolle und leitet an `handle` weiter
    pub async fn verbinden(&self, handle: SessionHandle) -> SignalingResult<()> {
        for thema in self.rolle.abonnierte_themen() {
            let name = self.themen.name(*thema).to_string();
            let rueckruf = weiterleitung(self.themen.clone(), handle.clone());
            self.bus.abonnieren(&name, rueckruf).await?;
            debug!(rolle = %self.rolle, thema = %name, "Signaling-Thema abonniert");
        }
        info!(rolle = %self.rolle, "Signaling-Kanal verbunden");
        Ok(())
    }

    /// Wartet auf einen sendebereiten Bus
    pub async fn bereit(&self) -> bool {
        self.bus.bereit().await
    }

    /// Trennt vom Bus. Mehrfacher Aufruf ist ein No-op.
    pub async fn trennen(&self) {
        self.bus.trennen().await;
    }
}

fn weiterleitung(themen: ThemenNamen, handle: SessionHandle) -> Rueckruf {
    Arc::new(move |nachricht: BusNachricht| {
        let Some(thema) = themen.thema(&nachricht.thema) else {
            debug!(thema = %nachricht.thema, "Unbekanntes Thema ignoriert");
            return;
        };
        let payload = match String::from_utf8(nachricht.payload.to_vec()) {
            Ok(payload) => payload,
            Err(_) => {
                warn!(thema = %thema, "Payload ist kein UTF-8, verworfen");
                return;
            }
        };
        trace!(thema = %thema, bytes = payload.len(), "Signaling empfangen");
        if handle
            .einreichen(SessionEreignis::Signaling(SignalingNachricht::neu(
                thema, payload,
            )))
            .is_err()
        {
            debug!(thema = %thema, "Session beendet, Nachricht verworfen");
        }
    })
}

impl SignalingAusgang for SignalingKanal {
    fn senden(&self, nachricht: SignalingNachricht) -> KernResult<()> {
        let (thema, payload) = nachricht.into_teile();
        self.bus
            .veroeffentlichen(self.themen.name(thema), Bytes::from(payload))
            .map_err(|e| SprechfunkError::Senden(e.to_string()))
    }
}
