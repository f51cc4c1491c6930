//! TCP-Bus-Client mit automatischem Reconnect
//!
//! Ein Hintergrund-Task haelt die Verbindung zum `BusBroker`. Nach einem
//! Verbindungsverlust wird nach `reconnect` erneut verbunden und alle Abos
//! werden neu angemeldet. Veroeffentlichungen ohne Verbindung werden
//! verworfen (Zustellung hoechstens einmal).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use super::wire::{BusCodec, BusFrame};
use super::{BusNachricht, NachrichtenBus, Rueckruf};
use crate::error::{SignalingError, SignalingResult};

/// Groesse der Sende-Queue zum Broker
const SENDE_QUEUE_GROESSE: usize = 64;

/// Wartezeit auf die Abo-Bestaetigung
const ABO_TIMEOUT: Duration = Duration::from_secs(2);

/// Konfiguration des TCP-Bus-Clients
#[derive(Debug, Clone)]
pub struct TcpBusKonfig {
    pub broker_adresse: SocketAddr,
    pub reconnect: Duration,
}

#[derive(Default)]
struct Zustand {
    abos: HashMap<String, Vec<Rueckruf>>,
    ausstehend: HashMap<String, Vec<oneshot::Sender<()>>>,
    ausgang: Option<mpsc::Sender<BusFrame>>,
}

struct Inner {
    zustand: Mutex<Zustand>,
    verbunden_tx: watch::Sender<bool>,
}

/// TCP-Client des Signaling-Bus
pub struct TcpBus {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpBus {
    /// Startet den Verbindungs-Task. Kehrt sofort zurueck.
    pub fn starten(konfig: TcpBusKonfig) -> Self {
        let (verbunden_tx, _) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            zustand: Mutex::new(Zustand::default()),
            verbunden_tx,
        });
        let task = tokio::spawn(verbindungs_schleife(
            konfig,
            Arc::clone(&inner),
            shutdown_rx,
        ));
        Self {
            inner,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn ist_verbunden(&self) -> bool {
        *self.inner.verbunden_tx.borrow()
    }

    /// Wartet hoechstens `timeout` auf eine Verbindung zum Broker
    pub async fn verbunden_warten(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.verbunden_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|v| *v))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl NachrichtenBus for TcpBus {
    async fn abonnieren(&self, thema: &str, rueckruf: Rueckruf) -> SignalingResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(SignalingError::BusGetrennt);
        }
        let bestaetigung = {
            let mut zustand = self.inner.zustand.lock();
            let neu = !zustand.abos.contains_key(thema);
            zustand
                .abos
                .entry(thema.to_string())
                .or_default()
                .push(rueckruf);

            match zustand.ausgang.clone() {
                Some(ausgang) if neu => {
                    let (tx, rx) = oneshot::channel();
                    zustand
                        .ausstehend
                        .entry(thema.to_string())
                        .or_default()
                        .push(tx);
                    let frame = BusFrame::Abonnieren {
                        thema: thema.to_string(),
                    };
                    if ausgang.try_send(frame).is_err() {
                        debug!(thema, "Abo wird beim naechsten Verbinden angemeldet");
                    }
                    Some(rx)
                }
                _ => None,
            }
        };

        // Ohne Verbindung meldet der Verbindungs-Task das Abo spaeter an
        if let Some(rx) = bestaetigung {
            match tokio::time::timeout(ABO_TIMEOUT, rx).await {
                Ok(Ok(())) => debug!(thema, "Abo bestaetigt"),
                _ => warn!(thema, "Keine Abo-Bestaetigung vom Broker"),
            }
        }
        Ok(())
    }

    fn veroeffentlichen(&self, thema: &str, payload: Bytes) -> SignalingResult<()> {
        let ausgang = self.inner.zustand.lock().ausgang.clone();
        let Some(ausgang) = ausgang else {
            return Err(SignalingError::BusGetrennt);
        };
        ausgang
            .try_send(BusFrame::Veroeffentlichen {
                thema: thema.to_string(),
                payload,
            })
            .map_err(|_| SignalingError::BusGetrennt)?;
        trace!(thema, "Nachricht an Broker uebergeben");
        Ok(())
    }

    async fn bereit(&self) -> bool {
        let mut verbunden = self.inner.verbunden_tx.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            r = verbunden.wait_for(|v| *v) => r.is_ok() && !*self.shutdown_tx.borrow(),
            _ = shutdown.wait_for(|s| *s) => false,
        }
    }

    async fn trennen(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let mut zustand = self.inner.zustand.lock();
        zustand.abos.clear();
        zustand.ausstehend.clear();
        zustand.ausgang = None;
        info!("TCP-Bus getrennt");
    }
}

impl Drop for TcpBus {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn verbindungs_schleife(
    konfig: TcpBusKonfig,
    inner: Arc<Inner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match TcpStream::connect(konfig.broker_adresse).await {
            Ok(stream) => {
                info!(broker = %konfig.broker_adresse, "Mit Bus-Broker verbunden");
                sitzung(stream, &inner, &mut shutdown_rx).await;
                inner.verbunden_tx.send_replace(false);
                inner.zustand.lock().ausgang = None;
                if *shutdown_rx.borrow() {
                    break;
                }
                warn!(broker = %konfig.broker_adresse, "Verbindung zum Bus-Broker verloren");
            }
            Err(e) => {
                warn!(broker = %konfig.broker_adresse, fehler = %e, "Bus-Broker nicht erreichbar");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(konfig.reconnect) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
    debug!("Bus-Verbindungs-Task beendet");
}

async fn sitzung(stream: TcpStream, inner: &Inner, shutdown_rx: &mut watch::Receiver<bool>) {
    let mut framed = Framed::new(stream, BusCodec::new());
    let (sende_tx, mut sende_rx) = mpsc::channel::<BusFrame>(SENDE_QUEUE_GROESSE);

    // Bestehende Abos neu anmelden, dann Ausgang freigeben
    let themen: Vec<String> = {
        let mut zustand = inner.zustand.lock();
        zustand.ausgang = Some(sende_tx);
        zustand.abos.keys().cloned().collect()
    };
    for thema in themen {
        if let Err(e) = framed.send(BusFrame::Abonnieren { thema }).await {
            warn!(fehler = %e, "Abo-Anmeldung fehlgeschlagen");
            return;
        }
    }
    inner.verbunden_tx.send_replace(true);

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(BusFrame::Zustellung { thema, payload })) => {
                    let rueckrufe = inner
                        .zustand
                        .lock()
                        .abos
                        .get(&thema)
                        .cloned()
                        .unwrap_or_default();
                    for rueckruf in rueckrufe {
                        rueckruf(BusNachricht {
                            thema: thema.clone(),
                            payload: payload.clone(),
                        });
                    }
                }
                Some(Ok(BusFrame::AboBestaetigt { thema })) => {
                    let wartende = inner.zustand.lock().ausstehend.remove(&thema);
                    for tx in wartende.into_iter().flatten() {
                        let _ = tx.send(());
                    }
                }
                Some(Ok(anderer)) => debug!(frame = ?anderer, "Unerwarteter Frame vom Broker"),
                Some(Err(e)) => {
                    warn!(fehler = %e, "Frame-Lesefehler");
                    return;
                }
                None => return,
            },
            Some(ausgehend) = sende_rx.recv() => {
                if let Err(e) = framed.send(ausgehend).await {
                    warn!(fehler = %e, "Senden an Broker fehlgeschlagen");
                    return;
                }
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}
