//! TCP-Bus-Broker
//!
//! Nimmt Client-Verbindungen an, fuehrt pro Thema eine Abonnentenliste und
//! leitet veroeffentlichte Nachrichten an alle Abonnenten weiter (auch an
//! den Absender, falls er das Thema abonniert hat). Keine Persistenz, keine
//! Wiederholung: wer zum Zeitpunkt der Veroeffentlichung nicht abonniert
//! ist, verpasst die Nachricht.

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use super::wire::{BusCodec, BusFrame};

/// Groesse der Sende-Queue pro Client
const SENDE_QUEUE_GROESSE: usize = 64;

type Abonnenten = Arc<DashMap<String, Vec<(u64, mpsc::Sender<BusFrame>)>>>;

/// TCP-Broker fuer den Signaling-Bus
pub struct BusBroker {
    listener: TcpListener,
    abonnenten: Abonnenten,
    naechste_id: AtomicU64,
}

impl BusBroker {
    /// Bindet den Listener
    pub async fn binden(adresse: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(adresse).await?;
        info!(adresse = %listener.local_addr()?, "Bus-Broker gebunden");
        Ok(Self {
            listener,
            abonnenten: Arc::new(DashMap::new()),
            naechste_id: AtomicU64::new(1),
        })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept-Loop, laeuft bis `shutdown_rx` `true` meldet
    pub async fn laufen(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        loop {
            tokio::select! {
                ergebnis = self.listener.accept() => match ergebnis {
                    Ok((stream, peer)) => {
                        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
                        debug!(peer = %peer, client = id, "Bus-Client verbunden");
                        let abonnenten = Arc::clone(&self.abonnenten);
                        let shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            client_verarbeiten(id, stream, peer, abonnenten, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(fehler = %e, "TCP-Accept-Fehler");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                },
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Bus-Broker: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }
        info!("Bus-Broker gestoppt");
        Ok(())
    }
}

async fn client_verarbeiten(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    abonnenten: Abonnenten,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut framed = Framed::new(stream, BusCodec::new());
    let (sende_tx, mut sende_rx) = mpsc::channel::<BusFrame>(SENDE_QUEUE_GROESSE);

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(BusFrame::Abonnieren { thema })) => {
                    {
                        let mut liste = abonnenten.entry(thema.clone()).or_default();
                        if !liste.iter().any(|(client, _)| *client == id) {
                            liste.push((id, sende_tx.clone()));
                        }
                    }
                    debug!(client = id, thema = %thema, "Abo registriert");
                    if let Err(e) = framed.send(BusFrame::AboBestaetigt { thema }).await {
                        warn!(peer = %peer, fehler = %e, "Senden fehlgeschlagen");
                        break;
                    }
                }
                Some(Ok(BusFrame::Veroeffentlichen { thema, payload })) => {
                    weiterleiten(&abonnenten, &thema, payload);
                }
                Some(Ok(anderer)) => {
                    debug!(peer = %peer, frame = ?anderer, "Unerwarteter Frame vom Client");
                }
                Some(Err(e)) => {
                    warn!(peer = %peer, fehler = %e, "Frame-Lesefehler");
                    break;
                }
                None => {
                    debug!(peer = %peer, "Bus-Client getrennt");
                    break;
                }
            },
            Some(ausgehend) = sende_rx.recv() => {
                if let Err(e) = framed.send(ausgehend).await {
                    warn!(peer = %peer, fehler = %e, "Zustellung fehlgeschlagen");
                    break;
                }
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    for mut eintrag in abonnenten.iter_mut() {
        eintrag.value_mut().retain(|(client, _)| *client != id);
    }
    trace!(client = id, "Client-Abos entfernt");
}

fn weiterleiten(abonnenten: &Abonnenten, thema: &str, payload: bytes::Bytes) {
    let Some(liste) = abonnenten.get(thema) else {
        trace!(thema, "Keine Abonnenten");
        return;
    };
    for (client, tx) in liste.iter() {
        let frame = BusFrame::Zustellung {
            thema: thema.to_string(),
            payload: payload.clone(),
        };
        if tx.try_send(frame).is_err() {
            warn!(client, thema, "Sende-Queue voll oder geschlossen, Nachricht verworfen");
        }
    }
}
