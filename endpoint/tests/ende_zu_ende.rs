//! Integration-Tests: Caller und Responder ueber SpeicherBus (bzw. TCP-Bus)
//! und LoopbackEngine mit simulierten Audio-Geraeten

use sprechfunk_audio::{SimulationsBackend, TastenAbfrage};
use sprechfunk_core::Rolle;
use sprechfunk_endpoint::config::EndpunktConfig;
use sprechfunk_endpoint::{Endpunkt, EndpunktTeile};
use sprechfunk_signaling::{BusBroker, SessionZustand, SpeicherBus, TcpBus, TcpBusKonfig};
use sprechfunk_transport::LoopbackEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::LocalSet;

/// Von aussen gesteuerte Taste
#[derive(Clone, Default)]
struct TestTaste(Arc<AtomicBool>);

impl TastenAbfrage for TestTaste {
    fn ist_gedrueckt(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn config(rolle: Rolle) -> EndpunktConfig {
    let mut config = EndpunktConfig::default();
    config.endpunkt.rolle = rolle;
    config.audio.simulation = true;
    config
}

struct Aufbau {
    caller: Endpunkt,
    responder: Endpunkt,
    taste: TestTaste,
    caller_audio: SimulationsBackend,
    responder_audio: SimulationsBackend,
}

async fn aufbauen() -> Aufbau {
    let bus = SpeicherBus::neu();
    let (caller_engine, responder_engine) = LoopbackEngine::paar();
    let caller_audio = SimulationsBackend::new();
    let responder_audio = SimulationsBackend::new();
    let taste = TestTaste::default();

    // Responder zuerst: Zustellung hoechstens einmal, ein fruehes Offer ginge verloren
    let responder = Endpunkt::starten(
        &config(Rolle::Responder),
        EndpunktTeile {
            bus: Arc::new(bus.client()),
            engine: Box::new(responder_engine),
            backend: Arc::new(responder_audio.clone()),
        },
        None,
    )
    .await
    .expect("Responder startet");

    let caller = Endpunkt::starten(
        &config(Rolle::Caller),
        EndpunktTeile {
            bus: Arc::new(bus.client()),
            engine: Box::new(caller_engine),
            backend: Arc::new(caller_audio.clone()),
        },
        Some(Box::new(taste.clone())),
    )
    .await
    .expect("Caller startet");

    Aufbau {
        caller,
        responder,
        taste,
        caller_audio,
        responder_audio,
    }
}

async fn verbunden_warten(endpunkt: &Endpunkt) {
    tokio::time::timeout(
        Duration::from_secs(3),
        endpunkt
            .handle()
            .warten_bis(|s| s.zustand == SessionZustand::Verbunden),
    )
    .await
    .expect("Verbindung nicht innerhalb von 3 s");
}

#[tokio::test]
async fn sprechtaste_uebertraegt_audio_zum_responder() {
    LocalSet::new()
        .run_until(async {
            let mut a = aufbauen().await;
            verbunden_warten(&a.caller).await;
            verbunden_warten(&a.responder).await;

            // Gate zu: nur Stille kommt an
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(a
                .responder_audio
                .aufgezeichnete_samples()
                .iter()
                .all(|s| *s == 0));

            a.taste.0.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            a.taste.0.store(false, Ordering::SeqCst);

            let samples = a.responder_audio.aufgezeichnete_samples();
            assert!(samples.iter().any(|s| *s != 0), "kein Ton angekommen");
            assert_eq!(samples.len() % 960, 0);

            let caller = a.caller.status();
            assert_eq!(caller.gesendete_nachrichten, 1);
            assert_eq!(caller.abgelehnte_ereignisse, 0);
            assert_eq!(a.responder.status().wiedergaben, 1);

            let schnappschuss = a.caller.beobachter().schnappschuss();
            assert!(schnappschuss.audio_frames > 0);
            assert!(schnappschuss.stille_frames > 0);
            assert_eq!(schnappschuss.session_zustand, "verbunden");

            a.caller.herunterfahren().await;
            a.responder.herunterfahren().await;
        })
        .await;
}

#[tokio::test]
async fn herunterfahren_ist_idempotent_und_gibt_geraete_frei() {
    LocalSet::new()
        .run_until(async {
            let mut a = aufbauen().await;
            verbunden_warten(&a.responder).await;

            a.caller.herunterfahren().await;
            a.caller.herunterfahren().await;
            a.responder.herunterfahren().await;
            a.responder.herunterfahren().await;

            assert_eq!(a.caller.status().zustand, SessionZustand::Geschlossen);
            assert_eq!(a.responder.status().zustand, SessionZustand::Geschlossen);

            let caller = a.caller_audio.zaehler();
            assert_eq!(caller.capture_geoeffnet.load(Ordering::SeqCst), 1);
            assert_eq!(caller.capture_geschlossen.load(Ordering::SeqCst), 1);
            let responder = a.responder_audio.zaehler();
            assert_eq!(responder.wiedergabe_geoeffnet.load(Ordering::SeqCst), 1);
            assert_eq!(responder.wiedergabe_geschlossen.load(Ordering::SeqCst), 1);
        })
        .await;
}

#[tokio::test]
async fn responder_bemerkt_abbruch_des_callers() {
    LocalSet::new()
        .run_until(async {
            let mut a = aufbauen().await;
            verbunden_warten(&a.responder).await;

            a.caller.herunterfahren().await;
            tokio::time::timeout(
                Duration::from_secs(1),
                a.responder
                    .handle()
                    .warten_bis(|s| s.zustand == SessionZustand::Getrennt),
            )
            .await
            .expect("Responder meldet keinen Abbruch");

            // Keine automatische Neuverhandlung
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(a.responder.status().zustand, SessionZustand::Getrennt);
            assert_eq!(a.responder.status().gesendete_nachrichten, 1);

            a.responder.herunterfahren().await;
        })
        .await;
}

fn tcp_bus(adresse: SocketAddr, reconnect: Duration) -> TcpBus {
    TcpBus::starten(TcpBusKonfig {
        broker_adresse: adresse,
        reconnect,
    })
}

#[tokio::test]
async fn caller_sendet_offer_erst_wenn_der_broker_erreichbar_ist() {
    LocalSet::new()
        .run_until(async {
            // Freie Adresse, auf der noch kein Broker laeuft
            let adresse = std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap();
            let (caller_engine, responder_engine) = LoopbackEngine::paar();

            // Langsamer Reconnect: der Responder ist vor dem Caller am Broker
            let mut caller = Endpunkt::starten(
                &config(Rolle::Caller),
                EndpunktTeile {
                    bus: Arc::new(tcp_bus(adresse, Duration::from_secs(1))),
                    engine: Box::new(caller_engine),
                    backend: Arc::new(SimulationsBackend::new()),
                },
                None,
            )
            .await
            .expect("Caller startet ohne Broker");

            tokio::time::sleep(Duration::from_millis(150)).await;
            let status = caller.status();
            assert_eq!(status.zustand, SessionZustand::Neu);
            assert_eq!(status.gesendete_nachrichten, 0);

            let broker = BusBroker::binden(adresse).await.expect("Broker bindet");
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let broker_task = tokio::spawn(broker.laufen(shutdown_rx));

            let responder_bus = tcp_bus(adresse, Duration::from_millis(50));
            assert!(responder_bus.verbunden_warten(Duration::from_secs(2)).await);
            let mut responder = Endpunkt::starten(
                &config(Rolle::Responder),
                EndpunktTeile {
                    bus: Arc::new(responder_bus),
                    engine: Box::new(responder_engine),
                    backend: Arc::new(SimulationsBackend::new()),
                },
                None,
            )
            .await
            .expect("Responder startet");

            tokio::time::timeout(
                Duration::from_secs(5),
                caller
                    .handle()
                    .warten_bis(|s| s.zustand == SessionZustand::Verbunden),
            )
            .await
            .expect("Offer nach dem Verbinden nicht gesendet");

            assert_eq!(caller.status().gesendete_nachrichten, 1);
            assert_eq!(caller.status().abgelehnte_ereignisse, 0);
            assert_eq!(responder.status().gesendete_nachrichten, 1);

            caller.herunterfahren().await;
            responder.herunterfahren().await;
            let _ = shutdown_tx.send(true);
            let _ = broker_task.await;
        })
        .await;
}

#[tokio::test]
async fn herunterfahren_ohne_broker_verwirft_den_start() {
    LocalSet::new()
        .run_until(async {
            let adresse = std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap();
            let (caller_engine, _responder_engine) = LoopbackEngine::paar();
            let mut caller = Endpunkt::starten(
                &config(Rolle::Caller),
                EndpunktTeile {
                    bus: Arc::new(tcp_bus(adresse, Duration::from_millis(50))),
                    engine: Box::new(caller_engine),
                    backend: Arc::new(SimulationsBackend::new()),
                },
                None,
            )
            .await
            .expect("Caller startet ohne Broker");

            tokio::time::timeout(Duration::from_secs(3), caller.herunterfahren())
                .await
                .expect("Herunterfahren haengt");
            let status = caller.status();
            assert_eq!(status.zustand, SessionZustand::Geschlossen);
            assert_eq!(status.gesendete_nachrichten, 0);
        })
        .await;
}
