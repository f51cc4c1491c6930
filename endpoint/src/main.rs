//! Sprechfunk – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet einen
//! Endpunkt, den Bus-Broker oder die Geraeteliste.

use anyhow::Result;
use clap::{Parser, Subcommand};
use sprechfunk_audio::{
    ausgabegeraete_auflisten, eingabegeraete_auflisten, AudioBackend, CpalBackend,
    SimulationsBackend, TastenAbfrage,
};
use sprechfunk_core::Rolle;
use sprechfunk_endpoint::config::{EndpunktConfig, EngineArt};
use sprechfunk_endpoint::taste::StdinTaste;
use sprechfunk_endpoint::{Endpunkt, EndpunktBeobachter, EndpunktTeile};
use sprechfunk_observability::{
    logging_initialisieren, observability_server_starten, SprechfunkMetrics,
};
use sprechfunk_signaling::{BusBroker, SessionZustand, SpeicherBus, TcpBus, TcpBusKonfig};
use sprechfunk_transport::{LoopbackEngine, UdpEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::LocalSet;

/// Standardpfad der Konfigurationsdatei
const STANDARD_CONFIG: &str = "sprechfunk.toml";

/// Sprechfunk – Push-to-Talk-Sprechverbindung zwischen zwei Endpunkten
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Konfigurationsdatei (Standard: $SPRECHFUNK_CONFIG oder sprechfunk.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rolle: caller oder responder
    #[arg(short, long)]
    rolle: Option<Rolle>,

    /// Adresse des Bus-Brokers
    #[arg(short, long)]
    broker: Option<SocketAddr>,

    /// Simulierte Audio-Geraete statt Hardware
    #[arg(long, default_value = "false")]
    simulation: bool,

    #[command(subcommand)]
    befehl: Option<Befehl>,
}

#[derive(Subcommand, Debug)]
enum Befehl {
    /// Startet den Signaling-Bus-Broker
    Broker {
        /// Bind-Adresse des Brokers
        #[arg(long, default_value = "127.0.0.1:1883")]
        bind: SocketAddr,
    },
    /// Listet die Audio-Geraete auf
    Geraete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_pfad = args
        .config
        .clone()
        .or_else(|| std::env::var_os("SPRECHFUNK_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(STANDARD_CONFIG));

    let mut config = EndpunktConfig::laden(&config_pfad)?;
    if let Some(rolle) = args.rolle {
        config.endpunkt.rolle = rolle;
    }
    if let Some(broker) = args.broker {
        config.bus.broker_adresse = broker;
    }
    if args.simulation {
        config.audio.simulation = true;
    }
    config.validieren()?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad.display(),
        "Sprechfunk wird initialisiert"
    );

    match args.befehl {
        Some(Befehl::Broker { bind }) => broker_ausfuehren(bind).await,
        Some(Befehl::Geraete) => geraete_auflisten(),
        None => {
            let local = LocalSet::new();
            local.run_until(endpunkt_ausfuehren(config)).await
        }
    }
}

async fn broker_ausfuehren(bind: SocketAddr) -> Result<()> {
    let broker = BusBroker::binden(bind).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(broker.laufen(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown-Signal empfangen, Broker wird beendet");
    let _ = shutdown_tx.send(true);
    task.await??;
    Ok(())
}

fn geraete_auflisten() -> Result<()> {
    println!("Eingabegeraete:");
    for geraet in eingabegeraete_auflisten()? {
        let markierung = if geraet.ist_standard { " (Standard)" } else { "" };
        println!("  {}{}", geraet.name, markierung);
    }
    println!("Ausgabegeraete:");
    for geraet in ausgabegeraete_auflisten()? {
        let markierung = if geraet.ist_standard { " (Standard)" } else { "" };
        println!("  {}{}", geraet.name, markierung);
    }
    Ok(())
}

fn backend_waehlen(config: &EndpunktConfig) -> Arc<dyn AudioBackend> {
    if config.audio.simulation {
        tracing::info!("Simulierte Audio-Geraete");
        Arc::new(SimulationsBackend::new())
    } else {
        Arc::new(CpalBackend {
            eingabegeraet: config.audio.eingabegeraet.clone(),
            ausgabegeraet: config.audio.ausgabegeraet.clone(),
        })
    }
}

fn taste_fuer(rolle: Rolle) -> Result<Option<Box<dyn TastenAbfrage>>> {
    if rolle != Rolle::Caller {
        return Ok(None);
    }
    println!("Enter schaltet die Sprechtaste um, Ctrl-C beendet.");
    Ok(Some(Box::new(StdinTaste::starten()?)))
}

/// Startet den oder die Endpunkte und wartet auf Ctrl-C
async fn endpunkt_ausfuehren(config: EndpunktConfig) -> Result<()> {
    let backend = backend_waehlen(&config);

    let mut endpunkte = match config.transport.engine {
        EngineArt::Udp => {
            let bus = TcpBus::starten(TcpBusKonfig {
                broker_adresse: config.bus.broker_adresse,
                reconnect: Duration::from_millis(config.bus.reconnect_ms),
            });
            if !bus.verbunden_warten(Duration::from_secs(5)).await {
                tracing::warn!(
                    broker = %config.bus.broker_adresse,
                    "Bus-Broker noch nicht erreichbar, Signaling startet nach dem Verbinden"
                );
            }
            let engine = UdpEngine::binden(config.udp_konfig()).await?;
            tracing::info!(adresse = %engine.lokale_adresse(), "UDP-Transport gebunden");

            let teile = EndpunktTeile {
                bus: Arc::new(bus),
                engine: Box::new(engine),
                backend,
            };
            let taste = taste_fuer(config.endpunkt.rolle)?;
            vec![Endpunkt::starten(&config, teile, taste).await?]
        }
        EngineArt::Loopback => {
            tracing::info!("Loopback: Caller und Responder in einem Prozess");
            let bus = SpeicherBus::neu();
            let (caller_engine, responder_engine) = LoopbackEngine::paar();

            let mut responder_config = config.clone();
            responder_config.endpunkt.rolle = Rolle::Responder;
            let responder = Endpunkt::starten(
                &responder_config,
                EndpunktTeile {
                    bus: Arc::new(bus.client()),
                    engine: Box::new(responder_engine),
                    backend: Arc::clone(&backend),
                },
                None,
            )
            .await?;

            let mut caller_config = config.clone();
            caller_config.endpunkt.rolle = Rolle::Caller;
            let caller = Endpunkt::starten(
                &caller_config,
                EndpunktTeile {
                    bus: Arc::new(bus.client()),
                    engine: Box::new(caller_engine),
                    backend,
                },
                taste_fuer(Rolle::Caller)?,
            )
            .await?;
            vec![responder, caller]
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for endpunkt in &endpunkte {
        tokio::task::spawn_local(zustand_melden(endpunkt.rolle(), endpunkt.handle().clone()));
    }
    if config.observability.aktiviert {
        metriken_starten(&config, &endpunkte, shutdown_rx)?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown-Signal empfangen, Endpunkt wird beendet");

    for endpunkt in endpunkte.iter_mut() {
        endpunkt.herunterfahren().await;
    }
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Meldet Verbindungsabbrueche; es wird nicht automatisch neu verhandelt
async fn zustand_melden(rolle: Rolle, handle: sprechfunk_signaling::SessionHandle) {
    let mut rx = handle.status_abonnieren();
    let mut zuletzt = SessionZustand::Neu;
    while rx.changed().await.is_ok() {
        let zustand = rx.borrow_and_update().zustand;
        if zustand == zuletzt {
            continue;
        }
        zuletzt = zustand;
        match zustand {
            SessionZustand::Verbunden => {
                tracing::info!(rolle = %rolle, "Verbindung steht")
            }
            SessionZustand::Getrennt | SessionZustand::Fehlgeschlagen => tracing::warn!(
                rolle = %rolle,
                zustand = %zustand,
                "Verbindung verloren, Neustart erforderlich"
            ),
            _ => {}
        }
    }
}

fn metriken_starten(
    config: &EndpunktConfig,
    endpunkte: &[Endpunkt],
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let metriken = SprechfunkMetrics::neu()?;
    let beobachter: Vec<EndpunktBeobachter> = endpunkte.iter().map(|e| e.beobachter()).collect();

    let aktualisierung = metriken.clone();
    let mut stopp = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut intervall = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    // Caller-Zaehler bevorzugen, er traegt die Audio-Statistik
                    if let Some(b) = beobachter.last() {
                        aktualisierung.aktualisieren(&b.schnappschuss());
                    }
                }
                Ok(()) = stopp.changed() => break,
            }
        }
    });

    let bind = config.observability.bind_adresse;
    tokio::spawn(async move {
        if let Err(e) = observability_server_starten(bind, metriken, shutdown_rx).await {
            tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
        }
    });
    Ok(())
}
