//! sprechfunk-signaling – Offer/Answer-Verhandlung ueber einen Pub/Sub-Bus
//!
//! Dieser Crate verbindet den Nachrichten-Bus mit der Session-
//! Zustandsmaschine. Alle Ereignisse einer Session laufen ueber einen
//! einzigen Executor-Task.
//!
//! ## Architektur
//!
//! ```text
//! NachrichtenBus (SpeicherBus | TcpBus <-> BusBroker)
//!     |  Rueckruf (Bus-Task)
//!     v
//! SignalingKanal ---- einreichen ----> SessionExecutor (ein Task)
//!     ^                                    |
//!     |  SignalingAusgang::senden          +-- Session (Zustandsmaschine)
//!     +------------------------------------+       |
//!                                                  +-- TransportEngine
//!                                                  +-- WiedergabeSenke pro Track
//! ```

pub mod bus;
pub mod error;
pub mod executor;
pub mod kanal;
pub mod session;

// Bequeme Re-Exporte
pub use bus::{
    BusBroker, BusNachricht, NachrichtenBus, SpeicherBus, SpeicherClient, TcpBus, TcpBusKonfig,
};
pub use error::{SignalingError, SignalingResult};
pub use executor::{SessionEreignis, SessionExecutor, SessionHandle, SessionStatus};
pub use kanal::SignalingKanal;
pub use session::{Session, SessionStatistik, SessionZustand, WiedergabeZiel};
