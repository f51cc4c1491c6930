//! sprechfunk-audio – Audio-Schicht fuer Sprechfunk
//!
//! - PTT-Gate und PTT-Abfrage-Thread (Hold, Toggle)
//! - Geraete-Schnittstelle mit cpal- und Simulations-Backend
//! - Audio-Quelle (ausgehender Track, Stille bei geschlossenem Gate)
//! - Wiedergabe-Senke (eingehender Track -> Ausgabegeraet)
//! - Opus Encoding/Decoding

pub mod capture;
pub mod codec;
pub mod device;
pub mod error;
pub mod gate;
pub mod playback;
pub mod ptt;
pub mod sim;
pub mod sink;
pub mod source;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{OpusDecoder, OpusEncoder};
pub use device::{
    ausgabegeraete_auflisten, eingabegeraete_auflisten, AudioBackend, CaptureGeraet, CpalBackend,
    GeraeteInfo, GeraeteKonfig, WiedergabeGeraet,
};
pub use error::{AudioError, AudioResult};
pub use gate::PttGate;
pub use ptt::{PttAbfrage, PttController, PttModus, TastenAbfrage};
pub use sim::SimulationsBackend;
pub use sink::{SenkenBericht, WiedergabeSenke};
pub use source::{AudioQuelle, QuellenStatistik};
