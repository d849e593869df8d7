//! Fehlertypen fuer Hushlink
//!
//! Zentraler Fehler-Enum fuer Zustaende die mehrere Crates betreffen.
//! Untermodule definieren eigene Fehler und konvertieren bei Bedarf.

use thiserror::Error;

/// Globaler Result-Alias fuer Hushlink
pub type Result<T> = std::result::Result<T, HushlinkError>;

/// Crate-uebergreifende Fehler im Hushlink-System
#[derive(Debug, Error)]
pub enum HushlinkError {
    #[error("Ungueltige Raum-ID: {0}")]
    UngueltigeRaumId(String),
}
