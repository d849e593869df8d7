//! Gemeinsame Identifikationstypen fuer Hushlink
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Peer- und Raum-Kennungen zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HushlinkError;

/// Maximale Laenge eines Raum-Namens in Bytes
pub const MAX_ROOM_ID_LAENGE: usize = 128;

/// Opake Peer-ID, vom Relay pro Verbindung vergeben
///
/// Eindeutig solange die Verbindung offen ist. Clients behandeln den
/// Inhalt als undurchsichtigen String.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Erstellt eine neue zufaellige PeerId (UUIDv4)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uebernimmt einen bestehenden Bezeichner unveraendert
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kurzform fuer Log-Ausgaben (erste 8 Zeichen)
    pub fn kurz(&self) -> &str {
        let ende = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..ende]
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raum-Kennung (frei waehlbarer, nicht-leerer Name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validiert und erstellt eine RoomId
    ///
    /// Fuehrende und abschliessende Leerzeichen werden entfernt. Leere oder
    /// zu lange Namen werden abgelehnt.
    pub fn neu(name: impl AsRef<str>) -> crate::Result<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(HushlinkError::UngueltigeRaumId(
                "Raum-Name darf nicht leer sein".into(),
            ));
        }
        if name.len() > MAX_ROOM_ID_LAENGE {
            return Err(HushlinkError::UngueltigeRaumId(format!(
                "Raum-Name zu lang: {} Bytes (Maximum: {MAX_ROOM_ID_LAENGE})",
                name.len()
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = HushlinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::neu(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "room:{}", self.0)
    }
}
