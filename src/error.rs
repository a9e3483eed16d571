use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// MIDI port closed or disconnected. Callers drop the message and carry on.
    #[error("MIDI transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("unknown harmony style '{0}' (expected classical, jazz or modern)")]
    UnknownHarmonyStyle(String),

    #[error("invalid harmony profile: {0}")]
    InvalidProfile(String),

    /// Vision collaborator failed. Gesture control is disabled for the rest of the run.
    #[error("hand tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("visualization client disconnected: {0}")]
    VisualizationClientDisconnected(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
