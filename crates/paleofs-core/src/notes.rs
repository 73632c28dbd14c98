//! The per-mount structural-irregularity log (`spec.md` §7).

use paleofs_io::ChunkRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub severity: Severity,
    pub message: String,
    pub chunk: Option<ChunkRef>,
}

/// Accumulates structural notes for a mount. An `Error`-severity note marks
/// the mount `dubious` (`spec.md` §7); callers check [`Notes::has_errors`]
/// after a scan to decide whether to treat the whole volume as suspect.
#[derive(Debug, Default)]
pub struct Notes(Vec<Note>);

impl Notes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>, chunk: Option<ChunkRef>) {
        let message = message.into();
        #[cfg(feature = "tracing")]
        match severity {
            Severity::Info => tracing::info!(%message, ?chunk, "note"),
            Severity::Warning => tracing::warn!(%message, ?chunk, "note"),
            Severity::Error => tracing::error!(%message, ?chunk, "note"),
        }
        self.0.push(Note {
            severity,
            message,
            chunk,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message, None);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message, None);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message, None);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|n| n.severity == Severity::Error)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
