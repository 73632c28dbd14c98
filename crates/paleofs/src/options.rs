//! Mount-time configuration (`spec.md` §6: `mount(store, options) -> Mount`).

use paleofs_core::probe::FormatId;

/// Restricts which formats [`crate::mount`] tries. The default tries every
/// compiled-in format and keeps whichever probes best (`spec.md` §4.4); use
/// [`MountOptions::only`] when the caller already knows what the image is
/// and wants to skip the cases where more than one format would otherwise
/// score well on the same bytes (e.g. a hybrid image, `spec.md` §4.10).
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    only: Option<Vec<FormatId>>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(mut self, formats: impl IntoIterator<Item = FormatId>) -> Self {
        self.only = Some(formats.into_iter().collect());
        self
    }

    pub(crate) fn allows(&self, format: FormatId) -> bool {
        match &self.only {
            Some(formats) => formats.contains(&format),
            None => true,
        }
    }
}
