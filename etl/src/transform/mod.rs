//! Per-entry transforms and the capabilities they are built from.

mod datetime;
mod encrypt;
mod entry;
mod json;
mod stage;

use crate::error::EtlResult;
use crate::types::Entry;

pub use datetime::{DateTimeFields, TimestampUnit, timestamp_to_iso};
pub use encrypt::{NEW_SECRET_KEY, OLD_SECRET_KEY, Reencryptor, SymmetricKey};
pub use entry::{EntryMapper, field, optional_field};
pub use json::JsonFields;
pub use stage::TransformStage;

/// Turns one source entry into one target entry.
///
/// Implementations run on transform workers and must not touch the state store.
pub trait Transform: Send + Sync + 'static {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry>;
}

impl<F> Transform for F
where
    F: Fn(&Entry) -> EtlResult<Entry> + Send + Sync + 'static,
{
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        self(entry)
    }
}

/// Passes entries through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        Ok(entry.clone())
    }
}
