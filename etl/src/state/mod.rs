//! Cross-stream state: identifiers and relationships shared by every stream of a run.

mod rows;
mod snapshot;
mod store;
mod table;
pub mod validators;

pub use rows::{
    BucketState, CommunityState, FileRecordState, GlobalState, ParentState, PidState, RecordState,
    StateRow,
};
pub use store::{DELETED_COLUMN, StateStore, Validator, is_deleted};
pub use table::StateTable;
