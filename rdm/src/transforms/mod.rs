//! Entry transforms of the backfill streams.
//!
//! Each transform turns one dump line into the entry its table generator expects. They are
//! pure and run on the transform workers.

mod communities;
mod tokens;
mod users;
mod versions;

pub use communities::CommunityEntry;
pub use tokens::RemoteTokenEntry;
pub use users::UserEntry;
pub use versions::VersionEntry;
