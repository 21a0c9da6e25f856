//! Transaction actions of the incremental replay.
//!
//! Each action claims the transactions of one kind of user-facing change and turns them into
//! ordered operations on the target tables. Every transaction must be claimed by exactly one
//! action.

pub mod common;
pub mod communities;
pub mod drafts;
pub mod files;
pub mod github;
pub mod oauth;
pub mod records;
pub mod users;

use etl::tx::TransformAction;

/// Returns every action of the replay.
pub fn all() -> Vec<Box<dyn TransformAction>> {
    let mut actions: Vec<Box<dyn TransformAction>> = vec![
        Box::new(drafts::DraftCreate),
        Box::new(drafts::DraftUpdate),
        Box::new(drafts::DraftDelete),
        Box::new(records::RecordPublishNew),
        Box::new(records::DraftPublishNew),
        Box::new(records::DraftPublishEdit),
        Box::new(records::RecordUpdate),
        Box::new(files::FileUpload),
        Box::new(communities::CommunityCreate),
        Box::new(communities::CommunityUpdate),
        Box::new(communities::CommunityDelete),
    ];
    actions.extend(users::actions());
    actions.extend(oauth::actions());
    actions.extend(github::actions());
    actions
}
