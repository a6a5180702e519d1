pub mod asset;
pub mod duplicate_group;
pub mod folder;
pub mod tag;

pub use asset::AssetRepository;
pub use duplicate_group::DuplicateGroupRepository;
pub use folder::FolderRepository;
pub use tag::TagRepository;

use rusqlite::Connection;

/// Repositories borrow a connection, or a transaction through `Deref`.
pub trait Repository<'c> {
    fn connection(&self) -> &'c Connection;
}

/// `?, ?, ?` for `count` bound parameters.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
