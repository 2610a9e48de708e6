pub mod read;
pub mod write;

pub use read::{entry_kind, list_children, open_source, read_symlink_target, SourceEntry};
pub use write::{
    create_directory, create_symlink, set_link_owner, set_mode, set_owner, StagedFile,
};
