mod archive;
mod groups;

pub use archive::ArchiveRegistry;

pub use groups::GroupDispatcher;
