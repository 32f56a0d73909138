//! Address records and connection targets

mod record;
mod target;

pub use record::{AddressBook, AddressFamily, AddressRecord, Destination};
pub use target::{
    format_target, write_current, write_next, FileTargetSink, MemoryTargetSink, PublishedTarget,
    TargetSink,
};
