//! Target process discovery: which process to shape and which ports it uses.

pub mod net_table;
pub mod process_source;
pub mod resolver;

pub use process_source::{
    Connection, ProcessEntry, ProcessError, ProcessSource, Protocol, SystemProcessSource,
};
pub use resolver::{TargetDescriptor, TargetResolver, CACHE_TTL};
