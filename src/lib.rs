pub mod block;
pub mod cli;
pub mod compression;
pub mod container;
pub mod data;
pub mod error;
pub mod formats;
pub mod index;
pub mod metadata;
pub mod naming;
pub mod ops;
pub mod repack;
pub mod store;
pub mod superblock;

pub use container::{Container, ContainerOptions, NewChannel, OpenMode};
pub use data::{AttrValue, Attributes, DataType, Payload, SampleType, SampledData, Timestamp};
pub use error::{ArfxError, Result};
pub use formats::{FormatDescriptor, FormatPlugin, FormatRegistry, IoMode};
pub use naming::{EntryNamer, Template};
pub use ops::{Dispatcher, Operation, Options, Report};
pub use superblock::Superblock;
