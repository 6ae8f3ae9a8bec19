// Library exports for chainstore
pub mod bin_index;
pub mod chain_view;
pub mod consolidate;
pub mod error;
pub mod range;
pub mod record;
pub mod record_io;
pub mod sequence_index;
pub mod store;
pub mod union_find;

pub use chain_view::ChainView;
pub use consolidate::{ChainRange, Mergeable, OverlapTest};
pub use error::{Error, Result};
pub use range::Range;
pub use record::{AlignmentFragment, ChainId, GroupedRange, Located, NamedRange, Record, RecordKind};
pub use store::{MemoryStore, RecordStore, StoreConfig};
