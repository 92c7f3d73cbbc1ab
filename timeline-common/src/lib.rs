pub mod derive;
pub mod event;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod store;
pub mod timeline;

pub use derive::{derive, DerivationSite, Derived};
pub use event::{EventError, EventRecord, Metadata, NewActivity};
pub use store::{StorageError, TimelineStore};
pub use timeline::{TimelineEntry, TimelineQuery};

/// Topic raw activity events are published to and materialized from.
pub const ACTIVITY_RAW_TOPIC: &str = "activity.raw";
