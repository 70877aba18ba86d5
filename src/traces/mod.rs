//! Trace side of the store: span model, per-trace aggregates, the
//! span-name index and the owning [`TraceStore`].

pub mod item;
pub mod repository;
pub mod span;
pub mod store;

pub use item::TraceItem;
pub use repository::SpanRepository;
pub use span::{SpanData, SpanEvent, SpanKind, SpanStatus};
pub use store::TraceStore;
