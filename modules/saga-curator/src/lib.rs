pub mod admission;
pub mod audit;
pub mod classifier;
pub mod curator;
pub mod ingest;
pub mod linker;
pub mod locks;
pub mod notify;
pub mod refresh;
pub mod replacement;
pub mod scheduler;
pub mod spool;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod topic_guard;
pub mod traits;
pub mod worker;

pub use admission::{AdmitOutcome, Demotion, RejectReason, TierAdmissionController};
pub use classifier::Classifier;
pub use curator::Curator;
pub use ingest::{IngestOutcome, IngestSkip, Ingestor};
pub use linker::{LinkOutcome, RelationshipManager, SkipReason};
pub use locks::TopicLocks;
pub use notify::{spawn_notifier, ChangeSink, GraphFlagSink, LogSink, Notifier, TopicChanged};
pub use refresh::{RefreshJob, RefreshReport};
pub use replacement::{AppliedAction, DecidedBy, ReplacementOutcome, TimeframeReplacementPolicy};
pub use scheduler::{next_due, overdue_seconds, ClaimOutcome, DispatchReport, NextDue, Scheduler, TickOutcome};
pub use spool::{read_articles_file, SpoolSource};
pub use topic_guard::{ProposeOutcome, TopicGuard};
pub use traits::{CapacityRepository, ContentSource, GraphStore, RelationshipStore, TopicStore};
pub use worker::WorkerPool;
