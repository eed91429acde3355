use std::sync::Arc;

use saga_common::FileConfig;
use saga_oracle::{DecisionOracle, Oracle};

use crate::admission::TierAdmissionController;
use crate::classifier::Classifier;
use crate::ingest::Ingestor;
use crate::linker::RelationshipManager;
use crate::locks::TopicLocks;
use crate::notify::Notifier;
use crate::refresh::RefreshJob;
use crate::replacement::TimeframeReplacementPolicy;
use crate::scheduler::Scheduler;
use crate::topic_guard::TopicGuard;
use crate::traits::{ContentSource, GraphStore};

/// The engine, wired against one graph store, one oracle backend and one content source.
pub struct Curator {
    pub ingestor: Arc<Ingestor>,
    pub linker: Arc<RelationshipManager>,
    pub refresh: Arc<RefreshJob>,
    pub scheduler: Scheduler,
    pub topic_guard: TopicGuard,
    pub locks: Arc<TopicLocks>,
}

impl Curator {
    pub fn new<G: GraphStore + 'static>(
        graph: Arc<G>,
        backend: Arc<dyn DecisionOracle>,
        source: Arc<dyn ContentSource>,
        config: &FileConfig,
        notifier: Notifier,
    ) -> Self {
        let store: Arc<dyn GraphStore> = graph.clone();
        let oracle = Oracle::new(backend, &config.oracle).with_max_items(config.capacity.max_oracle_items);
        let capacity = config.capacity.clone();
        let locks = Arc::new(TopicLocks::new());

        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Classifier::new(oracle.clone()),
            TierAdmissionController::new(store.clone(), oracle.clone(), capacity.clone()),
            TimeframeReplacementPolicy::new(store.clone(), oracle.clone(), capacity.clone(), notifier),
            locks.clone(),
        ));
        let linker = Arc::new(RelationshipManager::new(store.clone(), oracle.clone(), capacity.clone(), locks.clone()));
        let refresh = Arc::new(RefreshJob::new(
            store,
            source,
            ingestor.clone(),
            linker.clone(),
            config.scheduler.clone(),
        ));
        let scheduler = Scheduler::new(graph.clone(), config.scheduler.clone(), refresh.clone());
        let topic_guard = TopicGuard::new(graph, oracle, capacity.max_topics);

        Self { ingestor, linker, refresh, scheduler, topic_guard, locks }
    }
}
