pub mod aggregate;
pub mod error;
pub mod hierarchy;
pub mod schedule;
pub mod tags;
pub mod timing;

pub use aggregate::Aggregator;
pub use error::EngineError;
pub use hierarchy::TaskManager;
pub use schedule::ScheduleManager;
pub use tags::TagManager;
pub use timing::TimingEngine;

use tokio::sync::broadcast;

use tempo_core::events::ChangeEvent;
use tempo_store::Database;

/// The lifecycle engine: every manager shares one database handle and one
/// outbound change-event channel. Events are emitted only after the backing
/// store transaction has committed, so a subscriber never hears about data
/// it cannot read.
pub struct Engine {
    pub tasks: TaskManager,
    pub tags: TagManager,
    pub timing: TimingEngine,
    pub aggregate: Aggregator,
    pub schedule: ScheduleManager,
}

impl Engine {
    pub fn new(db: Database, events: broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            tasks: TaskManager::new(db.clone(), events.clone()),
            tags: TagManager::new(db.clone(), events.clone()),
            timing: TimingEngine::new(db.clone(), events.clone()),
            aggregate: Aggregator::new(db.clone()),
            schedule: ScheduleManager::new(db, events),
        }
    }
}
