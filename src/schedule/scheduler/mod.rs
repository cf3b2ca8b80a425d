pub mod cancel;
mod job_manager;
pub mod pipeline;
pub mod registry;
mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

pub use cancel::CancellationManager;
pub use job_manager::JobManager;
pub use pipeline::PipelineCoordinator;
pub use registry::ProcessRegistry;
pub use runner::JobRunner;

use crate::schedule::processors::StageProcessor;
use crate::schedule::types::JobType;

/// Stage processors by the job type they handle.
#[derive(Default)]
pub struct Processors {
    by_type: HashMap<JobType, Arc<dyn StageProcessor>>,
}

impl Processors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn StageProcessor>) -> &mut Self {
        let job_type = processor.job_type();
        info!("Registering processor for job type: {}", job_type);
        self.by_type.insert(job_type, processor);
        self
    }

    pub fn get(&self, job_type: &JobType) -> Option<&Arc<dyn StageProcessor>> {
        self.by_type.get(job_type)
    }
}
