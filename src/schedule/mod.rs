pub mod callback;
pub mod processors;
pub mod scheduler;
pub mod types;
#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{
    Job, JobParams, JobResult, JobStats, JobStatus, JobType, JobUpdate, ProgressUpdate,
};

// 重导出处理器接口
pub use processors::{
    AcquireProcessor, StageContext, StageProcessor, TranscodeProcessor, TranscribeProcessor,
    TranslateProcessor,
};

// 重导出调度器接口
pub use callback::{JobEvent, ProgressBroadcaster};
pub use scheduler::{CancellationManager, JobManager, PipelineCoordinator, ProcessRegistry, Processors};
