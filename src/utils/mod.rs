pub mod http;
pub mod job_log;
pub mod logger;
