pub mod ranking_job;

pub use ranking_job::start_ranking_job;
