pub mod consumers;
pub mod hosted;
pub mod jobs;
pub mod owners;
pub mod pools;
