pub mod config;
pub mod design;
pub mod job;
pub mod run;
pub mod run_agent;
