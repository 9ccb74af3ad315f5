pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod drive_status;
pub mod error;
pub mod filters;
pub mod message;
pub mod neighbor;
pub mod pipeline;
pub mod scheduler;
pub mod sensors;
pub mod tasks;
pub mod transport;
pub mod types;
pub mod vehicle;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use tasks::{NodeContext, NodeTasks};
