//! Freshness of tasks whose outputs are data collections, and a small host
//! that invokes them in dependency order.

pub mod application;
pub mod data_task;
pub mod graph;
pub mod timestamp;

pub use application::Application;
pub use data_task::DataTask;
pub use timestamp::{out_of_date, Timestamp};
