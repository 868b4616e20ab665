pub mod model;
pub mod monitor;
pub mod schedule;
