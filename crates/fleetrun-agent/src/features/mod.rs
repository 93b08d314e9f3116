pub mod command_execution;
pub mod file_access;
pub mod host_metrics;
pub mod service_control;
