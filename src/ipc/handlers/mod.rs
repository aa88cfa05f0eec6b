pub mod attendance;
pub mod auth;
pub mod batches;
pub mod calendar;
pub mod core;
pub mod employees;
pub mod feedback;
pub mod holidays;
pub mod leaves;
pub mod messages;
pub mod notifications;
pub mod reports;
pub mod students;
pub mod tasks;
