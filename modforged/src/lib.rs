pub mod actions;
pub mod assistant;
pub mod builds;
pub mod session;
pub mod workspace;
