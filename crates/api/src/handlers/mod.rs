pub mod generation;
pub mod images;
pub mod workflow;
