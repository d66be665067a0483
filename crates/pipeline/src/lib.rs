//! Job orchestration: turns a pair of uploaded image ids into a finished
//! generation by binding them into the job template and driving the
//! ComfyUI session through submission and completion.

pub mod error;
pub mod job;
pub mod orchestrator;
