//! Activities used by the deletion workflow.

pub mod amss;
pub mod report;
