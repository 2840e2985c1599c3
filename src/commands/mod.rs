pub mod optimize;
pub mod report;
