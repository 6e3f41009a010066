// Background jobs

pub mod status_sweeper;
