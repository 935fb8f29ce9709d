pub mod log_files;

pub use log_files::{find_log_files, read_lines_lossy};
