pub mod aggregate;
pub mod render;

pub use self::aggregate::{Category, DynamicReport, Report, ReportAggregator, ReportEntry};
pub use self::render::{cli_output_path, render_text, results_file_name, write_json};
