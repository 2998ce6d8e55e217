pub mod cell;
pub mod chart;
pub mod symbols;

pub use chart::{load_chart_file, parse_chart};
