/// Carriage return delimited lines.
pub mod lines;
