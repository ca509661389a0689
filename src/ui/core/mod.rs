pub mod alerts;
pub mod sink;
