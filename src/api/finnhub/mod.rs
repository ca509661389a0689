pub mod quote;

pub use quote::{FinnhubClient, QuoteSource};
