pub mod candle;
pub mod charts;
pub mod poller;
pub mod supervisor;
pub mod threshold;
