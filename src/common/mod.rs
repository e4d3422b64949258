pub mod timestamp;

pub use timestamp::{Clock, HybridTimestamp};
