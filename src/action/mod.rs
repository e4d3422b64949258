pub mod processor;
pub mod record;

pub use processor::{processor_fn, ActionProcessor, FnProcessor, ProcessError, ProcessorRegistry};
pub use record::{encode_json_payload, ActionId, ActionKind, ActionRecord};
