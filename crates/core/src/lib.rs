pub mod contracts;
pub mod decoder;
pub mod events;
pub mod filter;
pub mod registry;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use decoder::{ContractEventDecoder, DecodeError, LogDecoder};
pub use events::{EventName, EventPayload, EventRecord, LogId};
pub use filter::{FilterError, LogFilter, build_filter};
pub use registry::{ContractName, ContractRegistry};
pub use source::{BlockHeader, BlockTag, LogSource, RpcLogSource, SourceError};
