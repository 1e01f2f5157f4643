// pub for the table views and the sampled data model
pub mod aggregate;
pub mod table;
mod archive;
mod assembler;
mod buffer;
mod channel;
mod correlator;
mod decomposer;
mod domain;
mod error;
mod options;
mod query_engine;
mod types;

pub use aggregate::SampledAggregate;
pub use aggregate::SampledBlock;
pub use aggregate::SampledColumn;
pub use aggregate::SampledSeries;
pub use archive::MemoryArchive;
pub use archive::ScriptedArchive;
pub use buffer::BufferState;
pub use buffer::MessageBuffer;
pub use channel::ArchiveConnection;
pub use channel::CancelFlag;
pub use channel::ResponseStream;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use options::EngineOptions;
pub use query_engine::QueryEngine;
pub use table::DynamicTableView;
pub use table::StaticTableView;
pub use types::CorrelatedBlock;
pub use types::DataColumn;
pub use types::DataRequest;
pub use types::ResponseMessage;
pub use types::SupportedType;
pub use types::TimingKey;
pub use types::Value;
