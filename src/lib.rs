mod common;
mod engine;

// shared value helpers
pub use common::NANOS_PER_SEC;
pub use common::Nanos;
pub use common::TimeInterval;

// engine
pub use engine::ArchiveConnection;
pub use engine::BufferState;
pub use engine::CancelFlag;
pub use engine::CorrelatedBlock;
pub use engine::DataColumn;
pub use engine::DataRequest;
pub use engine::DynamicTableView;
pub use engine::EngineOptions;
pub use engine::Error;
pub use engine::ErrorKind;
pub use engine::MemoryArchive;
pub use engine::MessageBuffer;
pub use engine::QueryEngine;
pub use engine::ResponseMessage;
pub use engine::ResponseStream;
pub use engine::Result;
pub use engine::SampledAggregate;
pub use engine::SampledBlock;
pub use engine::SampledColumn;
pub use engine::SampledSeries;
pub use engine::ScriptedArchive;
pub use engine::StaticTableView;
pub use engine::SupportedType;
pub use engine::TimingKey;
pub use engine::Value;
