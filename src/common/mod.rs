mod interval;

pub use interval::NANOS_PER_SEC;
pub use interval::Nanos;
pub use interval::TimeInterval;
pub use interval::div_ceil_i64;
