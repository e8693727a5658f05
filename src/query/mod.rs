pub mod builder;
pub mod executor;
pub mod plan;
pub mod range;
