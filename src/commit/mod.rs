pub mod aggregate;
pub mod batch;
pub mod ops;
pub mod tx;
