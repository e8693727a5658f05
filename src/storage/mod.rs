pub mod encoded_key;
pub mod engine;
pub mod index;
pub mod keyspace;
pub mod memory;
