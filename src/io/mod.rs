//! Reading and writing per-chain output tables.

pub mod csv;

pub use self::csv::{parse_table, ChainOutput, DrawSplit, TableMetadata};
