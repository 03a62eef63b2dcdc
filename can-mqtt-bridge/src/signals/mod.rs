//! Signal catalog and DBC adapter
//!
//! This module contains the read-only signal catalog, the adapter that fills it
//! from a parsed DBC model, and the bit layout shared by decoder and encoder.

pub mod database;
pub mod dbc;
pub mod layout;

// Re-export key types for convenience
pub use database::{
    ByteOrder, CatalogStats, MessageDefinition, MultiplexerInfo, SignalCatalog,
    SignalDefinition, ValueType,
};
pub use layout::SignalLayout;
