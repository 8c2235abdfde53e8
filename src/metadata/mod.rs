//! Method metadata consumed by the engine.
//!
//! The engine does not parse assemblies. It works on method definitions handed to it by a
//! [`catalog::MethodCatalog`]:
//!
//! - [`identity`] - typed method identities and call-site member references
//! - [`body`] - method definitions, encoded bodies and their operand tables
//! - [`token`] - operand table row references
//! - [`catalog`] - the catalog and host traits, plus an in-memory implementation

pub mod body;
pub mod catalog;
pub mod identity;
pub mod token;
