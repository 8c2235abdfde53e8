//! # dotpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotpatch library. Import this module to get quick access to everything a bootstrap
//! sequence needs to declare and install patches.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpatch operations
pub use crate::Error;

/// The result type used throughout dotpatch
pub use crate::Result;

/// Engine limits and encoder preferences
pub use crate::EngineConfig;

// ================================================================================================
// Targets and Catalog
// ================================================================================================

/// Builds a method identity from literal parts
pub use crate::method_identity;

/// Method identities and member references
pub use crate::metadata::identity::{MethodIdentity, MethodRef};

/// Method definitions, bodies and flags
pub use crate::metadata::body::{MethodBody, MethodDef, MethodFlags, Param};

/// Method resolution and native calls
pub use crate::metadata::catalog::{Catalog, Host, MethodCatalog};

// ================================================================================================
// Instruction Streams
// ================================================================================================

/// Operation model
pub use crate::assembly::{InstructionStream, Label, OpCode, Operand, Operation};

/// Codec entry points
pub use crate::assembly::{decode, encode};

// ================================================================================================
// Rewriting
// ================================================================================================

/// Pattern matching
pub use crate::patch::{find, LocalCallPattern, MatchMode, MemberSelector, Pattern, PredicatePattern};

/// Stream rewrites
pub use crate::patch::{Rewrite, RewriteContext, SentinelSplice};

// ================================================================================================
// Hooks and Sessions
// ================================================================================================

/// Hook definition and handler types
pub use crate::hook::{Arguments, Hook, HookContext, HookKind, PreHookResult};

/// Registry, sessions and handles
pub use crate::hook::{PatchHandle, PatchKind, PatchSession, Registry};

/// Startup registration with reporting
pub use crate::bootstrap::{Bootstrap, BootstrapReport, PatchOutcome};

// ================================================================================================
// Runtime Values
// ================================================================================================

/// Values seen by hooks and the interpreter
pub use crate::emulation::{Object, ObjectRef, Value};
