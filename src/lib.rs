// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # dotpatch
//!
//! Method interception and CIL instruction-stream rewriting for managed methods.
//!
//! `dotpatch` lets a host attach behavior to existing methods without touching their source:
//! hooks that run before or after a method body, and rewrites that splice new instructions into
//! the body itself. Every patch is owned by a [`PatchSession`] and can be revoked, restoring the
//! method's original behavior.
//!
//! ## Features
//!
//! - **🔧 Instruction codec** - Decode and re-encode the CIL subset method bodies use, with label
//!   fixups and short-branch relaxation
//! - **🔍 Pattern matching** - Locate anchor windows in a decoded stream
//! - **✂️ Splicing** - Insert synthesized blocks while keeping labels and stack depth intact
//! - **🪝 Hooks** - Before hooks with mutable arguments, after hooks with a mutable result
//! - **↩️ Sessions** - Install and revoke groups of patches atomically per target
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotpatch::prelude::*;
//!
//! let catalog = Arc::new(Catalog::new());
//! let registry = Registry::new(catalog.clone(), catalog);
//!
//! let session = registry.session("server-information");
//! let target = method_identity!(
//!     "Acme.Server.Controllers.InformationServerController",
//!     "Information",
//!     []
//! );
//!
//! let splice = SentinelSplice::new(
//!     LocalCallPattern::new("Ok", "Microsoft.AspNetCore.Mvc.ControllerBase"),
//!     &[
//!         ("Acme.Server.Models.ServerInformationResponseModel", "set_Version"),
//!         ("Acme.Server.Models.ServerInformationResponseModel", "set_AssemblyVersion"),
//!     ],
//!     "🍌",
//! );
//! session.register_rewrite(&target, splice)?;
//!
//! let result = registry.invoke(&target, Some(Value::Null), Vec::new())?;
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - Operation model, instruction codec and local slot resolution
//! - [`patch`] - Pattern matching and stream splicing
//! - [`hook`] - Hooks, sessions and the registry
//! - [`emulation`] - The interpreter that executes installed streams
//! - [`metadata`] - Method identities, definitions and the catalog
//! - [`bootstrap`] - Startup registration with per-target reporting
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Registration failures are returned as values,
//! a bootstrap sequence is expected to log them and continue. Errors raised by hooks propagate
//! unchanged to the caller of [`Registry::invoke`].

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dotpatch::prelude::*;
///
/// let target = method_identity!("Acme.Services.ContentTypeService", "GetAll", []);
/// let hook = Hook::new("trace").after(|ctx, _| {
///     println!("{} returned", ctx.target);
///     Ok(())
/// });
/// ```
pub mod prelude;

/// CIL operation model, codec and local slot resolution
///
/// Method bodies are decoded into an [`assembly::InstructionStream`] of
/// [`assembly::Operation`]s. Branch targets are [`assembly::Label`]s attached to operations
/// rather than byte offsets, so streams can be edited freely and are laid out again by the
/// encoder.
///
/// # Main Functions
///
/// - [`assembly::decode_instruction`] - Decode a single instruction
/// - [`assembly::decode_stream`] - Decode a sequence of instructions
/// - [`assembly::decode`] - Decode a method body into an operation stream
/// - [`assembly::encode`] - Encode an operation stream into a method body
/// - [`assembly::resolve_slot`] - Canonical slot index of a local access
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{assembly::decode_instruction, Parser};
///
/// let bytecode = &[0x00, 0x2A]; // nop, ret
/// let mut parser = Parser::new(bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// println!("Mnemonic: {}", instruction.mnemonic);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub mod assembly;

/// Startup registration with per-target reporting
pub mod bootstrap;

/// Engine configuration
pub mod config;

/// Execution of installed streams
///
/// The interpreter runs the current stream of an intercepted method so hooks, rewrites and
/// revocation have observable behavior. Calls to other intercepted methods are dispatched back
/// through the [`Registry`], all other calls go to the [`Host`].
pub mod emulation;

/// Hooks, patch sessions and the registry
pub mod hook;

/// Method identities, definitions and the catalog
pub mod metadata;

/// Pattern matching and stream rewriting
pub mod patch;

/// `dotpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpatch` Error type
///
/// Registration errors (`NotFound`, `IncompatibleHook`, `MissingMember`, `UnsupportedOperand`,
/// `PatternNotMatched`) are the ones a bootstrap sequence inspects, the rest cover the codec and
/// the interpreter.
pub use error::Error;

/// Cursor over a method body.
pub use file::parser::Parser;

/// Engine limits and encoder preferences.
pub use config::EngineConfig;

/// Method catalog, host and the in-memory implementation of both.
pub use metadata::catalog::{Catalog, Host, MethodCatalog};

/// Method identities and member references.
pub use metadata::identity::{MethodIdentity, MethodRef};

/// Method definitions and bodies.
pub use metadata::body::{MethodBody, MethodDef};

/// The registry and its sessions.
pub use hook::{PatchHandle, PatchSession, Registry};

/// Decoded instruction streams.
pub use assembly::InstructionStream;

/// Stream rewriting.
pub use patch::{Rewrite, RewriteContext};

/// Runtime values.
pub use emulation::Value;

/// Startup registration helper.
pub use bootstrap::Bootstrap;
