//! Method interception: hooks, sessions and the registry.
//!
//! Hooks run around the body of a target method:
//!
//! - **Before hooks** see the call's arguments mutably and can short-circuit the body
//! - **After hooks** see the return value mutably and can replace it
//! - **Rewrites** (see [`crate::patch`]) replace the body's instruction stream itself
//!
//! All three are installed through a [`PatchSession`] and tracked by the [`Registry`].
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | `types` | Core types: kinds, bindings, context, arguments, results |
//! | `core` | The [`Hook`] builder |
//! | `session` | [`PatchSession`] and [`PatchHandle`] |
//! | `registry` | [`Registry`]: installation, invocation, revocation |
//!
//! # Hook Execution Flow
//!
//! ```text
//! Intercepted call
//!         │
//!         ▼
//! ┌───────────────────┐
//! │  Before hooks     │───► Err ───────────► caller gets the error
//! │  (in order)       │───► ShortCircuit ──┐
//! └───────────────────┘                    │
//!         │ Continue                       │
//!         ▼                                │
//! ┌───────────────────┐                    │
//! │  Current stream   │                    │
//! └───────────────────┘                    │
//!         │                                │
//!         ▼                                │
//! ┌───────────────────┐                    │
//! │  After hooks      │◄───────────────────┘
//! │  (in order)       │───► Err ───────────► caller gets the error
//! └───────────────────┘
//!         │
//!         ▼
//!    return value
//! ```
//!
//! # Bindings
//!
//! A hook can declare what it expects of its target with [`Hook::bind_instance`],
//! [`Hook::bind_arg`] and [`Hook::bind_result`]. Bindings are checked against the target's
//! signature through [`crate::MethodCatalog::is_assignable`] when the hook is registered, and
//! an unsatisfiable binding fails the registration with [`crate::Error::IncompatibleHook`].

mod core;
mod registry;
mod session;
mod types;

pub use self::core::Hook;
pub use registry::Registry;
pub use session::{PatchHandle, PatchKind, PatchSession};
pub use types::{
    Arguments, HookContext, HookKind, HookParam, PostHookFn, PreHookFn, PreHookResult,
};
