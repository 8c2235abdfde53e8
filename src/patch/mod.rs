//! Instruction-stream rewrites.
//!
//! A [`Rewrite`] takes the current stream of a target method and produces a new one. The
//! registry runs rewrites under its installation lock, re-encodes the result and only then
//! publishes it, so a rewrite that fails leaves the target untouched.
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`matcher`] | [`Pattern`] trait, [`find`] and the stock patterns |
//! | [`splice`] | [`SentinelSplice`], a pattern plus a synthesized guarded block |
//!
//! Any closure or function with the signature
//! `Fn(&InstructionStream, &RewriteContext<'_>) -> Result<InstructionStream>` is a rewrite.

pub mod matcher;
pub mod splice;

pub use matcher::{find, LocalCallPattern, MatchMode, MemberSelector, Pattern, PredicatePattern};
pub use splice::SentinelSplice;

use crate::{
    assembly::InstructionStream,
    metadata::{body::MethodDef, catalog::MethodCatalog, identity::MethodRef},
    Error, Result,
};

/// What a rewrite can see besides the stream: the target method and the catalog.
pub struct RewriteContext<'a> {
    method: &'a MethodDef,
    catalog: &'a dyn MethodCatalog,
}

impl<'a> RewriteContext<'a> {
    /// Creates a context for rewriting `method`.
    #[must_use]
    pub fn new(method: &'a MethodDef, catalog: &'a dyn MethodCatalog) -> Self {
        RewriteContext { method, catalog }
    }

    /// The method being rewritten.
    #[must_use]
    pub fn method(&self) -> &MethodDef {
        self.method
    }

    /// The catalog the target was resolved from.
    #[must_use]
    pub fn catalog(&self) -> &dyn MethodCatalog {
        self.catalog
    }

    /// Resolves a member a rewrite wants to call.
    ///
    /// # Errors
    /// Returns [`Error::MissingMember`] if the catalog has no such member.
    pub fn resolve_member(&self, declaring_type: &str, name: &str) -> Result<MethodRef> {
        self.catalog
            .member(declaring_type, name)
            .ok_or_else(|| Error::MissingMember(format!("{declaring_type}::{name}")))
    }

    /// Number of locals declared by the target.
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.method.locals.len()
    }
}

/// A transformation of a method's instruction stream.
///
/// # Thread Safety
///
/// Installed rewrites are kept by the registry and replayed when another session revokes its
/// patches, so they must be `Send + Sync`.
pub trait Rewrite: Send + Sync {
    /// Name used to identify the patch within its session.
    fn name(&self) -> &str;

    /// Produces the rewritten stream.
    ///
    /// Implementations must not assume they run only once: the same rewrite is applied again
    /// to the original stream when patches registered before it are revoked.
    ///
    /// # Errors
    /// Any error aborts the installation and leaves the target unchanged.
    fn rewrite(
        &self,
        stream: &InstructionStream,
        context: &RewriteContext<'_>,
    ) -> Result<InstructionStream>;
}

impl<F> Rewrite for F
where
    F: Fn(&InstructionStream, &RewriteContext<'_>) -> Result<InstructionStream> + Send + Sync,
{
    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }

    fn rewrite(
        &self,
        stream: &InstructionStream,
        context: &RewriteContext<'_>,
    ) -> Result<InstructionStream> {
        self(stream, context)
    }
}

impl std::fmt::Debug for RewriteContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteContext")
            .field("method", &self.method.identity)
            .finish()
    }
}
