//! Patch sessions and handles.
//!
//! A [`PatchSession`] is the unit of ownership for installed patches. Every registration goes
//! through a session and yields a [`PatchHandle`]; revoking the session removes exactly the
//! patches it installed.
//!
//! The lifecycle is explicit: create, register, optionally revoke, drop. Dropping a session
//! leaves its patches installed.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use strum::Display;

use crate::{
    hook::{core::Hook, registry::Registry, types::HookKind},
    metadata::identity::MethodIdentity,
    patch::Rewrite,
    Result,
};

/// Kind of an installed patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PatchKind {
    /// A hook running before the body
    Before,
    /// A hook running after the body
    After,
    /// A rewrite of the body's instruction stream
    Rewrite,
}

impl From<HookKind> for PatchKind {
    fn from(kind: HookKind) -> Self {
        match kind {
            HookKind::Before => PatchKind::Before,
            HookKind::After => PatchKind::After,
        }
    }
}

/// Identifies one installed patch.
///
/// Two registrations with the same session, target, kind and name produce equal handles.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PatchHandle {
    session: u64,
    target: MethodIdentity,
    kind: PatchKind,
    name: String,
}

impl PatchHandle {
    pub(crate) fn new(session: u64, target: &MethodIdentity, kind: PatchKind, name: &str) -> Self {
        PatchHandle {
            session,
            target: target.clone(),
            kind,
            name: name.to_string(),
        }
    }

    /// Id of the session that installed the patch.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// The patched method.
    #[must_use]
    pub fn target(&self) -> &MethodIdentity {
        &self.target
    }

    /// Kind of the patch.
    #[must_use]
    pub fn kind(&self) -> PatchKind {
        self.kind
    }

    /// Name of the hook or rewrite.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' on {} (session #{})",
            self.kind, self.name, self.target, self.session
        )
    }
}

/// A named owner of installed patches.
///
/// Sessions are created with [`Registry::session`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dotpatch::hook::{Hook, PreHookResult};
/// use dotpatch::{method_identity, Catalog, Registry};
///
/// let catalog = Arc::new(Catalog::new());
/// let registry = Registry::new(catalog.clone(), catalog);
///
/// let session = registry.session("diagnostics");
/// let target = method_identity!("Acme.Server.InformationController", "Information", []);
/// session.register_before(&target, Hook::new("trace").before(|ctx, _| {
///     println!("entering {}", ctx.target);
///     Ok(PreHookResult::Continue)
/// }))?;
///
/// // ...
///
/// session.revoke()?;
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct PatchSession {
    id: u64,
    name: String,
    registry: Arc<Registry>,
    handles: Mutex<Vec<PatchHandle>>,
}

impl PatchSession {
    pub(crate) fn new(id: u64, name: &str, registry: Arc<Registry>) -> Self {
        PatchSession {
            id,
            name: name.to_string(),
            registry,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Unique id of the session within its registry.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registry the session installs into.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handles of the patches this session still has installed, in registration order.
    ///
    /// A rewrite dropped while another session was revoked is no longer listed.
    #[must_use]
    pub fn handles(&self) -> Vec<PatchHandle> {
        let handles = lock!(self.handles).clone();
        handles
            .into_iter()
            .filter(|handle| self.registry.is_installed(handle))
            .collect()
    }

    /// Installs a hook that runs before the body of `target`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the target does not resolve and
    /// [`crate::Error::IncompatibleHook`] if the hook has no before handler or one of its
    /// bindings cannot be satisfied.
    pub fn register_before(&self, target: &MethodIdentity, hook: Hook) -> Result<PatchHandle> {
        let handle = self
            .registry
            .install_hook(self, target, hook, HookKind::Before)?;
        self.track(&handle);
        Ok(handle)
    }

    /// Installs a hook that runs after the body of `target`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the target does not resolve and
    /// [`crate::Error::IncompatibleHook`] if the hook has no after handler or one of its
    /// bindings cannot be satisfied.
    pub fn register_after(&self, target: &MethodIdentity, hook: Hook) -> Result<PatchHandle> {
        let handle = self
            .registry
            .install_hook(self, target, hook, HookKind::After)?;
        self.track(&handle);
        Ok(handle)
    }

    /// Rewrites the instruction stream of `target`.
    ///
    /// The rewrite runs on the target's current stream, so rewrites registered on the same
    /// target compose in registration order.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the target does not resolve, and any error of the
    /// rewrite or of re-encoding its result. On error the target is unchanged.
    pub fn register_rewrite<R>(&self, target: &MethodIdentity, rewrite: R) -> Result<PatchHandle>
    where
        R: Rewrite + 'static,
    {
        let handle = self
            .registry
            .install_rewrite(self, target, Arc::new(rewrite))?;
        self.track(&handle);
        Ok(handle)
    }

    /// Removes every patch installed through this session.
    ///
    /// Returns the number of patches removed.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the installation lock is poisoned.
    pub fn revoke(self) -> Result<usize> {
        let registry = self.registry.clone();
        registry.revoke(&self)
    }

    pub(crate) fn clear(&self) {
        lock!(self.handles).clear();
    }

    fn track(&self, handle: &PatchHandle) {
        let mut handles = lock!(self.handles);
        if !handles.contains(handle) {
            handles.push(handle.clone());
        }
    }
}

impl fmt::Debug for PatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("patch_count", &lock!(self.handles).len())
            .finish()
    }
}
