//! The hook registry: installation, invocation and revocation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Registry                              │
//! │  install_lock: Mutex<()>      (serializes install and revoke)    │
//! │  installed: DashMap<MethodIdentity, Arc<InstalledMethod>>        │
//! │                          │                                       │
//! │                          ▼                                       │
//! │  InstalledMethod (immutable snapshot)                            │
//! │    original / current stream, before hooks, after hooks,         │
//! │    rewrites in registration order                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Installation clones the current snapshot, changes the clone and publishes it with a single
//! map insert. Invocations take an `Arc` to whatever snapshot is current when they start and
//! never touch the installation lock, so a call already running keeps the hooks and stream it
//! started with.
//!
//! # Call Flow
//!
//! ```text
//! invoke(target, this, args)
//!         │
//!         ▼
//! before hooks, in order ──► error ──────────────► return error
//!         │        └──────► ShortCircuit(value) ─┐
//!         ▼                                      │
//! interpret current stream                       │
//!         │                                      │
//!         ▼                                      │
//! after hooks, in order  ◄───────────────────────┘
//!         │
//!         ▼
//! return value
//! ```

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, OnceLock,
};

use dashmap::DashMap;

use crate::{
    assembly::{decode, encode, InstructionStream},
    config::EngineConfig,
    emulation::{Dispatch, Frame, Interpreter, Program, Value},
    hook::{
        core::Hook,
        session::{PatchHandle, PatchKind, PatchSession},
        types::{Arguments, HookContext, HookKind, HookParam, PreHookResult},
    },
    metadata::{
        body::{MethodBody, MethodDef},
        catalog::{Host, MethodCatalog},
        identity::{MethodIdentity, MethodRef},
    },
    patch::{Rewrite, RewriteContext},
    Error, Result,
};

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// A stream ready for execution, together with its encoded form.
#[derive(Debug)]
struct Compiled {
    program: Program,
    body: MethodBody,
}

impl Compiled {
    /// The unpatched body as shipped by the catalog.
    fn original(def: &MethodDef) -> Result<Self> {
        let stream = decode(&def.body.code, &def.body.tokens)?;
        Ok(Compiled {
            program: Program::new(stream, def)?,
            body: def.body.clone(),
        })
    }

    /// Encodes a rewritten stream. Fails if the stream cannot be encoded or is unbalanced.
    fn build(stream: InstructionStream, def: &MethodDef, config: &EngineConfig) -> Result<Self> {
        let body = encode(&stream, def.returns_value(), config)?;
        Ok(Compiled {
            program: Program::new(stream, def)?,
            body,
        })
    }
}

#[derive(Clone)]
struct InstalledHook {
    handle: PatchHandle,
    hook: Arc<Hook>,
}

#[derive(Clone)]
struct InstalledRewrite {
    handle: PatchHandle,
    rewrite: Arc<dyn Rewrite>,
}

/// Everything installed on one target.
#[derive(Clone)]
struct InstalledMethod {
    def: Arc<MethodDef>,
    original: Arc<Compiled>,
    current: Arc<Compiled>,
    before: Vec<InstalledHook>,
    after: Vec<InstalledHook>,
    rewrites: Vec<InstalledRewrite>,
}

impl InstalledMethod {
    fn new(def: Arc<MethodDef>, original: Arc<Compiled>) -> Self {
        InstalledMethod {
            def,
            current: original.clone(),
            original,
            before: Vec::new(),
            after: Vec::new(),
            rewrites: Vec::new(),
        }
    }

    fn handles(&self) -> impl Iterator<Item = &PatchHandle> {
        self.before
            .iter()
            .chain(self.after.iter())
            .map(|h| &h.handle)
            .chain(self.rewrites.iter().map(|r| &r.handle))
    }

    fn contains(&self, handle: &PatchHandle) -> bool {
        self.handles().any(|h| h == handle)
    }

    fn owned_by(&self, session: u64) -> usize {
        self.handles().filter(|h| h.session() == session).count()
    }

    fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.rewrites.is_empty()
    }
}

/// Tracks installed patches per target and executes intercepted calls.
///
/// # Thread Safety
///
/// `Registry` is `Send + Sync`. Installation and revocation are serialized by an internal lock;
/// [`Registry::invoke`] runs on the calling thread without taking it.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dotpatch::hook::Hook;
/// use dotpatch::{method_identity, Catalog, Registry, Value};
///
/// let catalog = Arc::new(Catalog::new());
/// let registry = Registry::new(catalog.clone(), catalog);
/// let target = method_identity!("Acme.Repository", "GetAllTypes", []);
///
/// let session = registry.session("bootstrap");
/// session.register_after(&target, Hook::new("empty").after(|_, result| {
///     *result = Some(Value::Null);
///     Ok(())
/// }))?;
///
/// let result = registry.invoke(&target, Some(Value::object("Acme.Repository")), vec![])?;
/// assert_eq!(result, Some(Value::Null));
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub struct Registry {
    catalog: Arc<dyn MethodCatalog>,
    host: Arc<dyn Host>,
    config: EngineConfig,
    install_lock: Mutex<()>,
    installed: DashMap<MethodIdentity, Arc<InstalledMethod>>,
    originals: DashMap<MethodIdentity, (Arc<MethodDef>, Arc<Compiled>)>,
    next_session: AtomicU64,
}

impl Registry {
    /// Creates a registry with the default [`EngineConfig`].
    #[must_use]
    pub fn new(catalog: Arc<dyn MethodCatalog>, host: Arc<dyn Host>) -> Arc<Self> {
        Self::with_config(catalog, host, EngineConfig::default())
    }

    /// Creates a registry with an explicit configuration.
    #[must_use]
    pub fn with_config(
        catalog: Arc<dyn MethodCatalog>,
        host: Arc<dyn Host>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Registry {
            catalog,
            host,
            config,
            install_lock: Mutex::new(()),
            installed: DashMap::new(),
            originals: DashMap::new(),
            next_session: AtomicU64::new(1),
        })
    }

    /// Makes `registry` the process-wide registry.
    ///
    /// Returns `false` if a global registry was already set; the existing one is kept.
    pub fn set_global(registry: Arc<Registry>) -> bool {
        GLOBAL.set(registry).is_ok()
    }

    /// The process-wide registry, if one was set.
    #[must_use]
    pub fn global() -> Option<&'static Arc<Registry>> {
        GLOBAL.get()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The catalog targets are resolved from.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn MethodCatalog> {
        &self.catalog
    }

    /// Opens a new session.
    #[must_use]
    pub fn session(self: &Arc<Self>, name: &str) -> PatchSession {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        log::debug!("opened patch session '{name}' (#{id})");
        PatchSession::new(id, name, self.clone())
    }

    /// Returns `true` if any patch is installed on `target`.
    #[must_use]
    pub fn is_patched(&self, target: &MethodIdentity) -> bool {
        self.installed.contains_key(target)
    }

    /// Number of patches installed on `target`.
    #[must_use]
    pub fn patch_count(&self, target: &MethodIdentity) -> usize {
        self.installed
            .get(target)
            .map_or(0, |entry| entry.value().handles().count())
    }

    /// The stream `target` currently executes.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the target does not resolve.
    pub fn current_stream(&self, target: &MethodIdentity) -> Result<InstructionStream> {
        if let Some(installed) = self.snapshot(target) {
            return Ok(installed.current.program.stream().clone());
        }

        let (_, original) = self.original(target)?;
        Ok(original.program.stream().clone())
    }

    /// The encoded body `target` currently executes.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the target does not resolve.
    pub fn current_body(&self, target: &MethodIdentity) -> Result<MethodBody> {
        if let Some(installed) = self.snapshot(target) {
            return Ok(installed.current.body.clone());
        }

        let (_, original) = self.original(target)?;
        Ok(original.body.clone())
    }

    /// Calls `target` through its installed hooks and stream.
    ///
    /// `this` must be given for instance targets and omitted for static ones.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the target does not resolve, [`Error::Execution`] if the
    /// call does not match the target's signature, and whatever a hook or the body raises.
    pub fn invoke(
        &self,
        target: &MethodIdentity,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        self.invoke_at(target, this, args, 0)
    }

    fn invoke_at(
        &self,
        target: &MethodIdentity,
        this: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>> {
        if depth > self.config.max_call_depth {
            return Err(Error::RecursionLimit(self.config.max_call_depth));
        }

        match self.snapshot(target) {
            Some(installed) => self.run(
                &installed.def,
                &installed.current,
                &installed.before,
                &installed.after,
                this,
                args,
                depth,
            ),
            None => {
                let (def, original) = self.original(target)?;
                self.run(&def, &original, &[], &[], this, args, depth)
            }
        }
    }

    fn run(
        &self,
        def: &MethodDef,
        compiled: &Compiled,
        before: &[InstalledHook],
        after: &[InstalledHook],
        this: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>> {
        if def.has_this() != this.is_some() {
            return Err(Error::Execution(format!(
                "{} {} a 'this' argument",
                def.identity,
                if def.has_this() { "requires" } else { "does not take" }
            )));
        }

        let mut arguments = Arguments::new(def, args)?;
        let mut result = None;
        let mut short_circuit = false;

        for installed in before {
            let context = HookContext::new(&def.identity, installed.hook.name(), this.as_ref());
            if let PreHookResult::ShortCircuit(value) =
                installed.hook.execute_before(&context, &mut arguments)?
            {
                log::debug!(
                    "'{}' short-circuited {}",
                    installed.hook.name(),
                    def.identity
                );
                result = value;
                short_circuit = true;
                break;
            }
        }

        if !short_circuit {
            let mut slots = Vec::with_capacity(def.arg_count());
            slots.extend(this.clone());
            slots.extend(arguments.into_values());

            let mut frame = Frame::new(slots, compiled.program.local_count());
            result = Interpreter::new(self, &self.config, depth)
                .execute(&compiled.program, &mut frame)?;
        }

        for installed in after {
            let context = HookContext::new(&def.identity, installed.hook.name(), this.as_ref());
            installed.hook.execute_after(&context, &mut result)?;
        }

        Ok(result)
    }

    pub(crate) fn install_hook(
        &self,
        session: &PatchSession,
        target: &MethodIdentity,
        hook: Hook,
        kind: HookKind,
    ) -> Result<PatchHandle> {
        let _guard = self.install_lock.lock().map_err(|_| Error::LockError)?;

        let (def, original) = self.original(target)?;
        self.check_bindings(&def, &hook, kind)?;

        let handle = PatchHandle::new(session.id(), target, kind.into(), hook.name());
        let mut next = self.next_snapshot(target, def, original);
        if next.contains(&handle) {
            log::debug!("{handle} is already installed");
            return Ok(handle);
        }

        let installed = InstalledHook {
            handle: handle.clone(),
            hook: Arc::new(hook),
        };
        match kind {
            HookKind::Before => next.before.push(installed),
            HookKind::After => next.after.push(installed),
        }

        self.installed.insert(target.clone(), Arc::new(next));
        log::info!("installed {handle} for '{}'", session.name());
        Ok(handle)
    }

    pub(crate) fn install_rewrite(
        &self,
        session: &PatchSession,
        target: &MethodIdentity,
        rewrite: Arc<dyn Rewrite>,
    ) -> Result<PatchHandle> {
        let _guard = self.install_lock.lock().map_err(|_| Error::LockError)?;

        let (def, original) = self.original(target)?;
        let handle = PatchHandle::new(session.id(), target, PatchKind::Rewrite, rewrite.name());
        let mut next = self.next_snapshot(target, def, original);
        if next.contains(&handle) {
            log::debug!("{handle} is already installed");
            return Ok(handle);
        }

        next.current = Arc::new(self.apply(&next, rewrite.as_ref())?);
        next.rewrites.push(InstalledRewrite {
            handle: handle.clone(),
            rewrite,
        });

        self.installed.insert(target.clone(), Arc::new(next));
        log::info!("installed {handle} for '{}'", session.name());
        Ok(handle)
    }

    /// Removes every patch installed through `session`.
    ///
    /// Targets left without patches go back to their original stream. Targets that keep
    /// rewrites from other sessions have those rewrites replayed, in their original order, on
    /// the original stream; a rewrite that no longer applies is dropped with a warning.
    ///
    /// A session opened on another registry owns nothing here and removes nothing.
    ///
    /// Returns the number of patches removed.
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the installation lock is poisoned.
    pub(crate) fn revoke(&self, session: &PatchSession) -> Result<usize> {
        if !std::ptr::eq(Arc::as_ptr(session.registry()), self) {
            log::warn!(
                "session '{}' (#{}) belongs to another registry, nothing revoked",
                session.name(),
                session.id()
            );
            return Ok(0);
        }

        let _guard = self.install_lock.lock().map_err(|_| Error::LockError)?;
        let owned = |handle: &PatchHandle| handle.session() == session.id();

        let targets: Vec<MethodIdentity> = self
            .installed
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for target in targets {
            let Some(current) = self.snapshot(&target) else {
                continue;
            };

            let count = current.owned_by(session.id());
            if count == 0 {
                continue;
            }
            removed += count;

            let mut next = (*current).clone();
            next.before.retain(|h| !owned(&h.handle));
            next.after.retain(|h| !owned(&h.handle));

            if next.rewrites.iter().any(|r| owned(&r.handle)) {
                let remaining: Vec<InstalledRewrite> = next
                    .rewrites
                    .drain(..)
                    .filter(|r| !owned(&r.handle))
                    .collect();
                next.current = next.original.clone();

                for installed in remaining {
                    match self.apply(&next, installed.rewrite.as_ref()) {
                        Ok(compiled) => {
                            next.current = Arc::new(compiled);
                            next.rewrites.push(installed);
                        }
                        Err(error) => {
                            log::warn!("dropping {} while revoking: {error}", installed.handle);
                        }
                    }
                }
            }

            if next.is_empty() {
                self.installed.remove(&target);
                log::debug!("{target} restored to its original stream");
            } else {
                self.installed.insert(target, Arc::new(next));
            }
        }

        session.clear();
        log::info!(
            "revoked session '{}' (#{}): {removed} patches removed",
            session.name(),
            session.id()
        );
        Ok(removed)
    }

    /// Returns `true` if `handle` is still installed on its target.
    pub(crate) fn is_installed(&self, handle: &PatchHandle) -> bool {
        self.snapshot(handle.target())
            .is_some_and(|installed| installed.contains(handle))
    }

    fn snapshot(&self, target: &MethodIdentity) -> Option<Arc<InstalledMethod>> {
        self.installed.get(target).map(|entry| entry.value().clone())
    }

    fn next_snapshot(
        &self,
        target: &MethodIdentity,
        def: Arc<MethodDef>,
        original: Arc<Compiled>,
    ) -> InstalledMethod {
        match self.snapshot(target) {
            Some(current) => (*current).clone(),
            None => InstalledMethod::new(def, original),
        }
    }

    /// Resolves a target and its unpatched program, caching the result.
    fn original(&self, target: &MethodIdentity) -> Result<(Arc<MethodDef>, Arc<Compiled>)> {
        if let Some(entry) = self.originals.get(target) {
            return Ok(entry.value().clone());
        }

        let def = self
            .catalog
            .method(target)
            .ok_or_else(|| Error::NotFound(target.to_string()))?;
        let compiled = Arc::new(Compiled::original(&def)?);

        self.originals
            .insert(target.clone(), (def.clone(), compiled.clone()));
        Ok((def, compiled))
    }

    fn apply(&self, installed: &InstalledMethod, rewrite: &dyn Rewrite) -> Result<Compiled> {
        let context = RewriteContext::new(&installed.def, self.catalog.as_ref());
        let stream = rewrite.rewrite(installed.current.program.stream(), &context)?;
        Compiled::build(stream, &installed.def, &self.config)
    }

    fn check_bindings(&self, def: &MethodDef, hook: &Hook, kind: HookKind) -> Result<()> {
        let incompatible = |reason: String| Error::IncompatibleHook {
            hook: hook.name().to_string(),
            target: def.identity.to_string(),
            reason,
        };

        let has_handler = match kind {
            HookKind::Before => hook.has_before(),
            HookKind::After => hook.has_after(),
        };
        if !has_handler {
            return Err(incompatible(format!("hook has no {kind} handler")));
        }

        for param in hook.params() {
            let (actual, expected) = match param {
                HookParam::Instance(expected) => {
                    if !def.has_this() {
                        return Err(incompatible("target is static".to_string()));
                    }
                    (def.identity.declaring_type(), expected)
                }
                HookParam::Argument { name, ty } => {
                    let (_, declared) = def.param(name).ok_or_else(|| {
                        incompatible(format!("target has no parameter named '{name}'"))
                    })?;
                    (declared.ty.as_str(), ty)
                }
                HookParam::Result(expected) => {
                    if kind == HookKind::Before {
                        return Err(incompatible(
                            "the result can only be bound by after hooks".to_string(),
                        ));
                    }
                    let returns = def
                        .returns
                        .as_deref()
                        .ok_or_else(|| incompatible("target returns void".to_string()))?;
                    (returns, expected)
                }
            };

            if !self.catalog.is_assignable(actual, expected) {
                return Err(incompatible(format!(
                    "{actual} is not assignable to {expected} ({param})"
                )));
            }
        }

        Ok(())
    }
}

impl Dispatch for Registry {
    fn dispatch(
        &self,
        method: &MethodRef,
        this: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>> {
        let identity = method.identity();
        if self.installed.contains_key(&identity)
            || self.originals.contains_key(&identity)
            || self.catalog.method(&identity).is_some()
        {
            return self.invoke_at(&identity, this, args, depth + 1);
        }

        self.host.call(method, this.as_ref(), &args)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("patched_targets", &self.installed.len())
            .field("next_session", &self.next_session.load(Ordering::Relaxed))
            .finish()
    }
}
