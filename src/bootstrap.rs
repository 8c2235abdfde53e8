//! Startup registration with per-target reporting.
//!
//! A host application usually installs a fixed list of patches at startup, and a single target
//! that cannot be resolved in the running version must not prevent the others from being
//! installed. [`Bootstrap`] wraps a [`PatchSession`], logs every failed registration with
//! `log::warn!` and records the outcome of each one in a [`BootstrapReport`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotpatch::hook::{Hook, PreHookResult};
//! use dotpatch::{method_identity, Bootstrap, Catalog, Registry};
//!
//! let catalog = Arc::new(Catalog::new());
//! let registry = Registry::new(catalog.clone(), catalog);
//!
//! let mut bootstrap = Bootstrap::new(&registry, "startup");
//! bootstrap
//!     .before(
//!         &method_identity!("Acme.Services.ContentTypeService", "Save", ["Acme.Models.IContentType"]),
//!         Hook::new("audit").before(|_, _| Ok(PreHookResult::Continue)),
//!     )
//!     .after(
//!         &method_identity!("Acme.Services.ContentTypeService", "GetAll", []),
//!         Hook::new("filter").after(|_, _| Ok(())),
//!     );
//!
//! let (session, report) = bootstrap.finish();
//! println!("{} applied, {} skipped", report.applied_count(), report.skipped_count());
//! # drop(session);
//! ```

use std::{fmt, sync::Arc};

use crate::{
    hook::{Hook, PatchHandle, PatchKind, PatchSession, Registry},
    metadata::identity::MethodIdentity,
    patch::Rewrite,
    Error, Result,
};

/// Outcome of one registration.
#[derive(Debug)]
pub enum PatchOutcome {
    /// The patch was installed
    Applied(PatchHandle),
    /// The registration failed and the target was left as it was
    Skipped(Error),
}

impl PatchOutcome {
    /// Returns true if the patch was installed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied(_))
    }
}

/// One recorded registration.
#[derive(Debug)]
pub struct BootstrapEntry {
    /// The requested target
    pub target: MethodIdentity,
    /// What was requested
    pub kind: PatchKind,
    /// Name of the hook or rewrite
    pub name: String,
    /// What happened
    pub outcome: PatchOutcome,
}

/// Outcomes of a bootstrap sequence, in registration order.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    entries: Vec<BootstrapEntry>,
}

impl BootstrapReport {
    /// All recorded registrations.
    #[must_use]
    pub fn entries(&self) -> &[BootstrapEntry] {
        &self.entries
    }

    /// Iterates over the registrations that were installed.
    pub fn applied(&self) -> impl Iterator<Item = &BootstrapEntry> {
        self.entries.iter().filter(|e| e.outcome.is_applied())
    }

    /// Iterates over the registrations that failed.
    pub fn skipped(&self) -> impl Iterator<Item = &BootstrapEntry> {
        self.entries.iter().filter(|e| !e.outcome.is_applied())
    }

    /// Number of installed patches.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    /// Number of failed registrations.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }

    /// Returns true if every registration succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_applied())
    }
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} applied, {} skipped",
            self.applied_count(),
            self.skipped_count()
        )?;
        for entry in &self.entries {
            match &entry.outcome {
                PatchOutcome::Applied(_) => {
                    writeln!(f, "  ok   {} '{}' on {}", entry.kind, entry.name, entry.target)?;
                }
                PatchOutcome::Skipped(error) => {
                    writeln!(
                        f,
                        "  skip {} '{}' on {}: {error}",
                        entry.kind, entry.name, entry.target
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Registers patches through one session, continuing past failures.
#[derive(Debug)]
pub struct Bootstrap {
    session: PatchSession,
    report: BootstrapReport,
}

impl Bootstrap {
    /// Opens a new session named `name` on `registry`.
    #[must_use]
    pub fn new(registry: &Arc<Registry>, name: &str) -> Self {
        Bootstrap {
            session: registry.session(name),
            report: BootstrapReport::default(),
        }
    }

    /// Registers a before hook, recording the outcome.
    pub fn before(&mut self, target: &MethodIdentity, hook: Hook) -> &mut Self {
        let name = hook.name().to_string();
        let result = self.session.register_before(target, hook);
        self.record(target, PatchKind::Before, name, result)
    }

    /// Registers an after hook, recording the outcome.
    pub fn after(&mut self, target: &MethodIdentity, hook: Hook) -> &mut Self {
        let name = hook.name().to_string();
        let result = self.session.register_after(target, hook);
        self.record(target, PatchKind::After, name, result)
    }

    /// Registers a rewrite, recording the outcome.
    pub fn rewrite<R>(&mut self, target: &MethodIdentity, rewrite: R) -> &mut Self
    where
        R: Rewrite + 'static,
    {
        let name = rewrite.name().to_string();
        let result = self.session.register_rewrite(target, rewrite);
        self.record(target, PatchKind::Rewrite, name, result)
    }

    /// The session patches are installed through.
    #[must_use]
    pub fn session(&self) -> &PatchSession {
        &self.session
    }

    /// Outcomes recorded so far.
    #[must_use]
    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    /// Ends the sequence, handing back the session and the report.
    #[must_use]
    pub fn finish(self) -> (PatchSession, BootstrapReport) {
        log::info!(
            "bootstrap '{}' finished: {} applied, {} skipped",
            self.session.name(),
            self.report.applied_count(),
            self.report.skipped_count()
        );
        (self.session, self.report)
    }

    fn record(
        &mut self,
        target: &MethodIdentity,
        kind: PatchKind,
        name: String,
        result: Result<PatchHandle>,
    ) -> &mut Self {
        let outcome = match result {
            Ok(handle) => PatchOutcome::Applied(handle),
            Err(error) => {
                log::warn!("skipping {kind} '{name}' on {target}: {error}");
                PatchOutcome::Skipped(error)
            }
        };
        self.report.entries.push(BootstrapEntry {
            target: target.clone(),
            kind,
            name,
            outcome,
        });
        self
    }
}
