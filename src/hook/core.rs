//! The [`Hook`] builder.

use std::sync::Arc;

use crate::{
    emulation::Value,
    hook::types::{Arguments, HookContext, HookParam, PostHookFn, PreHookFn, PreHookResult},
    Result,
};

/// A named hook with optional before and after handlers.
///
/// The same hook can carry both handlers, which one runs is decided by how it is registered:
/// [`crate::PatchSession::register_before`] requires a before handler and
/// [`crate::PatchSession::register_after`] an after handler.
///
/// # Examples
///
/// ## Argument mutation
///
/// ```rust,no_run
/// use dotpatch::hook::{Hook, PreHookResult};
///
/// let hook = Hook::new("persist-updated-content-type")
///     .bind_arg("entity", "Acme.Models.IContentTypeComposition")
///     .before(|_ctx, args| {
///         if let Some(entity) = args.get("entity").and_then(|v| v.as_object()) {
///             entity.set_field("Description", "Updated".into());
///         }
///         Ok(PreHookResult::Continue)
///     });
/// ```
///
/// ## Result replacement
///
/// ```rust,no_run
/// use dotpatch::hook::Hook;
/// use dotpatch::Value;
///
/// let hook = Hook::new("hide-all-types")
///     .bind_result("System.Object")
///     .after(|_ctx, result| {
///         *result = Some(Value::Null);
///         Ok(())
///     });
/// ```
pub struct Hook {
    name: String,
    params: Vec<HookParam>,
    before: Option<PreHookFn>,
    after: Option<PostHookFn>,
}

impl Hook {
    /// Creates a new hook with the given name.
    ///
    /// The name identifies the hook within its session; registering a hook with the same name
    /// and kind on the same target again is a no-op.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            before: None,
            after: None,
        }
    }

    /// Returns the hook's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared bindings.
    #[must_use]
    pub fn params(&self) -> &[HookParam] {
        &self.params
    }

    /// Declares that the hook expects `this` to be assignable to `ty`.
    #[must_use]
    pub fn bind_instance(mut self, ty: &str) -> Self {
        self.params.push(HookParam::Instance(ty.to_string()));
        self
    }

    /// Declares that the hook reads the parameter `name` as a `ty`.
    #[must_use]
    pub fn bind_arg(mut self, name: &str, ty: &str) -> Self {
        self.params.push(HookParam::Argument {
            name: name.to_string(),
            ty: ty.to_string(),
        });
        self
    }

    /// Declares that the hook reads the return value as a `ty`.
    #[must_use]
    pub fn bind_result(mut self, ty: &str) -> Self {
        self.params.push(HookParam::Result(ty.to_string()));
        self
    }

    /// Sets the before handler.
    #[must_use]
    pub fn before<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HookContext<'_>, &mut Arguments) -> Result<PreHookResult> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(handler));
        self
    }

    /// Sets the after handler.
    #[must_use]
    pub fn after<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HookContext<'_>, &mut Option<Value>) -> Result<()> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(handler));
        self
    }

    /// Returns true if this hook has a before handler.
    #[must_use]
    pub fn has_before(&self) -> bool {
        self.before.is_some()
    }

    /// Returns true if this hook has an after handler.
    #[must_use]
    pub fn has_after(&self) -> bool {
        self.after.is_some()
    }

    /// Runs the before handler, `Continue` if there is none.
    ///
    /// # Errors
    /// Propagates the handler's error unchanged.
    pub fn execute_before(
        &self,
        context: &HookContext<'_>,
        args: &mut Arguments,
    ) -> Result<PreHookResult> {
        match &self.before {
            Some(handler) => handler(context, args),
            None => Ok(PreHookResult::Continue),
        }
    }

    /// Runs the after handler, if any.
    ///
    /// # Errors
    /// Propagates the handler's error unchanged.
    pub fn execute_after(&self, context: &HookContext<'_>, result: &mut Option<Value>) -> Result<()> {
        match &self.after {
            Some(handler) => handler(context, result),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("has_before", &self.before.is_some())
            .field("has_after", &self.after.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::identity::MethodIdentity, Error};

    #[test]
    fn test_hook_builder() {
        let hook = Hook::new("test-hook")
            .bind_instance("Acme.Repo")
            .bind_arg("entity", "Acme.IContentType")
            .bind_result("System.Object");

        assert_eq!(hook.name(), "test-hook");
        assert_eq!(hook.params().len(), 3);
        assert_eq!(hook.params()[0], HookParam::Instance("Acme.Repo".to_string()));
        assert!(!hook.has_before());
        assert!(!hook.has_after());
    }

    #[test]
    fn test_hook_handlers() {
        let target = MethodIdentity::new("Acme.Repo", "Get", &[]);
        let context = HookContext::new(&target, "test-hook", None);
        let hook = Hook::new("test-hook")
            .before(|_, _| Ok(PreHookResult::ShortCircuit(Some(Value::Int(1)))))
            .after(|_, result| {
                *result = Some(Value::Int(2));
                Ok(())
            });
        assert!(hook.has_before());
        assert!(hook.has_after());

        let mut args = Arguments::default();
        assert_eq!(
            hook.execute_before(&context, &mut args).unwrap(),
            PreHookResult::ShortCircuit(Some(Value::Int(1)))
        );

        let mut result = None;
        hook.execute_after(&context, &mut result).unwrap();
        assert_eq!(result, Some(Value::Int(2)));
    }

    #[test]
    fn test_missing_handlers_are_neutral() {
        let target = MethodIdentity::new("Acme.Repo", "Get", &[]);
        let context = HookContext::new(&target, "empty", None);
        let hook = Hook::new("empty");

        let mut args = Arguments::default();
        assert_eq!(
            hook.execute_before(&context, &mut args).unwrap(),
            PreHookResult::Continue
        );

        let mut result = Some(Value::Int(5));
        hook.execute_after(&context, &mut result).unwrap();
        assert_eq!(result, Some(Value::Int(5)));
    }

    #[test]
    fn test_errors_propagate() {
        let target = MethodIdentity::new("Acme.Repo", "Get", &[]);
        let context = HookContext::new(&target, "failing", None);
        let hook = Hook::new("failing").after(|_, _| Err(Error::Execution("boom".to_string())));

        assert!(matches!(
            hook.execute_after(&context, &mut None),
            Err(Error::Execution(message)) if message == "boom"
        ));
    }
}
