//! Core types for the hook system.
//!
//! - [`HookKind`]: whether a hook runs before or after the target body
//! - [`HookParam`]: a parameter binding declared by a hook, checked at registration
//! - [`HookContext`]: information about the call being intercepted
//! - [`Arguments`]: the named arguments of the call, mutable by before hooks
//! - [`PreHookResult`]: result of a before hook (continue or short-circuit)
//! - [`PreHookFn`] / [`PostHookFn`]: type aliases for hook closures

use std::{fmt, sync::Arc};

use strum::Display;

use crate::{
    emulation::Value,
    metadata::{body::MethodDef, identity::MethodIdentity},
    Error, Result,
};

/// When a hook runs relative to the target body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum HookKind {
    /// Before the body, with mutable access to the arguments
    Before,
    /// After the body, with mutable access to the return value
    After,
}

/// A binding a hook declares against its target.
///
/// Bindings are checked when the hook is registered. A binding that cannot be satisfied makes
/// the registration fail with [`Error::IncompatibleHook`], so hooks never observe values of a
/// type they did not expect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookParam {
    /// The `this` of an instance target, assignable to the given type.
    Instance(String),

    /// A named parameter of the target, assignable to the given type.
    Argument {
        /// Parameter name on the target
        name: String,
        /// Type the hook expects
        ty: String,
    },

    /// The return value of the target, assignable to the given type. After hooks only.
    Result(String),
}

impl fmt::Display for HookParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookParam::Instance(ty) => write!(f, "this: {ty}"),
            HookParam::Argument { name, ty } => write!(f, "{name}: {ty}"),
            HookParam::Result(ty) => write!(f, "result: {ty}"),
        }
    }
}

/// Context passed to hooks during execution.
///
/// The context borrows from the invocation and is only valid for the duration of the hook.
///
/// # Examples
///
/// ```rust,ignore
/// use dotpatch::hook::{HookContext, Arguments, PreHookResult};
///
/// fn log_call(ctx: &HookContext<'_>, args: &mut Arguments) -> dotpatch::Result<PreHookResult> {
///     println!("{} called by {}", ctx.target, ctx.hook);
///     Ok(PreHookResult::Continue)
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// The intercepted method.
    pub target: &'a MethodIdentity,

    /// Name of the hook being run.
    pub hook: &'a str,

    /// The `this` reference for instance targets.
    ///
    /// `None` for static targets.
    pub this: Option<&'a Value>,
}

impl<'a> HookContext<'a> {
    /// Creates a hook context.
    #[must_use]
    pub fn new(target: &'a MethodIdentity, hook: &'a str, this: Option<&'a Value>) -> Self {
        HookContext { target, hook, this }
    }
}

/// The arguments of an intercepted call, `this` excluded.
///
/// Before hooks receive them mutably; whatever they leave behind is what the body sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    names: Vec<String>,
    values: Vec<Value>,
}

impl Arguments {
    /// Pairs the values of a call with the parameter names of `method`.
    ///
    /// # Errors
    /// Returns [`Error::Execution`] if the number of values does not match the declared
    /// parameters.
    pub fn new(method: &MethodDef, values: Vec<Value>) -> Result<Self> {
        if values.len() != method.params.len() {
            return Err(Error::Execution(format!(
                "{} expects {} arguments, got {}",
                method.identity,
                method.params.len(),
                values.len()
            )));
        }

        Ok(Arguments {
            names: method.params.iter().map(|p| p.name.clone()).collect(),
            values,
        })
    }

    /// Reads an argument by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|index| &self.values[index])
    }

    /// Replaces an argument by name.
    ///
    /// # Errors
    /// Returns [`Error::Execution`] if the target has no parameter with that name.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let index = self
            .position(name)
            .ok_or_else(|| Error::Execution(format!("no parameter named '{name}'")))?;
        self.values[index] = value;
        Ok(())
    }

    /// Reads an argument by position.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` for parameterless targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Consumes the view, returning the values in declaration order.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Result of executing a before hook.
///
/// | Variant | Remaining before hooks | Body | After hooks |
/// |---------|------------------------|------|-------------|
/// | [`Continue`](Self::Continue) | Run | Runs | Run |
/// | [`ShortCircuit`](Self::ShortCircuit) | Skipped | Skipped | Run |
///
/// Errors are reported through the `Result` the hook returns and abort the whole call.
#[derive(Debug, Clone, PartialEq)]
pub enum PreHookResult {
    /// Continue with the next hook and eventually the body.
    Continue,

    /// Skip the body and use this value as the result.
    ///
    /// Use `None` for void targets.
    ShortCircuit(Option<Value>),
}

/// Type alias for before hook functions.
pub type PreHookFn =
    Arc<dyn Fn(&HookContext<'_>, &mut Arguments) -> Result<PreHookResult> + Send + Sync>;

/// Type alias for after hook functions.
///
/// The hook receives the return value and may replace it.
pub type PostHookFn = Arc<dyn Fn(&HookContext<'_>, &mut Option<Value>) -> Result<()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::body::{MethodFlags, Param};

    fn method() -> MethodDef {
        MethodDef {
            identity: MethodIdentity::new("Acme.Repo", "Save", &["Acme.IContentType"]),
            flags: MethodFlags::empty(),
            params: vec![Param::new("entity", "Acme.IContentType")],
            returns: None,
            locals: Vec::new(),
            body: Default::default(),
        }
    }

    #[test]
    fn arguments_by_name() {
        let mut args = Arguments::new(&method(), vec![Value::from("a")]).unwrap();

        assert_eq!(args.get("entity"), Some(&Value::from("a")));
        assert_eq!(args.get("other"), None);

        args.set("entity", Value::from("b")).unwrap();
        assert_eq!(args.at(0), Some(&Value::from("b")));
        assert!(args.set("other", Value::Null).is_err());

        let pairs: Vec<_> = args.iter().collect();
        assert_eq!(pairs, vec![("entity", &Value::from("b"))]);
        assert_eq!(args.into_values(), vec![Value::from("b")]);
    }

    #[test]
    fn argument_count_is_checked() {
        assert!(matches!(
            Arguments::new(&method(), vec![]),
            Err(Error::Execution(_))
        ));
    }

    #[test]
    fn display() {
        assert_eq!(HookKind::Before.to_string(), "before");
        assert_eq!(HookParam::Instance("A".into()).to_string(), "this: A");
        assert_eq!(
            HookParam::Argument {
                name: "entity".into(),
                ty: "A".into()
            }
            .to_string(),
            "entity: A"
        );
    }
}
