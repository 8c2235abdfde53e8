//! Method identities and member references.
//!
//! A [`MethodIdentity`] names a patch target: declaring type full name, method name and the full
//! names of its parameter types. It is the key of the hook registry and of the
//! [`crate::MethodCatalog`].
//!
//! A [`MethodRef`] is what a call operand refers to. Besides the identity it carries the shape
//! the interpreter and the encoder need: whether a `this` argument is passed and whether a value
//! is returned.

use std::fmt;

/// Identity of a method: declaring type, name and parameter signature.
///
/// Identities are plain values, two identities compare equal when all three parts are equal.
/// Use the [`crate::method_identity!`] macro to spell them at the call site.
///
/// # Examples
///
/// ```rust
/// use dotpatch::{method_identity, MethodIdentity};
///
/// let a = method_identity!("Acme.Models.ContentService", "Save", ["Acme.Models.IContent"]);
/// let b = MethodIdentity::new("Acme.Models.ContentService", "Save", &["Acme.Models.IContent"]);
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "Acme.Models.ContentService::Save(Acme.Models.IContent)");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodIdentity {
    declaring_type: String,
    name: String,
    params: Vec<String>,
}

impl MethodIdentity {
    /// Creates a new identity.
    ///
    /// # Arguments
    ///
    /// * `declaring_type` - Full name of the declaring type, including namespace
    /// * `name` - The method name
    /// * `params` - Full names of the parameter types, in declaration order
    #[must_use]
    pub fn new(declaring_type: &str, name: &str, params: &[&str]) -> Self {
        MethodIdentity {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Full name of the declaring type.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter type names in declaration order.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for MethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}({})",
            self.declaring_type,
            self.name,
            self.params.join(", ")
        )
    }
}

/// Returns the simple name of a type: namespace, enclosing types and generic arguments
/// stripped.
///
/// ```rust
/// use dotpatch::metadata::identity::simple_type_name;
///
/// assert_eq!(simple_type_name("Microsoft.AspNetCore.Mvc.ControllerBase"), "ControllerBase");
/// assert_eq!(simple_type_name("Acme.Repo`1[Acme.Models.IContentType]"), "Repo`1");
/// assert_eq!(simple_type_name("Acme.Outer+Inner"), "Inner");
/// assert_eq!(simple_type_name("Plain"), "Plain");
/// ```
#[must_use]
pub fn simple_type_name(full_name: &str) -> &str {
    let base = full_name.split('[').next().unwrap_or(full_name);
    base.rsplit(['.', '+']).next().unwrap_or(base)
}

/// A reference to a callable method, as carried by call operands.
///
/// # Examples
///
/// ```rust
/// use dotpatch::MethodRef;
///
/// let ok = MethodRef::instance("Microsoft.AspNetCore.Mvc.ControllerBase", "Ok")
///     .with_params(&["System.Object"])
///     .returning("Microsoft.AspNetCore.Mvc.OkObjectResult");
///
/// assert_eq!(ok.declaring_type_name(), "ControllerBase");
/// assert_eq!(ok.pops(), 2);
/// assert_eq!(ok.pushes(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Full name of the declaring type
    pub declaring_type: String,
    /// The method name
    pub name: String,
    /// Full names of the parameter types
    pub params: Vec<String>,
    /// Full name of the return type, `None` for void
    pub returns: Option<String>,
    /// Whether a `this` argument is passed
    pub has_this: bool,
}

impl MethodRef {
    /// Creates a reference to a parameterless, void, instance method.
    #[must_use]
    pub fn instance(declaring_type: &str, name: &str) -> Self {
        MethodRef {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            params: Vec::new(),
            returns: None,
            has_this: true,
        }
    }

    /// Creates a reference to a parameterless, void, static method.
    #[must_use]
    pub fn static_method(declaring_type: &str, name: &str) -> Self {
        MethodRef {
            has_this: false,
            ..Self::instance(declaring_type, name)
        }
    }

    /// Sets the parameter types.
    #[must_use]
    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returning(mut self, returns: &str) -> Self {
        self.returns = Some(returns.to_string());
        self
    }

    /// Simple name of the declaring type, namespace stripped.
    #[must_use]
    pub fn declaring_type_name(&self) -> &str {
        simple_type_name(&self.declaring_type)
    }

    /// The identity of the referenced method.
    #[must_use]
    pub fn identity(&self) -> MethodIdentity {
        MethodIdentity {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }

    /// Number of evaluation stack slots a call consumes, `this` included.
    #[must_use]
    pub fn pops(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Number of evaluation stack slots a call produces.
    #[must_use]
    pub fn pushes(&self) -> usize {
        usize::from(self.returns.is_some())
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}({})",
            self.returns.as_deref().unwrap_or("void"),
            self.declaring_type,
            self.name,
            self.params.join(", ")
        )
    }
}
