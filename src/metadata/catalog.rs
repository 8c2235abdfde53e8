//! The boundary to the host application.
//!
//! The engine never owns the methods it patches. It asks a [`MethodCatalog`] to resolve
//! identities to method definitions, to look up members a rewrite wants to call, and to answer
//! type assignability questions when hook parameters are bound. Calls to methods the catalog
//! does not define are executed by a [`Host`].
//!
//! [`Catalog`] is an in-memory implementation of both traits. Host applications can use it to
//! describe the parts of their type system they want to patch, and tests use it as a fixture.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    emulation::Value,
    metadata::{
        body::MethodDef,
        identity::{MethodIdentity, MethodRef},
    },
    Error, Result,
};

/// Name of the root of every reference type hierarchy.
pub const OBJECT_TYPE: &str = "System.Object";

/// Resolves patch targets and member references.
///
/// # Thread Safety
///
/// Catalogs are shared between the registry and every thread invoking intercepted methods, so
/// they must be `Send + Sync`.
pub trait MethodCatalog: Send + Sync {
    /// Resolves a method definition by identity.
    fn method(&self, identity: &MethodIdentity) -> Option<Arc<MethodDef>>;

    /// Resolves a member by declaring type full name and member name.
    ///
    /// Returns the first member with that name, overloads are not distinguished.
    fn member(&self, declaring_type: &str, name: &str) -> Option<MethodRef>;

    /// Returns `true` if a value of type `from` can be bound where `to` is expected.
    fn is_assignable(&self, from: &str, to: &str) -> bool;
}

/// Executes calls to methods that have no body in the catalog.
pub trait Host: Send + Sync {
    /// Invokes `method` with an optional `this` and the given arguments.
    ///
    /// # Errors
    /// Implementations return [`Error::Execution`] for unknown methods, any other error is
    /// propagated unchanged to the caller of the intercepted method.
    fn call(&self, method: &MethodRef, this: Option<&Value>, args: &[Value])
        -> Result<Option<Value>>;
}

/// Type alias for native method implementations registered with a [`Catalog`].
pub type NativeFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Option<Value>> + Send + Sync>;

/// In-memory [`MethodCatalog`] and [`Host`].
///
/// # Examples
///
/// ```rust
/// use dotpatch::{Catalog, MethodCatalog, MethodRef};
///
/// let catalog = Catalog::new();
/// catalog.add_type("Acme.Models.ContentType", &["Acme.Models.IContentTypeComposition"]);
/// catalog.add_property("Acme.Models.ContentType", "Description", "System.String");
///
/// assert!(catalog.is_assignable("Acme.Models.ContentType", "Acme.Models.IContentTypeComposition"));
/// assert!(catalog.member("Acme.Models.ContentType", "set_Description").is_some());
/// ```
#[derive(Default)]
pub struct Catalog {
    methods: DashMap<MethodIdentity, Arc<MethodDef>>,
    members: DashMap<(String, String), MethodRef>,
    natives: DashMap<(String, String), NativeFn>,
    bases: DashMap<String, Vec<String>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method definition with a body.
    ///
    /// The method also becomes resolvable as a member of its declaring type.
    pub fn add_method(&self, def: MethodDef) {
        let member = def.to_method_ref();
        self.members.insert(
            (member.declaring_type.clone(), member.name.clone()),
            member,
        );
        self.methods.insert(def.identity.clone(), Arc::new(def));
    }

    /// Declares a type and its direct base types and interfaces.
    pub fn add_type(&self, name: &str, bases: &[&str]) {
        self.bases.insert(
            name.to_string(),
            bases.iter().map(|b| (*b).to_string()).collect(),
        );
    }

    /// Adds a member implemented natively by the host.
    pub fn add_native<F>(&self, member: MethodRef, implementation: F)
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let key = (member.declaring_type.clone(), member.name.clone());
        self.natives.insert(key.clone(), Arc::new(implementation));
        self.members.insert(key, member);
    }

    /// Adds an auto-property backed by a field of the same name.
    ///
    /// Registers `get_{name}` and `set_{name}` natives reading and writing the field on the
    /// `this` object.
    pub fn add_property(&self, declaring_type: &str, name: &str, ty: &str) {
        let field = name.to_string();
        self.add_native(
            MethodRef::instance(declaring_type, &format!("get_{name}")).returning(ty),
            move |this, _| {
                let object = this
                    .and_then(Value::as_object)
                    .ok_or_else(|| Error::Execution(format!("get_{field} on a non-object")))?;
                Ok(Some(object.field(&field).unwrap_or(Value::Null)))
            },
        );

        let field = name.to_string();
        self.add_native(
            MethodRef::instance(declaring_type, &format!("set_{name}")).with_params(&[ty]),
            move |this, args| {
                let object = this
                    .and_then(Value::as_object)
                    .ok_or_else(|| Error::Execution(format!("set_{field} on a non-object")))?;
                let value = args.first().cloned().unwrap_or(Value::Null);
                object.set_field(&field, value);
                Ok(None)
            },
        );
    }

    /// Number of method definitions with a body.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

impl MethodCatalog for Catalog {
    fn method(&self, identity: &MethodIdentity) -> Option<Arc<MethodDef>> {
        self.methods.get(identity).map(|entry| entry.value().clone())
    }

    fn member(&self, declaring_type: &str, name: &str) -> Option<MethodRef> {
        self.members
            .get(&(declaring_type.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn is_assignable(&self, from: &str, to: &str) -> bool {
        if from == to || to == OBJECT_TYPE {
            return true;
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(bases) = self.bases.get(&current) {
                for base in bases.iter() {
                    if base == to {
                        return true;
                    }
                    queue.push_back(base.clone());
                }
            }
        }

        false
    }
}

impl Host for Catalog {
    fn call(
        &self,
        method: &MethodRef,
        this: Option<&Value>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        let native = self
            .natives
            .get(&(method.declaring_type.clone(), method.name.clone()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Execution(format!("No implementation for {method}")))?;

        native(this, args)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("method_count", &self.methods.len())
            .field("member_count", &self.members.len())
            .field("native_count", &self.natives.len())
            .field("type_count", &self.bases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignability_follows_bases() {
        let catalog = Catalog::new();
        catalog.add_type("A.ContentType", &["A.ContentTypeBase"]);
        catalog.add_type("A.ContentTypeBase", &["A.IContentTypeComposition", "A.IContentTypeBase"]);
        catalog.add_type("A.IContentTypeComposition", &["A.IContentTypeBase"]);

        assert!(catalog.is_assignable("A.ContentType", "A.ContentType"));
        assert!(catalog.is_assignable("A.ContentType", "A.IContentTypeComposition"));
        assert!(catalog.is_assignable("A.ContentType", "A.IContentTypeBase"));
        assert!(catalog.is_assignable("A.Unknown", OBJECT_TYPE));
        assert!(!catalog.is_assignable("A.IContentTypeBase", "A.ContentType"));
        assert!(!catalog.is_assignable("System.Int32", "System.String"));
    }

    #[test]
    fn property_natives_read_and_write_fields() {
        let catalog = Catalog::new();
        catalog.add_property("A.Model", "Version", "System.String");

        let object = Value::object("A.Model");
        let setter = catalog.member("A.Model", "set_Version").unwrap();
        let getter = catalog.member("A.Model", "get_Version").unwrap();

        catalog
            .call(&setter, Some(&object), &[Value::from("1.0")])
            .unwrap();
        let read = catalog.call(&getter, Some(&object), &[]).unwrap();

        assert_eq!(read, Some(Value::from("1.0")));
        assert!(catalog.call(&setter, None, &[Value::Null]).is_err());
    }

    #[test]
    fn unknown_native_fails() {
        let catalog = Catalog::new();
        let missing = MethodRef::instance("A.Model", "Frobnicate");

        assert!(matches!(
            catalog.call(&missing, None, &[]),
            Err(Error::Execution(_))
        ));
    }
}
