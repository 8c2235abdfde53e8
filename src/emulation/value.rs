//! Runtime values for executing installed streams.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

/// Shared reference to a heap object.
pub type ObjectRef = Arc<Object>;

/// A reference-type instance with named fields.
///
/// Objects are shared between the caller, hooks and the interpreter; mutations through any
/// [`ObjectRef`] are visible to all of them. This is how a before hook can update an argument
/// object that the original body reads afterwards.
pub struct Object {
    type_name: String,
    fields: RwLock<HashMap<String, Value>>,
}

impl Object {
    /// Creates an empty object of the given type.
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Object {
            type_name: type_name.to_string(),
            fields: RwLock::new(HashMap::new()),
        }
    }

    /// Full name of the object's type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Reads a field, `None` if it was never written.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        read_lock!(self.fields).get(name).cloned()
    }

    /// Writes a field.
    pub fn set_field(&self, name: &str, value: Value) {
        write_lock!(self.fields).insert(name.to_string(), value);
    }

    /// Number of fields written so far.
    #[must_use]
    pub fn field_count(&self) -> usize {
        read_lock!(self.fields).len()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = read_lock!(self.fields);
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();

        f.debug_struct("Object")
            .field("type_name", &self.type_name)
            .field("fields", &names)
            .finish()
    }
}

/// A value on the evaluation stack, in an argument or in a local.
///
/// | CIL Type | Value Variant |
/// |----------|---------------|
/// | `null` | [`Value::Null`] |
/// | `bool` | [`Value::Bool`] |
/// | `int32`, `int64` | [`Value::Int`] |
/// | `string` | [`Value::Str`] |
/// | Object reference | [`Value::Object`] |
///
/// Objects compare by identity, everything else by value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// The null reference.
    ///
    /// Also the initial value of every local.
    #[default]
    Null,

    /// Boolean.
    Bool(bool),

    /// Integer, all widths are widened to 64 bits.
    Int(i64),

    /// String.
    Str(String),

    /// Reference to a heap object.
    Object(ObjectRef),
}

impl Value {
    /// Allocates a new empty object of the given type.
    #[must_use]
    pub fn object(type_name: &str) -> Value {
        Value::Object(Arc::new(Object::new(type_name)))
    }

    /// Returns the referenced object, `None` for any other variant.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the integer value, booleans convert to 0 and 1.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Returns the string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truth value as seen by `brtrue` and `brfalse`.
    ///
    /// Null, `false` and zero are false. Strings and objects are references and therefore true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Str(_) | Value::Object(_) => true,
        }
    }

    /// Full type name of the runtime value, `None` for null.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some("System.Boolean"),
            Value::Int(_) => Some("System.Int64"),
            Value::Str(_) => Some("System.String"),
            Value::Object(object) => Some(object.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(_), Value::Int(_)) | (Value::Int(_), Value::Bool(_)) => {
                self.as_int() == other.as_int()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "\"{value}\""),
            Value::Object(object) => write!(f, "{}@{:p}", object.type_name(), Arc::as_ptr(object)),
        }
    }
}
