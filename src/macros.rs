#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let _guard = lock!(self.install_lock);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let fields = read_lock!(object.fields);
///  println!("{}", fields.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut fields = write_lock!(object.fields);
///  fields.insert("Version".to_string(), value);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Builds a [`crate::MethodIdentity`] from literal parts.
///
/// The declaring type and method name are taken verbatim, the parameter list is a bracketed
/// list of type full names.
///
/// ```rust
/// use dotpatch::method_identity;
///
/// let target = method_identity!("Acme.Server.InformationController", "Information", [
///     "System.Threading.CancellationToken"
/// ]);
/// assert_eq!(target.name(), "Information");
/// assert_eq!(target.params().len(), 1);
/// ```
#[macro_export]
macro_rules! method_identity {
    ($declaring_type:expr, $name:expr, [$($param:expr),* $(,)?]) => {
        $crate::MethodIdentity::new($declaring_type, $name, &[$($param),*])
    };
}
