use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The first five variants form the patching taxonomy and are the values a bootstrap sequence is
/// expected to inspect when a target could not be patched. The remaining variants cover the
/// byte-level codec and the interpreter that executes installed streams.
///
/// # Error Categories
///
/// ## Registration and rewriting
/// - [`Error::NotFound`] - The target method could not be resolved through the catalog
/// - [`Error::IncompatibleHook`] - A hook parameter cannot bind to the target's parameter
/// - [`Error::MissingMember`] - A member required by a rewrite could not be resolved
/// - [`Error::UnsupportedOperand`] - A local-slot operand had an unexpected shape
/// - [`Error::PatternNotMatched`] - A pattern found no anchor in the stream
///
/// ## Codec
/// - [`Error::Malformed`] - Corrupted or invalid instruction bytes
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a method body
/// - [`Error::InvalidBranch`] - A branch references a label that is never placed
/// - [`Error::StackImbalance`] - A stream or synthesized block violates stack balance
///
/// ## Execution
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded
/// - [`Error::InstructionLimit`] - Maximum executed instruction count exceeded
/// - [`Error::Execution`] - A runtime fault while interpreting a stream
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust,no_run
/// use dotpatch::{method_identity, Catalog, Error, InstructionStream, Registry, RewriteContext};
/// use std::sync::Arc;
///
/// fn unchanged(stream: &InstructionStream, _: &RewriteContext<'_>) -> dotpatch::Result<InstructionStream> {
///     Ok(stream.clone())
/// }
///
/// let catalog = Arc::new(Catalog::new());
/// let registry = Registry::new(catalog.clone(), catalog);
/// let session = registry.session("bootstrap");
///
/// let target = method_identity!("Acme.Controllers.Server", "Information", []);
/// match session.register_rewrite(&target, unchanged) {
///     Ok(handle) => println!("patched {}", handle.target()),
///     Err(Error::NotFound(target)) => eprintln!("skipping {target}"),
///     Err(e) => eprintln!("failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The target method could not be resolved.
    ///
    /// Raised at registration time when the catalog has no method matching the requested
    /// identity. The bootstrap caller is expected to log and continue.
    #[error("Target method could not be resolved - {0}")]
    NotFound(String),

    /// A hook's declared parameter cannot be bound to the target method.
    ///
    /// Either the target has no parameter with the declared name, or the target's parameter type
    /// is not assignable to the type declared by the hook.
    #[error("Hook '{hook}' is incompatible with {target}: {reason}")]
    IncompatibleHook {
        /// Name of the rejected hook
        hook: String,
        /// Display form of the target method
        target: String,
        /// Why the binding failed
        reason: String,
    },

    /// A member required by a rewrite could not be resolved.
    ///
    /// Rewrites are all-or-nothing: when this error is returned the original stream has not been
    /// touched.
    #[error("Member could not be resolved - {0}")]
    MissingMember(String),

    /// An operand did not have the shape a local-slot access requires.
    ///
    /// This is fatal for the rewrite that hit it, it signals that an assumption about the
    /// instruction shape was violated.
    #[error("Unsupported operand - {0}")]
    UnsupportedOperand(String),

    /// The pattern found no anchor in the stream.
    ///
    /// The stream is left unchanged.
    #[error("Pattern '{0}' did not match")]
    PatternNotMatched(String),

    /// The instruction bytes are damaged and could not be decoded.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a method body.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A branch could not be encoded.
    ///
    /// Returned by the encoder when a branch targets a label that is not attached to any
    /// operation of the stream, or when a label is attached twice.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// The evaluation stack is unbalanced.
    ///
    /// Raised when the encoder detects an underflow or a join point reached with different
    /// depths, and when a synthesized block has a non-zero net stack effect.
    #[error("Stack imbalance - {0}")]
    StackImbalance(String),

    /// Recursion limit reached.
    ///
    /// The associated value shows the call depth limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Instruction limit reached.
    ///
    /// The associated value shows the per-invocation instruction budget that was exhausted.
    #[error("Reach the maximum number of executed instructions - {0}")]
    InstructionLimit(u64),

    /// A runtime fault while interpreting an installed stream.
    #[error("Execution failed - {0}")]
    Execution(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}
