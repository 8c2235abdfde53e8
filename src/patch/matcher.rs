//! Pattern matching over operation sequences.
//!
//! A [`Pattern`] is a predicate over a fixed-width window of adjacent operations. [`find`]
//! slides that window over a stream and reports the index of the first operation of every
//! matching window.
//!
//! # Available Patterns
//!
//! | Pattern | Description |
//! |---------|-------------|
//! | [`LocalCallPattern`] | A local load immediately followed by a virtual call to a selected member |
//! | [`PredicatePattern`] | Any closure over a window of operations |
//!
//! Member selection is by method name and declaring-type simple name only. Overloads and
//! namespaces are not distinguished.

use std::{fmt, sync::Arc};

use crate::{
    assembly::{InstructionStream, OpCode, Operation},
    metadata::identity::{simple_type_name, MethodRef},
    Error, Result,
};

/// How many matches [`find`] reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Only the leftmost match
    #[default]
    First,
    /// Every non-overlapping match, left to right
    All,
}

/// Trait for implementing stream patterns.
///
/// # Implementing Custom Patterns
///
/// ```rust
/// use dotpatch::assembly::{OpCode, Operation};
/// use dotpatch::patch::Pattern;
///
/// struct ReturnsNull;
///
/// impl Pattern for ReturnsNull {
///     fn width(&self) -> usize {
///         2
///     }
///
///     fn matches(&self, window: &[Operation]) -> bool {
///         window[0].opcode == OpCode::LoadNull && window[1].opcode == OpCode::Return
///     }
///
///     fn description(&self) -> String {
///         "ldnull; ret".to_string()
///     }
/// }
/// ```
///
/// # Thread Safety
///
/// Patterns are held by installed rewrites and must be `Send + Sync`.
pub trait Pattern: Send + Sync {
    /// Number of adjacent operations the pattern inspects.
    fn width(&self) -> usize;

    /// Checks a window of exactly [`Pattern::width`] operations.
    fn matches(&self, window: &[Operation]) -> bool;

    /// Returns a description of this pattern for diagnostics.
    fn description(&self) -> String;
}

/// Scans `stream` left to right for `pattern`.
///
/// Matches never overlap: after a match at `i` the scan resumes at `i + width`.
///
/// # Errors
/// Returns [`Error::PatternNotMatched`] if nothing matched.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::{InstructionStream, OpCode, Operation};
/// use dotpatch::patch::{find, LocalCallPattern, MatchMode};
/// use dotpatch::MethodRef;
///
/// let ok = MethodRef::instance("Microsoft.AspNetCore.Mvc.ControllerBase", "Ok")
///     .with_params(&["System.Object"])
///     .returning("Microsoft.AspNetCore.Mvc.OkObjectResult");
/// let stream = InstructionStream::from_operations(vec![
///     Operation::load_arg(0),
///     Operation::load_local(2),
///     Operation::call_virtual(ok),
///     Operation::simple(OpCode::Return),
/// ]);
///
/// let pattern = LocalCallPattern::new("Ok", "ControllerBase");
/// assert_eq!(find(&stream, &pattern, MatchMode::First)?, vec![1]);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn find<P: Pattern + ?Sized>(
    stream: &InstructionStream,
    pattern: &P,
    mode: MatchMode,
) -> Result<Vec<usize>> {
    let ops = stream.operations();
    let width = pattern.width();
    let mut matches = Vec::new();

    if width > 0 && ops.len() >= width {
        let mut index = 0;
        while index + width <= ops.len() {
            if pattern.matches(&ops[index..index + width]) {
                matches.push(index);
                if mode == MatchMode::First {
                    break;
                }
                index += width;
            } else {
                index += 1;
            }
        }
    }

    if matches.is_empty() {
        return Err(Error::PatternNotMatched(pattern.description()));
    }

    log::debug!(
        "pattern '{}' matched at {:?}",
        pattern.description(),
        matches
    );
    Ok(matches)
}

/// Selects call targets by method name and declaring-type simple name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberSelector {
    name: String,
    declaring_type: String,
}

impl MemberSelector {
    /// Creates a selector. A qualified `declaring_type` is reduced to its simple name.
    #[must_use]
    pub fn new(name: &str, declaring_type: &str) -> Self {
        MemberSelector {
            name: name.to_string(),
            declaring_type: simple_type_name(declaring_type).to_string(),
        }
    }

    /// The selected method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The selected declaring-type simple name.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Checks a call target.
    #[must_use]
    pub fn matches(&self, method: &MethodRef) -> bool {
        method.name == self.name && method.declaring_type_name() == self.declaring_type
    }
}

impl fmt::Display for MemberSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// `LoadLocal L` immediately followed by a `CallVirtual` to a selected member.
///
/// The anchor reported by [`find`] is the index of the `LoadLocal`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalCallPattern {
    selector: MemberSelector,
}

impl LocalCallPattern {
    /// Creates the pattern for calls to `name` on `declaring_type`.
    #[must_use]
    pub fn new(name: &str, declaring_type: &str) -> Self {
        LocalCallPattern {
            selector: MemberSelector::new(name, declaring_type),
        }
    }

    /// Creates the pattern from an existing selector.
    #[must_use]
    pub fn with_selector(selector: MemberSelector) -> Self {
        LocalCallPattern { selector }
    }

    /// The call target selector.
    #[must_use]
    pub fn selector(&self) -> &MemberSelector {
        &self.selector
    }
}

impl Pattern for LocalCallPattern {
    fn width(&self) -> usize {
        2
    }

    fn matches(&self, window: &[Operation]) -> bool {
        let [load, call] = window else {
            return false;
        };

        load.opcode == OpCode::LoadLocal
            && call.opcode == OpCode::CallVirtual
            && call.method().is_some_and(|method| self.selector.matches(method))
    }

    fn description(&self) -> String {
        format!("ldloc; callvirt {}", self.selector)
    }
}

/// Type alias for window predicates.
pub type WindowPredicate = dyn Fn(&[Operation]) -> bool + Send + Sync;

/// A pattern backed by a closure.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::OpCode;
/// use dotpatch::patch::PredicatePattern;
///
/// let returns = PredicatePattern::new("ret", 1, |window| window[0].opcode == OpCode::Return);
/// ```
#[derive(Clone)]
pub struct PredicatePattern {
    description: String,
    width: usize,
    predicate: Arc<WindowPredicate>,
}

impl PredicatePattern {
    /// Creates a pattern over windows of `width` operations.
    pub fn new<F>(description: &str, width: usize, predicate: F) -> Self
    where
        F: Fn(&[Operation]) -> bool + Send + Sync + 'static,
    {
        PredicatePattern {
            description: description.to_string(),
            width,
            predicate: Arc::new(predicate),
        }
    }
}

impl Pattern for PredicatePattern {
    fn width(&self) -> usize {
        self.width
    }

    fn matches(&self, window: &[Operation]) -> bool {
        (self.predicate)(window)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

impl fmt::Debug for PredicatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePattern")
            .field("description", &self.description)
            .field("width", &self.width)
            .finish()
    }
}
