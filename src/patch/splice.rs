//! Guarded sentinel assignment spliced in front of a call.
//!
//! [`SentinelSplice`] finds a `LoadLocal L; CallVirtual member` pair and inserts, right before
//! the load:
//!
//! ```text
//!         ldloc   L
//!         brfalse AFTER
//!         ldloc   L
//!         ldstr   sentinel
//!         callvirt setter_1
//!         ...                     (one ldloc/ldstr/callvirt triple per setter)
//! AFTER:  nop
//!         ldloc   L               (the original anchor, unchanged)
//! ```
//!
//! When `L` is null the setters are skipped. Either way the original call sees the same stack
//! it saw before the splice.

use crate::{
    assembly::{net_stack_delta, resolve_operation_slot, InstructionStream, Label, OpCode, Operation},
    metadata::identity::MethodRef,
    patch::{
        matcher::{find, LocalCallPattern, MatchMode},
        Rewrite, RewriteContext,
    },
    Error, Result,
};

/// Assigns a sentinel string through setters on a local before a selected call.
///
/// # Examples
///
/// ```rust
/// use dotpatch::patch::{LocalCallPattern, SentinelSplice};
///
/// let splice = SentinelSplice::new(
///     LocalCallPattern::new("Ok", "ControllerBase"),
///     &[
///         ("Acme.Models.ServerInformationResponseModel", "set_Version"),
///         ("Acme.Models.ServerInformationResponseModel", "set_AssemblyVersion"),
///     ],
///     "🍌",
/// );
/// ```
#[derive(Clone, Debug)]
pub struct SentinelSplice {
    name: String,
    pattern: LocalCallPattern,
    setters: Vec<(String, String)>,
    sentinel: String,
    mode: MatchMode,
}

impl SentinelSplice {
    /// Creates the splice.
    ///
    /// `setters` are `(declaring type full name, member name)` pairs resolved through the
    /// catalog each time the splice is applied.
    #[must_use]
    pub fn new(pattern: LocalCallPattern, setters: &[(&str, &str)], sentinel: &str) -> Self {
        SentinelSplice {
            name: format!("sentinel-splice[{}]", pattern.selector()),
            pattern,
            setters: setters
                .iter()
                .map(|(ty, name)| ((*ty).to_string(), (*name).to_string()))
                .collect(),
            sentinel: sentinel.to_string(),
            mode: MatchMode::First,
        }
    }

    /// Renames the patch. The name identifies it within its session.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Splices in front of every match instead of only the first.
    #[must_use]
    pub fn all_matches(mut self) -> Self {
        self.mode = MatchMode::All;
        self
    }

    /// The sentinel string.
    #[must_use]
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    fn synthesize(&self, slot: u16, after: Label, setters: &[MethodRef]) -> Vec<Operation> {
        let mut block = Vec::with_capacity(3 + setters.len() * 3);
        block.push(Operation::load_local(slot));
        block.push(Operation::branch(OpCode::BranchIfFalse, after));

        for setter in setters {
            block.push(Operation::load_local(slot));
            block.push(Operation::push_string(&self.sentinel));
            block.push(Operation::call_virtual(setter.clone()));
        }

        block.push(Operation::simple(OpCode::Nop).with_label(after));
        block
    }
}

impl Rewrite for SentinelSplice {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(
        &self,
        stream: &InstructionStream,
        context: &RewriteContext<'_>,
    ) -> Result<InstructionStream> {
        let setters = self
            .setters
            .iter()
            .map(|(ty, name)| context.resolve_member(ty, name))
            .collect::<Result<Vec<_>>>()?;

        let anchors = find(stream, &self.pattern, self.mode)?;

        let mut rewritten = stream.clone();
        // Back to front, so earlier anchors keep their indices.
        for &anchor in anchors.iter().rev() {
            let access = resolve_operation_slot(&rewritten.operations()[anchor])?;
            if usize::from(access.slot) >= context.local_count() {
                return Err(Error::UnsupportedOperand(format!(
                    "local {} out of range, {} has {} locals",
                    access.slot,
                    context.method().identity,
                    context.local_count()
                )));
            }

            let after = rewritten.define_label();
            let block = self.synthesize(access.slot, after, &setters);

            let delta = net_stack_delta(&block)?;
            if delta != 0 {
                return Err(Error::StackImbalance(format!(
                    "synthesized block has a net stack effect of {delta}"
                )));
            }

            log::debug!(
                "splicing {} operations before {} in {}",
                block.len(),
                anchor,
                context.method().identity
            );
            rewritten.insert_before(anchor, block)?;
        }

        Ok(rewritten)
    }
}
