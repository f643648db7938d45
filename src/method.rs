//! Per-invocation execution state (§4.3, §5): locals, arguments, the mutex stack, and the
//! Return/Break/Continue signal that executing a `TermList` propagates upward. Everything here
//! belongs to exactly one call of [`invoke_method`] - nothing is shared between concurrent
//! invocations, which is what lets multiple kernel threads drive their own calls against the same
//! [`AmlContext`] without contending on anything but the namespace lock itself.
//!
//! Locals and args are each represented by their own `ObjectHandle` cell (`ObjectData::Local`/
//! `Arg`, holding the value or `None` if uninitialized), not a bare slot - that's what lets
//! `RefOf(Local0)` hand out a real, aliasable reference to the slot itself rather than to whatever
//! value happened to be in it at the time.

use crate::{
    mutex::MutexStack,
    name::AmlName,
    object::{synthetic_zero, MethodBody, ObjectData, ObjectHandle, ObjectNode},
    stream::Stream,
    AmlContext, AmlError,
};
use alloc::vec::Vec;

/// The outcome of executing a statement or a `TermList`, propagated up to whatever's driving it
/// (another statement, or `invoke_method` itself).
pub enum Flow {
    Normal,
    Return(ObjectHandle),
    Break,
    Continue,
}

/// The state threaded through every parsing/evaluating call for the duration of one method
/// invocation (or one top-level table parse, which has no locals or arguments and rejects any
/// attempt to use them).
pub struct MethodState {
    locals: [ObjectHandle; 8],
    args: Vec<ObjectHandle>,
    pub mutex_stack: MutexStack,
    pub scope: AmlName,
    in_method: bool,
    last_result: Option<ObjectHandle>,
}

impl MethodState {
    pub fn outside_method(scope: AmlName) -> MethodState {
        MethodState {
            locals: core::array::from_fn(|_| ObjectNode::new(ObjectData::Local(None))),
            args: Vec::new(),
            mutex_stack: MutexStack::new(),
            scope,
            in_method: false,
            last_result: None,
        }
    }

    pub fn for_method(scope: AmlName, arg_count: u8, provided: &[ObjectHandle]) -> MethodState {
        let args = (0..arg_count)
            .map(|i| ObjectNode::new(ObjectData::Arg(provided.get(i as usize).cloned())))
            .collect();
        MethodState {
            locals: core::array::from_fn(|_| ObjectNode::new(ObjectData::Local(None))),
            args,
            mutex_stack: MutexStack::new(),
            scope,
            in_method: true,
            last_result: None,
        }
    }

    pub fn in_method(&self) -> bool {
        self.in_method
    }

    /// The `Local` cell object itself - what `RefOf(LocalN)` points a reference at.
    pub fn local_cell(&self, n: u8) -> Result<ObjectHandle, AmlError> {
        self.locals.get(n as usize).cloned().ok_or(AmlError::InvalidLocalAccess(n))
    }

    /// The `Arg` cell object itself - what `RefOf(ArgN)` points a reference at.
    pub fn arg_cell(&self, n: u8) -> Result<ObjectHandle, AmlError> {
        if !self.in_method {
            return Err(AmlError::NotExecutingControlMethod);
        }
        self.args.get(n as usize).cloned().ok_or(AmlError::InvalidArgAccess(n))
    }

    /// The value currently held by `LocalN`, already unwrapped from its cell.
    pub fn local(&self, n: u8) -> Result<ObjectHandle, AmlError> {
        let cell = self.local_cell(n)?;
        let value = match &*cell.data.lock() {
            ObjectData::Local(inner) => inner.clone(),
            _ => unreachable!("local cell always holds ObjectData::Local"),
        };
        value.ok_or(AmlError::UninitializedLocal)
    }

    /// The value currently held by `ArgN`, already unwrapped from its cell.
    pub fn arg(&self, n: u8) -> Result<ObjectHandle, AmlError> {
        let cell = self.arg_cell(n)?;
        let value = match &*cell.data.lock() {
            ObjectData::Arg(inner) => inner.clone(),
            _ => unreachable!("arg cell always holds ObjectData::Arg"),
        };
        value.ok_or(AmlError::UninitializedArg)
    }

    /// Records `value` as the most recently evaluated expression-statement in this method body -
    /// what an implicit return (falling off the end of a `TermList` without an explicit `Return`)
    /// hands back instead of a synthetic zero (spec.md's `Method(M) { Store(7, Local0); Local0 }`
    /// returning `7`).
    pub fn set_last_result(&mut self, value: ObjectHandle) {
        self.last_result = Some(value);
    }

    pub fn take_last_result(&mut self) -> Option<ObjectHandle> {
        self.last_result.take()
    }
}

/// Invokes the control method named by `path` (or simply returns the value of a named object that
/// wasn't encoded as a method at all - AML commonly writes e.g. `_STA` as a plain `Integer`
/// instead of a trivial one-line method, and both forms are called the same way).
pub fn invoke_method(ctx: &AmlContext, path: &AmlName, args: &[ObjectHandle]) -> Result<ObjectHandle, AmlError> {
    let resolved = ctx.lookup(path)?;
    invoke_resolved(ctx, resolved, args)
}

/// The same invocation, given an already-resolved object rather than a path to look up. Used by
/// the expression parser when a `NameString` used as a `TermArg` has already been resolved once
/// (to find out whether it's a method at all, and if so its argument count) and shouldn't be
/// looked up a second time.
pub fn invoke_resolved(ctx: &AmlContext, resolved: ObjectHandle, args: &[ObjectHandle]) -> Result<ObjectHandle, AmlError> {
    let method = match &*resolved.data.lock() {
        ObjectData::Method(m) => m.clone(),
        _ => return crate::conv::load_value(ctx, resolved),
    };

    if args.len() as u8 > method.flags.arg_count {
        return Err(AmlError::TooManyArgs);
    }

    if method.flags.serialized {
        if let Some(lock) = &method.mutex {
            crate::mutex::acquire_with_timeout(lock, ctx.handler(), crate::mutex::NEVER_TIMEOUT);
        }
    }

    // Unqualified names inside the method body resolve relative to where the method is defined,
    // not where it's being called from.
    let scope = crate::namespace::absolute_name(&resolved);
    let mut state = MethodState::for_method(scope, method.flags.arg_count, args);

    // Every named object the body declares at its own top level (Name/Mutex/Event/OperationRegion/
    // CreateXxxField, and so on) lives in this overlay, which is always discarded on the way out -
    // never committed - so a method can't leak objects into the durable namespace. A returned
    // value that references one of them stays alive through its own handle regardless.
    let token = ctx.namespace.push_overlay();

    let result = match &method.body {
        MethodBody::Aml { table, start, end } => {
            let bytes = &table[*start..*end];
            let mut stream = Stream::new(bytes);
            let pkg = crate::pkg_length::PkgLength::from_table_length(bytes.len());
            match crate::parser::term::term_list(ctx, &mut state, &mut stream, &pkg, table) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(Flow::Break) => Err(AmlError::BreakInInvalidPosition),
                Ok(Flow::Continue) => Err(AmlError::ContinueInInvalidPosition),
                Ok(Flow::Normal) => Ok(state.take_last_result().unwrap_or_else(synthetic_zero)),
                Err(e) => Err(e),
            }
        }
        MethodBody::Native(f) => f(ctx, args),
    };

    ctx.namespace.discard(token, ctx.sysfs());

    state.mutex_stack.release_all_on_exit();
    if method.flags.serialized {
        if let Some(lock) = &method.mutex {
            lock.unlock();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object::{MethodData, MethodFlags},
        test_utils::TestHandler,
        token::opcode::*,
        DebugVerbosity,
    };
    use alloc::{boxed::Box, sync::Arc};
    use core::str::FromStr;

    fn ctx() -> AmlContext {
        AmlContext::new(Box::new(TestHandler::new()), DebugVerbosity::None)
    }

    fn aml_method(bytes: &[u8]) -> ObjectHandle {
        ObjectNode::new(ObjectData::Method(MethodData {
            flags: MethodFlags { arg_count: 0, serialized: false, sync_level: 0 },
            body: MethodBody::Aml { table: Arc::from(bytes), start: 0, end: bytes.len() },
            mutex: None,
        }))
    }

    #[test]
    fn implicit_return_is_the_last_evaluated_expression() {
        // Method(M) { Store(7, Local0); Local0 } must return Integer(7), not a synthetic zero -
        // falling off the end of the TermList hands back the last evaluated expression.
        let c = ctx();
        let bytes = [STORE_OP, BYTE_PREFIX, 7, LOCAL0_OP, LOCAL0_OP];
        let method = aml_method(&bytes);
        let result = invoke_resolved(&c, method, &[]).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(7)));
    }

    #[test]
    fn falling_off_the_end_with_no_expressions_returns_synthetic_zero() {
        let c = ctx();
        let bytes: [u8; 0] = [];
        let method = aml_method(&bytes);
        let result = invoke_resolved(&c, method, &[]).unwrap();
        assert!(matches!(&*result.data.lock(), ObjectData::Integer(0)));
    }

    #[test]
    fn method_body_names_do_not_leak_into_the_namespace() {
        // Name(FOO_, 1) declared at a method's own top level must be garbage-collected on
        // return, not left reachable in the durable namespace.
        let c = ctx();
        let bytes = [NAME_OP, b'F', b'O', b'O', b'_', BYTE_PREFIX, 1];
        let method = aml_method(&bytes);
        invoke_resolved(&c, method, &[]).unwrap();

        let err = c.namespace.search(&AmlName::from_str("FOO").unwrap(), &AmlName::root()).unwrap_err();
        assert!(matches!(err, AmlError::NameNotFound(_)));
    }

    #[test]
    fn args_beyond_arg_count_are_invalid() {
        let state = MethodState::for_method(AmlName::root(), 2, &[]);
        assert_eq!(state.arg(2).unwrap_err(), AmlError::InvalidArgAccess(2));
    }

    #[test]
    fn unset_arg_within_count_is_uninitialized() {
        let state = MethodState::for_method(AmlName::root(), 2, &[]);
        assert_eq!(state.arg(0).unwrap_err(), AmlError::UninitializedArg);
    }

    #[test]
    fn locals_outside_a_method_still_work() {
        let state = MethodState::outside_method(AmlName::root());
        let cell = state.local_cell(0).unwrap();
        *cell.data.lock() = ObjectData::Local(Some(crate::object::new_integer(5)));
        assert!(matches!(&*state.local(0).unwrap().data.lock(), ObjectData::Integer(5)));
    }

    #[test]
    fn args_outside_a_method_are_rejected() {
        let state = MethodState::outside_method(AmlName::root());
        assert_eq!(state.arg(0).unwrap_err(), AmlError::NotExecutingControlMethod);
    }

    #[test]
    fn ref_of_local_and_store_through_reference_see_each_other() {
        // RefOf(Local0) hands out the cell itself; writing through that reference must be
        // visible to a direct `local(0)` read afterwards.
        let state = MethodState::outside_method(AmlName::root());
        let cell = state.local_cell(0).unwrap();
        let reference = ObjectNode::new(ObjectData::ObjectReference(cell.clone()));
        match &*reference.data.lock() {
            ObjectData::ObjectReference(target) => {
                *target.data.lock() = ObjectData::Local(Some(crate::object::new_integer(42)));
            }
            _ => unreachable!(),
        }
        assert!(matches!(&*state.local(0).unwrap().data.lock(), ObjectData::Integer(42)));
    }
}
