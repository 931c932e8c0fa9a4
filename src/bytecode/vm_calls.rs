//! Function call dispatch, returns and memoization for the VM.

use std::rc::Rc;

use tracing::trace;

use crate::bytecode::builtins;
use crate::bytecode::cache::CallKey;
use crate::bytecode::chunk::Constant;
use crate::bytecode::value::{Closure, Value};
use crate::bytecode::vm::{Frame, Vm};
use crate::error::{RuntimeError, RuntimeResult};

impl Vm {
    /// Call the value sitting below the top `num_args` stack slots.
    pub(crate) fn execute_call(&mut self, num_args: usize) -> RuntimeResult<()> {
        let callee_index = self
            .sp
            .checked_sub(num_args + 1)
            .ok_or(RuntimeError::StackUnderflow)?;

        match &self.stack[callee_index] {
            Value::Closure(closure) => {
                let closure = closure.clone();
                self.call_closure(closure, num_args)
            }
            Value::Builtin(index) => {
                let index = *index;
                self.call_builtin(index, num_args)
            }
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> RuntimeResult<()> {
        let function = &closure.function;
        if num_args > function.num_parameters || num_args < function.min_arity() {
            return Err(RuntimeError::wrong_arity(function.num_parameters, num_args));
        }

        let base_pointer = self.sp - num_args;
        let key = match self.cache {
            Some(_) if !function.reads_mutable_globals => {
                CallKey::for_closure(&closure, &self.stack[base_pointer..self.sp])
            }
            _ => None,
        };
        if let Some(value) = key.as_ref().and_then(|key| self.cached(key)) {
            trace!(target: "shark::cache", name = function.display_name(), "hit");
            self.clear_stack_from(base_pointer - 1);
            return self.push(value);
        }

        if self.frames.len() >= self.max_frames {
            return Err(RuntimeError::FrameStackOverflow);
        }
        let stack_top = base_pointer + function.num_locals;
        if stack_top > self.stack.len() {
            return Err(RuntimeError::StackOverflow);
        }

        trace!(
            target: "shark::vm",
            name = function.display_name(),
            args = num_args,
            depth = self.frames.len(),
            "call"
        );

        let reads_mutable_globals = function.reads_mutable_globals;
        let mut frame = Frame::new(closure, base_pointer, num_args);
        frame.cache_key = key;
        frame.cacheable = !reads_mutable_globals;
        self.frames.push(frame);
        self.sp = stack_top;
        Ok(())
    }

    fn call_builtin(&mut self, index: u8, num_args: usize) -> RuntimeResult<()> {
        let builtin = builtins::lookup(index).ok_or(RuntimeError::NotCallable("Builtin"))?;
        let base = self.sp - num_args;

        let key = match self.cache {
            Some(_) if builtin.cacheable => CallKey::for_builtin(index, &self.stack[base..self.sp]),
            _ => None,
        };
        if let Some(value) = key.as_ref().and_then(|key| self.cached(key)) {
            trace!(target: "shark::cache", name = builtin.name, "hit");
            self.clear_stack_from(base - 1);
            return self.push(value);
        }

        if !builtin.cacheable {
            self.mark_side_effect();
        }

        let result = (builtin.func)(&self.stack[base..self.sp], &mut *self.output)?;
        self.clear_stack_from(base - 1);

        if let Some(key) = key {
            self.remember(key, &result);
        }
        self.push(result)
    }

    /// Pop the current frame and push its result in place of the callee.
    pub(crate) fn return_from_frame(&mut self, value: Value) -> RuntimeResult<()> {
        if self.frames.len() == 1 {
            return Err(RuntimeError::TopLevelReturn);
        }

        if let Some(frame) = self.frames.pop() {
            self.clear_stack_from(frame.base_pointer - 1);

            if frame.cacheable {
                if let Some(key) = frame.cache_key {
                    self.remember(key, &value);
                }
            } else {
                // the caller observed the same effects
                self.mark_side_effect();
            }
        }

        self.push(value)
    }

    pub(crate) fn push_closure(&mut self, index: usize, num_free: usize) -> RuntimeResult<()> {
        let function = match self.constants.get(index) {
            Some(Constant::Function(function)) => function.clone(),
            Some(other) => return Err(RuntimeError::NotAFunction(other.kind())),
            None => return Err(RuntimeError::InvalidConstant(index)),
        };

        let free = self.take_stack(num_free)?;
        self.push(Value::Closure(Rc::new(Closure::new(function, free))))
    }

    /// The current frame can no longer be memoized.
    pub(crate) fn mark_side_effect(&mut self) {
        self.frame_mut().cacheable = false;
    }

    fn cached(&mut self, key: &CallKey) -> Option<Value> {
        self.cache.as_mut()?.get(key)
    }

    /// Results that can reach an array or hash are never stored, since the
    /// caller may mutate them.
    fn remember(&mut self, key: CallKey, value: &Value) {
        if value.reaches_mutable() {
            return;
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(key, value.clone());
        }
    }
}
