//! The bytecode virtual machine: a stack-based execution engine.
//!
//! Calls and returns live in `vm_calls`, operators and collection opcodes
//! in `vm_ops`.

use std::io::{self, Write};
use std::rc::Rc;

use tracing::debug;

use crate::bytecode::cache::{CacheStats, CallCache, CallKey};
use crate::bytecode::chunk::{Bytecode, CompiledFunction, Constant};
use crate::bytecode::instruction::{self, OpCode};
use crate::bytecode::value::{Closure, Value};
use crate::config::VmConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// A call frame on the VM call stack.
#[derive(Debug)]
pub struct Frame {
    /// The closure being executed.
    pub closure: Rc<Closure>,
    /// Offset of the next instruction byte.
    pub ip: usize,
    /// Stack index of the frame's first local; the callee sits just below.
    pub base_pointer: usize,
    /// Arguments actually passed; later parameter slots take defaults.
    pub num_args: usize,
    /// Where to store the result, when the call may be memoized.
    pub cache_key: Option<CallKey>,
    /// Cleared once the frame, or anything it called, has side effects.
    pub cacheable: bool,
}

impl Frame {
    pub(crate) fn new(closure: Rc<Closure>, base_pointer: usize, num_args: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
            num_args,
            cache_key: None,
            cacheable: true,
        }
    }

    pub fn instructions(&self) -> &[u8] {
        &self.closure.function.instructions
    }
}

/// The bytecode VM.
pub struct Vm {
    pub(crate) constants: Vec<Constant>,
    /// Operand stack. Slots at and above `sp` are always null.
    pub(crate) stack: Vec<Value>,
    /// Next free slot; the top of the stack is `stack[sp - 1]`.
    pub(crate) sp: usize,
    pub(crate) globals: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) max_frames: usize,
    pub(crate) cache: Option<CallCache>,
    pub(crate) last_popped: Value,
    /// Destination of `puts`.
    pub(crate) output: Box<dyn Write>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_config(bytecode, &VmConfig::default())
    }

    pub fn with_config(bytecode: Bytecode, config: &VmConfig) -> Self {
        Self::with_globals(bytecode, Self::new_globals(config), config)
    }

    /// A VM that reads and writes an existing globals store, so that
    /// definitions carry over between runs.
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Value>, config: &VmConfig) -> Self {
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            ..Default::default()
        };
        let mut main_frame = Frame::new(Rc::new(Closure::new(Rc::new(main), Vec::new())), 0, 0);
        main_frame.cacheable = false;

        let mut frames = Vec::with_capacity(config.max_frames.min(64));
        frames.push(main_frame);

        Self {
            constants: bytecode.constants,
            stack: vec![Value::Null; config.stack_size],
            sp: 0,
            globals,
            frames,
            max_frames: config.max_frames,
            cache: CallCache::new(config.cache_size, config.cache_ttl()),
            last_popped: Value::Null,
            output: Box::new(io::stdout()),
        }
    }

    /// A fresh globals store sized for `config`.
    pub fn new_globals(config: &VmConfig) -> Vec<Value> {
        vec![Value::Null; config.globals_size]
    }

    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = output;
        self
    }

    /// Hand the globals store back for the next run.
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The value most recently discarded by a `Pop`, which for a program is
    /// the value of its last expression statement.
    pub fn last_popped(&self) -> &Value {
        &self.last_popped
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(CallCache::stats)
    }

    /// Run until the main instruction stream is exhausted.
    pub fn run(&mut self) -> RuntimeResult<()> {
        debug!(
            target: "shark::vm",
            bytes = self.frame().instructions().len(),
            constants = self.constants.len(),
            "run"
        );

        let result = self.execute();
        let _ = self.output.flush();

        if let Some(stats) = self.cache_stats() {
            debug!(target: "shark::vm", hits = stats.hits, misses = stats.misses, "cache stats");
        }
        result
    }

    fn execute(&mut self) -> RuntimeResult<()> {
        loop {
            let op = match self.fetch()? {
                Some(op) => op,
                None if self.frames.len() == 1 => return Ok(()),
                None => {
                    self.return_from_frame(Value::Null)?;
                    continue;
                }
            };

            match op {
                OpCode::Constant => {
                    let index = self.read_u16();
                    let constant = self
                        .constants
                        .get(index)
                        .ok_or(RuntimeError::InvalidConstant(index))?;
                    let value = Value::from(constant);
                    self.push(value)?;
                }

                OpCode::Pop => {
                    self.last_popped = self.pop()?;
                }

                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Power
                | OpCode::Equal
                | OpCode::NotEqual
                | OpCode::GreaterThan
                | OpCode::GreaterThanEqual
                | OpCode::And
                | OpCode::Or => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = self.execute_binary(op, left, right)?;
                    self.push(result)?;
                }

                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Null => self.push(Value::Null)?,

                OpCode::Bang => {
                    let operand = self.pop()?;
                    let negated = matches!(operand, Value::Bool(false) | Value::Null);
                    self.push(Value::Bool(negated))?;
                }

                OpCode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Value::Int(n) => self.push(Value::Int(n.wrapping_neg()))?,
                        other => return Err(RuntimeError::MismatchedTypes(other.type_name(), "Int")),
                    }
                }

                OpCode::Jump => {
                    let target = self.read_u16();
                    self.frame_mut().ip = target;
                }

                OpCode::JumpNotTruthy => {
                    let target = self.read_u16();
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.frame_mut().ip = target;
                    }
                }

                OpCode::GetGlobal => {
                    let index = self.read_u16();
                    let value = self
                        .globals
                        .get(index)
                        .ok_or(RuntimeError::GlobalOutOfRange(index))?
                        .clone();
                    self.push(value)?;
                }

                OpCode::SetGlobal => {
                    let index = self.read_u16();
                    let value = self.pop()?;
                    let slot = self
                        .globals
                        .get_mut(index)
                        .ok_or(RuntimeError::GlobalOutOfRange(index))?;
                    *slot = value;
                    self.mark_side_effect();
                }

                OpCode::GetLocal => {
                    let local = self.read_u8();
                    let index = self.local_slot(local)?;
                    let value = self.stack[index].clone();
                    self.push(value)?;
                }

                OpCode::SetLocal => {
                    let local = self.read_u8();
                    let index = self.local_slot(local)?;
                    let value = self.pop()?;
                    self.stack[index] = value;
                }

                OpCode::SetLocalDefault => {
                    if self.sp == 0 {
                        return Err(RuntimeError::NoDefaultValue);
                    }
                    let local = self.read_u8();
                    let index = self.local_slot(local)?;
                    let value = self.pop()?;
                    // An argument that was passed wins over the default.
                    if local >= self.frame().num_args {
                        self.stack[index] = value;
                    }
                }

                OpCode::GetBuiltin => {
                    let index = self.read_u8();
                    self.push(Value::Builtin(index as u8))?;
                }

                OpCode::GetFree => {
                    let index = self.read_u8();
                    let value = self
                        .frame()
                        .closure
                        .free
                        .get(index)
                        .cloned()
                        .ok_or(RuntimeError::FreeOutOfRange(index))?;
                    self.push(value)?;
                }

                OpCode::CurrentClosure => {
                    let closure = self.frame().closure.clone();
                    self.push(Value::Closure(closure))?;
                }

                OpCode::IncrementGlobal | OpCode::DecrementGlobal => {
                    let index = self.read_u16();
                    let slot = self
                        .globals
                        .get_mut(index)
                        .ok_or(RuntimeError::GlobalOutOfRange(index))?;
                    step(slot, op == OpCode::IncrementGlobal)?;
                    self.mark_side_effect();
                }

                OpCode::IncrementLocal | OpCode::DecrementLocal => {
                    let local = self.read_u8();
                    let index = self.local_slot(local)?;
                    step(&mut self.stack[index], op == OpCode::IncrementLocal)?;
                }

                OpCode::Array => {
                    let count = self.read_u16();
                    let elements = self.take_stack(count)?;
                    self.push(Value::array(elements))?;
                }

                OpCode::Tuple => {
                    let count = self.read_u16();
                    let elements = self.take_stack(count)?;
                    self.push(Value::tuple(elements))?;
                }

                OpCode::Hash => {
                    let count = self.read_u16();
                    let entries = self.take_stack(count)?;
                    let hash = self.build_hash(entries)?;
                    self.push(hash)?;
                }

                OpCode::Index => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let value = self.execute_index(object, index)?;
                    self.push(value)?;
                }

                OpCode::IndexAssign => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let value = self.pop()?;
                    self.execute_index_assign(object, index, value.clone())?;
                    self.mark_side_effect();
                    self.push(value)?;
                }

                OpCode::Range => {
                    let end = self.pop()?;
                    let start = self.pop()?;
                    let range = self.execute_range(start, end)?;
                    self.push(range)?;
                }

                OpCode::Spread => {
                    let operand = self.pop()?;
                    let spread = self.execute_spread(operand)?;
                    self.push(spread)?;
                }

                OpCode::Call => {
                    let num_args = self.read_u8();
                    self.execute_call(num_args)?;
                }

                OpCode::ReturnValue => {
                    let value = self.pop()?;
                    self.return_from_frame(value)?;
                }

                OpCode::Return => {
                    self.return_from_frame(Value::Null)?;
                }

                OpCode::Closure => {
                    let index = self.read_u16();
                    let num_free = self.read_u8();
                    self.push_closure(index, num_free)?;
                }
            }
        }
    }

    // ===== Decoding =====

    fn fetch(&mut self) -> RuntimeResult<Option<OpCode>> {
        let frame = self.frame_mut();
        let Some(&byte) = frame.closure.function.instructions.get(frame.ip) else {
            return Ok(None);
        };
        let op = OpCode::from_u8(byte).ok_or(RuntimeError::InvalidOpcode {
            byte,
            offset: frame.ip,
        })?;
        frame.ip += 1;
        Ok(Some(op))
    }

    fn read_u16(&mut self) -> usize {
        let frame = self.frame_mut();
        let value = instruction::read_u16(&frame.closure.function.instructions, frame.ip);
        frame.ip += 2;
        value as usize
    }

    fn read_u8(&mut self) -> usize {
        let frame = self.frame_mut();
        let value = instruction::read_u8(&frame.closure.function.instructions, frame.ip);
        frame.ip += 1;
        value as usize
    }

    // ===== Frames =====

    pub(crate) fn frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    /// Stack index of a local slot reserved by the current frame.
    fn local_slot(&self, local: usize) -> RuntimeResult<usize> {
        let frame = self.frame();
        if local >= frame.closure.function.num_locals {
            return Err(RuntimeError::LocalOutOfRange(local));
        }
        Ok(frame.base_pointer + local)
    }

    // ===== Stack =====

    pub(crate) fn push(&mut self, value: Value) -> RuntimeResult<()> {
        let slot = self.stack.get_mut(self.sp).ok_or(RuntimeError::StackOverflow)?;
        *slot = value;
        self.sp += 1;
        Ok(())
    }

    /// Pop the top value, leaving its slot null.
    pub(crate) fn pop(&mut self) -> RuntimeResult<Value> {
        self.sp = self.sp.checked_sub(1).ok_or(RuntimeError::StackUnderflow)?;
        Ok(std::mem::take(&mut self.stack[self.sp]))
    }

    /// Pop the top `count` values, oldest first.
    pub(crate) fn take_stack(&mut self, count: usize) -> RuntimeResult<Vec<Value>> {
        let start = self.sp.checked_sub(count).ok_or(RuntimeError::StackUnderflow)?;
        let values = self.stack[start..self.sp]
            .iter_mut()
            .map(std::mem::take)
            .collect();
        self.sp = start;
        Ok(values)
    }

    /// Null out every slot from `from` up to the stack pointer.
    pub(crate) fn clear_stack_from(&mut self, from: usize) {
        for slot in &mut self.stack[from..self.sp] {
            *slot = Value::Null;
        }
        self.sp = from;
    }
}

fn step(slot: &mut Value, increment: bool) -> RuntimeResult<()> {
    match slot {
        Value::Int(n) if increment => *n = n.wrapping_add(1),
        Value::Int(n) => *n = n.wrapping_sub(1),
        other if increment => return Err(RuntimeError::NonNumberIncrement(other.type_name())),
        other => return Err(RuntimeError::NonNumberDecrement(other.type_name())),
    }
    Ok(())
}
