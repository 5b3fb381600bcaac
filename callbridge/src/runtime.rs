use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::bytecode::Interpreter;
use crate::compiled::{CodeId, CompiledCode};
use crate::context::{ContextCreateInfo, ExecutionContext};
use crate::frames::verify_frame_layouts;
use crate::reentry::BytecodeDispatch;
use crate::walker::StackMaps;

pub struct RuntimeCreateInfo {
    pub dispatcher: Arc<dyn BytecodeDispatch>,
}

impl Default for RuntimeCreateInfo {
    fn default() -> Self {
        Self {
            dispatcher: Arc::new(Interpreter),
        }
    }
}

/// State shared by every context: the bytecode dispatcher and the
/// registries of compiled code and their stack maps.
pub struct Runtime {
    dispatcher: Arc<dyn BytecodeDispatch>,
    code: RwLock<Vec<Arc<CompiledCode>>>,
    stack_maps: RwLock<StackMaps>,
}

impl Runtime {
    #[must_use]
    pub fn new(info: RuntimeCreateInfo) -> Arc<Self> {
        verify_frame_layouts();
        Arc::new(Self {
            dispatcher: info.dispatcher,
            code: RwLock::new(Vec::new()),
            stack_maps: RwLock::new(StackMaps::new()),
        })
    }

    #[must_use]
    pub fn new_context(self: &Arc<Self>, info: &ContextCreateInfo) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(self), info)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<dyn BytecodeDispatch> {
        Arc::clone(&self.dispatcher)
    }

    /// Registers a code object and the stack maps of its safepoints.
    pub fn register_code(&self, code: CompiledCode) -> CodeId {
        let mut table = self.code.write();
        let id = CodeId::from_index(table.len() as u32);
        {
            let mut maps = self.stack_maps.write();
            for (safepoint, live) in &code.safepoints {
                maps.insert(id, *safepoint, live.as_slice());
            }
        }
        log::debug!(
            "registered {id:?} `{}` with {} safepoints",
            code.name,
            code.safepoints.len()
        );
        table.push(Arc::new(code));
        id
    }

    #[must_use]
    pub fn code(&self, id: CodeId) -> Option<Arc<CompiledCode>> {
        self.code.read().get(id.index() as usize).cloned()
    }

    pub fn stack_maps(&self) -> RwLockReadGuard<'_, StackMaps> {
        self.stack_maps.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use crate::compiled::CompiledCall;
    use crate::error::CallResult;

    fn noop(_: &mut CompiledCall<'_>) -> CallResult<Value> {
        Ok(Value::UNDEFINED)
    }

    #[test]
    fn registered_code_exposes_its_stack_maps() {
        let runtime = Runtime::new(RuntimeCreateInfo::default());
        let id = runtime.register_code(CompiledCode {
            name: "noop".into(),
            entry: noop,
            spill_slots: 3,
            safepoints: vec![(1, vec![0, 2])],
        });
        assert_eq!(runtime.code(id).map(|c| c.spill_slots), Some(3));
        assert_eq!(runtime.stack_maps().lookup(id, 1), Some(&[0usize, 2][..]));
        assert!(runtime.stack_maps().lookup(id, 2).is_none());
    }

    #[test]
    fn contexts_share_the_runtime() {
        let runtime = Runtime::new(RuntimeCreateInfo::default());
        let a = runtime.new_context(&ContextCreateInfo::default());
        let b = runtime.new_context(&ContextCreateInfo::default());
        assert!(Arc::ptr_eq(&a.runtime, &b.runtime));
    }
}
