//! Re-entering the interpreter from a deoptimization bundle.

use std::sync::Arc;

use crate::adapter::ArgumentLayout;
use crate::context::ExecutionContext;
use crate::error::{CallResult, frame_corruption};
use crate::frames::{FrameKind, bridge, entry, interpreted};
use crate::function::{CallableDescriptor, Representation};
use crate::guard;
use crate::object::Heap;
use crate::reentry::{self, FrameState, Registers, Region};
use crate::Value;

/// Interpreter state of one frame as reconstructed by the deoptimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeoptFrameRecord {
    pub function: Value,
    /// For outer frames, the pc to continue at once the inner frame returns.
    pub pc: usize,
    pub acc: Value,
    pub env: Value,
    pub this: Value,
    pub registers: Vec<Value>,
    pub arguments: Vec<Value>,
}

/// Frames innermost last, plus where the innermost one resumes. The resume
/// pc must equal the innermost record's own pc.
#[derive(Debug, Clone, PartialEq)]
pub struct DeoptBundle {
    pub frames: Vec<DeoptFrameRecord>,
    pub resume_pc: usize,
}

/// A record resolved against its function, ready to be laid out.
#[derive(Debug, Clone)]
pub struct DeoptFrameImage {
    pub state: FrameState,
    pub descriptor: Arc<CallableDescriptor>,
    pub registers: Vec<Value>,
    pub arguments: Vec<Value>,
    pub layout: ArgumentLayout,
}

impl DeoptFrameImage {
    #[must_use]
    pub fn size(&self) -> usize {
        reentry::interpreted_frame_size(self.descriptor.num_vregs, self.layout.len())
    }
}

/// Maps every record to a frame image. Malformed records are fatal.
#[must_use]
pub fn build_frame_images(heap: &Heap, bundle: &DeoptBundle) -> Vec<DeoptFrameImage> {
    if let Some(innermost) = bundle.frames.last() {
        if innermost.pc != bundle.resume_pc {
            frame_corruption(format_args!(
                "deopt bundle resumes at pc {} but its innermost record is at pc {}",
                bundle.resume_pc, innermost.pc
            ));
        }
    }
    bundle
        .frames
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let Some(object) = heap.function(record.function) else {
                frame_corruption(format_args!(
                    "deopt record {i} names non-function {:?}",
                    record.function
                ));
            };
            let descriptor = Arc::clone(&object.descriptor);
            if !matches!(descriptor.repr, Representation::Interpreted { .. }) {
                frame_corruption(format_args!(
                    "deopt record {i} targets `{}` which has no bytecode",
                    descriptor.name
                ));
            }
            if record.registers.len() > descriptor.num_vregs {
                frame_corruption(format_args!(
                    "deopt record {i} carries {} registers, `{}` has {}",
                    record.registers.len(),
                    descriptor.name,
                    descriptor.num_vregs
                ));
            }
            let state = FrameState {
                function: record.function,
                this: record.this,
                new_target: Value::UNDEFINED,
                env: record.env,
                constants: object.constants,
                profile: object.profile,
                pc: record.pc,
                acc: record.acc,
            };
            DeoptFrameImage {
                state,
                layout: ArgumentLayout::new(
                    descriptor.arity,
                    descriptor.shape,
                    record.arguments.len(),
                ),
                descriptor,
                registers: record.registers.clone(),
                arguments: record.arguments.clone(),
            }
        })
        .collect()
}

/// Rebuilds the bundle's frames on the stack and runs them to completion,
/// innermost first. Each inner result becomes the accumulator of the frame
/// around it; an inner error unwinds into that frame's handler, if any.
pub fn reenter_interpreter(cx: &mut ExecutionContext, bundle: &DeoptBundle) -> CallResult<Value> {
    if bundle.frames.is_empty() {
        frame_corruption(format_args!("empty deopt bundle"));
    }
    let images = build_frame_images(&cx.heap, bundle);
    log::debug!(
        "deopt re-entry: {} frames, resume at pc {}",
        images.len(),
        bundle.resume_pc
    );

    let mut scope = cx.enter_call()?;
    let from_host = scope.top_kind().is_none_or(FrameKind::is_native);
    let linkage = bridge::HEADER + if from_host { entry::HEADER } else { 0 };
    let total = linkage + images.iter().map(DeoptFrameImage::size).sum::<usize>();
    guard::check_headroom(&scope.stack, total)?;

    if from_host {
        scope.push_entry_frame()?;
    }
    scope.push_linkage_frame(FrameKind::Bridge, &[])?;

    let mut fps = Vec::with_capacity(images.len());
    for image in &images {
        let fp = reentry::push_interpreted_frame(
            &mut scope,
            &image.state,
            image.descriptor.num_vregs,
            Registers::Saved(&image.registers),
            Region::Adapt {
                layout: image.layout,
                args: &image.arguments,
            },
        )?;
        fps.push(fp);
    }

    let mut outcome: CallResult<Option<Value>> = Ok(None);
    for &fp in fps.iter().rev() {
        scope.pop_to(fp);
        match &outcome {
            Ok(None) => {}
            Ok(Some(value)) => scope.stack.set(fp + interpreted::ACC, *value),
            Err(error) => {
                if reentry::unwind_to_handler(&mut scope, fp, error).is_none() {
                    continue;
                }
            }
        }
        outcome = reentry::run_frame(&mut scope, fp).map(Some);
    }
    drop(scope);

    // The loop ran at least once.
    outcome.map(|value| value.unwrap_or(Value::UNDEFINED))
}
