//! Data-flow back-tracking over already-lowered code.
//!
//! Given a value and a cursor into the current node list, these walks
//! follow prior `Assign` operations on the same register, recursing
//! into conditionals, until a constant-buffer read (or a bindless
//! handle computation) is found. A failed track returns `None`; callers
//! substitute zero or drop the side effect.

use crate::node::{Node, NodeBlock, NodeData, OperationCode, TrackSampler};
use crate::node_helper::{immediate_u32, operation};
use crate::shader_ir::ShaderIr;

fn find_operation(code: &[Node], cursor: i64, operation_code: OperationCode) -> Option<(Node, i64)> {
    let mut cursor = cursor;
    while cursor >= 0 {
        let node = &code[cursor as usize];
        match &**node {
            NodeData::Operation(op) if op.code() == operation_code => {
                return Some((node.clone(), cursor));
            }
            NodeData::Conditional(cond) => {
                let inner = cond.code();
                if let Some((found, _)) = find_operation(inner, inner.len() as i64 - 1, operation_code)
                {
                    return Some((found, cursor));
                }
            }
            _ => {}
        }
        cursor -= 1;
    }
    None
}

/// Splits an indirect constant-buffer offset computation into its gpr
/// and immediate parts.
fn decouple_indirect_read(op: &crate::node::OperationNode) -> Option<(Node, u32)> {
    if op.code() != OperationCode::UAdd {
        return None;
    }
    let mut gpr = None;
    let mut offset = None;
    for operand in op.operands() {
        match &**operand {
            NodeData::Immediate(value) => offset = Some(*value),
            NodeData::Gpr(_) => gpr = Some(operand.clone()),
            _ => {}
        }
    }
    Some((gpr?, offset?))
}

fn amend_node(node: &Node, amend_index: usize) -> bool {
    match &**node {
        NodeData::Operation(op) => {
            op.set_amend_index(amend_index);
            true
        }
        NodeData::Conditional(cond) => {
            cond.set_amend_index(amend_index);
            true
        }
        _ => false,
    }
}

impl<'r> ShaderIr<'r> {
    /// Tracks a bindless sampler handle. `code`/`cursor` address the
    /// block being lowered; tracking falls back to the whole program
    /// when the local walk reaches its beginning.
    pub(crate) fn track_bindless_sampler(
        &mut self,
        tracked: &Node,
        code: &NodeBlock,
        cursor: i64,
    ) -> Option<(Node, TrackSampler)> {
        match &**tracked {
            NodeData::Cbuf { index, offset } => match &**offset {
                NodeData::Immediate(imm) => Some((
                    tracked.clone(),
                    TrackSampler::Bindless {
                        cbuf: *index,
                        offset: *imm,
                    },
                )),
                NodeData::Operation(op) => {
                    let bound_buffer = self.registry.bound_buffer();
                    if bound_buffer != *index {
                        return None;
                    }
                    let (gpr, base_offset) = decouple_indirect_read(op)?;
                    let bindless_cv = self.new_custom_variable();
                    let handler_size = self.driver.texture_handler_size();
                    let divided = operation(
                        OperationCode::UDiv,
                        vec![gpr, immediate_u32(handler_size)],
                    );
                    let cv_node = self.get_custom_variable(bindless_cv);
                    let amend_op = operation(OperationCode::Assign, vec![cv_node, divided]);
                    let amend_index = self.declare_amend(amend_op);
                    if cursor >= 0 && (cursor as usize) < code.len() {
                        amend_node(&code[cursor as usize], amend_index);
                    }
                    Some((
                        tracked.clone(),
                        TrackSampler::Array {
                            cbuf: *index,
                            base_offset,
                            index_var: bindless_cv,
                        },
                    ))
                }
                _ => None,
            },
            NodeData::Gpr(reg) => {
                if reg.is_zero() {
                    return None;
                }
                // Step one below the cursor so an instruction writing the
                // register it reads does not loop forever.
                let (source, new_cursor) = self.track_register(tracked, code, cursor - 1)?;
                self.track_bindless_sampler(&source, code, new_cursor)
            }
            NodeData::Operation(op) => {
                for operand in op.operands().iter().rev() {
                    if let Some(found) = self.track_bindless_sampler(operand, code, cursor) {
                        return Some(found);
                    }
                }
                None
            }
            NodeData::Conditional(cond) => {
                let inner = cond.code().clone();
                self.track_bindless_sampler(tracked, &inner, inner.len() as i64)
            }
            _ => None,
        }
    }

    /// Tracks a value back to a `Cbuf` with an immediate offset.
    /// Returns the base node, buffer index and offset.
    pub(crate) fn track_cbuf(
        &self,
        tracked: &Node,
        code: &[Node],
        cursor: i64,
    ) -> Option<(Node, u32, u32)> {
        match &**tracked {
            NodeData::Cbuf { index, offset } => match &**offset {
                NodeData::Immediate(imm) => Some((tracked.clone(), *index, *imm)),
                _ => None,
            },
            NodeData::Gpr(reg) => {
                if reg.is_zero() {
                    return None;
                }
                let mut current_cursor = cursor;
                while current_cursor > 0 {
                    let (source, new_cursor) =
                        match self.track_register(tracked, code, current_cursor - 1) {
                            Some(found) => found,
                            None => return None,
                        };
                    current_cursor = new_cursor;
                    if let Some(found) = self.track_cbuf(&source, code, current_cursor) {
                        return Some(found);
                    }
                }
                None
            }
            NodeData::Operation(op) => {
                for operand in op.operands().iter().rev() {
                    if let Some(found) = self.track_cbuf(operand, code, cursor) {
                        return Some(found);
                    }
                }
                None
            }
            NodeData::Conditional(cond) => {
                let inner = cond.code();
                self.track_cbuf(tracked, inner, inner.len() as i64)
            }
            _ => None,
        }
    }

    /// Tracks a register back to a compile-time immediate.
    pub(crate) fn track_immediate(&self, tracked: &Node, code: &[Node], cursor: i64) -> Option<u32> {
        let (found, _) = self.track_register(tracked, code, cursor - 1)?;
        match &*found {
            NodeData::Immediate(value) => Some(*value),
            _ => None,
        }
    }

    /// Finds the latest `Assign` writing the tracked register and
    /// returns the assigned value.
    pub(crate) fn track_register(
        &self,
        tracked: &Node,
        code: &[Node],
        cursor: i64,
    ) -> Option<(Node, i64)> {
        let tracked_index = match &**tracked {
            NodeData::Gpr(reg) => reg.0,
            _ => return None,
        };
        let mut cursor = cursor;
        while cursor >= 0 {
            let (found_node, new_cursor) = find_operation(code, cursor, OperationCode::Assign)?;
            let op = match &*found_node {
                NodeData::Operation(op) => op,
                _ => return None,
            };
            if let NodeData::Gpr(target) = &**op.operand(0) {
                if target.0 == tracked_index {
                    return Some((op.operand(1).clone(), new_cursor));
                }
            }
            cursor = new_cursor - 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::tests::TestRegistry;
    use crate::inst::Register;
    use crate::node_helper::make_node;
    use crate::settings::CompilerSettings;
    use crate::shader_ir::ShaderIr;
    use crate::ShaderStage;

    fn test_ir(registry: &TestRegistry) -> ShaderIr {
        // Minimal program: sched + EXIT.
        let exit = {
            let mut word = 0u64;
            for (i, c) in "1110001100000000".bytes().enumerate() {
                if c == b'1' {
                    word |= 1 << (63 - i);
                }
            }
            word | 7 << 16 | 0xF
        };
        ShaderIr::decode(
            vec![0, exit, 0, 0],
            0,
            CompilerSettings::default(),
            registry,
            ShaderStage::Fragment,
        )
    }

    fn gpr(index: u32) -> Node {
        make_node(NodeData::Gpr(Register(index)))
    }

    fn cbuf(index: u32, offset: u32) -> Node {
        make_node(NodeData::Cbuf {
            index,
            offset: immediate_u32(offset),
        })
    }

    fn assign(dest: Node, src: Node) -> Node {
        operation(OperationCode::Assign, vec![dest, src])
    }

    #[test]
    fn cbuf_track_through_assign_chain() {
        let registry = TestRegistry::empty();
        let ir = test_ir(&registry);
        // r4 = c1[0x30]; r5 = r4; track r5.
        let code = vec![assign(gpr(4), cbuf(1, 0x30)), assign(gpr(5), gpr(4))];
        let (_, index, offset) = ir
            .track_cbuf(&gpr(5), &code, code.len() as i64)
            .expect("track failed");
        assert_eq!(index, 1);
        assert_eq!(offset, 0x30);
    }

    #[test]
    fn cbuf_track_fails_on_unknown_source() {
        let registry = TestRegistry::empty();
        let ir = test_ir(&registry);
        let code = vec![assign(gpr(5), immediate_u32(7))];
        assert!(ir.track_cbuf(&gpr(5), &code, code.len() as i64).is_none());
    }

    #[test]
    fn bindless_track_synthesizes_indexed_sampler() {
        let registry = TestRegistry::empty();
        let mut ir = test_ir(&registry);
        // r4 = c0[r7 * .. + 0x30] pattern: Cbuf(0, UAdd(gpr7, 0x30))
        let indirect = make_node(NodeData::Cbuf {
            index: 0,
            offset: operation(OperationCode::UAdd, vec![gpr(7), immediate_u32(0x30)]),
        });
        let code = vec![assign(gpr(4), indirect)];
        let (_, tracked) = ir
            .track_bindless_sampler(&gpr(4), &code, code.len() as i64)
            .expect("track failed");
        match tracked {
            TrackSampler::Array {
                cbuf,
                base_offset,
                index_var,
            } => {
                assert_eq!(cbuf, 0);
                assert_eq!(base_offset, 0x30);
                assert_eq!(index_var, 0);
            }
            _ => panic!("expected an array sampler"),
        }
        // The amend op is registered so the emitter can declare the
        // custom variable before its use.
        assert_eq!(ir.amend_code().len(), 1);
    }

    #[test]
    fn immediate_track() {
        let registry = TestRegistry::empty();
        let ir = test_ir(&registry);
        let code = vec![assign(gpr(3), immediate_u32(42)), assign(gpr(9), gpr(3))];
        assert_eq!(ir.track_immediate(&gpr(3), &code, code.len() as i64), Some(42));
    }
}
