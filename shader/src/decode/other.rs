//! Flow control, system values and the odds and ends.

use crate::inst::{ConditionCode, Instruction, Pred, SystemVariable};
use crate::node::{MetaStackClass, NodeBlock, OperationCode, PRECISE};
use crate::node_helper::{conditional, immediate_u32, operation, operation_p, signed_operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_insert, pop_flow_stack, push_flow_stack, ShaderIr};
use crate::MAX_PROGRAM_LENGTH;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_other(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = match crate::opcode::decode(instr) {
            Some(matcher) => matcher,
            None => return pc,
        };
        let mut next_pc = pc;

        match matcher.id() {
            OpId::NOP | OpId::DEPBAR => {}
            OpId::EXIT => {
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    warn!("EXIT condition code used: {:?}", cc);
                }
                bb.push(operation(OperationCode::Exit, vec![]));
                if instr.pred_index() == Pred::UNUSED_INDEX && !instr.negate_pred() {
                    // Unconditional exit ends processing of the range.
                    next_pc = MAX_PROGRAM_LENGTH - 1;
                }
            }
            OpId::KIL => {
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    warn!("KIL condition code used: {:?}", cc);
                }
                bb.push(operation(OperationCode::Discard, vec![]));
            }
            OpId::MOV_SYS => {
                let value = match instr.sys20() {
                    Some(SystemVariable::LaneId) => {
                        warn!("MOV_SYS LaneId is incomplete");
                        immediate_u32(0)
                    }
                    Some(SystemVariable::InvocationId) => {
                        operation(OperationCode::InvocationId, vec![])
                    }
                    Some(SystemVariable::Ydirection) => {
                        operation(OperationCode::YNegate, vec![])
                    }
                    Some(SystemVariable::InvocationInfo) => {
                        warn!("MOV_SYS InvocationInfo is incomplete");
                        immediate_u32(0)
                    }
                    Some(SystemVariable::Tid) => {
                        let mut value = immediate_u32(0);
                        let x = operation(OperationCode::LocalInvocationIdX, vec![]);
                        let y = operation(OperationCode::LocalInvocationIdY, vec![]);
                        let z = operation(OperationCode::LocalInvocationIdZ, vec![]);
                        value = bitfield_insert(value, x, 0, 9);
                        value = bitfield_insert(value, y, 16, 9);
                        value = bitfield_insert(value, z, 26, 5);
                        value
                    }
                    Some(SystemVariable::TidX) => {
                        operation(OperationCode::LocalInvocationIdX, vec![])
                    }
                    Some(SystemVariable::TidY) => {
                        operation(OperationCode::LocalInvocationIdY, vec![])
                    }
                    Some(SystemVariable::TidZ) => {
                        operation(OperationCode::LocalInvocationIdZ, vec![])
                    }
                    Some(SystemVariable::CtaIdX) => {
                        operation(OperationCode::WorkGroupIdX, vec![])
                    }
                    Some(SystemVariable::CtaIdY) => {
                        operation(OperationCode::WorkGroupIdY, vec![])
                    }
                    Some(SystemVariable::CtaIdZ) => {
                        operation(OperationCode::WorkGroupIdZ, vec![])
                    }
                    Some(SystemVariable::EqMask) => {
                        self.uses_warps = true;
                        operation(OperationCode::ThreadEqMask, vec![])
                    }
                    Some(SystemVariable::LtMask) => {
                        self.uses_warps = true;
                        operation(OperationCode::ThreadLtMask, vec![])
                    }
                    Some(SystemVariable::LeMask) => {
                        self.uses_warps = true;
                        operation(OperationCode::ThreadLeMask, vec![])
                    }
                    Some(SystemVariable::GtMask) => {
                        self.uses_warps = true;
                        operation(OperationCode::ThreadGtMask, vec![])
                    }
                    Some(SystemVariable::GeMask) => {
                        self.uses_warps = true;
                        operation(OperationCode::ThreadGeMask, vec![])
                    }
                    _ => {
                        warn!("Unhandled system move");
                        immediate_u32(0)
                    }
                };
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::BRA => {
                let branch = if !instr.bra().constant_buffer() {
                    let target = (pc as i64 + i64::from(instr.bra().branch_target())) as u32;
                    operation(OperationCode::Branch, vec![immediate_u32(target)])
                } else {
                    let target = pc + 1;
                    let op_a = self
                        .get_const_buffer(instr.cbuf36().index(), instr.cbuf36().offset() as u64);
                    let convert = signed_operation(
                        OperationCode::IArithmeticShiftRight,
                        true,
                        vec![op_a, immediate_u32(3)],
                    );
                    let operand = operation_p(
                        OperationCode::IAdd,
                        PRECISE,
                        vec![convert, immediate_u32(target)],
                    );
                    operation(OperationCode::BranchIndirect, vec![operand])
                };
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    let cond = self.get_condition_code(cc);
                    bb.push(conditional(cond, vec![branch]));
                } else {
                    bb.push(branch);
                }
            }
            OpId::BRX => {
                let operand = if instr.brx().constant_buffer() {
                    let target = pc + 1;
                    let index = self.get_register(instr.gpr8());
                    let op_a = self.get_const_buffer_indirect(
                        instr.cbuf36().index(),
                        instr.cbuf36().offset() as u64,
                        index,
                    );
                    let convert = signed_operation(
                        OperationCode::IArithmeticShiftRight,
                        true,
                        vec![op_a, immediate_u32(3)],
                    );
                    operation_p(
                        OperationCode::IAdd,
                        PRECISE,
                        vec![convert, immediate_u32(target)],
                    )
                } else {
                    let target = (pc as i64 + i64::from(instr.brx().branch_target())) as u32;
                    let op_a = self.get_register(instr.gpr8());
                    let convert = signed_operation(
                        OperationCode::IArithmeticShiftRight,
                        true,
                        vec![op_a, immediate_u32(3)],
                    );
                    operation_p(
                        OperationCode::IAdd,
                        PRECISE,
                        vec![convert, immediate_u32(target)],
                    )
                };
                let branch = operation(OperationCode::BranchIndirect, vec![operand]);
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    let cond = self.get_condition_code(cc);
                    bb.push(conditional(cond, vec![branch]));
                } else {
                    bb.push(branch);
                }
            }
            OpId::SSY => {
                if instr.bra().constant_buffer() {
                    warn!("Constant buffer flow is not supported");
                }
                if !self.disable_flow_stack {
                    // SSY tells the GPU where divergent paths re-converge.
                    let target = (pc as i64 + i64::from(instr.bra().branch_target())) as u32;
                    bb.push(push_flow_stack(MetaStackClass::Ssy, target));
                }
            }
            OpId::PBK => {
                if instr.bra().constant_buffer() {
                    warn!("Constant buffer PBK is not supported");
                }
                if !self.disable_flow_stack {
                    // PBK pushes the address BRK will jump to.
                    let target = (pc as i64 + i64::from(instr.bra().branch_target())) as u32;
                    bb.push(push_flow_stack(MetaStackClass::Pbk, target));
                }
            }
            OpId::SYNC => {
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    warn!("SYNC condition code used: {:?}", cc);
                }
                if !self.decompiled {
                    bb.push(pop_flow_stack(MetaStackClass::Ssy));
                }
            }
            OpId::BRK => {
                let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
                if cc != ConditionCode::T {
                    warn!("BRK condition code used: {:?}", cc);
                }
                if !self.decompiled {
                    bb.push(pop_flow_stack(MetaStackClass::Pbk));
                }
            }
            OpId::IPA => {
                let ipa = instr.ipa();
                let is_physical = ipa.idx() && instr.gpr8().0 != 0xff;
                let attribute = instr.attribute28();
                let mut value = if is_physical {
                    self.get_physical_input_attribute(instr.gpr8(), None)
                } else {
                    self.get_input_attribute(
                        attribute.index(),
                        attribute.element() as u32,
                        None,
                    )
                };
                let is_generic = matches!(
                    attribute.index(),
                    crate::inst::AttributeIndex::Attribute(_)
                );
                if (is_generic || is_physical) && ipa.interp_mode() == 1 {
                    let multiplier = self.get_register(instr.gpr20());
                    value = operation_p(
                        OperationCode::FMul,
                        PRECISE,
                        vec![value, multiplier],
                    );
                }
                value = self.get_saturated_float(value, ipa.saturate());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::OUT_R => {
                if !instr.gpr20().is_zero() {
                    warn!("OUT stream buffer is not supported");
                }
                if instr.out().emit() {
                    // gpr0 receives the next output pointer, which we do
                    // not model.
                    bb.push(operation(OperationCode::EmitVertex, vec![]));
                    self.set_register(bb, instr.gpr0(), immediate_u32(0));
                }
                if instr.out().cut() {
                    bb.push(operation(OperationCode::EndPrimitive, vec![]));
                }
            }
            OpId::ISBERD => {
                warn!("ISBERD instruction is incomplete");
                let value = self.get_register(instr.gpr8());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::MEMBAR => {
                bb.push(operation(OperationCode::MemoryBarrierGl, vec![]));
            }
            _ => {
                warn!("Unhandled instruction: {}", matcher.name());
            }
        }
        next_pc
    }
}
