//! Float arithmetic with register/cbuf/imm19 operands.

use super::get_op_b_float;
use crate::inst::SubOp;
use crate::node::{NodeBlock, OperationCode, NO_PRECISE, PRECISE};
use crate::node_helper::{immediate_f32, operation, operation_p};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_arithmetic(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = crate::inst::Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        let mut op_a = self.get_register(instr.gpr8());
        let mut op_b = get_op_b_float(self, instr);

        match matcher.id() {
            OpId::MOV_C | OpId::MOV_R => {
                // MOV has neither 'abs' nor 'neg' bits.
                self.set_register(bb, instr.gpr0(), op_b);
            }
            OpId::MOV_IMM => {
                self.set_register(bb, instr.gpr0(), op_b);
            }
            OpId::FMUL_C | OpId::FMUL_R | OpId::FMUL_IMM => {
                // FMUL does not have 'abs' bits and only the second
                // operand has a 'neg' bit.
                op_b = self.get_operand_abs_neg_float(op_b, false, instr.fmul().negate_b());

                const FMUL_POST_FACTOR: [f32; 8] =
                    [1.0, 0.5, 0.25, 0.125, 8.0, 4.0, 2.0, 1.0];
                let postfactor = instr.fmul().postfactor() as usize;
                if postfactor != 0 {
                    op_a = operation_p(
                        OperationCode::FMul,
                        NO_PRECISE,
                        vec![op_a, immediate_f32(FMUL_POST_FACTOR[postfactor])],
                    );
                }

                let mut value = operation_p(OperationCode::FMul, PRECISE, vec![op_a, op_b]);
                value = self.get_saturated_float(value, instr.alu().saturate_d());
                self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::FADD_C | OpId::FADD_R | OpId::FADD_IMM => {
                op_a = self.get_operand_abs_neg_float(op_a, instr.alu().abs_a(), instr.alu().negate_a());
                op_b = self.get_operand_abs_neg_float(op_b, instr.alu().abs_b(), instr.alu().negate_b());

                let mut value = operation_p(OperationCode::FAdd, PRECISE, vec![op_a, op_b]);
                value = self.get_saturated_float(value, instr.alu().saturate_d());
                self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::MUFU => {
                op_a = self.get_operand_abs_neg_float(op_a, instr.alu().abs_a(), instr.alu().negate_a());
                let mut value = match instr.sub_op() {
                    Some(SubOp::Cos) => operation_p(OperationCode::FCos, PRECISE, vec![op_a]),
                    Some(SubOp::Sin) => operation_p(OperationCode::FSin, PRECISE, vec![op_a]),
                    Some(SubOp::Ex2) => operation_p(OperationCode::FExp2, PRECISE, vec![op_a]),
                    Some(SubOp::Lg2) => operation_p(OperationCode::FLog2, PRECISE, vec![op_a]),
                    Some(SubOp::Rcp) => operation_p(
                        OperationCode::FDiv,
                        PRECISE,
                        vec![immediate_f32(1.0), op_a],
                    ),
                    Some(SubOp::Rsq) => {
                        operation_p(OperationCode::FInverseSqrt, PRECISE, vec![op_a])
                    }
                    Some(SubOp::Sqrt) => operation_p(OperationCode::FSqrt, PRECISE, vec![op_a]),
                    None => {
                        warn!("Unhandled MUFU sub op");
                        immediate_f32(0.0)
                    }
                };
                value = self.get_saturated_float(value, instr.alu().saturate_d());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::FMNMX_C | OpId::FMNMX_R | OpId::FMNMX_IMM => {
                op_a = self.get_operand_abs_neg_float(op_a, instr.alu().abs_a(), instr.alu().negate_a());
                op_b = self.get_operand_abs_neg_float(op_b, instr.alu().abs_b(), instr.alu().negate_b());

                let condition = self.get_predicate(
                    instr.fmnmx().pred() as u32,
                    instr.fmnmx().negate_pred(),
                );
                let min = operation_p(
                    OperationCode::FMin,
                    NO_PRECISE,
                    vec![op_a.clone(), op_b.clone()],
                );
                let max = operation_p(OperationCode::FMax, NO_PRECISE, vec![op_a, op_b]);
                let value = operation_p(
                    OperationCode::Select,
                    NO_PRECISE,
                    vec![condition, min, max],
                );
                self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::FCMP_R => {
                let op_c = self.get_register(instr.gpr39());
                let cond = instr
                    .fcmp()
                    .cond()
                    .unwrap_or(crate::inst::PredCondition::Equal);
                let comp = self.get_predicate_comparison_float(cond, op_c, immediate_f32(0.0));
                let value = operation(OperationCode::Select, vec![comp, op_a, op_b]);
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::RRO_C | OpId::RRO_R | OpId::RRO_IMM => {
                // RRO is implemented as a register move.
                op_b = self.get_operand_abs_neg_float(op_b, instr.alu().abs_b(), instr.alu().negate_b());
                self.set_register(bb, instr.gpr0(), op_b);
            }
            _ => {
                warn!("Unhandled arithmetic instruction: {}", matcher.name());
            }
        }
        pc
    }
}
