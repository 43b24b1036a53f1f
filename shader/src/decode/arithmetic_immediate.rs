//! Float arithmetic with 32-bit immediates.

use crate::node::{NodeBlock, OperationCode, PRECISE};
use crate::node_helper::operation_p;
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_arithmetic_immediate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = crate::inst::Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        match matcher.id() {
            OpId::MOV32_IMM => {
                let imm = self.get_immediate32(instr);
                self.set_register(bb, instr.gpr0(), imm);
            }
            OpId::FMUL32_IMM => {
                let op_a = self.get_register(instr.gpr8());
                let op_b = self.get_immediate32(instr);
                let mut value = operation_p(OperationCode::FMul, PRECISE, vec![op_a, op_b]);
                value = self.get_saturated_float(value, instr.fmul32().saturate());
                self.set_internal_flags_from_float(bb, value.clone(), instr.op_32().generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::FADD32I => {
                let fadd32i = instr.fadd32i();
                let mut op_a = self.get_register(instr.gpr8());
                op_a = self.get_operand_abs_neg_float(op_a, fadd32i.abs_a(), fadd32i.negate_a());
                let mut op_b = self.get_immediate32(instr);
                op_b = self.get_operand_abs_neg_float(op_b, fadd32i.abs_b(), fadd32i.negate_b());

                let value = operation_p(OperationCode::FAdd, PRECISE, vec![op_a, op_b]);
                self.set_internal_flags_from_float(bb, value.clone(), instr.op_32().generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!(
                    "Unhandled arithmetic immediate instruction: {}",
                    matcher.name()
                );
            }
        }
        pc
    }
}
