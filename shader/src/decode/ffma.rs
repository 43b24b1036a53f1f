//! Fused multiply-add.

use crate::inst::Instruction;
use crate::node::{NodeBlock, OperationCode, PRECISE};
use crate::node_helper::operation_p;
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_ffma(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        if instr.ffma().cc() {
            warn!("FFMA cc not implemented");
        }

        let op_a = self.get_register(instr.gpr8());
        let (mut op_b, mut op_c) = match matcher.id() {
            OpId::FFMA_CR => (
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                self.get_register(instr.gpr39()),
            ),
            OpId::FFMA_RR => (
                self.get_register(instr.gpr20()),
                self.get_register(instr.gpr39()),
            ),
            OpId::FFMA_RC => (
                self.get_register(instr.gpr39()),
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
            ),
            _ => (self.get_immediate19(instr), self.get_register(instr.gpr39())),
        };

        op_b = self.get_operand_abs_neg_float(op_b, false, instr.ffma().negate_b());
        op_c = self.get_operand_abs_neg_float(op_c, false, instr.ffma().negate_c());

        let mut value = operation_p(OperationCode::FFma, PRECISE, vec![op_a, op_b, op_c]);
        value = self.get_saturated_float(value, instr.alu().saturate_d());

        self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
        self.set_register(bb, instr.gpr0(), value);
        pc
    }
}
