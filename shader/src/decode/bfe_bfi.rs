//! Bitfield extract and insert.

use crate::inst::Instruction;
use crate::node::{NodeBlock, OperationCode, NO_PRECISE, PRECISE};
use crate::node_helper::{immediate_s32, immediate_u32, operation_p};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, ShaderIr};

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_bfe(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        if instr.bfe().negate_b() {
            warn!("BFE negated operand b not implemented");
        }

        let mut op_a = self.get_register(instr.gpr8());
        op_a = self.get_operand_abs_neg_integer(op_a, false, instr.bfe().negate_a(), false);

        match matcher.id() {
            OpId::BFE_IMM => {
                let position = instr.bfe().shift_position() as u32;
                let length = instr.bfe().shift_length() as u32;
                let left_shift = 32u32.wrapping_sub(position.wrapping_add(length));
                let inner_shift_imm = immediate_u32(left_shift);
                let outer_shift_imm = immediate_u32(left_shift.wrapping_add(position));
                let inner_shift = operation_p(
                    OperationCode::ILogicalShiftLeft,
                    NO_PRECISE,
                    vec![op_a, inner_shift_imm],
                );
                let outer_shift = operation_p(
                    OperationCode::ILogicalShiftRight,
                    NO_PRECISE,
                    vec![inner_shift, outer_shift_imm],
                );
                self.set_internal_flags_from_integer(bb, outer_shift.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), outer_shift);
            }
            _ => {
                warn!("Unhandled BFE instruction: {}", matcher.name());
            }
        }
        pc
    }

    pub(crate) fn decode_bfi(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        let (packed_shift, base) = match matcher.id() {
            OpId::BFI_RC => (
                self.get_register(instr.gpr39()),
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
            ),
            _ => (
                immediate_s32(instr.alu().signed_imm20_20()),
                self.get_register(instr.gpr39()),
            ),
        };
        let insert = self.get_register(instr.gpr8());
        let offset = bitfield_extract(packed_shift.clone(), 0, 8);
        let bits = bitfield_extract(packed_shift, 8, 8);

        let value = operation_p(
            OperationCode::UBitfieldInsert,
            PRECISE,
            vec![base, insert, offset, bits],
        );
        self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
        self.set_register(bb, instr.gpr0(), value);
        pc
    }
}
