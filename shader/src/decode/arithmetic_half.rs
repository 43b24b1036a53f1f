//! Packed half-float arithmetic (HADD2/HMUL2/HFMA2).

use crate::inst::{HalfMerge, HalfType, Instruction};
use crate::node::{Node, NodeBlock, OperationCode, PRECISE};
use crate::node_helper::{immediate_u32, operation, operation_p};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    /// Packs the two 9-bit immediates into a f16x2 constant, applying
    /// the per-lane negate bits.
    pub(crate) fn unpack_half_immediate(&mut self, instr: Instruction, has_negation: bool) -> Node {
        let value = immediate_u32(instr.half_imm().pack_immediates());
        let unpacked = self.unpack_half_float(value, HalfType::H0H1);
        if !has_negation {
            return unpacked;
        }
        let first = immediate_u32(instr.half_imm().first_negate() as u32);
        let second = immediate_u32(instr.half_imm().second_negate() as u32);
        operation(OperationCode::HNegate, vec![unpacked, first, second])
    }

    pub(crate) fn decode_arithmetic_half(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let alu = instr.alu_half();

        let negate_a = matcher.id() != OpId::HMUL2_R && alu.negate_a();
        let negate_b = matcher.id() != OpId::HMUL2_C && alu.negate_b();

        let op_a = self.get_register(instr.gpr8());
        let mut op_a = self.unpack_half_float(op_a, alu.type_a().unwrap_or(HalfType::H0H1));
        op_a = self.get_half_operand_abs_neg(op_a, alu.abs_a(), negate_a);

        let (type_b, op_b) = match matcher.id() {
            OpId::HADD2_C | OpId::HMUL2_C => (
                HalfType::F32,
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
            ),
            _ => (
                alu.type_b().unwrap_or(HalfType::H0H1),
                self.get_register(instr.gpr20()),
            ),
        };
        let op_b = self.unpack_half_float(op_b, type_b);
        let op_b = self.get_half_operand_abs_neg(op_b, alu.abs_b(), negate_b);

        let value = match matcher.id() {
            OpId::HADD2_C | OpId::HADD2_R => {
                operation_p(OperationCode::HAdd, PRECISE, vec![op_a, op_b])
            }
            OpId::HMUL2_C | OpId::HMUL2_R => {
                operation_p(OperationCode::HMul, PRECISE, vec![op_a, op_b])
            }
            _ => {
                warn!("Unhandled half float instruction: {}", matcher.name());
                immediate_u32(0)
            }
        };
        let value = self.get_saturated_half_float(value, alu.saturate());
        let dest = self.get_register(instr.gpr0());
        let value = self.half_merge(dest, value, alu.merge().unwrap_or(HalfMerge::H0H1));
        self.set_register(bb, instr.gpr0(), value);
        pc
    }

    pub(crate) fn decode_arithmetic_half_immediate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let alu = instr.alu_half_imm();

        let op_a = self.get_register(instr.gpr8());
        let mut op_a = self.unpack_half_float(op_a, alu.type_a().unwrap_or(HalfType::H0H1));
        op_a = self.get_half_operand_abs_neg(op_a, alu.abs_a(), alu.negate_a());

        let op_b = self.unpack_half_immediate(instr, true);

        let value = match matcher.id() {
            OpId::HADD2_IMM => operation_p(OperationCode::HAdd, PRECISE, vec![op_a, op_b]),
            _ => operation_p(OperationCode::HMul, PRECISE, vec![op_a, op_b]),
        };
        let value = self.get_saturated_half_float(value, alu.saturate());
        let dest = self.get_register(instr.gpr0());
        let value = self.half_merge(dest, value, alu.merge().unwrap_or(HalfMerge::H0H1));
        self.set_register(bb, instr.gpr0(), value);
        pc
    }

    pub(crate) fn decode_hfma2(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let hfma2 = instr.hfma2();

        let identity = HalfType::H0H1;
        let (saturate, type_b, op_b, type_c, op_c, neg_b, neg_c) = match matcher.id() {
            OpId::HFMA2_CR => (
                hfma2.saturate(),
                HalfType::F32,
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                hfma2.type_reg39().unwrap_or(identity),
                self.get_register(instr.gpr39()),
                hfma2.negate_b(),
                hfma2.negate_c(),
            ),
            OpId::HFMA2_RC => (
                hfma2.saturate(),
                hfma2.type_reg39().unwrap_or(identity),
                self.get_register(instr.gpr39()),
                HalfType::F32,
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                hfma2.negate_b(),
                hfma2.negate_c(),
            ),
            OpId::HFMA2_RR => (
                hfma2.rr_saturate(),
                hfma2.type_b().unwrap_or(identity),
                self.get_register(instr.gpr20()),
                hfma2.rr_type_c().unwrap_or(identity),
                self.get_register(instr.gpr39()),
                hfma2.rr_negate_b(),
                hfma2.rr_negate_c(),
            ),
            _ => {
                let imm = self.unpack_half_immediate(instr, true);
                (
                    hfma2.saturate(),
                    identity,
                    imm,
                    hfma2.type_reg39().unwrap_or(identity),
                    self.get_register(instr.gpr39()),
                    false,
                    hfma2.negate_c(),
                )
            }
        };

        let op_a = self.get_register(instr.gpr8());
        let op_a = self.unpack_half_float(op_a, hfma2.type_a().unwrap_or(identity));
        let op_b = self.unpack_half_float(op_b, type_b);
        let op_b = self.get_half_operand_abs_neg(op_b, false, neg_b);
        let op_c = self.unpack_half_float(op_c, type_c);
        let op_c = self.get_half_operand_abs_neg(op_c, false, neg_c);

        let value = operation_p(OperationCode::HFma, PRECISE, vec![op_a, op_b, op_c]);
        let value = self.get_saturated_half_float(value, saturate);
        let dest = self.get_register(instr.gpr0());
        let value = self.half_merge(dest, value, hfma2.merge().unwrap_or(HalfMerge::H0H1));
        self.set_register(bb, instr.gpr0(), value);
        pc
    }
}
