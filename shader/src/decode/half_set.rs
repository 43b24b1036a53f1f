//! HSET2 and HSETP2.

use crate::inst::{HalfType, Instruction, Pred, PredCondition, PredOperation};
use crate::node::{NodeBlock, OperationCode};
use crate::node_helper::{immediate_u32, operation};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_half_set(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let hset2 = instr.hset2();

        let op_a = self.get_register(instr.gpr8());
        let op_a = self.unpack_half_float(op_a, hset2.type_a().unwrap_or(HalfType::H0H1));
        let op_a = self.get_half_operand_abs_neg(op_a, hset2.abs_a(), hset2.negate_a());

        let op_b = self.get_register(instr.gpr20());
        let op_b = self.unpack_half_float(op_b, hset2.type_b().unwrap_or(HalfType::H0H1));
        let op_b = self.get_half_operand_abs_neg(op_b, hset2.abs_b(), hset2.negate_b());

        let second_pred = self.get_predicate(hset2.pred39() as u32, hset2.neg_pred());
        let cond = hset2.cond().unwrap_or(PredCondition::Equal);
        let comparison_pair = self.get_predicate_comparison_half(cond, op_a, op_b);
        let combiner = hset2.op().unwrap_or(PredOperation::And);

        // Build both lanes of the result and merge them.
        let mut lanes = Vec::with_capacity(2);
        for i in 0..2u32 {
            let raw_value: u32 = if hset2.bf() { 0x3c00 } else { 0xffff };
            let true_value = immediate_u32(raw_value << (i * 16));
            let false_value = immediate_u32(0);
            let comparison = operation(
                OperationCode::LogicalPick2,
                vec![comparison_pair.clone(), immediate_u32(i)],
            );
            let predicate =
                self.get_predicate_combiner(combiner, comparison, second_pred.clone());
            lanes.push(operation(
                OperationCode::Select,
                vec![predicate, true_value, false_value],
            ));
        }
        let value = operation(
            OperationCode::UBitwiseOr,
            vec![lanes[0].clone(), lanes[1].clone()],
        );
        self.set_register(bb, instr.gpr0(), value);
        pc
    }

    pub(crate) fn decode_half_set_predicate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let hsetp2 = instr.hsetp2();

        let op_a = self.get_register(instr.gpr8());
        let op_a = self.unpack_half_float(op_a, hsetp2.type_a().unwrap_or(HalfType::H0H1));
        let op_a = self.get_half_operand_abs_neg(op_a, hsetp2.abs_a(), hsetp2.negate_a());

        let (cond, h_and, op_b) = match matcher.id() {
            OpId::HSETP2_C => {
                let cbuf =
                    self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset());
                let value = self.unpack_half_float(cbuf, HalfType::F32);
                let value = self.get_half_operand_abs_neg(
                    value,
                    hsetp2.cbuf_abs_b(),
                    hsetp2.cbuf_negate_b(),
                );
                (
                    hsetp2.cbuf_and_imm_cond().unwrap_or(PredCondition::Equal),
                    hsetp2.cbuf_and_imm_h_and(),
                    value,
                )
            }
            OpId::HSETP2_IMM => (
                hsetp2.cbuf_and_imm_cond().unwrap_or(PredCondition::Equal),
                hsetp2.cbuf_and_imm_h_and(),
                self.unpack_half_immediate(instr, true),
            ),
            _ => {
                let reg = self.get_register(instr.gpr20());
                let value =
                    self.unpack_half_float(reg, hsetp2.reg_type_b().unwrap_or(HalfType::H0H1));
                let value = self.get_half_operand_abs_neg(
                    value,
                    hsetp2.reg_abs_b(),
                    hsetp2.reg_negate_b(),
                );
                (
                    hsetp2.reg_cond().unwrap_or(PredCondition::Equal),
                    hsetp2.reg_h_and(),
                    value,
                )
            }
        };

        let second_pred = self.get_predicate(hsetp2.pred39() as u32, hsetp2.neg_pred());
        let combiner = hsetp2.op().unwrap_or(PredOperation::And);
        let comparison = self.get_predicate_comparison_half(cond, op_a, op_b);

        let first = hsetp2.pred3();
        let second = hsetp2.pred0();
        if h_and {
            let joined = operation(OperationCode::LogicalAnd2, vec![comparison]);
            let value =
                self.get_predicate_combiner(combiner, joined.clone(), second_pred.clone());
            self.set_predicate(bb, first, value);
            if second != u64::from(Pred::UNUSED_INDEX) {
                let negated = operation(OperationCode::LogicalNegate, vec![joined]);
                let second_value =
                    self.get_predicate_combiner(combiner, negated, second_pred);
                self.set_predicate(bb, second, second_value);
            }
        } else {
            for (i, pred) in [first, second].iter().enumerate() {
                if *pred == u64::from(Pred::UNUSED_INDEX) {
                    continue;
                }
                let picked = operation(
                    OperationCode::LogicalPick2,
                    vec![comparison.clone(), immediate_u32(i as u32)],
                );
                let value =
                    self.get_predicate_combiner(combiner, picked, second_pred.clone());
                self.set_predicate(bb, *pred, value);
            }
        }
        pc
    }
}
