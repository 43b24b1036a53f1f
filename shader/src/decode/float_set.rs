//! FSET and FSETP.

use super::get_op_b_float;
use crate::inst::{Instruction, Pred, PredCondition, PredOperation};
use crate::node::{NodeBlock, OperationCode, PRECISE};
use crate::node_helper::{immediate_f32, immediate_s32, operation, operation_p};
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_float_set(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let fset = instr.fset();

        let op_a = self.get_register(instr.gpr8());
        let op_a = self.get_operand_abs_neg_float(op_a, fset.abs_a(), fset.neg_a());
        let op_b = get_op_b_float(self, instr);
        let op_b = self.get_operand_abs_neg_float(op_b, fset.abs_b(), fset.neg_b());

        // FSET writes 1.0 or an all-ones integer depending on the bf bit.
        let second_pred = self.get_predicate(fset.pred39() as u32, fset.neg_pred());
        let cond = fset.cond().unwrap_or(PredCondition::Equal);
        let first_pred = self.get_predicate_comparison_float(cond, op_a, op_b);
        let combiner = fset.op().unwrap_or(PredOperation::And);
        let predicate = self.get_predicate_combiner(combiner, first_pred, second_pred);

        let bf = fset.bf();
        let true_value = if bf { immediate_f32(1.0) } else { immediate_s32(-1) };
        let false_value = if bf { immediate_f32(0.0) } else { immediate_s32(0) };
        let value = operation_p(
            OperationCode::Select,
            PRECISE,
            vec![predicate, true_value, false_value],
        );

        if bf {
            self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
        } else {
            self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
        }
        self.set_register(bb, instr.gpr0(), value);
        pc
    }

    pub(crate) fn decode_float_set_predicate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let fsetp = instr.fsetp();

        let op_a = self.get_register(instr.gpr8());
        let op_a = self.get_operand_abs_neg_float(op_a, fsetp.abs_a(), fsetp.neg_a());
        let op_b = get_op_b_float(self, instr);
        let op_b = self.get_operand_abs_neg_float(op_b, fsetp.abs_b(), fsetp.neg_b());

        let cond = fsetp.cond().unwrap_or(PredCondition::Equal);
        let predicate = self.get_predicate_comparison_float(cond, op_a, op_b);
        let second_pred = self.get_predicate(fsetp.pred39() as u32, fsetp.neg_pred());
        let combiner = fsetp.op().unwrap_or(PredOperation::And);

        let value =
            self.get_predicate_combiner(combiner, predicate.clone(), second_pred.clone());
        self.set_predicate(bb, fsetp.pred3(), value);

        if fsetp.pred0() != u64::from(Pred::UNUSED_INDEX) {
            // Secondary predicate receives the negated comparison.
            let negated = operation(OperationCode::LogicalNegate, vec![predicate]);
            let second_value = self.get_predicate_combiner(combiner, negated, second_pred);
            self.set_predicate(bb, fsetp.pred0(), second_value);
        }
        pc
    }
}
