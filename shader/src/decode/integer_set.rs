//! ISET and ISETP.

use super::get_op_b_integer;
use crate::inst::{Instruction, Pred, PredCondition, PredOperation};
use crate::node::{NodeBlock, OperationCode, PRECISE};
use crate::node_helper::{immediate_f32, immediate_s32, operation, operation_p};
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_integer_set(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let iset = instr.iset();

        let op_a = self.get_register(instr.gpr8());
        let op_b = get_op_b_integer(self, instr);

        let cond = iset.cond().unwrap_or(PredCondition::Equal);
        let first_pred =
            self.get_predicate_comparison_integer(cond, iset.is_signed(), op_a, op_b);
        let second_pred = self.get_predicate(iset.pred39() as u32, iset.neg_pred());
        let combiner = iset.op().unwrap_or(PredOperation::And);
        let predicate = self.get_predicate_combiner(combiner, first_pred, second_pred);

        let bf = iset.bf();
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

    pub(crate) fn decode_integer_set_predicate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let isetp = instr.isetp();

        let op_a = self.get_register(instr.gpr8());
        let op_b = get_op_b_integer(self, instr);

        let cond = isetp.cond().unwrap_or(PredCondition::Equal);
        let predicate =
            self.get_predicate_comparison_integer(cond, isetp.is_signed(), op_a, op_b);
        let second_pred = self.get_predicate(isetp.pred39() as u32, isetp.neg_pred());
        let combiner = isetp.op().unwrap_or(PredOperation::And);

        let value =
            self.get_predicate_combiner(combiner, predicate.clone(), second_pred.clone());
        self.set_predicate(bb, isetp.pred3(), value);

        if isetp.pred0() != u64::from(Pred::UNUSED_INDEX) {
            let negated = operation(OperationCode::LogicalNegate, vec![predicate]);
            let second_value = self.get_predicate_combiner(combiner, negated, second_pred);
            self.set_predicate(bb, isetp.pred0(), second_value);
        }
        pc
    }
}
