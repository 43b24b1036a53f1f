//! PSET, PSETP and CSETP.

use crate::inst::{Instruction, Pred, PredOperation};
use crate::node::{NodeBlock, OperationCode, PRECISE};
use crate::node_helper::{immediate_f32, immediate_s32, operation_p};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_predicate_set_register(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let pset = instr.pset();

        let op_a = self.get_predicate(pset.pred12() as u32, pset.neg_pred12());
        let op_b = self.get_predicate(pset.pred29() as u32, pset.neg_pred29());

        let first_combiner = pset.cond().unwrap_or(PredOperation::And);
        let second_combiner = pset.op().unwrap_or(PredOperation::And);
        let first_pred = self.get_predicate_combiner(first_combiner, op_a, op_b);
        let second_pred = self.get_predicate(pset.pred39() as u32, pset.neg_pred39());
        let predicate = self.get_predicate_combiner(second_combiner, first_pred, second_pred);

        let bf = pset.bf();
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

    pub(crate) fn decode_predicate_set_predicate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        match matcher.id() {
            OpId::PSETP => {
                let psetp = instr.psetp();
                let op_a = self.get_predicate(psetp.pred12() as u32, psetp.neg_pred12());
                let op_b = self.get_predicate(psetp.pred29() as u32, psetp.neg_pred29());

                // Combine in the first pass, then against pred39.
                let first_combiner = psetp.cond().unwrap_or(PredOperation::And);
                let second_combiner = psetp.op().unwrap_or(PredOperation::And);
                let predicate = self.get_predicate_combiner(first_combiner, op_a, op_b);
                let second_pred =
                    self.get_predicate(psetp.pred39() as u32, psetp.neg_pred39());
                let value = self.get_predicate_combiner(
                    second_combiner,
                    predicate.clone(),
                    second_pred.clone(),
                );
                self.set_predicate(bb, psetp.pred3(), value);

                if psetp.pred0() != u64::from(Pred::UNUSED_INDEX) {
                    let negated = crate::node_helper::operation(
                        OperationCode::LogicalNegate,
                        vec![predicate],
                    );
                    let second_value =
                        self.get_predicate_combiner(second_combiner, negated, second_pred);
                    self.set_predicate(bb, psetp.pred0(), second_value);
                }
            }
            OpId::CSETP => {
                let csetp = instr.csetp();
                let cc = csetp.cc().unwrap_or(crate::inst::ConditionCode::T);
                let condition = self.get_condition_code(cc);
                let second_pred =
                    self.get_predicate(csetp.pred39() as u32, csetp.neg_pred39());
                let combiner = csetp.op().unwrap_or(PredOperation::And);
                let value = self.get_predicate_combiner(
                    combiner,
                    condition.clone(),
                    second_pred.clone(),
                );
                if csetp.pred3() != u64::from(Pred::UNUSED_INDEX) {
                    self.set_predicate(bb, csetp.pred3(), value);
                }
                if csetp.pred0() != u64::from(Pred::UNUSED_INDEX) {
                    let negated = crate::node_helper::operation(
                        OperationCode::LogicalNegate,
                        vec![condition],
                    );
                    let second_value =
                        self.get_predicate_combiner(combiner, negated, second_pred);
                    self.set_predicate(bb, csetp.pred0(), second_value);
                }
            }
            _ => {
                warn!(
                    "Unhandled predicate-set instruction: {}",
                    matcher.name()
                );
            }
        }
        pc
    }
}
