//! Warp-wide vote, shuffle and swizzled add.

use crate::inst::{Instruction, ShuffleOperation, VoteOperation};
use crate::node::{NodeBlock, OperationCode};
use crate::node_helper::{immediate_u32, operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, ShaderIr};

fn vote_operation_code(vote_op: VoteOperation) -> OperationCode {
    match vote_op {
        VoteOperation::All => OperationCode::VoteAll,
        VoteOperation::Any => OperationCode::VoteAny,
        VoteOperation::Eq => OperationCode::VoteEqual,
    }
}

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_warp(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        // Signal the backend that this shader uses warp instructions.
        self.uses_warps = true;

        match matcher.id() {
            OpId::VOTE => {
                let vote = instr.vote();
                let value = self.get_predicate(vote.value() as u32, vote.negate_value());
                let active = operation(OperationCode::BallotThread, vec![value.clone()]);
                let vote_op = vote.operation().unwrap_or(VoteOperation::All);
                let result = operation(vote_operation_code(vote_op), vec![value]);
                self.set_register(bb, instr.gpr0(), active);
                self.set_predicate(bb, vote.dest_pred(), result);
            }
            OpId::SHFL => {
                let shfl = instr.shfl();
                let mask = if shfl.is_mask_imm() {
                    immediate_u32(shfl.mask_imm() as u32)
                } else {
                    self.get_register(instr.gpr39())
                };
                let index = if shfl.is_index_imm() {
                    immediate_u32(shfl.index_imm() as u32)
                } else {
                    self.get_register(instr.gpr20())
                };

                let thread_id = operation(OperationCode::ThreadId, vec![]);
                let clamp = operation(
                    OperationCode::IBitwiseAnd,
                    vec![mask.clone(), immediate_u32(0x1F)],
                );
                let seg_mask = bitfield_extract(mask, 8, 16);

                let neg_seg_mask =
                    operation(OperationCode::IBitwiseNot, vec![seg_mask.clone()]);
                let min_thread_id = operation(
                    OperationCode::IBitwiseAnd,
                    vec![thread_id.clone(), seg_mask],
                );
                let clamp_masked = operation(
                    OperationCode::IBitwiseAnd,
                    vec![clamp, neg_seg_mask.clone()],
                );
                let max_thread_id = operation(
                    OperationCode::IBitwiseOr,
                    vec![min_thread_id.clone(), clamp_masked],
                );

                let op = shfl.operation().unwrap_or(ShuffleOperation::Idx);
                let src_thread_id = match op {
                    ShuffleOperation::Idx => {
                        let masked_index = operation(
                            OperationCode::IBitwiseAnd,
                            vec![index, neg_seg_mask],
                        );
                        operation(
                            OperationCode::IBitwiseOr,
                            vec![masked_index, min_thread_id.clone()],
                        )
                    }
                    ShuffleOperation::Down => {
                        operation(OperationCode::IAdd, vec![thread_id.clone(), index])
                    }
                    ShuffleOperation::Up => {
                        let negated = operation(OperationCode::INegate, vec![index]);
                        operation(OperationCode::IAdd, vec![thread_id.clone(), negated])
                    }
                    ShuffleOperation::Bfly => {
                        operation(OperationCode::IBitwiseXor, vec![thread_id.clone(), index])
                    }
                };

                let in_bounds = if op == ShuffleOperation::Up {
                    operation(
                        OperationCode::LogicalIGreaterEqual,
                        vec![src_thread_id.clone(), min_thread_id],
                    )
                } else {
                    operation(
                        OperationCode::LogicalILessEqual,
                        vec![src_thread_id.clone(), max_thread_id],
                    )
                };

                self.set_predicate(bb, shfl.pred48(), in_bounds);
                let source = self.get_register(instr.gpr8());
                let shuffled = operation(
                    OperationCode::ShuffleIndexed,
                    vec![source, src_thread_id],
                );
                self.set_register(bb, instr.gpr0(), shuffled);
            }
            OpId::FSWZADD => {
                let op_a = self.get_register(instr.gpr8());
                let op_b = self.get_register(instr.gpr20());
                let mask = immediate_u32(instr.fswzadd().swizzle() as u32);
                let value = operation(OperationCode::FSwizzleAdd, vec![op_a, op_b, mask]);
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!("Unhandled warp instruction: {}", matcher.name());
            }
        }
        pc
    }
}
