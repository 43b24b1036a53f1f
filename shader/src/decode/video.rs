//! Video (scalar SIMD) instructions.

use crate::inst::{Instruction, PredCondition, PredOperation, VideoType, VmadShr};
use crate::node::{Node, NodeBlock, OperationCode};
use crate::node_helper::{immediate_u32, operation, signed_operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, ShaderIr};

impl<'r> ShaderIr<'r> {
    fn video_operand(&mut self, op: Node, is_chunk: bool, is_signed: bool, ty: Option<VideoType>, byte_height: u64) -> Node {
        // Byte and short chunks extract the addressed lane.
        if is_chunk {
            let offset = (byte_height * 8) as u32;
            return signed_operation(
                OperationCode::IBitfieldExtract,
                is_signed,
                vec![op, immediate_u32(offset), immediate_u32(8)],
            );
        }
        match ty {
            Some(VideoType::Size16Low) => bitfield_extract(op, 0, 16),
            Some(VideoType::Size16High) => bitfield_extract(op, 16, 16),
            _ => op,
        }
    }

    pub(crate) fn decode_video(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let video = instr.video();

        let op_a_raw = self.get_register(instr.gpr8());
        let op_a = self.video_operand(
            op_a_raw,
            video.is_byte_chunk_a(),
            video.signed_a(),
            video.type_a(),
            video.byte_height_a(),
        );
        let op_b_raw = if video.use_register_b() {
            self.get_register(instr.gpr20())
        } else {
            self.get_immediate32(instr)
        };
        let op_b = self.video_operand(
            op_b_raw,
            video.is_byte_chunk_b(),
            video.signed_b(),
            video.type_b(),
            video.byte_height_b(),
        );

        match matcher.id() {
            OpId::VMAD => {
                let op_c = self.get_register(instr.gpr39());
                let is_signed = video.signed_a();
                let product = signed_operation(OperationCode::IMul, is_signed, vec![op_a, op_b]);
                let mut result =
                    signed_operation(OperationCode::IAdd, is_signed, vec![product, op_c]);
                match instr.vmad().shr() {
                    Some(VmadShr::Shr7) => {
                        result = signed_operation(
                            OperationCode::IArithmeticShiftRight,
                            is_signed,
                            vec![result, immediate_u32(7)],
                        );
                    }
                    Some(VmadShr::Shr15) => {
                        result = signed_operation(
                            OperationCode::IArithmeticShiftRight,
                            is_signed,
                            vec![result, immediate_u32(15)],
                        );
                    }
                    None => {}
                }
                self.set_internal_flags_from_integer(bb, result.clone(), instr.vmad().cc());
                self.set_register(bb, instr.gpr0(), result);
            }
            OpId::VSETP => {
                let vsetp = instr.vsetp();
                let cond = vsetp.cond().unwrap_or(PredCondition::Equal);
                let predicate = self.get_predicate_comparison_integer(
                    cond,
                    video.signed_a(),
                    op_a,
                    op_b,
                );
                let second_pred = self.get_predicate(vsetp.pred39() as u32, false);
                let combiner = vsetp.op().unwrap_or(PredOperation::And);
                let value =
                    self.get_predicate_combiner(combiner, predicate.clone(), second_pred.clone());
                self.set_predicate(bb, vsetp.pred3(), value);

                if vsetp.pred0() != u64::from(crate::inst::Pred::UNUSED_INDEX) {
                    let negated = operation(OperationCode::LogicalNegate, vec![predicate]);
                    let second_value =
                        self.get_predicate_combiner(combiner, negated, second_pred);
                    self.set_predicate(bb, vsetp.pred0(), second_value);
                }
            }
            _ => {
                warn!("Unhandled video instruction: {}", matcher.name());
            }
        }
        pc
    }
}
