//! Integer/float size and domain conversions.

use crate::inst::{F2fRoundingOp, F2iRoundingOp, Instruction};
use crate::node::{Node, NodeBlock, OperationCode, NO_PRECISE, PRECISE};
use crate::node_helper::{
    immediate_s32, immediate_u32, operation_p, signed_operation,
};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

/// Register sub-word sizes used by the conversion family.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RegisterSize {
    Byte,
    Short,
    Word,
    Long,
}

fn register_size(bits: u64) -> RegisterSize {
    match bits {
        0 => RegisterSize::Byte,
        1 => RegisterSize::Short,
        3 => RegisterSize::Long,
        _ => RegisterSize::Word,
    }
}

fn float_selector(selector: bool) -> OperationCode {
    if selector {
        OperationCode::FCastHalf1
    } else {
        OperationCode::FCastHalf0
    }
}

impl<'r> ShaderIr<'r> {
    fn convert_integer_size(&mut self, value: Node, size: RegisterSize, is_signed: bool) -> Node {
        let shift = match size {
            RegisterSize::Byte => 24,
            RegisterSize::Short => 16,
            _ => return value,
        };
        let value = signed_operation(
            OperationCode::ILogicalShiftLeft,
            is_signed,
            vec![value, immediate_u32(shift)],
        );
        signed_operation(
            OperationCode::IArithmeticShiftRight,
            is_signed,
            vec![value, immediate_u32(shift)],
        )
    }

    fn conversion_operand(&mut self, instr: Instruction, id: OpId, float_imm: bool) -> Node {
        match id {
            OpId::I2I_R | OpId::I2F_R | OpId::F2F_R | OpId::F2I_R => {
                self.get_register(instr.gpr20())
            }
            OpId::I2I_C | OpId::I2F_C | OpId::F2F_C | OpId::F2I_C => {
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset())
            }
            _ if float_imm => self.get_immediate19(instr),
            _ => immediate_s32(instr.alu().signed_imm20_20()),
        }
    }

    pub(crate) fn decode_conversion(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let conversion = instr.conversion();
        let src_size = register_size(conversion.src_size());
        let dst_size = register_size(conversion.dst_size());

        match matcher.id() {
            OpId::I2I_R | OpId::I2I_C | OpId::I2I_IMM => {
                let input_signed = conversion.is_input_signed();
                let output_signed = conversion.is_output_signed();

                let mut value = self.conversion_operand(instr, matcher.id(), false);
                value = self.convert_integer_size(value, src_size, input_signed);
                value = self.get_operand_abs_neg_integer(
                    value,
                    conversion.abs_a(),
                    conversion.negate_a(),
                    input_signed,
                );
                if input_signed != output_signed {
                    value = signed_operation(
                        OperationCode::ICastUnsigned,
                        output_signed,
                        vec![value],
                    );
                }
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::I2F_R | OpId::I2F_C | OpId::I2F_IMM => {
                let input_signed = conversion.is_input_signed();
                let mut value = self.conversion_operand(instr, matcher.id(), false);

                let offset = conversion.int_src_selector() as u32;
                if offset > 0 {
                    value = signed_operation(
                        OperationCode::ILogicalShiftRight,
                        input_signed,
                        vec![value, immediate_u32(offset * 8)],
                    );
                }

                value = self.convert_integer_size(value, src_size, input_signed);
                value =
                    self.get_operand_abs_neg_integer(value, conversion.abs_a(), false, input_signed);
                value = signed_operation(OperationCode::FCastInteger, input_signed, vec![value]);
                value = self.get_operand_abs_neg_float(value, false, conversion.negate_a());

                self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
                if dst_size == RegisterSize::Short {
                    value = operation_p(OperationCode::HCastFloat, PRECISE, vec![value]);
                }
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::F2F_R | OpId::F2F_C | OpId::F2F_IMM => {
                let mut value = self.conversion_operand(instr, matcher.id(), true);
                if src_size == RegisterSize::Short {
                    value = operation_p(
                        float_selector(conversion.float_src_selector()),
                        NO_PRECISE,
                        vec![value],
                    );
                }
                value =
                    self.get_operand_abs_neg_float(value, conversion.abs_a(), conversion.negate_a());
                value = match conversion.f2f_rounding() {
                    Some(F2fRoundingOp::None) | Some(F2fRoundingOp::Pass) | None => value,
                    Some(F2fRoundingOp::Round) => {
                        operation_p(OperationCode::FRoundEven, PRECISE, vec![value])
                    }
                    Some(F2fRoundingOp::Floor) => {
                        operation_p(OperationCode::FFloor, PRECISE, vec![value])
                    }
                    Some(F2fRoundingOp::Ceil) => {
                        operation_p(OperationCode::FCeil, PRECISE, vec![value])
                    }
                    Some(F2fRoundingOp::Trunc) => {
                        operation_p(OperationCode::FTrunc, PRECISE, vec![value])
                    }
                };
                value = self.get_saturated_float(value, instr.alu().saturate_d());
                self.set_internal_flags_from_float(bb, value.clone(), instr.generates_cc());
                if dst_size == RegisterSize::Short {
                    value = operation_p(OperationCode::HCastFloat, PRECISE, vec![value]);
                }
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::F2I_R | OpId::F2I_C | OpId::F2I_IMM => {
                let mut value = self.conversion_operand(instr, matcher.id(), true);
                if src_size == RegisterSize::Short {
                    value = operation_p(
                        float_selector(conversion.float_src_selector()),
                        NO_PRECISE,
                        vec![value],
                    );
                }
                value =
                    self.get_operand_abs_neg_float(value, conversion.abs_a(), conversion.negate_a());
                value = match conversion.f2i_rounding() {
                    Some(F2iRoundingOp::RoundEven) => {
                        operation_p(OperationCode::FRoundEven, PRECISE, vec![value])
                    }
                    Some(F2iRoundingOp::Floor) => {
                        operation_p(OperationCode::FFloor, PRECISE, vec![value])
                    }
                    Some(F2iRoundingOp::Ceil) => {
                        operation_p(OperationCode::FCeil, PRECISE, vec![value])
                    }
                    Some(F2iRoundingOp::Trunc) | None => {
                        operation_p(OperationCode::FTrunc, PRECISE, vec![value])
                    }
                };
                let is_signed = conversion.is_output_signed();
                value = signed_operation(OperationCode::ICastFloat, is_signed, vec![value]);
                value = self.convert_integer_size(value, dst_size, is_signed);
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!("Unhandled conversion instruction: {}", matcher.name());
            }
        }
        pc
    }
}
