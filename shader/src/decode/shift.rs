//! Shifts, including the 64-bit funnel shift.

use super::get_op_b_integer;
use crate::inst::{Instruction, ShfType, ShfXmode};
use crate::node::{Node, NodeBlock, OperationCode};
use crate::node_helper::{immediate_s32, immediate_u32, operation, signed_operation};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

fn is_full(shift: Node) -> Node {
    operation(
        OperationCode::LogicalIEqual,
        vec![shift, immediate_u32(32)],
    )
}

/// Shift that returns zero when the amount is exactly 32.
fn shift(code: OperationCode, value: Node, shift_node: Node) -> Node {
    let shifted = operation(code, vec![value, shift_node.clone()]);
    operation(
        OperationCode::Select,
        vec![is_full(shift_node), immediate_u32(0), shifted],
    )
}

fn clamp_shift(shift_node: Node, size: i32) -> Node {
    let clamped = operation(
        OperationCode::IMax,
        vec![shift_node, immediate_u32(0)],
    );
    operation(
        OperationCode::IMin,
        vec![clamped, immediate_s32(size)],
    )
}

fn wrap_shift(shift_node: Node, size: i32) -> Node {
    operation(
        OperationCode::UBitwiseAnd,
        vec![shift_node, immediate_s32(size - 1)],
    )
}

fn shift_right(low: Node, high: Node, shift_node: Node, low_shift: Node, ty: ShfType) -> Node {
    // Amounts below 32 combine both halves.
    let less_low = shift(OperationCode::ILogicalShiftRight, low, shift_node.clone());
    let less_high = shift(OperationCode::ILogicalShiftLeft, high.clone(), low_shift);
    let less = operation(OperationCode::IBitwiseOr, vec![less_high, less_low]);

    if ty == ShfType::Bits32 {
        // A 32-bit funnel is either full (32) or below 32.
        return operation(
            OperationCode::Select,
            vec![is_full(shift_node), high, less],
        );
    }

    let is_signed = ty == ShfType::S64;
    let code = crate::node_helper::signed_to_unsigned(
        OperationCode::IArithmeticShiftRight,
        is_signed,
    );
    let reduced = operation(
        OperationCode::IAdd,
        vec![shift_node.clone(), immediate_s32(-32)],
    );
    let greater = shift(code, high.clone(), reduced);

    let is_less = operation(
        OperationCode::LogicalILessThan,
        vec![shift_node.clone(), immediate_u32(32)],
    );
    let is_zero = operation(
        OperationCode::LogicalIEqual,
        vec![shift_node, immediate_u32(0)],
    );
    let value = operation(OperationCode::Select, vec![is_less, less, greater]);
    operation(OperationCode::Select, vec![is_zero, high, value])
}

fn shift_left(low: Node, high: Node, shift_node: Node, low_shift: Node, ty: ShfType) -> Node {
    let less_low = operation(
        OperationCode::ILogicalShiftRight,
        vec![low.clone(), low_shift],
    );
    let less_high = operation(
        OperationCode::ILogicalShiftLeft,
        vec![high.clone(), shift_node.clone()],
    );
    let less = operation(OperationCode::IBitwiseOr, vec![less_low, less_high]);

    if ty == ShfType::Bits32 {
        return operation(
            OperationCode::Select,
            vec![is_full(shift_node), low, less],
        );
    }

    let reduced = operation(
        OperationCode::IAdd,
        vec![shift_node.clone(), immediate_s32(-32)],
    );
    let greater = shift(OperationCode::ILogicalShiftLeft, low, reduced);

    let is_less = operation(
        OperationCode::LogicalILessThan,
        vec![shift_node.clone(), immediate_u32(32)],
    );
    let is_zero = operation(
        OperationCode::LogicalIEqual,
        vec![shift_node, immediate_u32(0)],
    );
    let value = operation(OperationCode::Select, vec![is_less, less, greater]);
    operation(OperationCode::Select, vec![is_zero, high, value])
}

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_shift(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        let op_a = self.get_register(instr.gpr8());
        let mut op_b = get_op_b_integer(self, instr);

        match matcher.id() {
            OpId::SHR_C | OpId::SHR_R | OpId::SHR_IMM => {
                op_b = if instr.shr().wrap() {
                    wrap_shift(op_b, 32)
                } else {
                    clamp_shift(op_b, 32)
                };
                let value = signed_operation(
                    OperationCode::IArithmeticShiftRight,
                    instr.shift().is_signed(),
                    vec![op_a, op_b],
                );
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::SHL_C | OpId::SHL_R | OpId::SHL_IMM => {
                let value = operation(OperationCode::ILogicalShiftLeft, vec![op_a, op_b]);
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::SHF_RIGHT_R | OpId::SHF_RIGHT_IMM | OpId::SHF_LEFT_R | OpId::SHF_LEFT_IMM => {
                if instr.generates_cc() {
                    warn!("SHF condition codes not implemented");
                }
                if instr.shf().xmode() != Some(ShfXmode::None) {
                    warn!("SHF xmode not implemented");
                }
                if instr.is_b_imm() {
                    op_b = immediate_u32(instr.shf().immediate() as u32);
                }
                let ty = instr.shf().shf_type().unwrap_or(ShfType::Bits32);
                let size = if ty == ShfType::Bits32 { 32 } else { 64 };
                let shift_node = if instr.shf().wrap() {
                    wrap_shift(op_b, size)
                } else {
                    clamp_shift(op_b, size)
                };
                let negated = operation(OperationCode::INegate, vec![shift_node.clone()]);
                let low_shift = operation(
                    OperationCode::IAdd,
                    vec![negated, immediate_u32(32)],
                );
                let high = self.get_register(instr.gpr39());
                let is_right =
                    matches!(matcher.id(), OpId::SHF_RIGHT_R | OpId::SHF_RIGHT_IMM);
                let value = if is_right {
                    shift_right(op_a, high, shift_node, low_shift, ty)
                } else {
                    shift_left(op_a, high, shift_node, low_shift, ty)
                };
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!("Unhandled shift instruction: {}", matcher.name());
            }
        }
        pc
    }
}
