//! Convenience constructors for IR nodes.

use crate::node::{
    ConditionalNode, Meta, MetaArithmetic, Node, NodeBlock, NodeData, OperationCode, OperationNode,
};
use smallvec::SmallVec;
use std::rc::Rc;

pub fn make_node(data: NodeData) -> Node {
    Rc::new(data)
}

/// Builds an operation with no metadata.
pub fn operation(code: OperationCode, operands: Vec<Node>) -> Node {
    operation_meta(code, Meta::None, operands)
}

pub fn operation_meta(code: OperationCode, meta: Meta, operands: Vec<Node>) -> Node {
    make_node(NodeData::Operation(OperationNode::new(
        code,
        meta,
        SmallVec::from_vec(operands),
    )))
}

/// Builds an arithmetic operation carrying a precision hint.
pub fn operation_p(code: OperationCode, precise: MetaArithmetic, operands: Vec<Node>) -> Node {
    operation_meta(code, Meta::Arithmetic(precise), operands)
}

pub fn conditional(condition: Node, code: NodeBlock) -> Node {
    make_node(NodeData::Conditional(ConditionalNode::new(condition, code)))
}

pub fn comment(text: String) -> Node {
    make_node(NodeData::Comment(text))
}

pub fn immediate_u32(value: u32) -> Node {
    make_node(NodeData::Immediate(value))
}

pub fn immediate_s32(value: i32) -> Node {
    immediate_u32(value as u32)
}

pub fn immediate_f32(value: f32) -> Node {
    immediate_u32(value.to_bits())
}

/// Maps a signed opcode to its unsigned counterpart when `is_signed` is
/// false. Opcodes without an unsigned form are returned unchanged.
pub fn signed_to_unsigned(code: OperationCode, is_signed: bool) -> OperationCode {
    use self::OperationCode::*;
    if is_signed {
        return code;
    }
    match code {
        FCastInteger => FCastUInteger,
        IAdd => UAdd,
        IMul => UMul,
        IMin => UMin,
        IMax => UMax,
        ICastFloat => UCastFloat,
        ILogicalShiftLeft => ULogicalShiftLeft,
        ILogicalShiftRight => ULogicalShiftRight,
        IArithmeticShiftRight => UArithmeticShiftRight,
        IBitwiseAnd => UBitwiseAnd,
        IBitwiseOr => UBitwiseOr,
        IBitwiseXor => UBitwiseXor,
        IBitwiseNot => UBitwiseNot,
        IBitfieldInsert => UBitfieldInsert,
        IBitfieldExtract => UBitfieldExtract,
        IBitCount => UBitCount,
        LogicalILessThan => LogicalULessThan,
        LogicalIEqual => LogicalUEqual,
        LogicalILessEqual => LogicalULessEqual,
        LogicalIGreaterThan => LogicalUGreaterThan,
        LogicalINotEqual => LogicalUNotEqual,
        LogicalIGreaterEqual => LogicalUGreaterEqual,
        other => other,
    }
}

/// Builds a signed-or-unsigned operation from the signed opcode.
pub fn signed_operation(code: OperationCode, is_signed: bool, operands: Vec<Node>) -> Node {
    operation(signed_to_unsigned(code, is_signed), operands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_mapping() {
        assert_eq!(
            signed_to_unsigned(OperationCode::IAdd, false),
            OperationCode::UAdd
        );
        assert_eq!(
            signed_to_unsigned(OperationCode::IAdd, true),
            OperationCode::IAdd
        );
        // No unsigned form: passthrough.
        assert_eq!(
            signed_to_unsigned(OperationCode::FAdd, false),
            OperationCode::FAdd
        );
    }

    #[test]
    fn immediate_float_bits() {
        if let NodeData::Immediate(bits) = *immediate_f32(1.0) {
            assert_eq!(bits, 0x3f80_0000);
        } else {
            panic!("expected immediate");
        }
    }
}
