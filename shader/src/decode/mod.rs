//! Per-family instruction lowering.
//!
//! Each submodule implements one decoder family as methods on
//! [`ShaderIr`](crate::shader_ir::ShaderIr); the dispatch lives in
//! `shader_ir::decode_instr`.

mod arithmetic;
mod arithmetic_half;
mod arithmetic_immediate;
mod arithmetic_integer;
mod bfe_bfi;
mod conversion;
mod ffma;
mod float_set;
mod half_set;
mod image;
mod integer_set;
mod memory;
mod other;
mod predicate_set;
mod register_set_predicate;
mod shift;
mod texture;
mod video;
mod warp;
mod xmad;

use crate::inst::Instruction;
use crate::node::Node;
use crate::node_helper::immediate_s32;
use crate::shader_ir::ShaderIr;

/// Fetches the uniform second operand: a 19-bit float immediate, a
/// register or a constant-buffer slot.
pub(crate) fn get_op_b_float(ir: &mut ShaderIr, instr: Instruction) -> Node {
    if instr.is_b_imm() {
        ir.get_immediate19(instr)
    } else if instr.is_b_gpr() {
        ir.get_register(instr.gpr20())
    } else {
        ir.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset())
    }
}

/// Integer flavor of the second operand: the immediate is the
/// sign-extended 20-bit field.
pub(crate) fn get_op_b_integer(ir: &mut ShaderIr, instr: Instruction) -> Node {
    if instr.is_b_imm() {
        immediate_s32(instr.alu().signed_imm20_20())
    } else if instr.is_b_gpr() {
        ir.get_register(instr.gpr20())
    } else {
        ir.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset())
    }
}

