//! R2P and P2R.

use crate::inst::{Instruction, R2pMode};
use crate::node::{NodeBlock, OperationCode};
use crate::node_helper::{conditional, immediate_u32, operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, bitfield_insert, ShaderIr};

const NUM_PROGRAMMABLE_PREDICATES: u32 = 7;

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_register_set_predicate(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        if instr.p2r_r2p().mode() != Some(R2pMode::Pr) {
            warn!("R2P/P2R CC mode not implemented");
        }

        let apply_mask = immediate_u32(instr.p2r_r2p().immediate_mask() as u32);
        let offset = instr.p2r_r2p().byte() as u32 * 8;

        match matcher.id() {
            OpId::R2P_IMM => {
                let mask = self.get_register(instr.gpr8());
                for pred in 0..NUM_PROGRAMMABLE_PREDICATES {
                    let apply_compare = bitfield_extract(apply_mask.clone(), pred, 1);
                    let condition = operation(
                        OperationCode::LogicalUNotEqual,
                        vec![apply_compare, immediate_u32(0)],
                    );
                    let value_compare = bitfield_extract(mask.clone(), offset + pred, 1);
                    let value = operation(
                        OperationCode::LogicalUNotEqual,
                        vec![value_compare, immediate_u32(0)],
                    );
                    let dest = self.get_predicate(pred, false);
                    let code = operation(OperationCode::LogicalAssign, vec![dest, value]);
                    bb.push(conditional(condition, vec![code]));
                }
            }
            OpId::P2R_IMM => {
                let mut value = immediate_u32(0);
                for pred in 0..NUM_PROGRAMMABLE_PREDICATES {
                    let predicate = self.get_predicate(pred, false);
                    let bit = operation(
                        OperationCode::Select,
                        vec![predicate, immediate_u32(1 << pred), immediate_u32(0)],
                    );
                    value = operation(OperationCode::UBitwiseOr, vec![value, bit]);
                }
                value = operation(OperationCode::UBitwiseAnd, vec![value, apply_mask]);
                let base = self.get_register(instr.gpr8());
                value = bitfield_insert(base, value, offset, 8);
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!("Unhandled P2R/R2P instruction: {}", matcher.name());
            }
        }
        pc
    }
}
