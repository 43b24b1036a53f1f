//! XMAD: 16x16 multiply-add with merge modes.

use crate::inst::{Instruction, XmadMode};
use crate::node::{NodeBlock, OperationCode, NO_PRECISE};
use crate::node_helper::{immediate_u32, operation, operation_p, signed_operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, ShaderIr};

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_xmad(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();
        let xmad = instr.xmad();

        if xmad.sign_a() || xmad.sign_b() {
            warn!("Signed XMAD not implemented");
        }
        let is_signed_b = xmad.sign_b();
        let is_signed_c = xmad.sign_a();

        let mut op_a = self.get_register(instr.gpr8());
        let (is_merge, is_psl, is_high_b, mode, op_b, op_c) = match matcher.id() {
            OpId::XMAD_CR => (
                xmad.merge_56(),
                xmad.product_shift_left_second(),
                xmad.high_b(),
                xmad.mode_cbf(),
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                self.get_register(instr.gpr39()),
            ),
            OpId::XMAD_RR => (
                xmad.merge_37(),
                xmad.product_shift_left(),
                xmad.high_b_rr(),
                xmad.mode(),
                self.get_register(instr.gpr20()),
                self.get_register(instr.gpr39()),
            ),
            OpId::XMAD_RC => (
                false,
                false,
                xmad.high_b(),
                xmad.mode_cbf(),
                self.get_register(instr.gpr39()),
                self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
            ),
            _ => (
                xmad.merge_37(),
                xmad.product_shift_left(),
                false,
                xmad.mode(),
                immediate_u32(xmad.imm20_16() as u32),
                self.get_register(instr.gpr39()),
            ),
        };

        op_a = bitfield_extract(op_a, if xmad.high_a() { 16 } else { 0 }, 16);

        let original_b = op_b.clone();
        let op_b = bitfield_extract(op_b, if is_high_b { 16 } else { 0 }, 16);

        let mut product = operation_p(OperationCode::IMul, NO_PRECISE, vec![op_a, op_b]);
        if is_psl {
            product = operation_p(
                OperationCode::ILogicalShiftLeft,
                NO_PRECISE,
                vec![product, immediate_u32(16)],
            );
        }
        self.set_temporary(bb, 0, product);
        let product = self.get_temporary(0);

        let original_c = op_c;
        let op_c = match mode {
            Some(XmadMode::None) | None => original_c,
            Some(XmadMode::CLo) => bitfield_extract(original_c, 0, 16),
            Some(XmadMode::CHi) => bitfield_extract(original_c, 16, 16),
            Some(XmadMode::CBcc) => {
                let shifted_b = signed_operation(
                    OperationCode::ILogicalShiftLeft,
                    is_signed_b,
                    vec![original_b.clone(), immediate_u32(16)],
                );
                signed_operation(
                    OperationCode::IAdd,
                    is_signed_c,
                    vec![original_c, shifted_b],
                )
            }
            Some(XmadMode::CSfu) => {
                warn!("XMAD CSfu mode not implemented");
                immediate_u32(0)
            }
        };
        self.set_temporary(bb, 1, op_c);
        let op_c = self.get_temporary(1);

        let sum = operation(OperationCode::IAdd, vec![product, op_c]);
        self.set_temporary(bb, 2, sum);
        let mut sum = self.get_temporary(2);
        if is_merge {
            let low = bitfield_extract(sum, 0, 16);
            let high = operation_p(
                OperationCode::ILogicalShiftLeft,
                NO_PRECISE,
                vec![original_b, immediate_u32(16)],
            );
            sum = operation_p(OperationCode::IBitwiseOr, NO_PRECISE, vec![low, high]);
        }

        self.set_internal_flags_from_integer(bb, sum.clone(), instr.generates_cc());
        self.set_register(bb, instr.gpr0(), sum);
        pc
    }
}
