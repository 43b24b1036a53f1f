//! Integer arithmetic, logic ops and LEA.

use super::get_op_b_integer;
use crate::inst::{
    IAdd3Height, IAdd3Mode, IMinMaxExchange, Instruction, LogicOperation, Pred,
    PredicateResultMode, Register,
};
use crate::node::{Node, NodeBlock, OperationCode, NO_PRECISE, PRECISE};
use crate::node_helper::{immediate_u32, operation, operation_p, signed_operation};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, ShaderIr};

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_arithmetic_integer(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        let mut op_a = self.get_register(instr.gpr8());
        let mut op_b = get_op_b_integer(self, instr);

        match matcher.id() {
            OpId::IADD_C | OpId::IADD_R | OpId::IADD_IMM => {
                if instr.alu().saturate_d() {
                    warn!("IADD saturation not implemented");
                }
                op_a = self.get_operand_abs_neg_integer(
                    op_a,
                    false,
                    instr.alu_integer().negate_a(),
                    true,
                );
                op_b = self.get_operand_abs_neg_integer(
                    op_b,
                    false,
                    instr.alu_integer().negate_b(),
                    true,
                );
                let value = operation_p(OperationCode::IAdd, PRECISE, vec![op_a, op_b]);
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::IADD3_C | OpId::IADD3_R | OpId::IADD3_IMM => {
                let mut op_c = self.get_register(instr.gpr39());
                let apply_height = |height: Option<IAdd3Height>, value: Node| match height {
                    Some(IAdd3Height::None) | None => value,
                    Some(IAdd3Height::LowerHalfWord) => bitfield_extract(value, 0, 16),
                    Some(IAdd3Height::UpperHalfWord) => bitfield_extract(value, 16, 16),
                };
                let is_rr = matcher.id() == OpId::IADD3_R;
                if is_rr {
                    op_a = apply_height(instr.iadd3().height_a(), op_a);
                    op_b = apply_height(instr.iadd3().height_b(), op_b);
                    op_c = apply_height(instr.iadd3().height_c(), op_c);
                }
                op_a = self.get_operand_abs_neg_integer(op_a, false, instr.iadd3().neg_a(), true);
                op_b = self.get_operand_abs_neg_integer(op_b, false, instr.iadd3().neg_b(), true);
                op_c = self.get_operand_abs_neg_integer(op_c, false, instr.iadd3().neg_c(), true);

                let add_ab = operation_p(OperationCode::IAdd, NO_PRECISE, vec![op_a, op_b]);
                let value = if !is_rr {
                    operation_p(OperationCode::IAdd, NO_PRECISE, vec![add_ab, op_c])
                } else {
                    let shifted = match instr.iadd3().mode() {
                        Some(IAdd3Mode::RightShift) => operation_p(
                            OperationCode::ILogicalShiftRight,
                            NO_PRECISE,
                            vec![add_ab, immediate_u32(16)],
                        ),
                        Some(IAdd3Mode::LeftShift) => operation_p(
                            OperationCode::ILogicalShiftLeft,
                            NO_PRECISE,
                            vec![add_ab, immediate_u32(16)],
                        ),
                        _ => add_ab,
                    };
                    operation_p(OperationCode::IAdd, NO_PRECISE, vec![shifted, op_c])
                };
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::ISCADD_C | OpId::ISCADD_R | OpId::ISCADD_IMM => {
                op_a = self.get_operand_abs_neg_integer(
                    op_a,
                    false,
                    instr.alu_integer().negate_a(),
                    true,
                );
                op_b = self.get_operand_abs_neg_integer(
                    op_b,
                    false,
                    instr.alu_integer().negate_b(),
                    true,
                );
                let shift = immediate_u32(instr.alu_integer().shift_amount() as u32);
                let shifted_a = operation_p(
                    OperationCode::ILogicalShiftLeft,
                    NO_PRECISE,
                    vec![op_a, shift],
                );
                let value = operation_p(OperationCode::IAdd, NO_PRECISE, vec![shifted_a, op_b]);
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::POPC_C | OpId::POPC_R | OpId::POPC_IMM => {
                if instr.popc().invert() {
                    op_b = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_b]);
                }
                let value = operation_p(OperationCode::IBitCount, PRECISE, vec![op_b]);
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::FLO_R | OpId::FLO_C | OpId::FLO_IMM => {
                if instr.flo().invert() {
                    op_b = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_b]);
                }
                let mut value = if instr.flo().is_signed() {
                    operation_p(OperationCode::IBitMSB, NO_PRECISE, vec![op_b])
                } else {
                    operation_p(OperationCode::UBitMSB, NO_PRECISE, vec![op_b])
                };
                if instr.flo().sh() {
                    value = operation_p(
                        OperationCode::UBitwiseXor,
                        NO_PRECISE,
                        vec![value, immediate_u32(31)],
                    );
                }
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::SEL_C | OpId::SEL_R | OpId::SEL_IMM => {
                let condition =
                    self.get_predicate(instr.sel().pred() as u32, instr.sel().neg_pred());
                let value = operation_p(
                    OperationCode::Select,
                    PRECISE,
                    vec![condition, op_a, op_b],
                );
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::ICMP_CR | OpId::ICMP_R | OpId::ICMP_RC | OpId::ICMP_IMM => {
                let zero = immediate_u32(0);
                let (op_rhs, test) = match matcher.id() {
                    OpId::ICMP_CR => (
                        self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                        self.get_register(instr.gpr39()),
                    ),
                    OpId::ICMP_R => (
                        self.get_register(instr.gpr20()),
                        self.get_register(instr.gpr39()),
                    ),
                    OpId::ICMP_RC => (
                        self.get_register(instr.gpr39()),
                        self.get_const_buffer(instr.cbuf34().index(), instr.cbuf34().offset()),
                    ),
                    _ => (
                        crate::node_helper::immediate_s32(instr.alu().signed_imm20_20()),
                        self.get_register(instr.gpr39()),
                    ),
                };
                let op_lhs = self.get_register(instr.gpr8());
                let cond = instr
                    .icmp()
                    .cond()
                    .unwrap_or(crate::inst::PredCondition::Equal);
                let comparison = self.get_predicate_comparison_integer(
                    cond,
                    instr.icmp().is_signed(),
                    test,
                    zero,
                );
                let value = operation(OperationCode::Select, vec![comparison, op_lhs, op_rhs]);
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::LOP_C | OpId::LOP_R | OpId::LOP_IMM => {
                if instr.lop().invert_a() {
                    op_a = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_a]);
                }
                if instr.lop().invert_b() {
                    op_b = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_b]);
                }
                let logic_op = instr.lop().operation().unwrap_or(LogicOperation::And);
                let pred_mode = instr
                    .lop()
                    .pred_result_mode()
                    .unwrap_or(PredicateResultMode::None);
                self.write_logic_operation(
                    bb,
                    instr.gpr0(),
                    logic_op,
                    op_a,
                    op_b,
                    pred_mode,
                    instr.lop().pred48() as u32,
                    instr.generates_cc(),
                );
            }
            OpId::LOP3_C | OpId::LOP3_R | OpId::LOP3_IMM => {
                let op_c = self.get_register(instr.gpr39());
                let lut = if matcher.id() == OpId::LOP3_R {
                    instr.lop3().imm_lut28() as u32
                } else {
                    instr.lop3().imm_lut48() as u32
                };
                self.write_lop3_instruction(bb, instr.gpr0(), op_a, op_b, op_c, lut, instr.generates_cc());
            }
            OpId::IMNMX_C | OpId::IMNMX_R | OpId::IMNMX_IMM => {
                if instr.imnmx().exchange() != Some(IMinMaxExchange::None) {
                    warn!("IMNMX exchange mode not implemented");
                }
                let is_signed = instr.imnmx().is_signed();
                let condition =
                    self.get_predicate(instr.imnmx().pred() as u32, instr.imnmx().negate_pred());
                let min = signed_operation(
                    OperationCode::IMin,
                    is_signed,
                    vec![op_a.clone(), op_b.clone()],
                );
                let max = signed_operation(OperationCode::IMax, is_signed, vec![op_a, op_b]);
                let value = operation_p(
                    OperationCode::Select,
                    NO_PRECISE,
                    vec![condition, min, max],
                );
                self.set_internal_flags_from_integer(bb, value.clone(), instr.generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::LEA_R2 | OpId::LEA_R1 | OpId::LEA_IMM | OpId::LEA_RZ | OpId::LEA_HI => {
                let lea = instr.lea();
                let (op_a, op_b, op_c) = match matcher.id() {
                    OpId::LEA_R2 => (
                        self.get_register(instr.gpr20()),
                        self.get_register(instr.gpr39()),
                        immediate_u32(lea.r2_entry_a() as u32),
                    ),
                    OpId::LEA_R1 => {
                        let neg = (instr.0 >> 45) & 1 != 0;
                        let reg = self.get_register(instr.gpr8());
                        (
                            self.get_operand_abs_neg_integer(reg, false, neg, true),
                            self.get_register(instr.gpr20()),
                            immediate_u32(lea.r1_entry_a() as u32),
                        )
                    }
                    OpId::LEA_IMM => {
                        let neg = (instr.0 >> 45) & 1 != 0;
                        let reg = self.get_register(instr.gpr8());
                        (
                            immediate_u32(lea.imm_entry_a() as u32),
                            self.get_operand_abs_neg_integer(reg, false, neg, true),
                            immediate_u32(lea.imm_entry_b() as u32),
                        )
                    }
                    OpId::LEA_RZ => {
                        let neg = (instr.0 >> 56) & 1 != 0;
                        let cbuf =
                            self.get_const_buffer(lea.hi_cb_index(), lea.hi_cb_offset());
                        let reg = self.get_register(instr.gpr8());
                        (
                            cbuf,
                            self.get_operand_abs_neg_integer(reg, false, neg, true),
                            immediate_u32(lea.rz_entry_a() as u32),
                        )
                    }
                    _ => {
                        warn!("Unhandled LEA subinstruction: {}", matcher.name());
                        (
                            immediate_u32(lea.imm_entry_a() as u32),
                            self.get_register(instr.gpr8()),
                            immediate_u32(lea.imm_entry_b() as u32),
                        )
                    }
                };
                let shifted_c = operation_p(
                    OperationCode::ILogicalShiftLeft,
                    NO_PRECISE,
                    vec![immediate_u32(1), op_c],
                );
                let mul_bc = operation_p(OperationCode::IMul, NO_PRECISE, vec![op_b, shifted_c]);
                let value = operation_p(OperationCode::IAdd, NO_PRECISE, vec![op_a, mul_bc]);
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!(
                    "Unhandled ArithmeticInteger instruction: {}",
                    matcher.name()
                );
            }
        }
        pc
    }

    pub(crate) fn decode_arithmetic_integer_immediate(
        &mut self,
        bb: &mut NodeBlock,
        pc: u32,
    ) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        let mut op_a = self.get_register(instr.gpr8());
        let op_b = self.get_immediate32(instr);

        match matcher.id() {
            OpId::IADD32I => {
                if instr.iadd32i().saturate() {
                    warn!("IADD32I saturation not implemented");
                }
                op_a = self.get_operand_abs_neg_integer(
                    op_a,
                    false,
                    instr.iadd32i().negate_a(),
                    true,
                );
                let value = operation_p(OperationCode::IAdd, PRECISE, vec![op_a, op_b]);
                self.set_internal_flags_from_integer(bb, value.clone(), instr.op_32().generates_cc());
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::LOP32I => {
                let mut op_a = op_a;
                let mut op_b = op_b;
                if instr.lop32i().invert_a() {
                    op_a = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_a]);
                }
                if instr.lop32i().invert_b() {
                    op_b = operation_p(OperationCode::IBitwiseNot, NO_PRECISE, vec![op_b]);
                }
                let logic_op = instr.lop32i().operation().unwrap_or(LogicOperation::And);
                self.write_logic_operation(
                    bb,
                    instr.gpr0(),
                    logic_op,
                    op_a,
                    op_b,
                    PredicateResultMode::None,
                    Pred::UNUSED_INDEX,
                    instr.op_32().generates_cc(),
                );
            }
            _ => {
                warn!(
                    "Unhandled ArithmeticIntegerImmediate instruction: {}",
                    matcher.name()
                );
            }
        }
        pc
    }

    pub(crate) fn write_logic_operation(
        &mut self,
        bb: &mut NodeBlock,
        dest: Register,
        logic_op: LogicOperation,
        op_a: Node,
        op_b: Node,
        predicate_mode: PredicateResultMode,
        predicate: u32,
        sets_cc: bool,
    ) {
        let result = match logic_op {
            LogicOperation::And => {
                operation_p(OperationCode::IBitwiseAnd, PRECISE, vec![op_a, op_b])
            }
            LogicOperation::Or => operation_p(OperationCode::IBitwiseOr, PRECISE, vec![op_a, op_b]),
            LogicOperation::Xor => {
                operation_p(OperationCode::IBitwiseXor, PRECISE, vec![op_a, op_b])
            }
            LogicOperation::PassB => op_b,
        };
        self.set_internal_flags_from_integer(bb, result.clone(), sets_cc);
        self.set_register(bb, dest, result.clone());

        match predicate_mode {
            PredicateResultMode::None => {}
            PredicateResultMode::NotZero => {
                // Set the predicate to true when the result is non-zero.
                let compare = operation(
                    OperationCode::LogicalINotEqual,
                    vec![result, immediate_u32(0)],
                );
                if predicate != Pred::UNUSED_INDEX {
                    self.set_predicate(bb, u64::from(predicate), compare);
                }
            }
        }
    }

    pub(crate) fn write_lop3_instruction(
        &mut self,
        bb: &mut NodeBlock,
        dest: Register,
        op_a: Node,
        op_b: Node,
        op_c: Node,
        imm_lut: u32,
        sets_cc: bool,
    ) {
        // A 3-input LUT: OR together the minterms the immediate selects.
        let mut value = immediate_u32(0);
        for i in 0..8u32 {
            if imm_lut & (1 << i) == 0 {
                continue;
            }
            let pick = |selected: bool, node: &Node| {
                if selected {
                    node.clone()
                } else {
                    operation(OperationCode::IBitwiseNot, vec![node.clone()])
                }
            };
            let a = pick(i & 4 != 0, &op_a);
            let b = pick(i & 2 != 0, &op_b);
            let c = pick(i & 1 != 0, &op_c);
            let mut r = operation_p(OperationCode::IBitwiseAnd, NO_PRECISE, vec![a, b]);
            r = operation_p(OperationCode::IBitwiseAnd, NO_PRECISE, vec![r, c]);
            value = operation(OperationCode::IBitwiseOr, vec![value, r]);
        }
        self.set_internal_flags_from_integer(bb, value.clone(), sets_cc);
        self.set_register(bb, dest, value);
    }
}
