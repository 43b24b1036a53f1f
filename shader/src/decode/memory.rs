//! Attribute, constant, local/shared and global memory access.

use crate::inst::{AtomicOp, AttributeIndex, Instruction, Register, StoreType, UniformType};
use crate::node::{
    GlobalMemoryBase, Node, NodeBlock, NodeData, OperationCode, NO_PRECISE,
};
use crate::node_helper::{
    comment, immediate_f32, immediate_s32, immediate_u32, make_node, operation, operation_p,
};
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

fn is_unaligned(uniform_type: UniformType) -> bool {
    uniform_type == UniformType::UnsignedByte || uniform_type == UniformType::UnsignedShort
}

fn unaligned_mask(uniform_type: UniformType) -> u32 {
    match uniform_type {
        UniformType::UnsignedByte => 0b11,
        UniformType::UnsignedShort => 0b10,
        _ => 0,
    }
}

fn memory_size(uniform_type: UniformType) -> u32 {
    match uniform_type {
        UniformType::UnsignedByte | UniformType::SignedByte => 8,
        UniformType::UnsignedShort | UniformType::SignedShort => 16,
        UniformType::Single => 32,
        UniformType::Double => 64,
        UniformType::Quad | UniformType::UnsignedQuad => 128,
    }
}

/// Reads the addressed bits out of a 32-bit aligned load.
fn extract_unaligned(value: Node, address: Node, mask: u32, size: u32) -> Node {
    let offset = operation(
        OperationCode::UBitwiseAnd,
        vec![address, immediate_u32(mask)],
    );
    let offset = operation(
        OperationCode::ULogicalShiftLeft,
        vec![offset, immediate_u32(3)],
    );
    operation(
        OperationCode::UBitfieldExtract,
        vec![value, offset, immediate_u32(size)],
    )
}

/// Writes the addressed bits into a 32-bit aligned location.
fn insert_unaligned(dest: Node, value: Node, address: Node, mask: u32, size: u32) -> Node {
    let offset = operation(
        OperationCode::UBitwiseAnd,
        vec![address, immediate_u32(mask)],
    );
    let offset = operation(
        OperationCode::ULogicalShiftLeft,
        vec![offset, immediate_u32(3)],
    );
    operation(
        OperationCode::UBitfieldInsert,
        vec![dest, value, offset, immediate_u32(size)],
    )
}

fn sign16_extend(value: Node) -> Node {
    let sign = operation(
        OperationCode::UBitwiseAnd,
        vec![value.clone(), immediate_u32(1 << 15)],
    );
    let is_sign = operation(
        OperationCode::LogicalUEqual,
        vec![sign, immediate_u32(1 << 15)],
    );
    let extend = operation(
        OperationCode::Select,
        vec![is_sign, immediate_u32(0xFFFF0000), immediate_u32(0)],
    );
    operation(OperationCode::UBitwiseOr, vec![value, extend])
}

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_memory(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        match matcher.id() {
            OpId::LD_A => {
                if !instr.gpr8().is_zero() {
                    warn!("Indirect attribute loads are not supported");
                }
                let attr = instr.attribute20();
                let buffer = self.get_register(instr.gpr39());
                let mut next_element = attr.element();
                let mut next_index = attr.index_raw();

                let num_words = attr.size() as u32 + 1;
                for reg_offset in 0..num_words {
                    let attribute = if attr.is_physical() {
                        self.get_physical_input_attribute(instr.gpr8(), Some(buffer.clone()))
                    } else {
                        let index = AttributeIndex::from_bits(next_index);
                        self.get_input_attribute(
                            index,
                            next_element as u32,
                            Some(buffer.clone()),
                        )
                    };
                    self.set_register(
                        bb,
                        Register(instr.gpr0().0 + reg_offset),
                        attribute,
                    );
                    // Elements beyond the vec4 wrap into the next index.
                    next_element = (next_element + 1) % 4;
                    if next_element == 0 {
                        next_index += 1;
                    }
                }
            }
            OpId::LD_C => {
                let index = self.get_register(instr.gpr8());
                let op_a = self.get_const_buffer_indirect(
                    instr.cbuf36().index(),
                    instr.cbuf36().offset() as u64,
                    index.clone(),
                );
                match instr.ld_c().uniform_type() {
                    Some(UniformType::Single) | None => {
                        self.set_register(bb, instr.gpr0(), op_a);
                    }
                    Some(UniformType::Double) => {
                        let op_b = self.get_const_buffer_indirect(
                            instr.cbuf36().index(),
                            instr.cbuf36().offset() as u64 + 4,
                            index,
                        );
                        self.set_temporary(bb, 0, op_a);
                        self.set_temporary(bb, 1, op_b);
                        let t0 = self.get_temporary(0);
                        let t1 = self.get_temporary(1);
                        self.set_register(bb, instr.gpr0(), t0);
                        self.set_register(bb, Register(instr.gpr0().0 + 1), t1);
                    }
                    Some(other) => {
                        warn!("Unhandled LD_C type: {:?}", other);
                    }
                }
            }
            OpId::LD_L | OpId::LD_S => {
                let is_shared = matcher.id() == OpId::LD_S;
                let get_address = |ir: &mut ShaderIr, offset: i32| {
                    let immediate =
                        immediate_s32(instr.smem_imm() as i32 + offset);
                    let base = ir.get_register(instr.gpr8());
                    operation(OperationCode::IAdd, vec![base, immediate])
                };
                let get_memory = |ir: &mut ShaderIr, offset: i32| {
                    let address = get_address(ir, offset);
                    if is_shared {
                        ir.get_shared_memory(address)
                    } else {
                        ir.get_local_memory(address)
                    }
                };
                match instr.ldst_sl().store_type() {
                    Some(StoreType::Signed16) => {
                        let mem = get_memory(self, 0);
                        let address = get_address(self, 0);
                        let value =
                            sign16_extend(extract_unaligned(mem, address, 0b10, 16));
                        self.set_register(bb, instr.gpr0(), value);
                    }
                    Some(StoreType::Bits32) | Some(StoreType::Bits64)
                    | Some(StoreType::Bits128) => {
                        let count = match instr.ldst_sl().store_type() {
                            Some(StoreType::Bits32) => 1,
                            Some(StoreType::Bits64) => 2,
                            _ => 4,
                        };
                        for i in 0..count {
                            let mem = get_memory(self, i * 4);
                            self.set_temporary(bb, i as u32, mem);
                        }
                        for i in 0..count {
                            let tmp = self.get_temporary(i as u32);
                            self.set_register(bb, Register(instr.gpr0().0 + i as u32), tmp);
                        }
                    }
                    other => {
                        warn!("{} unhandled type: {:?}", matcher.name(), other);
                    }
                }
            }
            OpId::LD | OpId::LDG => {
                let uniform_type = instr
                    .ldg()
                    .uniform_type()
                    .unwrap_or(UniformType::Single);
                let tracked = self.track_global_memory(bb, instr, true, false);
                let size = memory_size(uniform_type);
                let count = (size + 31) / 32;
                let (real_address_base, base_address, descriptor) = match tracked {
                    Some(parts) => parts,
                    None => {
                        // Tracking failed, load zeroes.
                        for i in 0..count {
                            self.set_register(
                                bb,
                                Register(instr.gpr0().0 + i),
                                immediate_f32(0.0),
                            );
                        }
                        return pc;
                    }
                };
                for i in 0..count {
                    let it_offset = immediate_u32(i * 4);
                    let real_address = operation(
                        OperationCode::UAdd,
                        vec![real_address_base.clone(), it_offset],
                    );
                    let mut gmem = make_node(NodeData::Gmem {
                        real_address: real_address.clone(),
                        base_address: base_address.clone(),
                        base: descriptor,
                    });
                    if is_unaligned(uniform_type) {
                        let mask = unaligned_mask(uniform_type);
                        gmem = extract_unaligned(gmem, real_address, mask, size);
                    }
                    self.set_temporary(bb, i, gmem);
                }
                for i in 0..count {
                    let tmp = self.get_temporary(i);
                    self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
                }
            }
            OpId::ST_A => {
                if !instr.gpr8().is_zero() {
                    warn!("Indirect attribute stores are not supported");
                }
                let attr = instr.attribute20();
                let mut element = attr.element();
                let mut index = attr.index_raw();
                let num_words = attr.size() as u32 + 1;
                for reg_offset in 0..num_words {
                    let dest = if attr.patch() {
                        let offset = index as u32 * 4 + element as u32;
                        make_node(NodeData::Patch { offset })
                    } else {
                        let buffer = self.get_register(instr.gpr39());
                        self.get_output_attribute(
                            AttributeIndex::from_bits(index),
                            element as u32,
                            Some(buffer),
                        )
                    };
                    let src = self.get_register(Register(instr.gpr0().0 + reg_offset));
                    bb.push(operation(OperationCode::Assign, vec![dest, src]));
                    element = (element + 1) % 4;
                    if element == 0 {
                        index += 1;
                    }
                }
            }
            OpId::ST_L | OpId::ST_S => {
                let is_local = matcher.id() == OpId::ST_L;
                let get_address = |ir: &mut ShaderIr, offset: i32| {
                    let immediate =
                        immediate_s32(instr.smem_imm() as i32 + offset);
                    let base = ir.get_register(instr.gpr8());
                    operation_p(OperationCode::IAdd, NO_PRECISE, vec![base, immediate])
                };
                let mut store = |ir: &mut ShaderIr,
                                 bb: &mut NodeBlock,
                                 offset: i32,
                                 reg_offset: u32| {
                    let address = get_address(ir, offset);
                    let value = ir.get_register(Register(instr.gpr0().0 + reg_offset));
                    if is_local {
                        ir.set_local_memory(bb, address, value);
                    } else {
                        ir.set_shared_memory(bb, address, value);
                    }
                };
                match instr.ldst_sl().store_type() {
                    Some(StoreType::Bits128) => {
                        store(self, bb, 12, 3);
                        store(self, bb, 8, 2);
                        store(self, bb, 4, 1);
                        store(self, bb, 0, 0);
                    }
                    Some(StoreType::Bits64) => {
                        store(self, bb, 4, 1);
                        store(self, bb, 0, 0);
                    }
                    Some(StoreType::Bits32) => {
                        store(self, bb, 0, 0);
                    }
                    Some(StoreType::Signed16) => {
                        let address = get_address(self, 0);
                        let memory = if is_local {
                            self.get_local_memory(address.clone())
                        } else {
                            self.get_shared_memory(address.clone())
                        };
                        let value = self.get_register(instr.gpr0());
                        let inserted =
                            insert_unaligned(memory, value, address.clone(), 0b10, 16);
                        if is_local {
                            self.set_local_memory(bb, address, inserted);
                        } else {
                            self.set_shared_memory(bb, address, inserted);
                        }
                    }
                    other => {
                        warn!("{} unhandled type: {:?}", matcher.name(), other);
                    }
                }
            }
            OpId::ST | OpId::STG => {
                let uniform_type = instr
                    .stg()
                    .uniform_type()
                    .unwrap_or(UniformType::Single);
                // Unaligned writes read back the aligned word first.
                let is_read = is_unaligned(uniform_type);
                let tracked = self.track_global_memory(bb, instr, is_read, true);
                let (real_address_base, base_address, descriptor) = match tracked {
                    Some(parts) => parts,
                    None => return pc,
                };
                let size = memory_size(uniform_type);
                let count = (size + 31) / 32;
                for i in 0..count {
                    let it_offset = immediate_u32(i * 4);
                    let real_address = operation(
                        OperationCode::UAdd,
                        vec![real_address_base.clone(), it_offset],
                    );
                    let gmem = make_node(NodeData::Gmem {
                        real_address: real_address.clone(),
                        base_address: base_address.clone(),
                        base: descriptor,
                    });
                    let mut value = self.get_register(Register(instr.gpr0().0 + i));
                    if is_unaligned(uniform_type) {
                        let mask = unaligned_mask(uniform_type);
                        value =
                            insert_unaligned(gmem.clone(), value, real_address, mask, size);
                    }
                    bb.push(operation(OperationCode::Assign, vec![gmem, value]));
                }
            }
            OpId::ATOM => {
                let operation_kind = instr.atom().operation();
                if operation_kind != Some(AtomicOp::Add) {
                    warn!("ATOM operation {:?} approximated as add", operation_kind);
                }
                let tracked = self.track_global_memory(bb, instr, true, true);
                let (real_address, base_address, descriptor) = match tracked {
                    Some(parts) => parts,
                    None => return pc,
                };
                let gmem = make_node(NodeData::Gmem {
                    real_address,
                    base_address,
                    base: descriptor,
                });
                let data = self.get_register(instr.gpr20());
                let code = atomic_operation_code(operation_kind.unwrap_or(AtomicOp::Add));
                let value = operation(code, vec![gmem, data]);
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::ATOMS => {
                let operation_kind = instr.atoms().operation();
                let offset = instr.atoms().immediate_offset();
                let address = self.get_register(instr.gpr8());
                let address = operation(
                    OperationCode::IAdd,
                    vec![address, immediate_s32(offset)],
                );
                let memory = self.get_shared_memory(address);
                let data = self.get_register(instr.gpr20());
                let code = atomic_operation_code(operation_kind.unwrap_or(AtomicOp::Add));
                let value = operation(code, vec![memory, data]);
                self.set_register(bb, instr.gpr0(), value);
            }
            OpId::AL2P => {
                // Calculate the fake physical address used for emulation.
                let fixed_address = immediate_u32(instr.al2p().address() as u32);
                let reg = self.get_register(instr.gpr8());
                let fake_address = operation_p(
                    OperationCode::IAdd,
                    NO_PRECISE,
                    vec![reg, fixed_address],
                );
                self.set_register(bb, instr.gpr0(), fake_address);
                self.uses_physical_attributes = true;
            }
            _ => {
                warn!("Unhandled memory instruction: {}", matcher.name());
            }
        }
        pc
    }

    fn track_global_memory(
        &mut self,
        bb: &mut NodeBlock,
        instr: Instruction,
        is_read: bool,
        is_write: bool,
    ) -> Option<(Node, Node, GlobalMemoryBase)> {
        let addr_register = self.get_register(instr.gmem().gpr());
        let immediate_offset = instr.gmem().offset() as u32;

        let tracked =
            self.track_cbuf(&addr_register, &self.global_code, self.global_code.len() as i64);
        let (base_address, index, offset) = match tracked {
            Some(parts) => parts,
            None => {
                warn!("Global memory tracking failed");
                return None;
            }
        };

        bb.push(comment(format!(
            "Base address is c[0x{:x}][0x{:x}]",
            index, offset
        )));

        let descriptor = GlobalMemoryBase {
            cbuf_index: index,
            cbuf_offset: offset,
        };
        let usage = self.used_global_memory.entry(descriptor).or_default();
        usage.is_written |= is_write;
        usage.is_read |= is_read;

        let real_address = operation_p(
            OperationCode::UAdd,
            NO_PRECISE,
            vec![immediate_u32(immediate_offset), addr_register],
        );
        Some((real_address, base_address, descriptor))
    }
}

fn atomic_operation_code(op: AtomicOp) -> OperationCode {
    match op {
        AtomicOp::Add | AtomicOp::Inc | AtomicOp::Dec => OperationCode::AtomicAdd,
        AtomicOp::Min => OperationCode::AtomicMin,
        AtomicOp::Max => OperationCode::AtomicMax,
        AtomicOp::And => OperationCode::AtomicAnd,
        AtomicOp::Or => OperationCode::AtomicOr,
        AtomicOp::Xor => OperationCode::AtomicXor,
        AtomicOp::Exch => OperationCode::AtomicExchange,
    }
}
