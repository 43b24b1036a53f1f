//! Shader IR construction.
//!
//! Drives control-flow reconstruction, walks every basic block through
//! the per-family lowering in `decode/`, and accumulates the resource
//! usage the host side needs for reflection.

use crate::ast::AstManager;
use crate::control_flow::{self, BranchData, BranchTarget, Condition, ShaderCharacteristics};
use crate::header::Header;
use crate::inst::{
    AttributeIndex, ConditionCode, HalfType, ImageType, Instruction, Pred, PredCondition,
    PredOperation, Register, TextureType,
};
use crate::node::{
    GlobalMemoryBase, GlobalMemoryUsage, Image, InternalFlag, Meta, MetaStackClass, Node,
    NodeBlock, NodeData, OperationCode, Sampler,
};
use crate::node_helper::{
    comment, conditional, immediate_f32, immediate_u32, make_node, operation, operation_meta,
    signed_operation,
};
use crate::opcode::{self, OpType};
use crate::registry::{GuestDriverProfile, Registry, SamplerDescriptor};
use crate::settings::{CompileDepth, CompilerSettings};
use crate::{ShaderStage, MAX_PROGRAM_LENGTH};
use std::collections::{BTreeMap, BTreeSet};

pub const MAX_REGISTERS: u32 = 256;
pub const MAX_CONSTBUFFER_SIZE: u32 = 0x10000;

/// Constant-buffer usage accumulated during lowering.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConstBuffer {
    max_offset: u32,
    is_indirect: bool,
}

impl ConstBuffer {
    pub fn mark_as_used(&mut self, offset: u32) {
        self.max_offset = self.max_offset.max(offset);
    }

    pub fn mark_as_used_indirect(&mut self) {
        self.is_indirect = true;
    }

    pub fn is_indirect(&self) -> bool {
        self.is_indirect
    }

    pub fn size(&self) -> u32 {
        if self.is_indirect {
            MAX_CONSTBUFFER_SIZE
        } else {
            self.max_offset + 4
        }
    }

    pub fn max_offset(&self) -> u32 {
        self.max_offset
    }
}

/// Partially known sampler metadata; holes are filled from the registry.
#[derive(Copy, Clone, Debug, Default)]
pub struct SamplerInfo {
    pub texture_type: Option<TextureType>,
    pub is_array: Option<bool>,
    pub is_shadow: Option<bool>,
    pub is_buffer: Option<bool>,
}

impl SamplerInfo {
    fn merge(self, descriptor: Option<SamplerDescriptor>) -> SamplerInfo {
        let descriptor = match descriptor {
            Some(descriptor) => descriptor,
            None => return self,
        };
        SamplerInfo {
            texture_type: self.texture_type.or(descriptor.texture_type),
            is_array: self.is_array.or(Some(descriptor.is_array)),
            is_shadow: self.is_shadow.or(Some(descriptor.is_shadow)),
            is_buffer: self.is_buffer.or(Some(descriptor.is_buffer)),
        }
    }
}

pub struct ShaderIr<'r> {
    pub(crate) program_code: Vec<u64>,
    pub(crate) main_offset: u32,
    pub(crate) settings: CompilerSettings,
    pub(crate) registry: &'r dyn Registry,
    pub(crate) stage: ShaderStage,
    pub(crate) header: Header,

    pub(crate) basic_blocks: BTreeMap<u32, NodeBlock>,
    pub(crate) global_code: NodeBlock,
    pub(crate) program_manager: Option<AstManager>,
    pub(crate) decompiled: bool,
    pub(crate) disable_flow_stack: bool,
    pub(crate) coverage_begin: u32,
    pub(crate) coverage_end: u32,

    pub(crate) used_registers: BTreeSet<u32>,
    pub(crate) used_predicates: BTreeSet<u32>,
    pub(crate) used_input_attributes: BTreeSet<AttributeIndex>,
    pub(crate) used_output_attributes: BTreeSet<AttributeIndex>,
    pub(crate) used_cbufs: BTreeMap<u32, ConstBuffer>,
    pub(crate) used_samplers: Vec<Sampler>,
    pub(crate) used_images: Vec<Image>,
    pub(crate) used_global_memory: BTreeMap<GlobalMemoryBase, GlobalMemoryUsage>,
    pub(crate) used_clip_distances: [bool; 8],
    pub(crate) used_internal_flags: [bool; 4],

    pub(crate) uses_layer: bool,
    pub(crate) uses_viewport_index: bool,
    pub(crate) uses_point_size: bool,
    pub(crate) uses_physical_attributes: bool,
    pub(crate) uses_instance_id: bool,
    pub(crate) uses_vertex_id: bool,
    pub(crate) uses_warps: bool,
    pub(crate) uses_indexed_samplers: bool,
    pub(crate) uses_double: bool,
    pub(crate) uses_half: bool,

    pub(crate) amend_code: Vec<Node>,
    pub(crate) num_custom_variables: u32,
    pub(crate) driver: GuestDriverProfile,
}

impl<'r> ShaderIr<'r> {
    /// Translates a raw program into IR. Reconstruction failures
    /// degrade the compile depth, so this never fails outright.
    pub fn decode(
        program_code: Vec<u64>,
        main_offset: u32,
        settings: CompilerSettings,
        registry: &'r dyn Registry,
        stage: ShaderStage,
    ) -> ShaderIr<'r> {
        let header = Header::parse(&program_code);
        let driver = registry.guest_driver();
        let mut ir = ShaderIr {
            program_code,
            main_offset,
            settings,
            registry,
            stage,
            header,
            basic_blocks: BTreeMap::new(),
            global_code: Vec::new(),
            program_manager: None,
            decompiled: false,
            disable_flow_stack: false,
            coverage_begin: 0,
            coverage_end: 0,
            used_registers: BTreeSet::new(),
            used_predicates: BTreeSet::new(),
            used_input_attributes: BTreeSet::new(),
            used_output_attributes: BTreeSet::new(),
            used_cbufs: BTreeMap::new(),
            used_samplers: Vec::new(),
            used_images: Vec::new(),
            used_global_memory: BTreeMap::new(),
            used_clip_distances: [false; 8],
            used_internal_flags: [false; 4],
            uses_layer: false,
            uses_viewport_index: false,
            uses_point_size: false,
            uses_physical_attributes: false,
            uses_instance_id: false,
            uses_vertex_id: false,
            uses_warps: false,
            uses_indexed_samplers: false,
            uses_double: false,
            uses_half: false,
            amend_code: Vec::new(),
            num_custom_variables: 0,
            driver,
        };
        ir.run_decode();
        ir.post_decode();
        ir
    }

    fn run_decode(&mut self) {
        let settings = self.settings;
        let info: ShaderCharacteristics = control_flow::scan_flow(
            &self.program_code,
            self.main_offset,
            &settings,
            self.registry,
        );
        self.coverage_begin = info.start;
        self.coverage_end = info.end;
        if settings.depth != info.depth {
            warn!(
                "Decompiling to \"{}\" failed, downgrading to \"{}\"",
                settings.depth.name(),
                info.depth.name()
            );
        }
        match info.depth {
            CompileDepth::FlowStack => {
                for block in &info.blocks {
                    let nodes = self.decode_range(block.start, block.end + 1);
                    self.basic_blocks.insert(block.start, nodes);
                }
            }
            CompileDepth::NoFlowStack => {
                self.disable_flow_stack = true;
                let exit_label = u32::max_value();
                let mut current_block = Vec::new();
                let mut current_label = exit_label;
                for block in &info.blocks {
                    if info.labels.contains(&block.start) {
                        if current_label != exit_label {
                            self.basic_blocks
                                .insert(current_label, std::mem::take(&mut current_block));
                        } else {
                            current_block.clear();
                        }
                        current_label = block.start;
                    }
                    match &block.branch {
                        Some(branch) => {
                            self.decode_range_inner(&mut current_block, block.start, block.end);
                            self.insert_control_flow(&mut current_block, branch);
                        }
                        None => {
                            self.decode_range_inner(&mut current_block, block.start, block.end + 1);
                        }
                    }
                }
                if current_label != exit_label {
                    self.basic_blocks.insert(current_label, current_block);
                }
            }
            CompileDepth::DecompileBackwards | CompileDepth::FullDecompile => {
                let mut manager = info.manager.expect("decompiled scan must carry an AST");
                if manager.has_gotos() {
                    // Forward gotos survive backward-only decompilation;
                    // the emitter cannot express them, so step down.
                    warn!("Residual gotos after decompilation, dropping the flow stack instead");
                    self.settings.depth = CompileDepth::NoFlowStack;
                    return self.run_decode();
                }
                self.disable_flow_stack = true;
                self.decompiled = true;
                // Two-phase to keep the borrow of the manager out of the
                // lowering calls.
                let ranges = manager.encoded_ranges();
                let blocks: Vec<NodeBlock> = ranges
                    .iter()
                    .map(|&(start, end)| self.decode_range(start, end))
                    .collect();
                let mut iter = blocks.into_iter();
                manager.decode_blocks(|_, _| iter.next().unwrap_or_default());
                self.program_manager = Some(manager);
            }
            CompileDepth::BruteForce => {
                let shader_end = self.program_code.len() as u32;
                self.coverage_begin = self.main_offset;
                self.coverage_end = shader_end;
                for label in self.main_offset..shader_end {
                    let nodes = self.decode_range(label, label + 1);
                    self.basic_blocks.insert(label, nodes);
                }
            }
        }
    }

    pub(crate) fn decode_range(&mut self, begin: u32, end: u32) -> NodeBlock {
        let mut block = Vec::new();
        self.decode_range_inner(&mut block, begin, end);
        block
    }

    fn decode_range_inner(&mut self, bb: &mut NodeBlock, begin: u32, end: u32) {
        let limit = if begin > end { MAX_PROGRAM_LENGTH } else { end };
        let mut pc = begin;
        while pc < limit {
            pc = self.decode_instr(bb, pc);
        }
    }

    fn insert_control_flow(&mut self, bb: &mut NodeBlock, branch: &BranchData) {
        let apply_conditions = |ir: &mut ShaderIr, cond: &Condition, n: Node| -> Node {
            let mut result = n;
            if cond.cc != ConditionCode::T {
                let cc = ir.get_condition_code(cond.cc);
                result = conditional(cc, vec![result]);
            }
            if cond.predicate != Pred::UNUSED_INDEX {
                let mut pred = cond.predicate;
                let is_neg = pred > 7;
                if is_neg {
                    pred -= 8;
                }
                result = conditional(ir.get_predicate(pred, is_neg), vec![result]);
            }
            result
        };
        match branch {
            BranchData::Single(single) => {
                let op = match single.address {
                    BranchTarget::Pc(address) => {
                        operation(OperationCode::Branch, vec![immediate_u32(address)])
                    }
                    _ if single.kill => operation(OperationCode::Discard, vec![]),
                    _ => operation(OperationCode::Exit, vec![]),
                };
                let node = apply_conditions(self, &single.condition, op);
                bb.push(node.clone());
                self.global_code.push(node);
            }
            BranchData::Multi(multi) => {
                let op_a = self.get_register(Register(multi.gpr));
                for case in &multi.branches {
                    let branch_op =
                        operation(OperationCode::Branch, vec![immediate_u32(case.address)]);
                    let op_b = immediate_u32(case.cmp_value);
                    let condition_node = self.get_predicate_comparison_integer(
                        PredCondition::Equal,
                        false,
                        op_a.clone(),
                        op_b,
                    );
                    let result = conditional(condition_node, vec![branch_op]);
                    bb.push(result.clone());
                    self.global_code.push(result);
                }
            }
        }
    }

    fn decode_instr(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        // Sched instructions carry no semantics for code generation.
        if control_flow::is_sched_instruction(pc, self.main_offset) {
            return pc + 1;
        }
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = match opcode::decode(instr) {
            Some(matcher) => matcher,
            None => {
                warn!("Unhandled instruction: {:#018x}", instr.0);
                bb.push(comment(format!(
                    "{:05x} Unimplemented Shader instruction ({:#018x})",
                    pc, instr.0
                )));
                return pc + 1;
            }
        };
        bb.push(comment(format!(
            "{:05x} {} ({:#018x})",
            pc,
            matcher.name(),
            instr.0
        )));

        if instr.full_pred() == Pred::NEVER_EXECUTE {
            // Statically dead; skip the whole instruction.
            return pc + 1;
        }

        let mut tmp_block = Vec::new();
        let next_pc = match matcher.op_type() {
            OpType::Arithmetic => self.decode_arithmetic(&mut tmp_block, pc),
            OpType::ArithmeticImmediate => self.decode_arithmetic_immediate(&mut tmp_block, pc),
            OpType::Bfe => self.decode_bfe(&mut tmp_block, pc),
            OpType::Bfi => self.decode_bfi(&mut tmp_block, pc),
            OpType::Shift => self.decode_shift(&mut tmp_block, pc),
            OpType::ArithmeticInteger => self.decode_arithmetic_integer(&mut tmp_block, pc),
            OpType::ArithmeticIntegerImmediate => {
                self.decode_arithmetic_integer_immediate(&mut tmp_block, pc)
            }
            OpType::ArithmeticHalf => self.decode_arithmetic_half(&mut tmp_block, pc),
            OpType::ArithmeticHalfImmediate => {
                self.decode_arithmetic_half_immediate(&mut tmp_block, pc)
            }
            OpType::Ffma => self.decode_ffma(&mut tmp_block, pc),
            OpType::Hfma2 => self.decode_hfma2(&mut tmp_block, pc),
            OpType::Conversion => self.decode_conversion(&mut tmp_block, pc),
            OpType::Warp => self.decode_warp(&mut tmp_block, pc),
            OpType::Memory => self.decode_memory(&mut tmp_block, pc),
            OpType::Texture => self.decode_texture(&mut tmp_block, pc),
            OpType::Image => self.decode_image(&mut tmp_block, pc),
            OpType::FloatSetPredicate => self.decode_float_set_predicate(&mut tmp_block, pc),
            OpType::IntegerSetPredicate => self.decode_integer_set_predicate(&mut tmp_block, pc),
            OpType::HalfSetPredicate => self.decode_half_set_predicate(&mut tmp_block, pc),
            OpType::PredicateSetRegister => self.decode_predicate_set_register(&mut tmp_block, pc),
            OpType::PredicateSetPredicate => {
                self.decode_predicate_set_predicate(&mut tmp_block, pc)
            }
            OpType::RegisterSetPredicate => self.decode_register_set_predicate(&mut tmp_block, pc),
            OpType::FloatSet => self.decode_float_set(&mut tmp_block, pc),
            OpType::IntegerSet => self.decode_integer_set(&mut tmp_block, pc),
            OpType::HalfSet => self.decode_half_set(&mut tmp_block, pc),
            OpType::Video => self.decode_video(&mut tmp_block, pc),
            OpType::Xmad => self.decode_xmad(&mut tmp_block, pc),
            _ => self.decode_other(&mut tmp_block, pc),
        };

        // Some instructions (like SSY) have no predicate field and are
        // executed unconditionally.
        let can_be_predicated = opcode::is_predicated_instruction(matcher.id());
        let pred_index = instr.pred_index();
        if can_be_predicated && instr.full_pred() != Pred::UNUSED_INDEX {
            let cond = self.get_predicate(pred_index, instr.negate_pred());
            let node = conditional(cond, tmp_block);
            self.global_code.push(node.clone());
            bb.push(node);
        } else {
            for node in tmp_block {
                self.global_code.push(node.clone());
                bb.push(node);
            }
        }

        next_pc + 1
    }

    fn post_decode(&mut self) {
        // Deduce the texture handler size from observed bound offsets.
        if !self.driver.is_texture_handler_size_known() && self.used_samplers.len() > 1 {
            let bound_offsets: Vec<u32> = self
                .used_samplers
                .iter()
                .filter(|sampler| !sampler.is_bindless())
                .map(|sampler| sampler.offset)
                .collect();
            if bound_offsets.len() > 1 {
                self.driver.deduce_texture_handler_size(bound_offsets);
            }
        }
        if !self.uses_indexed_samplers {
            return;
        }
        // Deduce each indexed sampler's array size from the next-highest
        // bound sampler offset.
        let handler_size = self.driver.texture_handler_size();
        let offsets: Vec<(u32, bool)> = self
            .used_samplers
            .iter()
            .map(|sampler| (sampler.offset, sampler.is_bindless()))
            .collect();
        for sampler in &mut self.used_samplers {
            if !sampler.is_indexed {
                continue;
            }
            let base_offset = sampler.offset;
            let max_offset = offsets
                .iter()
                .filter(|(offset, bindless)| !bindless && *offset > base_offset)
                .map(|(offset, _)| *offset)
                .min();
            match max_offset {
                Some(max_offset) => {
                    sampler.size = ((max_offset - base_offset) * 4) / handler_size;
                }
                None => {
                    error!("Failed to deduce size of indexed sampler");
                    sampler.size = 1;
                }
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Operand helpers shared by the decode families.

    pub(crate) fn get_register(&mut self, reg: Register) -> Node {
        if !reg.is_zero() {
            self.used_registers.insert(reg.0);
        }
        make_node(NodeData::Gpr(reg))
    }

    /// Temporaries live past the architectural register space.
    pub(crate) fn get_temporary(&mut self, id: u32) -> Node {
        self.get_register(Register(MAX_REGISTERS + id))
    }

    pub(crate) fn get_immediate19(&mut self, instr: Instruction) -> Node {
        immediate_u32(instr.alu().imm20_19())
    }

    pub(crate) fn get_immediate32(&mut self, instr: Instruction) -> Node {
        immediate_u32(instr.alu().imm20_32())
    }

    pub(crate) fn get_const_buffer(&mut self, index: u64, offset: u64) -> Node {
        let index = index as u32;
        let offset = offset as u32;
        self.used_cbufs
            .entry(index)
            .or_default()
            .mark_as_used(offset);
        make_node(NodeData::Cbuf {
            index,
            offset: immediate_u32(offset),
        })
    }

    pub(crate) fn get_const_buffer_indirect(
        &mut self,
        index: u64,
        offset: u64,
        node: Node,
    ) -> Node {
        let index = index as u32;
        let offset = offset as u32;
        self.used_cbufs.entry(index).or_default().mark_as_used_indirect();
        let final_offset = operation(
            OperationCode::UAdd,
            vec![node, immediate_u32(offset)],
        );
        make_node(NodeData::Cbuf {
            index,
            offset: final_offset,
        })
    }

    pub(crate) fn get_predicate(&mut self, index: u32, negated: bool) -> Node {
        if index != Pred::UNUSED_INDEX && index != Pred::NEVER_EXECUTE {
            self.used_predicates.insert(index);
        }
        make_node(NodeData::Predicate { index, negated })
    }

    pub(crate) fn get_internal_flag(&mut self, flag: InternalFlag, negated: bool) -> Node {
        self.used_internal_flags[flag as usize] = true;
        let node = make_node(NodeData::InternalFlag(flag));
        if negated {
            operation(OperationCode::LogicalNegate, vec![node])
        } else {
            node
        }
    }

    pub(crate) fn get_custom_variable(&mut self, id: u32) -> Node {
        make_node(NodeData::CustomVar(id))
    }

    pub(crate) fn new_custom_variable(&mut self) -> u32 {
        let id = self.num_custom_variables;
        self.num_custom_variables += 1;
        id
    }

    pub(crate) fn declare_amend(&mut self, node: Node) -> usize {
        self.amend_code.push(node);
        self.amend_code.len() - 1
    }

    pub(crate) fn get_local_memory(&mut self, address: Node) -> Node {
        make_node(NodeData::Lmem(address))
    }

    pub(crate) fn get_shared_memory(&mut self, address: Node) -> Node {
        make_node(NodeData::Smem(address))
    }

    pub(crate) fn set_local_memory(&mut self, bb: &mut NodeBlock, address: Node, value: Node) {
        let lmem = self.get_local_memory(address);
        bb.push(operation(OperationCode::Assign, vec![lmem, value]));
    }

    pub(crate) fn set_shared_memory(&mut self, bb: &mut NodeBlock, address: Node, value: Node) {
        let smem = self.get_shared_memory(address);
        bb.push(operation(OperationCode::Assign, vec![smem, value]));
    }

    pub(crate) fn get_input_attribute(
        &mut self,
        index: AttributeIndex,
        element: u32,
        buffer: Option<Node>,
    ) -> Node {
        self.mark_attribute_usage(index, element, false);
        self.used_input_attributes.insert(index);
        make_node(NodeData::Abuf(crate::node::AbufNode {
            index,
            element,
            buffer,
        }))
    }

    pub(crate) fn get_physical_input_attribute(
        &mut self,
        physical_address: Register,
        _buffer: Option<Node>,
    ) -> Node {
        self.uses_physical_attributes = true;
        let address = self.get_register(physical_address);
        make_node(NodeData::Abuf(crate::node::AbufNode {
            index: AttributeIndex::Unknown(0),
            element: 0,
            buffer: Some(address),
        }))
    }

    pub(crate) fn get_output_attribute(
        &mut self,
        index: AttributeIndex,
        element: u32,
        buffer: Option<Node>,
    ) -> Node {
        self.mark_attribute_usage(index, element, true);
        self.used_output_attributes.insert(index);
        make_node(NodeData::Abuf(crate::node::AbufNode {
            index,
            element,
            buffer,
        }))
    }

    fn mark_attribute_usage(&mut self, index: AttributeIndex, element: u32, is_output: bool) {
        match index {
            AttributeIndex::LayerViewportPointSize => match element {
                1 => self.uses_layer = true,
                2 => self.uses_viewport_index = true,
                3 => self.uses_point_size = true,
                _ => {}
            },
            AttributeIndex::TessCoordInstanceIdVertexId if !is_output => match element {
                2 => self.uses_instance_id = true,
                3 => self.uses_vertex_id = true,
                _ => {}
            },
            AttributeIndex::ClipDistances0123 if is_output => {
                self.used_clip_distances[element as usize] = true;
            }
            AttributeIndex::ClipDistances4567 if is_output => {
                self.used_clip_distances[element as usize + 4] = true;
            }
            _ => {}
        }
    }

    //----------------------------------------------------------------------------------------------
    // Result helpers.

    pub(crate) fn set_register(&mut self, bb: &mut NodeBlock, reg: Register, value: Node) {
        let dest = self.get_register(reg);
        bb.push(operation(OperationCode::Assign, vec![dest, value]));
    }

    pub(crate) fn set_temporary(&mut self, bb: &mut NodeBlock, id: u32, value: Node) {
        self.set_register(bb, Register(MAX_REGISTERS + id), value);
    }

    pub(crate) fn set_predicate(&mut self, bb: &mut NodeBlock, index: u64, value: Node) {
        let pred = self.get_predicate(index as u32, false);
        bb.push(operation(OperationCode::LogicalAssign, vec![pred, value]));
    }

    pub(crate) fn set_internal_flag(
        &mut self,
        bb: &mut NodeBlock,
        flag: InternalFlag,
        value: Node,
    ) {
        self.used_internal_flags[flag as usize] = true;
        let dest = make_node(NodeData::InternalFlag(flag));
        bb.push(operation(OperationCode::LogicalAssign, vec![dest, value]));
    }

    pub(crate) fn set_internal_flags_from_float(
        &mut self,
        bb: &mut NodeBlock,
        value: Node,
        sets_cc: bool,
    ) {
        if !sets_cc {
            return;
        }
        let zerop = operation(
            OperationCode::LogicalFEqual,
            vec![value, immediate_f32(0.0)],
        );
        self.set_internal_flag(bb, InternalFlag::Zero, zerop);
    }

    pub(crate) fn set_internal_flags_from_integer(
        &mut self,
        bb: &mut NodeBlock,
        value: Node,
        sets_cc: bool,
    ) {
        if !sets_cc {
            return;
        }
        let zerop = operation(OperationCode::LogicalIEqual, vec![value, immediate_u32(0)]);
        self.set_internal_flag(bb, InternalFlag::Zero, zerop);
    }

    //----------------------------------------------------------------------------------------------
    // Value adjustment helpers.

    pub(crate) fn get_operand_abs_neg_float(&mut self, value: Node, absolute: bool, negate: bool) -> Node {
        let mut value = value;
        if absolute {
            value = operation(OperationCode::FAbsolute, vec![value]);
        }
        if negate {
            value = operation(OperationCode::FNegate, vec![value]);
        }
        value
    }

    pub(crate) fn get_operand_abs_neg_integer(
        &mut self,
        value: Node,
        absolute: bool,
        negate: bool,
        is_signed: bool,
    ) -> Node {
        if !is_signed {
            // Absolute or negate on an unsigned value is a no-op.
            return value;
        }
        let mut value = value;
        if absolute {
            value = operation(OperationCode::IAbsolute, vec![value]);
        }
        if negate {
            value = operation(OperationCode::INegate, vec![value]);
        }
        value
    }

    pub(crate) fn get_saturated_float(&mut self, value: Node, saturate: bool) -> Node {
        if !saturate {
            return value;
        }
        operation(
            OperationCode::FClamp,
            vec![value, immediate_f32(0.0), immediate_f32(1.0)],
        )
    }

    pub(crate) fn get_saturated_half_float(&mut self, value: Node, saturate: bool) -> Node {
        if !saturate {
            return value;
        }
        operation(
            OperationCode::HClamp,
            vec![value, immediate_f32(0.0), immediate_f32(1.0)],
        )
    }

    pub(crate) fn unpack_half_float(&mut self, value: Node, half_type: HalfType) -> Node {
        self.uses_half = true;
        operation_meta(
            OperationCode::HUnpack,
            Meta::Half([half_type, HalfType::H0H1, HalfType::H0H1]),
            vec![value],
        )
    }

    pub(crate) fn half_merge(&mut self, dest: Node, src: Node, merge: crate::inst::HalfMerge) -> Node {
        use crate::inst::HalfMerge;
        match merge {
            HalfMerge::H0H1 => src,
            HalfMerge::F32 => operation(OperationCode::HMergeF32, vec![src]),
            HalfMerge::MrgH0 => operation(OperationCode::HMergeH0, vec![dest, src]),
            HalfMerge::MrgH1 => operation(OperationCode::HMergeH1, vec![dest, src]),
        }
    }

    pub(crate) fn get_half_operand_abs_neg(&mut self, value: Node, absolute: bool, negate: bool) -> Node {
        let mut value = value;
        if absolute {
            value = operation(OperationCode::HAbsolute, vec![value]);
        }
        if negate {
            // HNegate takes per-lane toggles.
            value = operation(
                OperationCode::HNegate,
                vec![value, immediate_u32(1), immediate_u32(1)],
            );
        }
        value
    }

    //----------------------------------------------------------------------------------------------
    // Predicate comparison helpers.

    pub(crate) fn get_predicate_comparison_float(
        &mut self,
        condition: PredCondition,
        op_a: Node,
        op_b: Node,
    ) -> Node {
        use self::PredCondition::*;
        let code = match condition {
            LessThan | LessThanWithNan => OperationCode::LogicalFLessThan,
            Equal | EqualWithNan => OperationCode::LogicalFEqual,
            LessEqual | LessEqualWithNan => OperationCode::LogicalFLessEqual,
            GreaterThan | GreaterThanWithNan => OperationCode::LogicalFGreaterThan,
            NotEqual | NotEqualWithNan => OperationCode::LogicalFNotEqual,
            GreaterEqual | GreaterEqualWithNan => OperationCode::LogicalFGreaterEqual,
        };
        let with_nan = matches!(
            condition,
            LessThanWithNan
                | EqualWithNan
                | LessEqualWithNan
                | GreaterThanWithNan
                | NotEqualWithNan
                | GreaterEqualWithNan
        );
        let mut predicate = operation(code, vec![op_a.clone(), op_b.clone()]);
        if with_nan {
            let a_nan = operation(OperationCode::LogicalFIsNan, vec![op_a]);
            let b_nan = operation(OperationCode::LogicalFIsNan, vec![op_b]);
            let either = operation(OperationCode::LogicalOr, vec![a_nan, b_nan]);
            predicate = operation(OperationCode::LogicalOr, vec![predicate, either]);
        }
        predicate
    }

    pub(crate) fn get_predicate_comparison_integer(
        &mut self,
        condition: PredCondition,
        is_signed: bool,
        op_a: Node,
        op_b: Node,
    ) -> Node {
        use self::PredCondition::*;
        let code = match condition {
            LessThan | LessThanWithNan => OperationCode::LogicalILessThan,
            Equal | EqualWithNan => OperationCode::LogicalIEqual,
            LessEqual | LessEqualWithNan => OperationCode::LogicalILessEqual,
            GreaterThan | GreaterThanWithNan => OperationCode::LogicalIGreaterThan,
            NotEqual | NotEqualWithNan => OperationCode::LogicalINotEqual,
            GreaterEqual | GreaterEqualWithNan => OperationCode::LogicalIGreaterEqual,
        };
        signed_operation(code, is_signed, vec![op_a, op_b])
    }

    pub(crate) fn get_predicate_comparison_half(
        &mut self,
        condition: PredCondition,
        op_a: Node,
        op_b: Node,
    ) -> Node {
        use self::PredCondition::*;
        let code = match condition {
            LessThan => OperationCode::Logical2HLessThan,
            Equal => OperationCode::Logical2HEqual,
            LessEqual => OperationCode::Logical2HLessEqual,
            GreaterThan => OperationCode::Logical2HGreaterThan,
            NotEqual => OperationCode::Logical2HNotEqual,
            GreaterEqual => OperationCode::Logical2HGreaterEqual,
            LessThanWithNan => OperationCode::Logical2HLessThanWithNan,
            EqualWithNan => OperationCode::Logical2HEqualWithNan,
            LessEqualWithNan => OperationCode::Logical2HLessEqualWithNan,
            GreaterThanWithNan => OperationCode::Logical2HGreaterThanWithNan,
            NotEqualWithNan => OperationCode::Logical2HNotEqualWithNan,
            GreaterEqualWithNan => OperationCode::Logical2HGreaterEqualWithNan,
        };
        operation(code, vec![op_a, op_b])
    }

    pub(crate) fn get_predicate_combiner(
        &mut self,
        operation_kind: PredOperation,
        op_a: Node,
        op_b: Node,
    ) -> Node {
        let code = match operation_kind {
            PredOperation::And => OperationCode::LogicalAnd,
            PredOperation::Or => OperationCode::LogicalOr,
            PredOperation::Xor => OperationCode::LogicalXor,
        };
        operation(code, vec![op_a, op_b])
    }

    pub(crate) fn get_condition_code(&mut self, cc: ConditionCode) -> Node {
        match cc {
            ConditionCode::Ne => self.get_internal_flag(InternalFlag::Zero, true),
            ConditionCode::Eq => self.get_internal_flag(InternalFlag::Zero, false),
            _ => {
                warn!("Unimplemented condition code: {:?}", cc);
                make_node(NodeData::Predicate {
                    index: Pred::NEVER_EXECUTE,
                    negated: false,
                })
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Sampler and image tracking.

    pub(crate) fn get_sampler_info(
        &mut self,
        info: SamplerInfo,
        offset: u32,
        buffer: Option<u32>,
    ) -> SamplerInfo {
        let descriptor = match buffer {
            Some(buffer) => self.registry.obtain_bindless_sampler(buffer, offset),
            None => self.registry.obtain_bound_sampler(offset),
        };
        if descriptor.is_none() {
            warn!("Unknown sampler info");
        }
        info.merge(descriptor)
    }

    pub(crate) fn get_sampler(&mut self, offset: u32, info: SamplerInfo) -> Sampler {
        let info = self.get_sampler_info(info, offset, None);
        if let Some(existing) = self
            .used_samplers
            .iter()
            .find(|sampler| sampler.same_mapping(None, offset))
        {
            debug_assert!(
                existing.is_array == info.is_array.unwrap_or(existing.is_array)
                    && existing.is_shadow == info.is_shadow.unwrap_or(existing.is_shadow)
                    && existing.is_buffer == info.is_buffer.unwrap_or(existing.is_buffer)
            );
            return existing.clone();
        }
        let next_index = self.used_samplers.len() as u32;
        let sampler = Sampler {
            index: next_index,
            offset,
            buffer: None,
            texture_type: info.texture_type.unwrap_or(TextureType::Texture2D),
            is_array: info.is_array.unwrap_or(false),
            is_shadow: info.is_shadow.unwrap_or(false),
            is_buffer: info.is_buffer.unwrap_or(false),
            is_indexed: false,
            size: 1,
        };
        self.used_samplers.push(sampler.clone());
        sampler
    }

    /// Resolves a bindless sampler by back-tracking the handle register
    /// through the already-lowered program. Returns the sampler and,
    /// for indexed accesses, the index node.
    pub(crate) fn get_bindless_sampler(
        &mut self,
        reg: Register,
        info: SamplerInfo,
    ) -> Option<(Sampler, Option<Node>)> {
        let sampler_register = self.get_register(reg);
        let global_code = std::mem::take(&mut self.global_code);
        let result =
            self.track_bindless_sampler(&sampler_register, &global_code, global_code.len() as i64);
        self.global_code = global_code;
        let (base_node, tracked) = result?;
        let _ = base_node;
        match tracked {
            crate::node::TrackSampler::Bindless { cbuf, offset } => {
                let word_offset = offset;
                let info = self.get_sampler_info(info, word_offset, Some(cbuf));
                if let Some(existing) = self
                    .used_samplers
                    .iter()
                    .find(|sampler| sampler.same_mapping(Some(cbuf), word_offset))
                {
                    return Some((existing.clone(), None));
                }
                let next_index = self.used_samplers.len() as u32;
                let sampler = Sampler {
                    index: next_index,
                    offset: word_offset,
                    buffer: Some(cbuf),
                    texture_type: info.texture_type.unwrap_or(TextureType::Texture2D),
                    is_array: info.is_array.unwrap_or(false),
                    is_shadow: info.is_shadow.unwrap_or(false),
                    is_buffer: info.is_buffer.unwrap_or(false),
                    is_indexed: false,
                    size: 1,
                };
                self.used_samplers.push(sampler.clone());
                Some((sampler, None))
            }
            crate::node::TrackSampler::Array {
                cbuf: _,
                base_offset,
                index_var,
            } => {
                let word_offset = base_offset / 4;
                let index_node = self.get_custom_variable(index_var);
                self.uses_indexed_samplers = true;
                let info = self.get_sampler_info(info, word_offset, None);
                if let Some(existing) = self
                    .used_samplers
                    .iter()
                    .find(|sampler| sampler.same_mapping(None, word_offset))
                {
                    return Some((existing.clone(), Some(index_node)));
                }
                let next_index = self.used_samplers.len() as u32;
                let sampler = Sampler {
                    index: next_index,
                    offset: word_offset,
                    buffer: None,
                    texture_type: info.texture_type.unwrap_or(TextureType::Texture2D),
                    is_array: info.is_array.unwrap_or(false),
                    is_shadow: info.is_shadow.unwrap_or(false),
                    is_buffer: info.is_buffer.unwrap_or(false),
                    is_indexed: true,
                    size: 1,
                };
                self.used_samplers.push(sampler.clone());
                Some((sampler, Some(index_node)))
            }
        }
    }

    pub(crate) fn get_image(&mut self, offset: u32, image_type: ImageType) -> usize {
        if let Some(position) = self
            .used_images
            .iter()
            .position(|image| image.buffer.is_none() && image.offset == offset)
        {
            return position;
        }
        let next_index = self.used_images.len() as u32;
        self.used_images.push(Image {
            index: next_index,
            offset,
            buffer: None,
            image_type,
            is_written: false,
            is_read: false,
            is_atomic: false,
        });
        self.used_images.len() - 1
    }

    pub(crate) fn get_bindless_image(
        &mut self,
        reg: Register,
        image_type: ImageType,
    ) -> Option<usize> {
        let image_register = self.get_register(reg);
        let (base, buffer, offset) = self.track_cbuf(
            &image_register,
            &self.global_code,
            self.global_code.len() as i64,
        )?;
        let _ = base;
        if let Some(position) = self
            .used_images
            .iter()
            .position(|image| image.buffer == Some(buffer) && image.offset == offset)
        {
            return Some(position);
        }
        self.used_images.push(Image {
            index: self.used_images.len() as u32,
            offset,
            buffer: Some(buffer),
            image_type,
            is_written: false,
            is_read: false,
            is_atomic: false,
        });
        Some(self.used_images.len() - 1)
    }

    //----------------------------------------------------------------------------------------------
    // Read-only views for the emitter and reflection.

    pub fn basic_blocks(&self) -> &BTreeMap<u32, NodeBlock> {
        &self.basic_blocks
    }

    pub fn program_manager(&self) -> Option<&AstManager> {
        self.program_manager.as_ref()
    }

    pub fn is_decompiled(&self) -> bool {
        self.decompiled
    }

    pub fn is_flow_stack_disabled(&self) -> bool {
        self.disable_flow_stack
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn coverage(&self) -> (u32, u32) {
        (self.coverage_begin, self.coverage_end)
    }

    pub fn used_registers(&self) -> &BTreeSet<u32> {
        &self.used_registers
    }

    pub fn used_predicates(&self) -> &BTreeSet<u32> {
        &self.used_predicates
    }

    pub fn used_input_attributes(&self) -> &BTreeSet<AttributeIndex> {
        &self.used_input_attributes
    }

    pub fn used_output_attributes(&self) -> &BTreeSet<AttributeIndex> {
        &self.used_output_attributes
    }

    pub fn used_cbufs(&self) -> &BTreeMap<u32, ConstBuffer> {
        &self.used_cbufs
    }

    pub fn used_samplers(&self) -> &[Sampler] {
        &self.used_samplers
    }

    pub fn used_images(&self) -> &[Image] {
        &self.used_images
    }

    pub fn used_global_memory(&self) -> &BTreeMap<GlobalMemoryBase, GlobalMemoryUsage> {
        &self.used_global_memory
    }

    pub fn used_clip_distances(&self) -> &[bool; 8] {
        &self.used_clip_distances
    }

    pub fn uses_layer(&self) -> bool {
        self.uses_layer
    }

    pub fn uses_viewport_index(&self) -> bool {
        self.uses_viewport_index
    }

    pub fn uses_point_size(&self) -> bool {
        self.uses_point_size
    }

    pub fn uses_instance_id(&self) -> bool {
        self.uses_instance_id
    }

    pub fn uses_vertex_id(&self) -> bool {
        self.uses_vertex_id
    }

    pub fn uses_warps(&self) -> bool {
        self.uses_warps
    }

    pub fn uses_half(&self) -> bool {
        self.uses_half
    }

    pub fn uses_physical_attributes(&self) -> bool {
        self.uses_physical_attributes
    }

    pub fn uses_indexed_samplers(&self) -> bool {
        self.uses_indexed_samplers
    }

    pub fn amend_code(&self) -> &[Node] {
        &self.amend_code
    }

    pub fn num_custom_variables(&self) -> u32 {
        self.num_custom_variables
    }

    pub fn num_flow_variables(&self) -> u32 {
        self.program_manager
            .as_ref()
            .map_or(0, |manager| manager.variables())
    }
}

/// Wraps code in a conditional on an SSY/PBK pop target comparison used
/// by flow-stack emission; kept here so `decode/other.rs` stays lean.
pub(crate) fn pop_flow_stack(stack: MetaStackClass) -> Node {
    operation_meta(OperationCode::PopFlowStack, Meta::Stack(stack), vec![])
}

pub(crate) fn push_flow_stack(stack: MetaStackClass, target: u32) -> Node {
    operation_meta(
        OperationCode::PushFlowStack,
        Meta::Stack(stack),
        vec![immediate_u32(target)],
    )
}

pub(crate) fn bitfield_insert(base: Node, insert: Node, offset: u32, bits: u32) -> Node {
    operation(
        OperationCode::UBitfieldInsert,
        vec![base, insert, immediate_u32(offset), immediate_u32(bits)],
    )
}

pub(crate) fn bitfield_extract(value: Node, offset: u32, bits: u32) -> Node {
    operation(
        OperationCode::UBitfieldExtract,
        vec![value, immediate_u32(offset), immediate_u32(bits)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::tests::TestRegistry;

    fn opcode_word(bits: &str) -> u64 {
        let mut word = 0u64;
        for (i, c) in bits.bytes().enumerate() {
            if c == b'1' {
                word |= 1 << (63 - i);
            }
        }
        word
    }

    fn exit_instr() -> u64 {
        opcode_word("1110001100000000") | u64::from(Pred::UNUSED_INDEX) << 16 | 0xF
    }

    #[test]
    fn mov_imm_lowers_to_assign_without_conditional() {
        // MOV_IMM r0 = imm(1.0-ish payload), predicate unused.
        let payload = 1u64; // raw immediate bits (<< 12 after decode)
        let mov = opcode_word("0011100010011000")
            | payload << 20
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let code = vec![0, mov, 0, exit_instr()];
        let registry = TestRegistry::empty();
        let ir = ShaderIr::decode(
            code,
            0,
            CompilerSettings::default(),
            &registry,
            ShaderStage::Compute,
        );
        assert!(ir.is_decompiled());
        assert!(ir.used_registers().contains(&0));

        // Find the Assign in the lowered AST blocks.
        let manager = ir.program_manager().unwrap();
        let mut found_assign = false;
        let mut found_conditional = false;
        let mut stack = vec![manager.program()];
        while let Some(id) = stack.pop() {
            let mut child = manager.arena().first_of(id);
            while let Some(node) = child {
                if let crate::ast::AstData::BlockDecoded { nodes } = manager.arena().data(node) {
                    for n in nodes {
                        match &**n {
                            NodeData::Operation(op) if op.code() == OperationCode::Assign => {
                                found_assign = true;
                            }
                            NodeData::Conditional(_) => found_conditional = true,
                            _ => {}
                        }
                    }
                }
                child = manager.arena().next(node);
            }
        }
        assert!(found_assign);
        assert!(!found_conditional);
    }

    #[test]
    fn sched_positions_produce_no_code() {
        // Slots 0 and 4 are sched; fill them with a MOV that would
        // otherwise lower and make sure nothing is generated for them.
        let mov = opcode_word("0011100010011000") | u64::from(Pred::UNUSED_INDEX) << 16;
        let code = vec![mov, mov, 0, exit_instr(), mov, 0, 0, 0];
        let registry = TestRegistry::empty();
        let ir = ShaderIr::decode(
            code,
            0,
            CompilerSettings {
                depth: CompileDepth::BruteForce,
                disable_else_derivation: false,
            },
            &registry,
            ShaderStage::Compute,
        );
        // Brute force lowers every non-sched PC; sched PCs must be empty.
        for (&start, block) in ir.basic_blocks() {
            if start % 4 == 0 {
                assert!(
                    block.is_empty(),
                    "sched slot {} produced {} nodes",
                    start,
                    block.len()
                );
            }
        }
    }

    #[test]
    fn sampler_deduplication_is_idempotent() {
        let registry = TestRegistry::empty();
        let mut ir = ShaderIr::decode(
            vec![0, exit_instr(), 0, 0],
            0,
            CompilerSettings::default(),
            &registry,
            ShaderStage::Fragment,
        );
        let first = ir.get_sampler(8, SamplerInfo::default());
        let count = ir.used_samplers().len();
        let second = ir.get_sampler(8, SamplerInfo::default());
        assert_eq!(first.index, second.index);
        assert_eq!(ir.used_samplers().len(), count);
        let third = ir.get_sampler(12, SamplerInfo::default());
        assert_ne!(first.index, third.index);
    }
}
