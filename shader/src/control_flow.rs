//! Control-flow reconstruction.
//!
//! Walks the program from its entry point splitting it into basic
//! blocks, resolves `BRX` jump tables by back-tracking the defining
//! instruction pattern, and eliminates the SSY/PBK flow stacks by
//! propagating per-block stack snapshots. On success the block graph is
//! handed to the structurizer; any failure downgrades the compilation
//! depth instead of aborting translation.

use crate::ast::AstManager;
use crate::expr::{self, Expr, ExprData};
use crate::inst::{ConditionCode, Instruction, Pred};
use crate::opcode::{self, OpId, OpType};
use crate::registry::Registry;
use crate::settings::{CompileDepth, CompilerSettings};
use fxhash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Where a single branch lands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchTarget {
    /// Leaves the program.
    Exit,
    /// Popped from a flow stack; filled in during the query phase.
    Unassigned,
    Pc(u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Condition {
    /// Predicate index with the negate flag folded in (`index + 8`).
    pub predicate: u32,
    pub cc: ConditionCode,
}

impl Default for Condition {
    fn default() -> Condition {
        Condition {
            predicate: Pred::UNUSED_INDEX,
            cc: ConditionCode::T,
        }
    }
}

impl Condition {
    pub fn is_unconditional(&self) -> bool {
        self.predicate == Pred::UNUSED_INDEX && self.cc == ConditionCode::T
    }
}

#[derive(Clone, Debug)]
pub struct SingleBranch {
    pub condition: Condition,
    pub address: BranchTarget,
    pub kill: bool,
    pub is_sync: bool,
    pub is_brk: bool,
    pub ignore: bool,
}

impl Default for SingleBranch {
    fn default() -> SingleBranch {
        SingleBranch {
            condition: Condition::default(),
            address: BranchTarget::Unassigned,
            kill: false,
            is_sync: false,
            is_brk: false,
            ignore: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CaseBranch {
    pub cmp_value: u32,
    pub address: u32,
}

#[derive(Clone, Debug)]
pub struct MultiBranch {
    pub gpr: u32,
    pub branches: Vec<CaseBranch>,
}

#[derive(Clone, Debug)]
pub enum BranchData {
    Single(SingleBranch),
    Multi(MultiBranch),
}

impl BranchData {
    fn is_ignored(&self) -> bool {
        match self {
            BranchData::Single(branch) => branch.ignore,
            BranchData::Multi(_) => false,
        }
    }
}

/// A reconstructed basic block, for consumers that keep explicit flow.
#[derive(Clone, Debug)]
pub struct ShaderBlock {
    pub start: u32,
    pub end: u32,
    pub ignore_branch: bool,
    pub branch: Option<BranchData>,
}

/// Result of a flow scan: either a decompiled AST or a block list, with
/// the depth that was actually achieved.
pub struct ShaderCharacteristics {
    pub depth: CompileDepth,
    pub start: u32,
    pub end: u32,
    pub blocks: Vec<ShaderBlock>,
    pub labels: BTreeSet<u32>,
    pub manager: Option<AstManager>,
}

impl ShaderCharacteristics {
    fn brute_force() -> ShaderCharacteristics {
        ShaderCharacteristics {
            depth: CompileDepth::BruteForce,
            start: 0,
            end: 0,
            blocks: Vec::new(),
            labels: BTreeSet::new(),
            manager: None,
        }
    }
}

/// Returns whether the offset is a scheduler-hint slot. Sched words
/// appear every fourth slot from the entry point and carry no semantics.
pub fn is_sched_instruction(offset: u32, main_offset: u32) -> bool {
    const SCHED_PERIOD: u32 = 4;
    (offset - main_offset) % SCHED_PERIOD == 0
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Query {
    address: u32,
    ssy_stack: Vec<u32>,
    pbk_stack: Vec<u32>,
}

#[derive(Clone, Default)]
struct BlockStack {
    ssy_stack: Vec<u32>,
    pbk_stack: Vec<u32>,
}

#[derive(Clone, Debug)]
struct BlockInfo {
    start: u32,
    end: u32,
    visited: bool,
    branch: BranchData,
}

impl BlockInfo {
    fn is_inside(&self, address: u32) -> bool {
        self.start <= address && address <= self.end
    }
}

struct CfgRebuildState<'a> {
    program_code: &'a [u64],
    registry: &'a dyn Registry,
    start: u32,
    block_info: Vec<BlockInfo>,
    inspect_queries: VecDeque<u32>,
    queries: VecDeque<Query>,
    registered: FxHashMap<u32, usize>,
    labels: BTreeSet<u32>,
    ssy_labels: BTreeMap<u32, u32>,
    pbk_labels: BTreeMap<u32, u32>,
    stacks: FxHashMap<u32, BlockStack>,
}

enum BlockCollision {
    None,
    Found(usize),
    Inside(usize),
}

fn try_get_block(state: &CfgRebuildState, address: u32) -> BlockCollision {
    for (index, block) in state.block_info.iter().enumerate() {
        if block.start == address {
            return BlockCollision::Found(index);
        }
        if block.is_inside(address) {
            return BlockCollision::Inside(index);
        }
    }
    BlockCollision::None
}

fn create_block_info(state: &mut CfgRebuildState, start: u32, end: u32) -> usize {
    let index = state.block_info.len();
    state.block_info.push(BlockInfo {
        start,
        end,
        visited: false,
        branch: BranchData::Single(SingleBranch::default()),
    });
    state.registered.insert(start, index);
    index
}

enum ParseResult {
    ControlCaught(ParseInfo),
    BlockEnd(ParseInfo),
    AbnormalFlow,
}

struct ParseInfo {
    branch_info: BranchData,
    end_address: u32,
}

struct BranchIndirectInfo {
    buffer: u32,
    offset: u32,
    entries: u32,
    relative_position: i32,
}

/// Walks backward from `pos`, skipping sched slots, until `test`
/// matches a decoded instruction; returns `pack`'s result and leaves
/// `pos` below the match.
fn track_instruction<R>(
    state: &CfgRebuildState,
    pos: &mut i64,
    test: impl Fn(Instruction, OpId) -> bool,
    pack: impl Fn(Instruction, OpId) -> R,
) -> Option<R> {
    while *pos >= i64::from(state.start) {
        let offset = *pos as u32;
        if is_sched_instruction(offset, state.start) {
            *pos -= 1;
            continue;
        }
        let instr = Instruction(state.program_code[offset as usize]);
        if let Some(matcher) = opcode::decode(instr) {
            if test(instr, matcher.id()) {
                *pos -= 1;
                return Some(pack(instr, matcher.id()));
            }
        }
        *pos -= 1;
    }
    None
}

fn track_ldc(state: &CfgRebuildState, pos: &mut i64, brx_register: u32) -> Option<(u32, u32, u32)> {
    track_instruction(
        state,
        pos,
        |instr, id| {
            id == OpId::LD_C
                && instr.gpr0().0 == brx_register
                && instr.ld_c().uniform_type() == Some(crate::inst::UniformType::Single)
        },
        |instr, _| {
            (
                instr.cbuf36().index() as u32,
                instr.cbuf36().offset() as u32,
                instr.gpr8().0,
            )
        },
    )
}

fn track_shl_register(state: &CfgRebuildState, pos: &mut i64, ldc_register: u32) -> Option<u32> {
    track_instruction(
        state,
        pos,
        |instr, id| id == OpId::SHL_IMM && instr.gpr0().0 == ldc_register,
        |instr, _| instr.gpr8().0,
    )
}

fn track_imnmx_value(state: &CfgRebuildState, pos: &mut i64, shl_register: u32) -> Option<u32> {
    track_instruction(
        state,
        pos,
        |instr, id| id == OpId::IMNMX_IMM && instr.gpr0().0 == shl_register,
        |instr, _| (instr.alu().signed_imm20_20() + 1) as u32,
    )
}

/// Matches the LDC / SHL / IMNMX pattern that bounds a BRX jump table.
fn track_branch_indirect_info(state: &CfgRebuildState, pos: u32) -> Option<BranchIndirectInfo> {
    let instr = Instruction(state.program_code[pos as usize]);
    let matcher = opcode::decode(instr)?;
    if matcher.id() != OpId::BRX || instr.brx().constant_buffer() {
        return None;
    }
    let relative_position = instr.brx().branch_target();
    let brx_register = instr.gpr8().0;
    let mut cursor = i64::from(pos) - 1;

    let (buffer, offset, ldc_register) = track_ldc(state, &mut cursor, brx_register)?;
    let shl_register = track_shl_register(state, &mut cursor, ldc_register)?;
    let entries = track_imnmx_value(state, &mut cursor, shl_register)?;

    Some(BranchIndirectInfo {
        buffer,
        offset,
        entries,
        relative_position,
    })
}

/// Builds the condition of a flow instruction, or `None` when the
/// instruction statically never executes.
fn flow_condition(instr: Instruction) -> Option<Condition> {
    let predicate = Pred::encode(instr.pred_index(), instr.negate_pred());
    if predicate == Pred::NEVER_EXECUTE {
        return None;
    }
    let cc = instr.flow_condition_code().unwrap_or(ConditionCode::T);
    if cc == ConditionCode::F {
        return None;
    }
    Some(Condition { predicate, cc })
}

fn insert_label(state: &mut CfgRebuildState, address: u32) {
    if state.labels.insert(address) {
        state.inspect_queries.push_back(address);
    }
}

fn parse_code(state: &mut CfgRebuildState, address: u32) -> ParseResult {
    let mut offset = address;
    let end_address = state.program_code.len() as u32;
    let mut single_branch = SingleBranch::default();

    loop {
        if offset >= end_address {
            error!("Shader passed the current limit");
            single_branch.address = BranchTarget::Exit;
            single_branch.ignore = false;
            break;
        }
        if state.registered.contains_key(&offset) {
            single_branch.address = BranchTarget::Pc(offset);
            single_branch.ignore = true;
            break;
        }
        if is_sched_instruction(offset, state.start) {
            offset += 1;
            continue;
        }
        let instr = Instruction(state.program_code[offset as usize]);
        let matcher = match opcode::decode(instr) {
            Some(matcher) if matcher.op_type() == OpType::Flow => matcher,
            _ => {
                offset += 1;
                continue;
            }
        };

        match matcher.id() {
            OpId::EXIT | OpId::KIL => {
                let condition = match flow_condition(instr) {
                    Some(condition) => condition,
                    None => {
                        offset += 1;
                        continue;
                    }
                };
                single_branch.condition = condition;
                single_branch.address = BranchTarget::Exit;
                single_branch.kill = matcher.id() == OpId::KIL;
                return ParseResult::ControlCaught(ParseInfo {
                    end_address: offset,
                    branch_info: BranchData::Single(single_branch),
                });
            }
            OpId::BRA => {
                if instr.bra().constant_buffer() {
                    return ParseResult::AbnormalFlow;
                }
                let condition = match flow_condition(instr) {
                    Some(condition) => condition,
                    None => {
                        offset += 1;
                        continue;
                    }
                };
                let branch_offset = (offset as i64 + i64::from(instr.bra().branch_target())) as u32;
                single_branch.condition = condition;
                single_branch.address = if branch_offset == 0 {
                    BranchTarget::Exit
                } else {
                    BranchTarget::Pc(branch_offset)
                };
                insert_label(state, branch_offset);
                return ParseResult::ControlCaught(ParseInfo {
                    end_address: offset,
                    branch_info: BranchData::Single(single_branch),
                });
            }
            OpId::SYNC | OpId::BRK => {
                let condition = match flow_condition(instr) {
                    Some(condition) => condition,
                    None => {
                        offset += 1;
                        continue;
                    }
                };
                single_branch.condition = condition;
                single_branch.address = BranchTarget::Unassigned;
                single_branch.is_sync = matcher.id() == OpId::SYNC;
                single_branch.is_brk = matcher.id() == OpId::BRK;
                return ParseResult::ControlCaught(ParseInfo {
                    end_address: offset,
                    branch_info: BranchData::Single(single_branch),
                });
            }
            OpId::SSY => {
                let target = (offset as i64 + i64::from(instr.bra().branch_target())) as u32;
                insert_label(state, target);
                state.ssy_labels.insert(offset, target);
            }
            OpId::PBK => {
                let target = (offset as i64 + i64::from(instr.bra().branch_target())) as u32;
                insert_label(state, target);
                state.pbk_labels.insert(offset, target);
            }
            OpId::BRX => {
                let info = match track_branch_indirect_info(state, offset) {
                    Some(info) => info,
                    None => {
                        warn!("BRX tracking failed at offset {:#x}", offset);
                        return ParseResult::AbnormalFlow;
                    }
                };
                let pc_target = offset as i64 + i64::from(info.relative_position);
                let mut branches = Vec::with_capacity(info.entries as usize);
                for i in 0..info.entries {
                    let key = match state.registry.obtain_key(info.buffer, info.offset + i * 4) {
                        Some(key) => key,
                        None => return ParseResult::AbnormalFlow,
                    };
                    let target = ((i64::from(key >> 3)) + pc_target) as u32;
                    insert_label(state, target);
                    branches.push(CaseBranch {
                        cmp_value: key,
                        address: target,
                    });
                }
                return ParseResult::ControlCaught(ParseInfo {
                    end_address: offset,
                    branch_info: BranchData::Multi(MultiBranch {
                        gpr: instr.gpr8().0,
                        branches,
                    }),
                });
            }
            _ => {}
        }
        offset += 1;
    }

    ParseResult::BlockEnd(ParseInfo {
        end_address: offset - 1,
        branch_info: BranchData::Single(single_branch),
    })
}

fn try_inspect_address(state: &mut CfgRebuildState) -> bool {
    let address = match state.inspect_queries.pop_front() {
        Some(address) => address,
        None => return false,
    };
    match try_get_block(state, address) {
        BlockCollision::Found(_) => return true,
        BlockCollision::Inside(block_index) => {
            // Split the block in two; the lower half forwards into the
            // new one.
            let end = state.block_info[block_index].end;
            let new_index = create_block_info(state, address, end);
            let branch = state.block_info[block_index].branch.clone();
            state.block_info[new_index].branch = branch;
            let current_block = &mut state.block_info[block_index];
            current_block.end = address - 1;
            current_block.branch = BranchData::Single(SingleBranch {
                address: BranchTarget::Pc(address),
                ignore: true,
                ..SingleBranch::default()
            });
            return true;
        }
        BlockCollision::None => {}
    }
    let parse_info = match parse_code(state, address) {
        ParseResult::AbnormalFlow => return false,
        ParseResult::ControlCaught(info) | ParseResult::BlockEnd(info) => info,
    };
    let index = create_block_info(state, address, parse_info.end_address);
    let end_address = parse_info.end_address;
    state.block_info[index].branch = parse_info.branch_info;
    if let BranchData::Single(ref branch) = state.block_info[index].branch {
        if !branch.condition.is_unconditional() {
            let fallthrough_address = end_address + 1;
            state.inspect_queries.push_front(fallthrough_address);
        }
    }
    true
}

fn gather_labels(stack: &mut Vec<u32>, labels: &BTreeMap<u32, u32>, block: &BlockInfo) {
    for (_, &target) in labels.range(block.start..=block.end) {
        stack.push(target);
    }
}

fn try_query(state: &mut CfgRebuildState) -> bool {
    let query = match state.queries.pop_front() {
        Some(query) => query,
        None => return false,
    };
    let block_index = match state.registered.get(&query.address) {
        Some(&index) => index,
        None => return false,
    };
    // Revisits must agree with the recorded stack snapshot; a conflict
    // means the program needs the real flow stack.
    if state.block_info[block_index].visited {
        let stack = state.stacks.entry(query.address).or_default();
        return (stack.ssy_stack.is_empty() || query.ssy_stack == stack.ssy_stack)
            && (stack.pbk_stack.is_empty() || query.pbk_stack == stack.pbk_stack);
    }
    state.block_info[block_index].visited = true;
    state.stacks.insert(
        query.address,
        BlockStack {
            ssy_stack: query.ssy_stack.clone(),
            pbk_stack: query.pbk_stack.clone(),
        },
    );

    let mut q2 = query;
    {
        let block = &state.block_info[block_index];
        gather_labels(&mut q2.ssy_stack, &state.ssy_labels, block);
        gather_labels(&mut q2.pbk_stack, &state.pbk_labels, block);
    }
    let branch = state.block_info[block_index].branch.clone();
    match branch {
        BranchData::Single(mut branch) => {
            if !branch.condition.is_unconditional() {
                let mut fallthrough = q2.clone();
                fallthrough.address = state.block_info[block_index].end + 1;
                state.queries.push_back(fallthrough);
            }
            let mut conditional_query = q2;
            if branch.is_sync {
                if branch.address == BranchTarget::Unassigned {
                    branch.address = match conditional_query.ssy_stack.last() {
                        Some(&target) => BranchTarget::Pc(target),
                        None => return false,
                    };
                }
                conditional_query.ssy_stack.pop();
            }
            if branch.is_brk {
                if branch.address == BranchTarget::Unassigned {
                    branch.address = match conditional_query.pbk_stack.last() {
                        Some(&target) => BranchTarget::Pc(target),
                        None => return false,
                    };
                }
                conditional_query.pbk_stack.pop();
            }
            state.block_info[block_index].branch = BranchData::Single(branch.clone());
            if let BranchTarget::Pc(target) = branch.address {
                conditional_query.address = target;
                state.queries.push_back(conditional_query);
            }
            true
        }
        BranchData::Multi(multi) => {
            for case in &multi.branches {
                let mut conditional_query = q2.clone();
                conditional_query.address = case.address;
                state.queries.push_back(conditional_query);
            }
            true
        }
    }
}

//--------------------------------------------------------------------------------------------------

fn branch_condition_expr(condition: &Condition) -> Expr {
    let mut result: Option<Expr> = None;
    if condition.cc != ConditionCode::T {
        result = Some(expr::make_expr(ExprData::CondCode(condition.cc)));
    }
    if condition.predicate != Pred::UNUSED_INDEX {
        let mut pred = condition.predicate;
        let negate = pred > 7;
        if negate {
            pred -= 8;
        }
        let mut extra = expr::make_expr(ExprData::Predicate(pred));
        if negate {
            extra = expr::make_not(extra);
        }
        return match result {
            Some(result) => expr::make_expr(ExprData::And(extra, result)),
            None => extra,
        };
    }
    result.unwrap_or_else(|| expr::make_expr(ExprData::Boolean(true)))
}

fn insert_branch(manager: &mut AstManager, branch: &BranchData) {
    match branch {
        BranchData::Single(branch) => {
            let condition = branch_condition_expr(&branch.condition);
            match branch.address {
                BranchTarget::Pc(address) => manager.insert_goto(condition, address),
                _ => manager.insert_return(condition, branch.kill),
            }
        }
        BranchData::Multi(multi) => {
            for case in &multi.branches {
                let condition = expr::make_expr(ExprData::GprEqual(multi.gpr, case.cmp_value));
                manager.insert_goto(condition, case.address);
            }
        }
    }
}

fn decompile_shader(state: &CfgRebuildState, manager: &mut AstManager) {
    for &label in &state.labels {
        manager.declare_label(label);
    }
    for block in &state.block_info {
        if state.labels.contains(&block.start) {
            manager.insert_label(block.start);
        }
        let ignore = block.branch.is_ignored();
        let end = if ignore { block.end + 1 } else { block.end };
        manager.insert_block(block.start, end);
        if !ignore {
            insert_branch(manager, &block.branch);
        }
    }
    manager.decompile();
}

/// Reconstructs the flow of a program, downgrading through the
/// compile-depth ladder on failure.
pub fn scan_flow(
    program_code: &[u64],
    start_address: u32,
    settings: &CompilerSettings,
    registry: &dyn Registry,
) -> ShaderCharacteristics {
    if settings.depth == CompileDepth::BruteForce {
        return ShaderCharacteristics::brute_force();
    }

    let mut state = CfgRebuildState {
        program_code,
        registry,
        start: start_address,
        block_info: Vec::new(),
        inspect_queries: VecDeque::new(),
        queries: VecDeque::new(),
        registered: FxHashMap::default(),
        labels: BTreeSet::new(),
        ssy_labels: BTreeMap::new(),
        pbk_labels: BTreeMap::new(),
        stacks: FxHashMap::default(),
    };
    state.labels.insert(start_address);
    state.inspect_queries.push_back(start_address);
    while !state.inspect_queries.is_empty() {
        if !try_inspect_address(&mut state) {
            return ShaderCharacteristics::brute_force();
        }
    }

    let mut decompiled = false;
    if settings.depth != CompileDepth::FlowStack {
        state.queries.push_back(Query {
            address: state.start,
            ..Query::default()
        });
        decompiled = true;
        while !state.queries.is_empty() {
            if !try_query(&mut state) {
                decompiled = false;
                break;
            }
        }
    }
    let use_flow_stack = !decompiled;

    state.block_info.sort_by_key(|block| block.start);

    if decompiled && settings.depth != CompileDepth::NoFlowStack {
        let mut manager = AstManager::new(
            settings.depth != CompileDepth::DecompileBackwards,
            settings.disable_else_derivation,
        );
        decompile_shader(&state, &mut manager);
        if manager.is_fully_decompiled() {
            let end = state.block_info.last().map_or(0, |block| block.end) + 1;
            return ShaderCharacteristics {
                depth: settings.depth,
                start: start_address,
                end,
                blocks: Vec::new(),
                labels: BTreeSet::new(),
                manager: Some(manager),
            };
        }
        if settings.depth == CompileDepth::FullDecompile {
            error!("Failed to remove all the gotos");
        } else {
            error!("Failed to remove all backward gotos");
        }
        debug!("State of the shader:\n{}", manager.print());
    }

    let mut result = ShaderCharacteristics {
        depth: if use_flow_stack {
            CompileDepth::FlowStack
        } else {
            CompileDepth::NoFlowStack
        },
        start: start_address,
        end: 0,
        blocks: Vec::new(),
        labels: BTreeSet::new(),
        manager: None,
    };
    for block in &state.block_info {
        let ignore_branch = block.branch.is_ignored();
        result.end = result.end.max(block.end);
        result.blocks.push(ShaderBlock {
            start: block.start,
            end: block.end,
            ignore_branch,
            branch: if ignore_branch {
                None
            } else {
                Some(block.branch.clone())
            },
        });
    }
    if !use_flow_stack {
        result.labels = state.labels;
        return result;
    }

    // Flow-stack mode: merge adjacent blocks that no label separates.
    let labels = &state.labels;
    let mut merged: Vec<ShaderBlock> = Vec::with_capacity(result.blocks.len());
    for block in result.blocks.drain(..) {
        match merged.last_mut() {
            Some(back) if !labels.contains(&block.start) && block.start == back.end + 1 => {
                back.end = block.end;
                back.ignore_branch = block.ignore_branch;
                back.branch = block.branch;
            }
            _ => merged.push(block),
        }
    }
    result.blocks = merged;
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::{GuestDriverProfile, SamplerDescriptor};
    use fxhash::FxHashMap;

    /// Encodes top-16 opcode bits from a bitstring with zeroed wildcards.
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
        // EXIT, predicate unused, condition code T.
        opcode_word("1110001100000000") | u64::from(Pred::UNUSED_INDEX) << 16 | 0xF
    }

    fn bra_instr(from: u32, to: u32) -> u64 {
        let delta_slots = to as i64 - from as i64 - 1;
        let bytes = (delta_slots * 8) as i32 as u32 & 0xFF_FFFF;
        opcode_word("1110001001000000")
            | u64::from(bytes) << 20
            | u64::from(Pred::UNUSED_INDEX) << 16
            | 0xF
    }

    fn ssy_instr(from: u32, to: u32) -> u64 {
        let delta_slots = to as i64 - from as i64 - 1;
        let bytes = (delta_slots * 8) as i32 as u32 & 0xFF_FFFF;
        opcode_word("1110001010010000") | u64::from(bytes) << 20
    }

    fn sync_instr() -> u64 {
        opcode_word("1111000011111000") | u64::from(Pred::UNUSED_INDEX) << 16 | 0xF
    }

    fn nop() -> u64 {
        // An encoding no matcher catches; treated as a non-flow word.
        0
    }

    pub struct TestRegistry {
        pub keys: FxHashMap<(u32, u32), u32>,
    }

    impl TestRegistry {
        pub fn empty() -> TestRegistry {
            TestRegistry {
                keys: FxHashMap::default(),
            }
        }
    }

    impl Registry for TestRegistry {
        fn obtain_key(&self, buffer: u32, offset: u32) -> Option<u32> {
            self.keys.get(&(buffer, offset)).copied()
        }
        fn obtain_bound_sampler(&self, _offset: u32) -> Option<SamplerDescriptor> {
            Some(SamplerDescriptor::default())
        }
        fn obtain_bindless_sampler(&self, _buffer: u32, _offset: u32) -> Option<SamplerDescriptor> {
            Some(SamplerDescriptor::default())
        }
        fn bound_buffer(&self) -> u32 {
            0
        }
        fn guest_driver(&self) -> GuestDriverProfile {
            GuestDriverProfile::new()
        }
    }

    #[test]
    fn straight_line_program_is_one_block() {
        // sched, nop, nop, exit
        let code = vec![nop(), nop(), nop(), exit_instr()];
        let settings = CompilerSettings::default();
        let result = scan_flow(&code, 0, &settings, &TestRegistry::empty());
        assert_eq!(result.depth, CompileDepth::FullDecompile);
        assert!(result.manager.is_some());
    }

    #[test]
    fn ssy_sync_program_decompiles() {
        // 0: sched slot (skipped)
        // 1: SSY -> 5
        // 2: BRA -> 3
        // 3: BRA -> 4  (label_body)
        // 4: SYNC      (pops 5)
        // 5: EXIT      (label_tail)
        let code = vec![
            nop(),
            ssy_instr(1, 5),
            bra_instr(2, 3),
            bra_instr(3, 4),
            sync_instr(),
            exit_instr(),
        ];
        let settings = CompilerSettings::default();
        let result = scan_flow(&code, 0, &settings, &TestRegistry::empty());
        assert_eq!(result.depth, CompileDepth::FullDecompile);
        let manager = result.manager.expect("expected decompiled program");
        let printed = manager.print();
        assert!(!printed.contains("goto"), "got:\n{}", printed);
    }

    #[test]
    fn block_partition_covers_range() {
        // Conditional branch forward creating two blocks + target block.
        let code = vec![
            nop(),
            // BRA @5 guarded by P0
            bra_instr(1, 5) & !(0xFu64 << 16),
            nop(),
            nop(),
            exit_instr(),
            exit_instr(),
        ];
        let settings = CompilerSettings {
            depth: CompileDepth::FlowStack,
            disable_else_derivation: false,
        };
        let result = scan_flow(&code, 0, &settings, &TestRegistry::empty());
        assert_eq!(result.depth, CompileDepth::FlowStack);
        assert!(!result.blocks.is_empty());
        // Blocks must be disjoint and sorted.
        for pair in result.blocks.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn brx_with_known_table_builds_multi_branch() {
        // Build: IMNMX r5 = min(r6, 3); SHL r5 = r5 << 2; LDC r5 = c0[r5]; BRX r5
        // at offsets 1..4 (offset 0 is sched).
        let imnmx = opcode_word("0011100000100000")
            | 5            // gpr0 = r5
            | 6 << 8       // gpr8 = r6
            | 2 << 20      // clamp to table of three entries
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let shl = opcode_word("0011100001001000")
            | 5
            | 5 << 8
            | 2 << 20
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let ldc = opcode_word("1110111110010000")
            | 5
            | 5 << 8
            | 4 << 48 // single
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let brx = opcode_word("1110001001010000")
            | 5 << 8
            | u64::from(Pred::UNUSED_INDEX) << 16
            | 0xF
            | 0xFFFFF8u64 << 20; // relative -1 + 1 = 0
        let code = vec![
            nop(),
            imnmx,
            shl,
            ldc,
            brx,
            exit_instr(),
            exit_instr(),
            exit_instr(),
        ];
        let mut registry = TestRegistry::empty();
        // Jump table: targets at slots (value >> 3) + 4.
        registry.keys.insert((0, 0), (5 - 4) << 3);
        registry.keys.insert((0, 4), (6 - 4) << 3);
        registry.keys.insert((0, 8), (7 - 4) << 3);
        let settings = CompilerSettings {
            depth: CompileDepth::FlowStack,
            disable_else_derivation: false,
        };
        let result = scan_flow(&code, 0, &settings, &registry);
        assert_eq!(result.depth, CompileDepth::FlowStack);
        let brx_block = result
            .blocks
            .iter()
            .find(|block| matches!(block.branch, Some(BranchData::Multi(_))))
            .expect("expected a multi branch block");
        match brx_block.branch.as_ref().unwrap() {
            BranchData::Multi(multi) => {
                assert_eq!(multi.gpr, 5);
                assert_eq!(multi.branches.len(), 3);
                assert_eq!(multi.branches[0].address, 5);
                assert_eq!(multi.branches[2].address, 7);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn brx_with_unknown_table_degrades_to_brute_force() {
        let imnmx = opcode_word("0011100000100000")
            | 5
            | 6 << 8
            | 2 << 20
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let shl = opcode_word("0011100001001000")
            | 5
            | 5 << 8
            | 2 << 20
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let ldc = opcode_word("1110111110010000")
            | 5
            | 5 << 8
            | 4 << 48
            | u64::from(Pred::UNUSED_INDEX) << 16;
        let brx = opcode_word("1110001001010000")
            | 5 << 8
            | u64::from(Pred::UNUSED_INDEX) << 16
            | 0xF
            | 0xFFFFF8u64 << 20;
        let code = vec![nop(), imnmx, shl, ldc, brx, exit_instr()];
        // No keys registered: the table is not compile-time known.
        let settings = CompilerSettings::default();
        let result = scan_flow(&code, 0, &settings, &TestRegistry::empty());
        assert_eq!(result.depth, CompileDepth::BruteForce);
    }

    #[test]
    fn sched_slots_are_never_block_content() {
        let code = vec![nop(), nop(), nop(), exit_instr(), nop(), nop()];
        let settings = CompilerSettings {
            depth: CompileDepth::FlowStack,
            disable_else_derivation: false,
        };
        let result = scan_flow(&code, 0, &settings, &TestRegistry::empty());
        for block in &result.blocks {
            assert!(block.start <= block.end);
        }
    }
}
