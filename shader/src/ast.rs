//! Structured control-flow AST and the goto-elimination transform.
//!
//! Nodes live in a per-compilation arena; the doubly linked zipper of
//! every scope is expressed with `Option<AstId>` links. A node's parent
//! is always the construct whose body list owns it, so the owning zipper
//! of a node is found through its parent.
//!
//! The transform follows "Taming control flow: A structured approach to
//! eliminating goto statements" (Erosa & Hendren, 1994): gotos are moved
//! outward until they share a scope with their label, then rewritten as
//! a do-while (backward) or an if-then (forward).

use crate::expr::{self, Expr, ExprData};
use crate::node::NodeBlock;
use fxhash::FxHashMap;
use std::fmt::Write;

/// Index of a node in the arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AstId(u32);

impl AstId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Links of one scope's doubly linked list.
#[derive(Copy, Clone, Debug, Default)]
pub struct Zipper {
    pub first: Option<AstId>,
    pub last: Option<AstId>,
}

#[derive(Clone, Debug)]
pub enum AstData {
    Program { body: Zipper },
    IfThen { condition: Expr, body: Zipper },
    IfElse { body: Zipper },
    BlockEncoded { start: u32, end: u32 },
    BlockDecoded { nodes: NodeBlock },
    VarSet { index: u32, condition: Expr },
    Label { index: u32, unused: bool },
    Goto { condition: Expr, label: u32 },
    DoWhile { condition: Expr, body: Zipper },
    Return { condition: Expr, kills: bool },
    Break { condition: Expr },
}

impl AstData {
    fn body(&self) -> Option<Zipper> {
        match self {
            AstData::Program { body }
            | AstData::IfThen { body, .. }
            | AstData::IfElse { body }
            | AstData::DoWhile { body, .. } => Some(*body),
            _ => None,
        }
    }

    fn body_mut(&mut self) -> Option<&mut Zipper> {
        match self {
            AstData::Program { body }
            | AstData::IfThen { body, .. }
            | AstData::IfElse { body }
            | AstData::DoWhile { body, .. } => Some(body),
            _ => None,
        }
    }
}

struct AstEntry {
    data: AstData,
    parent: Option<AstId>,
    prev: Option<AstId>,
    next: Option<AstId>,
}

/// Arena of AST nodes plus the zipper operations.
pub struct AstArena {
    entries: Vec<AstEntry>,
}

impl AstArena {
    fn new() -> AstArena {
        AstArena {
            entries: Vec::new(),
        }
    }

    fn alloc(&mut self, data: AstData, parent: Option<AstId>) -> AstId {
        let id = AstId(self.entries.len() as u32);
        self.entries.push(AstEntry {
            data,
            parent,
            prev: None,
            next: None,
        });
        id
    }

    pub fn data(&self, id: AstId) -> &AstData {
        &self.entries[id.index()].data
    }

    pub fn data_mut(&mut self, id: AstId) -> &mut AstData {
        &mut self.entries[id.index()].data
    }

    pub fn parent(&self, id: AstId) -> Option<AstId> {
        self.entries[id.index()].parent
    }

    pub fn next(&self, id: AstId) -> Option<AstId> {
        self.entries[id.index()].next
    }

    pub fn prev(&self, id: AstId) -> Option<AstId> {
        self.entries[id.index()].prev
    }

    pub fn first_of(&self, container: AstId) -> Option<AstId> {
        self.data(container).body().and_then(|z| z.first)
    }

    pub fn last_of(&self, container: AstId) -> Option<AstId> {
        self.data(container).body().and_then(|z| z.last)
    }

    /// Hop count to the root.
    pub fn level(&self, id: AstId) -> u32 {
        let mut level = 0;
        let mut current = self.parent(id);
        while let Some(up) = current {
            level += 1;
            current = self.parent(up);
        }
        level
    }

    fn zipper(&self, container: AstId) -> Zipper {
        self.data(container)
            .body()
            .expect("node cannot own children")
    }

    fn set_zipper(&mut self, container: AstId, zipper: Zipper) {
        *self
            .data_mut(container)
            .body_mut()
            .expect("node cannot own children") = zipper;
    }

    fn set_link(&mut self, id: AstId, prev: Option<AstId>, next: Option<AstId>) {
        let entry = &mut self.entries[id.index()];
        entry.prev = prev;
        entry.next = next;
    }

    /// Adopts a pre-linked chain starting at `first` as the body of
    /// `container`.
    fn init_body(&mut self, container: AstId, first: Option<AstId>) {
        let mut last = first;
        let mut current = first;
        while let Some(id) = current {
            self.entries[id.index()].parent = Some(container);
            last = Some(id);
            current = self.next(id);
        }
        self.set_zipper(container, Zipper { first, last });
    }

    fn push_back(&mut self, container: AstId, node: AstId) {
        let mut zipper = self.zipper(container);
        self.set_link(node, zipper.last, None);
        if let Some(last) = zipper.last {
            self.entries[last.index()].next = Some(node);
        }
        zipper.last = Some(node);
        if zipper.first.is_none() {
            zipper.first = Some(node);
        }
        self.set_zipper(container, zipper);
        self.entries[node.index()].parent = Some(container);
    }

    fn push_front(&mut self, container: AstId, node: AstId) {
        let mut zipper = self.zipper(container);
        self.set_link(node, None, zipper.first);
        if let Some(first) = zipper.first {
            self.entries[first.index()].prev = Some(node);
        }
        if zipper.last.is_none() {
            zipper.last = Some(node);
        }
        zipper.first = Some(node);
        self.set_zipper(container, zipper);
        self.entries[node.index()].parent = Some(container);
    }

    fn insert_after(&mut self, container: AstId, node: AstId, at: Option<AstId>) {
        let at = match at {
            Some(at) => at,
            None => return self.push_front(container, node),
        };
        let mut zipper = self.zipper(container);
        let next = self.next(at);
        if let Some(next) = next {
            self.entries[next.index()].prev = Some(node);
        }
        self.set_link(node, Some(at), next);
        if zipper.last == Some(at) {
            zipper.last = Some(node);
        }
        self.entries[at.index()].next = Some(node);
        self.set_zipper(container, zipper);
        self.entries[node.index()].parent = Some(container);
    }

    fn insert_before(&mut self, container: AstId, node: AstId, at: Option<AstId>) {
        let at = match at {
            Some(at) => at,
            None => return self.push_back(container, node),
        };
        let mut zipper = self.zipper(container);
        let prev = self.prev(at);
        if let Some(prev) = prev {
            self.entries[prev.index()].next = Some(node);
        }
        self.set_link(node, prev, Some(at));
        if zipper.first == Some(at) {
            zipper.first = Some(node);
        }
        self.entries[at.index()].prev = Some(node);
        self.set_zipper(container, zipper);
        self.entries[node.index()].parent = Some(container);
    }

    /// Unlinks a single node, clearing its links and parent.
    fn detach_single(&mut self, container: AstId, node: AstId) {
        let mut zipper = self.zipper(container);
        let prev = self.prev(node);
        let next = self.next(node);
        if let Some(prev) = prev {
            self.entries[prev.index()].next = next;
        } else {
            zipper.first = next;
        }
        if let Some(next) = next {
            self.entries[next.index()].prev = prev;
        } else {
            zipper.last = prev;
        }
        self.set_zipper(container, zipper);
        self.set_link(node, None, None);
        self.entries[node.index()].parent = None;
    }

    /// Unlinks everything from `node` to the end of the scope. The
    /// detached chain keeps its internal links so it can be re-adopted
    /// with `init_body`.
    fn detach_tail(&mut self, container: AstId, node: AstId) {
        let mut zipper = self.zipper(container);
        if zipper.first == Some(node) {
            zipper.first = None;
            zipper.last = None;
        } else {
            zipper.last = self.prev(node);
            if let Some(last) = zipper.last {
                self.entries[last.index()].next = None;
            }
            self.entries[node.index()].prev = None;
        }
        self.set_zipper(container, zipper);
        let mut current = Some(node);
        while let Some(id) = current {
            self.entries[id.index()].parent = None;
            current = self.next(id);
        }
    }

    /// Unlinks the inclusive range `[start, end]`, preserving the
    /// chain's internal links.
    fn detach_segment(&mut self, container: AstId, start: AstId, end: AstId) {
        if start == end {
            return self.detach_single(container, start);
        }
        let mut zipper = self.zipper(container);
        let prev = self.prev(start);
        let post = self.next(end);
        if let Some(prev) = prev {
            self.entries[prev.index()].next = post;
        } else {
            zipper.first = post;
        }
        if let Some(post) = post {
            self.entries[post.index()].prev = prev;
        } else {
            zipper.last = prev;
        }
        self.set_zipper(container, zipper);
        self.entries[start.index()].prev = None;
        self.entries[end.index()].next = None;
        let mut current = Some(start);
        while let Some(id) = current {
            self.entries[id.index()].parent = None;
            current = self.next(id);
        }
    }

    fn remove(&mut self, container: AstId, node: AstId) {
        self.detach_single(container, node);
    }
}

//--------------------------------------------------------------------------------------------------

/// Builds the labeled-goto program and structurizes it.
pub struct AstManager {
    full_decompile: bool,
    disable_else_derivation: bool,
    labels_map: FxHashMap<u32, u32>,
    labels: Vec<Option<AstId>>,
    gotos: Vec<AstId>,
    variables: u32,
    arena: AstArena,
    main_node: AstId,
    false_condition: Expr,
}

impl AstManager {
    pub fn new(full_decompile: bool, disable_else_derivation: bool) -> AstManager {
        let mut arena = AstArena::new();
        let main_node = arena.alloc(
            AstData::Program {
                body: Zipper::default(),
            },
            None,
        );
        AstManager {
            full_decompile,
            disable_else_derivation,
            labels_map: FxHashMap::default(),
            labels: Vec::new(),
            gotos: Vec::new(),
            variables: 0,
            arena,
            main_node,
            false_condition: expr::make_expr(ExprData::Boolean(false)),
        }
    }

    pub fn arena(&self) -> &AstArena {
        &self.arena
    }

    pub fn program(&self) -> AstId {
        self.main_node
    }

    /// Number of flow variables introduced by outward movement.
    pub fn variables(&self) -> u32 {
        self.variables
    }

    /// Whether any goto survived decompilation.
    pub fn has_gotos(&self) -> bool {
        !self.gotos.is_empty()
    }

    pub fn declare_label(&mut self, address: u32) {
        use std::collections::hash_map::Entry;
        let next_index = self.labels.len() as u32;
        if let Entry::Vacant(entry) = self.labels_map.entry(address) {
            entry.insert(next_index);
            self.labels.push(None);
        }
    }

    pub fn insert_label(&mut self, address: u32) {
        let index = self.labels_map[&address];
        let label = self.arena.alloc(
            AstData::Label {
                index,
                unused: false,
            },
            Some(self.main_node),
        );
        self.labels[index as usize] = Some(label);
        self.arena.push_back(self.main_node, label);
    }

    pub fn insert_goto(&mut self, condition: Expr, address: u32) {
        let index = self.labels_map[&address];
        let goto_node = self.arena.alloc(
            AstData::Goto {
                condition,
                label: index,
            },
            Some(self.main_node),
        );
        self.gotos.push(goto_node);
        self.arena.push_back(self.main_node, goto_node);
    }

    pub fn insert_block(&mut self, start: u32, end: u32) {
        let block = self
            .arena
            .alloc(AstData::BlockEncoded { start, end }, Some(self.main_node));
        self.arena.push_back(self.main_node, block);
    }

    pub fn insert_return(&mut self, condition: Expr, kills: bool) {
        let node = self
            .arena
            .alloc(AstData::Return { condition, kills }, Some(self.main_node));
        self.arena.push_back(self.main_node, node);
    }

    fn new_variable(&mut self) -> u32 {
        let index = self.variables;
        self.variables += 1;
        index
    }

    fn goto_condition(&self, goto_node: AstId) -> Expr {
        match self.arena.data(goto_node) {
            AstData::Goto { condition, .. } => condition.clone(),
            _ => unreachable!("not a goto"),
        }
    }

    fn set_goto_condition(&mut self, goto_node: AstId, condition: Expr) {
        if let AstData::Goto {
            condition: slot, ..
        } = self.arena.data_mut(goto_node)
        {
            *slot = condition;
        }
    }

    fn is_if_then(&self, id: AstId) -> bool {
        matches!(self.arena.data(id), AstData::IfThen { .. })
    }

    fn is_if_else(&self, id: AstId) -> bool {
        matches!(self.arena.data(id), AstData::IfElse { .. })
    }

    fn is_loop(&self, id: AstId) -> bool {
        matches!(self.arena.data(id), AstData::DoWhile { .. })
    }

    /// Runs the outward-movement transform over every pending goto.
    pub fn decompile(&mut self) {
        let mut i = 0;
        while i < self.gotos.len() {
            let goto_node = self.gotos[i];
            let label_index = match self.arena.data(goto_node) {
                AstData::Goto { label, .. } => *label,
                _ => return,
            };
            let label = match self.labels[label_index as usize] {
                Some(label) => label,
                None => return,
            };
            if !self.full_decompile && !self.is_backwards_jump(goto_node, label) {
                // Backward-only mode leaves forward gotos in place.
                i += 1;
                continue;
            }
            if self.indirectly_related(goto_node, label) {
                while !self.directly_related(goto_node, label) {
                    self.move_outward(goto_node);
                }
            }
            if self.directly_related(goto_node, label) {
                let mut goto_level = self.arena.level(goto_node);
                let label_level = self.arena.level(label);
                while label_level < goto_level {
                    self.move_outward(goto_node);
                    goto_level -= 1;
                }
            }
            if self.arena.parent(label) == self.arena.parent(goto_node) {
                let mut is_loop = false;
                let mut current = self.arena.prev(goto_node);
                while let Some(id) = current {
                    if id == label {
                        is_loop = true;
                        break;
                    }
                    current = self.arena.prev(id);
                }
                if is_loop {
                    self.enclose_do_while(goto_node, label);
                } else {
                    self.enclose_if_then(goto_node, label);
                }
                self.gotos.remove(i);
                continue;
            }
            i += 1;
        }
        if self.full_decompile {
            for index in 0..self.labels.len() {
                if let Some(label) = self.labels[index] {
                    let parent = self.arena.parent(label).expect("label lost its scope");
                    self.arena.remove(parent, label);
                }
            }
            self.labels.clear();
        } else {
            // Keep labels a remaining goto still targets; mark the rest.
            for index in 0..self.labels.len() {
                let label = match self.labels[index] {
                    Some(label) => label,
                    None => continue,
                };
                let referenced = self.gotos.iter().any(|&goto_node| {
                    matches!(
                        self.arena.data(goto_node),
                        AstData::Goto { label: l, .. } if *l == index as u32
                    )
                });
                if !referenced {
                    if let AstData::Label { unused, .. } = self.arena.data_mut(label) {
                        *unused = true;
                    }
                }
            }
        }
    }

    /// Whether every goto the settings care about has been rewritten.
    pub fn is_fully_decompiled(&self) -> bool {
        if self.full_decompile {
            return self.gotos.is_empty();
        }
        for &goto_node in &self.gotos {
            let label_index = match self.arena.data(goto_node) {
                AstData::Goto { label, .. } => *label,
                _ => return false,
            };
            let label = match self.labels[label_index as usize] {
                Some(label) => label,
                None => return false,
            };
            if self.is_backwards_jump(goto_node, label) {
                return false;
            }
        }
        true
    }

    fn is_backwards_jump(&self, goto_node: AstId, label_node: AstId) -> bool {
        let mut goto_node = goto_node;
        let mut label_node = label_node;
        let mut goto_level = self.arena.level(goto_node);
        let mut label_level = self.arena.level(label_node);
        while goto_level > label_level {
            goto_level -= 1;
            goto_node = self.arena.parent(goto_node).unwrap();
        }
        while label_level > goto_level {
            label_level -= 1;
            label_node = self.arena.parent(label_node).unwrap();
        }
        while self.arena.parent(goto_node) != self.arena.parent(label_node) {
            goto_node = self.arena.parent(goto_node).unwrap();
            label_node = self.arena.parent(label_node).unwrap();
        }
        let mut current = self.arena.prev(goto_node);
        while let Some(id) = current {
            if id == label_node {
                return true;
            }
            current = self.arena.prev(id);
        }
        false
    }

    fn indirectly_related(&self, first: AstId, second: AstId) -> bool {
        !(self.arena.parent(first) == self.arena.parent(second)
            || self.directly_related(first, second))
    }

    /// One node's scope strictly encloses the other's.
    fn directly_related(&self, first: AstId, second: AstId) -> bool {
        if self.arena.parent(first) == self.arena.parent(second) {
            return false;
        }
        let first_level = self.arena.level(first);
        let second_level = self.arena.level(second);
        let (mut max, min, max_level, min_level) = if first_level > second_level {
            (first, second, first_level, second_level)
        } else {
            (second, first, second_level, first_level)
        };
        let mut level = max_level;
        while level > min_level {
            level -= 1;
            max = self.arena.parent(max).unwrap();
        }
        self.arena.parent(min) == self.arena.parent(max)
    }

    fn enclose_do_while(&mut self, goto_node: AstId, label: AstId) {
        let container = self.arena.parent(goto_node).unwrap();
        let loop_start = self.arena.next(label).unwrap();
        if loop_start == goto_node {
            self.arena.remove(container, goto_node);
            return;
        }
        let parent = self.arena.parent(label);
        let condition = self.goto_condition(goto_node);
        self.arena.detach_segment(container, loop_start, goto_node);
        let do_while_node = self.arena.alloc(
            AstData::DoWhile {
                condition,
                body: Zipper::default(),
            },
            parent,
        );
        self.arena.init_body(do_while_node, Some(loop_start));
        self.arena.insert_after(container, do_while_node, Some(label));
        self.arena.remove(do_while_node, goto_node);
    }

    fn enclose_if_then(&mut self, goto_node: AstId, label: AstId) {
        let container = self.arena.parent(goto_node).unwrap();
        let if_end = self.arena.prev(label).unwrap();
        if if_end == goto_node {
            self.arena.remove(container, goto_node);
            return;
        }
        let prev = self.arena.prev(goto_node);
        let condition = self.goto_condition(goto_node);
        let do_else = match (self.disable_else_derivation, prev) {
            (false, Some(prev)) => match self.arena.data(prev) {
                AstData::IfThen {
                    condition: if_condition,
                    ..
                } => expr::exprs_are_equal(if_condition, &condition),
                _ => false,
            },
            _ => false,
        };
        let parent = self.arena.parent(label);
        self.arena.detach_segment(container, goto_node, if_end);
        let if_node = if do_else {
            self.arena.alloc(
                AstData::IfElse {
                    body: Zipper::default(),
                },
                parent,
            )
        } else {
            let neg_condition = expr::make_not(condition);
            self.arena.alloc(
                AstData::IfThen {
                    condition: neg_condition,
                    body: Zipper::default(),
                },
                parent,
            )
        };
        self.arena.init_body(if_node, Some(goto_node));
        self.arena.insert_after(container, if_node, prev);
        self.arena.remove(if_node, goto_node);
    }

    /// Moves a goto one scope outward, preserving semantics with a
    /// fresh flow variable.
    fn move_outward(&mut self, goto_node: AstId) {
        let parent = self.arena.parent(goto_node).unwrap();
        let grandpa = self.arena.parent(parent).unwrap();
        let is_loop = self.is_loop(parent);
        let is_else = self.is_if_else(parent);
        let is_if = self.is_if_then(parent);

        let prev = self.arena.prev(goto_node);
        let post = self.arena.next(goto_node);
        let condition = self.goto_condition(goto_node);
        self.arena.detach_single(parent, goto_node);

        let var_index = self.new_variable();
        let var_condition = expr::make_expr(ExprData::Var(var_index));
        let var_node = self.arena.alloc(
            AstData::VarSet {
                index: var_index,
                condition,
            },
            Some(parent),
        );
        let var_node_init = self.arena.alloc(
            AstData::VarSet {
                index: var_index,
                condition: self.false_condition.clone(),
            },
            Some(grandpa),
        );
        if is_loop {
            self.arena.insert_before(grandpa, var_node_init, Some(parent));
            self.arena.insert_after(parent, var_node, prev);
            self.set_goto_condition(goto_node, var_condition.clone());
            let break_node = self.arena.alloc(
                AstData::Break {
                    condition: var_condition,
                },
                Some(parent),
            );
            self.arena.insert_after(parent, break_node, Some(var_node));
        } else if is_if || is_else {
            if is_if {
                self.arena.insert_before(grandpa, var_node_init, Some(parent));
            } else {
                let before_else = self.arena.prev(parent);
                self.arena.insert_before(grandpa, var_node_init, before_else);
            }
            self.arena.insert_after(parent, var_node, prev);
            self.set_goto_condition(goto_node, var_condition.clone());
            if let Some(post) = post {
                self.arena.detach_tail(parent, post);
                let if_node = self.arena.alloc(
                    AstData::IfThen {
                        condition: expr::make_not(var_condition),
                        body: Zipper::default(),
                    },
                    Some(parent),
                );
                self.arena.init_body(if_node, Some(post));
                self.arena.insert_after(parent, if_node, Some(var_node));
            }
        } else {
            unreachable!("goto owned by a non-scope node");
        }
        let next = self.arena.next(parent);
        if is_if && next.map_or(false, |next| self.is_if_else(next)) {
            self.arena.insert_after(grandpa, goto_node, next);
            return;
        }
        self.arena.insert_after(grandpa, goto_node, Some(parent));
    }

    /// PC ranges of the encoded blocks, in arena order.
    pub fn encoded_ranges(&self) -> Vec<(u32, u32)> {
        let mut ranges = Vec::new();
        for index in 0..self.arena.entries.len() {
            let id = AstId(index as u32);
            if let AstData::BlockEncoded { start, end } = *self.arena.data(id) {
                ranges.push((start, end));
            }
        }
        ranges
    }

    /// Replaces every encoded block through `decode` with its lowered
    /// node list, visiting in the same order as [`encoded_ranges`].
    pub fn decode_blocks<F>(&mut self, mut decode: F)
    where
        F: FnMut(u32, u32) -> NodeBlock,
    {
        for index in 0..self.arena.entries.len() {
            let id = AstId(index as u32);
            if let AstData::BlockEncoded { start, end } = *self.arena.data(id) {
                let nodes = decode(start, end);
                *self.arena.data_mut(id) = AstData::BlockDecoded { nodes };
            }
        }
    }

    /// Renders the program for diagnostics.
    pub fn print(&self) -> String {
        let mut out = String::new();
        self.print_node(&mut out, self.main_node, 0);
        out
    }

    fn print_body(&self, out: &mut String, container: AstId, scope: usize) {
        let mut current = self.arena.first_of(container);
        while let Some(id) = current {
            self.print_node(out, id, scope);
            current = self.arena.next(id);
        }
    }

    fn print_node(&self, out: &mut String, id: AstId, scope: usize) {
        let indent = "  ".repeat(scope);
        match self.arena.data(id) {
            AstData::Program { .. } => {
                let _ = writeln!(out, "program {{");
                self.print_body(out, id, scope + 1);
                let _ = writeln!(out, "}}");
            }
            AstData::IfThen { condition, .. } => {
                let _ = writeln!(out, "{}if ({}) {{", indent, print_expr(condition));
                self.print_body(out, id, scope + 1);
                let _ = writeln!(out, "{}}}", indent);
            }
            AstData::IfElse { .. } => {
                let _ = writeln!(out, "{}else {{", indent);
                self.print_body(out, id, scope + 1);
                let _ = writeln!(out, "{}}}", indent);
            }
            AstData::BlockEncoded { start, end } => {
                let _ = writeln!(out, "{}Block({}, {});", indent, start, end);
            }
            AstData::BlockDecoded { .. } => {
                let _ = writeln!(out, "{}Block;", indent);
            }
            AstData::VarSet { index, condition } => {
                let _ = writeln!(out, "{}V{} := {};", indent, index, print_expr(condition));
            }
            AstData::Label { index, .. } => {
                let _ = writeln!(out, "Label_{}:", index);
            }
            AstData::Goto { condition, label } => {
                let _ = writeln!(
                    out,
                    "{}({}) -> goto Label_{};",
                    indent,
                    print_expr(condition),
                    label
                );
            }
            AstData::DoWhile { condition, .. } => {
                let _ = writeln!(out, "{}do {{", indent);
                self.print_body(out, id, scope + 1);
                let _ = writeln!(out, "{}}} while ({});", indent, print_expr(condition));
            }
            AstData::Return { condition, kills } => {
                let _ = writeln!(
                    out,
                    "{}({}) -> {};",
                    indent,
                    print_expr(condition),
                    if *kills { "discard" } else { "exit" }
                );
            }
            AstData::Break { condition } => {
                let _ = writeln!(out, "{}({}) -> break;", indent, print_expr(condition));
            }
        }
    }
}

fn print_expr(expr: &Expr) -> String {
    match &**expr {
        ExprData::Var(index) => format!("V{}", index),
        ExprData::Predicate(index) => format!("P{}", index),
        ExprData::CondCode(cc) => format!("CC{:?}", cc),
        ExprData::Not(inner) => format!("!{}", print_expr(inner)),
        ExprData::And(a, b) => format!("( {} && {} )", print_expr(a), print_expr(b)),
        ExprData::Or(a, b) => format!("( {} || {} )", print_expr(a), print_expr(b)),
        ExprData::Boolean(value) => format!("{}", value),
        ExprData::GprEqual(gpr, value) => format!("( gpr_{} == {} )", gpr, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::make_expr;

    fn boolean(value: bool) -> Expr {
        make_expr(ExprData::Boolean(value))
    }

    #[test]
    fn forward_goto_becomes_if_then() {
        // Block(0,1); (P0) -> goto L0; Block(2,3); Label_0: Block(4,5);
        let mut manager = AstManager::new(true, false);
        manager.declare_label(4);
        manager.insert_block(0, 1);
        manager.insert_goto(make_expr(ExprData::Predicate(0)), 4);
        manager.insert_block(2, 3);
        manager.insert_label(4);
        manager.insert_block(4, 5);
        manager.decompile();
        assert!(manager.is_fully_decompiled());
        let printed = manager.print();
        assert!(printed.contains("if (!P0)"), "got:\n{}", printed);
        assert!(!printed.contains("goto"), "got:\n{}", printed);
    }

    #[test]
    fn backward_goto_becomes_do_while() {
        // Label_0: Block(0,1); (P1) -> goto L0; Block(2,3);
        let mut manager = AstManager::new(true, false);
        manager.declare_label(0);
        manager.insert_label(0);
        manager.insert_block(0, 1);
        manager.insert_goto(make_expr(ExprData::Predicate(1)), 0);
        manager.insert_block(2, 3);
        manager.decompile();
        assert!(manager.is_fully_decompiled());
        let printed = manager.print();
        assert!(printed.contains("do {"), "got:\n{}", printed);
        assert!(printed.contains("} while (P1);"), "got:\n{}", printed);
    }

    #[test]
    fn trivial_goto_to_next_label_is_removed() {
        let mut manager = AstManager::new(true, false);
        manager.declare_label(2);
        manager.insert_block(0, 1);
        manager.insert_goto(boolean(true), 2);
        manager.insert_label(2);
        manager.insert_block(2, 3);
        manager.decompile();
        assert!(manager.is_fully_decompiled());
        let printed = manager.print();
        assert!(!printed.contains("goto"));
        assert!(!printed.contains("if"));
    }

    #[test]
    fn backwards_only_mode_keeps_forward_gotos() {
        let mut manager = AstManager::new(false, false);
        manager.declare_label(4);
        manager.insert_block(0, 1);
        manager.insert_goto(make_expr(ExprData::Predicate(0)), 4);
        manager.insert_label(4);
        manager.insert_block(4, 5);
        manager.decompile();
        // The forward goto survives but the program still counts as
        // decompiled for backward-only purposes.
        assert!(manager.is_fully_decompiled());
        assert!(manager.print().contains("goto"));
    }

    #[test]
    fn goto_inside_loop_moves_outward() {
        // Label_0: Block; (P0) -> goto L1; (P1) -> goto L0; Label_1: Block;
        // The forward goto to L1 starts inside the do-while formed by the
        // backward goto, forcing outward movement with a flow variable.
        let mut manager = AstManager::new(true, false);
        manager.declare_label(0);
        manager.declare_label(6);
        manager.insert_label(0);
        manager.insert_block(0, 1);
        manager.insert_goto(make_expr(ExprData::Predicate(0)), 6);
        manager.insert_block(2, 3);
        manager.insert_goto(make_expr(ExprData::Predicate(1)), 0);
        manager.insert_label(6);
        manager.insert_block(6, 7);
        manager.decompile();
        assert!(manager.is_fully_decompiled(), "got:\n{}", manager.print());
        let printed = manager.print();
        assert!(printed.contains("do {"), "got:\n{}", printed);
        // The forward goto crossed an if-then scope, so a flow variable
        // carries its condition outward.
        assert!(manager.variables() >= 1);
        assert!(printed.contains("V0"), "got:\n{}", printed);
    }
}
