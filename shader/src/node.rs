//! Typed IR node graph.
//!
//! Values are reference-counted immutable nodes; a "rewrite" always
//! builds a new node wrapping the old one. Composite nodes may carry an
//! amend index into a side table of prelude snippets the emitter
//! materializes before the node.

use crate::inst::{HalfType, ImageType, Register, TextureType};
use smallvec::SmallVec;
use std::cell::Cell;
use std::rc::Rc;

pub type Node = Rc<NodeData>;
pub type NodeBlock = Vec<Node>;

/// Operation codes of composite nodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OperationCode {
    Assign,

    Select,

    FAdd,
    FMul,
    FDiv,
    FFma,
    FNegate,
    FAbsolute,
    FClamp,
    FCastHalf0,
    FCastHalf1,
    FMin,
    FMax,
    FCos,
    FSin,
    FExp2,
    FLog2,
    FInverseSqrt,
    FSqrt,
    FRoundEven,
    FFloor,
    FCeil,
    FTrunc,
    FCastInteger,
    FCastUInteger,
    FSwizzleAdd,

    IAdd,
    IMul,
    INegate,
    IAbsolute,
    IMin,
    IMax,
    ICastFloat,
    ICastUnsigned,
    ILogicalShiftLeft,
    ILogicalShiftRight,
    IArithmeticShiftRight,
    IBitwiseAnd,
    IBitwiseOr,
    IBitwiseXor,
    IBitwiseNot,
    IBitfieldInsert,
    IBitfieldExtract,
    IBitCount,
    IBitMSB,

    UAdd,
    UMul,
    UDiv,
    UMin,
    UMax,
    UCastFloat,
    UCastSigned,
    ULogicalShiftLeft,
    ULogicalShiftRight,
    UArithmeticShiftRight,
    UBitwiseAnd,
    UBitwiseOr,
    UBitwiseXor,
    UBitwiseNot,
    UBitfieldInsert,
    UBitfieldExtract,
    UBitCount,
    UBitMSB,

    HAdd,
    HMul,
    HFma,
    HAbsolute,
    HNegate,
    HClamp,
    HCastFloat,
    HUnpack,
    HMergeF32,
    HMergeH0,
    HMergeH1,
    HPack2,

    LogicalAssign,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalNegate,
    LogicalPick2,
    LogicalAnd2,

    LogicalFLessThan,
    LogicalFEqual,
    LogicalFLessEqual,
    LogicalFGreaterThan,
    LogicalFNotEqual,
    LogicalFGreaterEqual,
    LogicalFIsNan,

    LogicalILessThan,
    LogicalIEqual,
    LogicalILessEqual,
    LogicalIGreaterThan,
    LogicalINotEqual,
    LogicalIGreaterEqual,

    LogicalULessThan,
    LogicalUEqual,
    LogicalULessEqual,
    LogicalUGreaterThan,
    LogicalUNotEqual,
    LogicalUGreaterEqual,

    Logical2HLessThan,
    Logical2HEqual,
    Logical2HLessEqual,
    Logical2HGreaterThan,
    Logical2HNotEqual,
    Logical2HGreaterEqual,
    Logical2HLessThanWithNan,
    Logical2HEqualWithNan,
    Logical2HLessEqualWithNan,
    Logical2HGreaterThanWithNan,
    Logical2HNotEqualWithNan,
    Logical2HGreaterEqualWithNan,

    Texture,
    TextureLod,
    TextureGather,
    TextureQueryDimensions,
    TextureQueryLod,
    TexelFetch,
    TextureGradient,

    ImageLoad,
    ImageStore,

    AtomicImageAdd,
    AtomicImageAnd,
    AtomicImageOr,
    AtomicImageXor,
    AtomicImageExchange,

    AtomicAdd,
    AtomicMin,
    AtomicMax,
    AtomicAnd,
    AtomicOr,
    AtomicXor,
    AtomicExchange,

    Branch,
    BranchIndirect,
    PushFlowStack,
    PopFlowStack,
    Exit,
    Discard,

    EmitVertex,
    EndPrimitive,

    InvocationId,
    YNegate,
    LocalInvocationIdX,
    LocalInvocationIdY,
    LocalInvocationIdZ,
    WorkGroupIdX,
    WorkGroupIdY,
    WorkGroupIdZ,

    BallotThread,
    VoteAll,
    VoteAny,
    VoteEqual,

    ThreadId,
    ThreadEqMask,
    ThreadGeMask,
    ThreadGtMask,
    ThreadLeMask,
    ThreadLtMask,
    ShuffleIndexed,

    MemoryBarrierGl,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InternalFlag {
    Zero,
    Sign,
    Carry,
    Overflow,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetaStackClass {
    Ssy,
    Pbk,
}

//--------------------------------------------------------------------------------------------------

/// A sampler mapping discovered during lowering.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sampler {
    /// Binding slot within the stage.
    pub index: u32,
    /// Constant-buffer offset the handle is read from, in words.
    pub offset: u32,
    /// Constant buffer holding the handle; bindless only.
    pub buffer: Option<u32>,
    pub texture_type: TextureType,
    pub is_array: bool,
    pub is_shadow: bool,
    pub is_buffer: bool,
    pub is_indexed: bool,
    /// Number of array entries for indexed samplers.
    pub size: u32,
}

impl Sampler {
    pub fn is_bindless(&self) -> bool {
        self.buffer.is_some()
    }

    /// Two samplers denote the same mapping when their handle location
    /// matches.
    pub fn same_mapping(&self, buffer: Option<u32>, offset: u32) -> bool {
        self.buffer == buffer && self.offset == offset
    }
}

/// An image mapping discovered during lowering. The access marks only
/// ever grow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    pub index: u32,
    pub offset: u32,
    pub buffer: Option<u32>,
    pub image_type: ImageType,
    pub is_written: bool,
    pub is_read: bool,
    pub is_atomic: bool,
}

impl Image {
    pub fn is_bindless(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn mark_read(&mut self) {
        self.is_read = true;
    }

    pub fn mark_write(&mut self) {
        self.is_written = true;
    }

    pub fn mark_atomic(&mut self) {
        self.is_read = true;
        self.is_written = true;
        self.is_atomic = true;
    }
}

/// Identifies a global-memory region by the constant-buffer location its
/// base address is read from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GlobalMemoryBase {
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GlobalMemoryUsage {
    pub is_read: bool,
    pub is_written: bool,
}

//--------------------------------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetaArithmetic {
    pub precise: bool,
}

pub const PRECISE: MetaArithmetic = MetaArithmetic { precise: true };
pub const NO_PRECISE: MetaArithmetic = MetaArithmetic { precise: false };

#[derive(Clone, Debug)]
pub struct MetaTexture {
    pub sampler: Sampler,
    pub array: Option<Node>,
    pub depth_compare: Option<Node>,
    pub aoffi: Vec<Node>,
    pub ptp: Vec<Node>,
    pub derivates: Vec<Node>,
    pub bias: Option<Node>,
    pub lod: Option<Node>,
    pub component: Option<Node>,
    pub element: u32,
    /// Dynamic index for indexed samplers.
    pub index: Option<Node>,
}

#[derive(Clone, Debug)]
pub struct MetaImage {
    pub image: Image,
    pub values: Vec<Node>,
    pub element: u32,
}

/// Extra operand-independent payload of an operation.
#[derive(Clone, Debug)]
pub enum Meta {
    None,
    Arithmetic(MetaArithmetic),
    Half([HalfType; 3]),
    Texture(MetaTexture),
    Image(MetaImage),
    Stack(MetaStackClass),
}

/// Composite operation node.
#[derive(Clone, Debug)]
pub struct OperationNode {
    code: OperationCode,
    meta: Meta,
    operands: SmallVec<[Node; 4]>,
    amend_index: Cell<Option<usize>>,
}

impl OperationNode {
    pub fn new(code: OperationCode, meta: Meta, operands: SmallVec<[Node; 4]>) -> OperationNode {
        OperationNode {
            code,
            meta,
            operands,
            amend_index: Cell::new(None),
        }
    }

    pub fn code(&self) -> OperationCode {
        self.code
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn operands(&self) -> &[Node] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> &Node {
        &self.operands[index]
    }

    pub fn amend_index(&self) -> Option<usize> {
        self.amend_index.get()
    }

    pub fn set_amend_index(&self, index: usize) {
        self.amend_index.set(Some(index));
    }
}

/// A list of nodes executed only when a boolean condition holds.
#[derive(Clone, Debug)]
pub struct ConditionalNode {
    condition: Node,
    code: NodeBlock,
    amend_index: Cell<Option<usize>>,
}

impl ConditionalNode {
    pub fn new(condition: Node, code: NodeBlock) -> ConditionalNode {
        ConditionalNode {
            condition,
            code,
            amend_index: Cell::new(None),
        }
    }

    pub fn condition(&self) -> &Node {
        &self.condition
    }

    pub fn code(&self) -> &NodeBlock {
        &self.code
    }

    pub fn amend_index(&self) -> Option<usize> {
        self.amend_index.get()
    }

    pub fn set_amend_index(&self, index: usize) {
        self.amend_index.set(Some(index));
    }
}

/// Attribute buffer access.
#[derive(Clone, Debug)]
pub struct AbufNode {
    pub index: crate::inst::AttributeIndex,
    pub element: u32,
    /// Dynamic buffer operand for geometry-stage array access.
    pub buffer: Option<Node>,
}

#[derive(Clone, Debug)]
pub enum NodeData {
    Operation(OperationNode),
    Conditional(ConditionalNode),
    Gpr(Register),
    CustomVar(u32),
    Immediate(u32),
    InternalFlag(InternalFlag),
    Predicate { index: u32, negated: bool },
    Abuf(AbufNode),
    Patch { offset: u32 },
    Cbuf { index: u32, offset: Node },
    Lmem(Node),
    Smem(Node),
    Gmem { real_address: Node, base_address: Node, base: GlobalMemoryBase },
    Comment(String),
}

/// Sampler back-tracking result.
#[derive(Clone, Debug)]
pub enum TrackSampler {
    /// The handle comes straight from a constant-buffer slot.
    Bindless { cbuf: u32, offset: u32 },
    /// The handle is an array indexed by a custom variable.
    Array {
        cbuf: u32,
        base_offset: u32,
        index_var: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_mapping_key() {
        let bound = Sampler {
            index: 0,
            offset: 8,
            buffer: None,
            texture_type: TextureType::Texture2D,
            is_array: false,
            is_shadow: false,
            is_buffer: false,
            is_indexed: false,
            size: 1,
        };
        assert!(bound.same_mapping(None, 8));
        assert!(!bound.same_mapping(Some(1), 8));
        assert!(!bound.same_mapping(None, 12));
    }

    #[test]
    fn image_marks_are_monotonic() {
        let mut image = Image {
            index: 0,
            offset: 4,
            buffer: None,
            image_type: ImageType::Texture2D,
            is_written: false,
            is_read: false,
            is_atomic: false,
        };
        image.mark_read();
        assert!(image.is_read && !image.is_written);
        image.mark_atomic();
        assert!(image.is_read && image.is_written && image.is_atomic);
    }
}
