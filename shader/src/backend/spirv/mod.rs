//! SPIR-V emission from the typed IR.
//!
//! Every guest register is modeled as a private 32-bit variable; values
//! travel as 32-bit words and are bitcast into the domain each
//! operation needs. Predicates, internal flags and structurizer flow
//! variables are private booleans. Decompiled programs emit structured
//! selections and loops; programs that kept explicit flow run a
//! dispatch loop switching on a virtual PC, with the SSY/PBK stacks in
//! private arrays.

mod module;

pub use self::module::{ModuleBuilder, Type};

use crate::ast::{AstData, AstId};
use crate::backend::Bindings;
use crate::expr::{Expr, ExprData};
use crate::info::Info;
use crate::inst::{AttributeIndex, ImageType, Register, TextureType};
use crate::node::{
    AbufNode, InternalFlag, Meta, MetaStackClass, MetaTexture, Node, NodeData, OperationCode,
    Sampler,
};
use crate::profile::{CompareFunction, Profile, RuntimeInfo};
use crate::program::Program;
use crate::shader_ir::ShaderIr;
use crate::{ShaderError, ShaderStage};
use fxhash::FxHashMap;
use spirv_headers::{
    BuiltIn, Capability, Decoration, Dim, ExecutionMode, ExecutionModel, Op, StorageClass,
};

// GLSL.std.450 instruction numbers used by the emitter.
const GLSL_ROUND_EVEN: u32 = 2;
const GLSL_TRUNC: u32 = 3;
const GLSL_FABS: u32 = 4;
const GLSL_SABS: u32 = 5;
const GLSL_FLOOR: u32 = 8;
const GLSL_CEIL: u32 = 9;
const GLSL_SIN: u32 = 13;
const GLSL_COS: u32 = 14;
const GLSL_EXP2: u32 = 29;
const GLSL_LOG2: u32 = 30;
const GLSL_SQRT: u32 = 31;
const GLSL_INVERSE_SQRT: u32 = 32;
const GLSL_FMIN: u32 = 37;
const GLSL_FMAX: u32 = 40;
const GLSL_FCLAMP: u32 = 43;
const GLSL_FMA: u32 = 50;
const GLSL_PACK_HALF_2X16: u32 = 58;
const GLSL_UNPACK_HALF_2X16: u32 = 62;
const GLSL_FIND_SMSB: u32 = 74;
const GLSL_FIND_UMSB: u32 = 75;

const FLOW_STACK_SIZE: u32 = 0x20;

/// Emits one translated stage. The binding counter is shared across
/// the stages of a pipeline.
pub fn emit_spirv(
    profile: &Profile,
    runtime_info: &RuntimeInfo,
    program: &Program,
    bindings: &mut Bindings,
) -> Result<Vec<u32>, ShaderError> {
    let stage = program.stage();
    let execution_model = match stage {
        ShaderStage::Vertex => ExecutionModel::Vertex,
        ShaderStage::TesselationControl => ExecutionModel::TessellationControl,
        ShaderStage::TesselationEval => ExecutionModel::TessellationEvaluation,
        ShaderStage::Geometry => ExecutionModel::Geometry,
        ShaderStage::Fragment => ExecutionModel::Fragment,
        ShaderStage::Compute => ExecutionModel::GLCompute,
    };
    let mut emitter = Emitter {
        module: ModuleBuilder::new(profile.supported_spirv, execution_model),
        profile,
        runtime_info,
        info: &program.info,
        stage,
        registers: FxHashMap::default(),
        predicates: FxHashMap::default(),
        flow_variables: FxHashMap::default(),
        custom_variables: FxHashMap::default(),
        internal_flags: [0; 4],
        input_attributes: FxHashMap::default(),
        output_attributes: FxHashMap::default(),
        cbufs: FxHashMap::default(),
        gmems: FxHashMap::default(),
        samplers: FxHashMap::default(),
        images: FxHashMap::default(),
        frag_colors: [0; 8],
        frag_depth: 0,
        position: 0,
        point_size: 0,
        clip_distances: 0,
        vertex_index: 0,
        instance_index: 0,
        front_facing: 0,
        local_invocation_id: 0,
        workgroup_id: 0,
        local_memory: 0,
        shared_memory: 0,
        jmp_to: 0,
        ssy_stack: 0,
        ssy_top: 0,
        pbk_stack: 0,
        pbk_top: 0,
        loop_merge_stack: Vec::new(),
        terminated: false,
        frag_color_masks: [[false; 4]; 8],
        epilogue_emitted_depth: false,
    };
    if let Some(vertex_a) = &program.vertex_a {
        // The merged vertex program shares one binding table; a VertexA
        // that samples on its own cannot be expressed in it.
        if !vertex_a.ir.used_samplers().is_empty() || !vertex_a.ir.used_images().is_empty() {
            return Err(ShaderError::Emission(
                "VertexA with texture accesses".into(),
            ));
        }
    }
    emitter.declare_capabilities(program);
    emitter.declare_resources(program, bindings)?;
    emitter.emit_main(program)?;
    Ok(emitter.module.assemble("main"))
}

struct Emitter<'a> {
    module: ModuleBuilder,
    profile: &'a Profile,
    runtime_info: &'a RuntimeInfo,
    info: &'a Info,
    stage: ShaderStage,

    registers: FxHashMap<u32, u32>,
    predicates: FxHashMap<u32, u32>,
    flow_variables: FxHashMap<u32, u32>,
    custom_variables: FxHashMap<u32, u32>,
    internal_flags: [u32; 4],
    input_attributes: FxHashMap<u32, u32>,
    output_attributes: FxHashMap<u32, u32>,
    cbufs: FxHashMap<u32, (u32, u32)>,
    gmems: FxHashMap<(u32, u32), u32>,
    samplers: FxHashMap<u32, SamplerIds>,
    images: FxHashMap<u32, (u32, u32)>,

    frag_colors: [u32; 8],
    frag_depth: u32,
    position: u32,
    point_size: u32,
    clip_distances: u32,
    vertex_index: u32,
    instance_index: u32,
    front_facing: u32,
    local_invocation_id: u32,
    workgroup_id: u32,
    local_memory: u32,
    shared_memory: u32,

    jmp_to: u32,
    ssy_stack: u32,
    ssy_top: u32,
    pbk_stack: u32,
    pbk_top: u32,

    loop_merge_stack: Vec<u32>,
    terminated: bool,
    frag_color_masks: [[bool; 4]; 8],
    epilogue_emitted_depth: bool,
}

#[derive(Copy, Clone)]
struct SamplerIds {
    variable: u32,
    image_type: u32,
    sampled_type: u32,
    /// Coordinate components of the image dimension, arrays included.
    size_components: u32,
}

impl<'a> Emitter<'a> {
    fn declare_capabilities(&mut self, program: &Program) {
        let info = &program.info;
        if program.ir.uses_warps() && self.profile.support_vote {
            self.module.add_capability(Capability::SubgroupBallotKHR);
            self.module.add_extension("SPV_KHR_shader_ballot");
        }
        if info
            .usage
            .contains(crate::info::UsageFlags::DEMOTE_TO_HELPER)
            && self.profile.support_demote_to_helper_invocation
        {
            self.module
                .add_extension("SPV_EXT_demote_to_helper_invocation");
            self.module
                .add_capability(Capability::DemoteToHelperInvocationEXT);
        }
        if info
            .usage
            .contains(crate::info::UsageFlags::TYPELESS_IMAGE_READS)
            && self.profile.support_typeless_image_loads
        {
            self.module
                .add_capability(Capability::StorageImageReadWithoutFormat);
        }
        if info
            .usage
            .contains(crate::info::UsageFlags::TYPELESS_IMAGE_WRITES)
        {
            self.module
                .add_capability(Capability::StorageImageWriteWithoutFormat);
        }
        if self.stage == ShaderStage::Geometry {
            self.module.add_capability(Capability::Geometry);
        }
        if program.ir.uses_viewport_index() {
            self.module.add_capability(Capability::MultiViewport);
            if self.stage != ShaderStage::Geometry
                && self.profile.support_viewport_index_layer_non_geometry
            {
                self.module
                    .add_extension("SPV_EXT_shader_viewport_index_layer");
                self.module
                    .add_capability(Capability::ShaderViewportIndexLayerEXT);
            }
        }
        if info.clip_distances_mask != 0 {
            self.module.add_capability(Capability::ClipDistance);
        }
    }

    //----------------------------------------------------------------------------------------------
    // Resource declaration.

    fn declare_resources(
        &mut self,
        program: &Program,
        bindings: &mut Bindings,
    ) -> Result<(), ShaderError> {
        let ir = &program.ir;

        // Guest registers, predicates and assorted private state.
        fn declare_regs(emitter: &mut Emitter<'_>, ir: &ShaderIr<'_>) {
            for &reg in ir.used_registers() {
                emitter.register_variable(reg);
            }
            for &pred in ir.used_predicates() {
                emitter.predicate_variable(pred);
            }
            for variable in 0..ir.num_flow_variables() {
                emitter.flow_variable(variable);
            }
            for custom in 0..ir.num_custom_variables() {
                emitter.custom_variable(custom);
            }
        }
        if let Some(vertex_a) = &program.vertex_a {
            declare_regs(self, &vertex_a.ir);
        }
        declare_regs(self, ir);
        for flag in 0..4 {
            let init = self.module.const_bool(false);
            let id = self
                .module
                .variable_init(StorageClass::Private, Type::Bool, init);
            self.internal_flags[flag] = id;
        }
        let zero = self.module.const_u32(0);
        self.jmp_to = self
            .module
            .variable_init(StorageClass::Private, Type::Uint, zero);
        let stack_type = Type::Array(Box::new(Type::Uint), FLOW_STACK_SIZE);
        self.ssy_stack = self.module.variable(StorageClass::Private, stack_type.clone());
        self.pbk_stack = self.module.variable(StorageClass::Private, stack_type);
        self.ssy_top = self
            .module
            .variable_init(StorageClass::Private, Type::Uint, zero);
        self.pbk_top = self
            .module
            .variable_init(StorageClass::Private, Type::Uint, zero);

        // Local and shared memory.
        let local_size = (self.info.local_memory_size as u32 / 4).max(1);
        self.local_memory = self.module.variable(
            StorageClass::Private,
            Type::Array(Box::new(Type::Uint), local_size),
        );
        if self.stage == ShaderStage::Compute {
            let shared_size = 0x1000;
            self.shared_memory = self.module.variable(
                StorageClass::Workgroup,
                Type::Array(Box::new(Type::Uint), shared_size),
            );
        }

        // Constant buffers: an array of uvec4, std140.
        for descriptor in &self.info.constant_buffer_descriptors {
            let size = self.info.constant_buffer_used_sizes[descriptor.index as usize].max(4);
            let vec4_count = (size + 15) / 16;
            let array = Type::Array(
                Box::new(Type::Vector(Box::new(Type::Uint), 4)),
                vec4_count.max(1),
            );
            let array_id = self.module.type_id(array.clone());
            self.module
                .decorate(array_id, Decoration::ArrayStride, &[16]);
            let struct_id = self.module.allocate_id();
            let mut words = Vec::new();
            module::encode(&mut words, Op::TypeStruct, &[struct_id, array_id]);
            self.module.globals.extend_from_slice(&words);
            self.module.decorate(struct_id, Decoration::Block, &[]);
            self.module
                .member_decorate(struct_id, 0, Decoration::Offset, &[0]);
            let variable = self.module.raw_variable(StorageClass::Uniform, struct_id);

            let binding = bindings.allocate();
            self.module
                .decorate(variable, Decoration::DescriptorSet, &[0]);
            self.module.decorate(variable, Decoration::Binding, &[binding]);
            self.cbufs.insert(descriptor.index, (variable, binding));
        }

        // Storage buffers for tracked global memory.
        for descriptor in &self.info.storage_buffers_descriptors {
            let array = Type::RuntimeArray(Box::new(Type::Uint));
            let array_id = self.module.type_id(array);
            self.module.decorate(array_id, Decoration::ArrayStride, &[4]);
            let struct_id = self.module.allocate_id();
            let mut words = Vec::new();
            module::encode(&mut words, Op::TypeStruct, &[struct_id, array_id]);
            self.module.globals.extend_from_slice(&words);
            self.module
                .decorate(struct_id, Decoration::BufferBlock, &[]);
            self.module
                .member_decorate(struct_id, 0, Decoration::Offset, &[0]);
            if !descriptor.is_written {
                self.module
                    .member_decorate(struct_id, 0, Decoration::NonWritable, &[]);
            }
            let variable = self.module.raw_variable(StorageClass::Uniform, struct_id);
            let binding = bindings.allocate();
            self.module
                .decorate(variable, Decoration::DescriptorSet, &[0]);
            self.module.decorate(variable, Decoration::Binding, &[binding]);
            self.gmems.insert(
                (descriptor.cbuf_index, descriptor.cbuf_offset),
                variable,
            );
        }

        // Samplers follow the descriptor declaration order.
        for sampler in ir.used_samplers() {
            let dim = match (sampler.is_buffer, sampler.texture_type) {
                (true, _) => Dim::DimBuffer,
                (false, TextureType::Texture1D) => Dim::Dim1D,
                (false, TextureType::Texture2D) => Dim::Dim2D,
                (false, TextureType::Texture3D) => Dim::Dim3D,
                (false, TextureType::TextureCube) => Dim::DimCube,
            };
            if dim == Dim::Dim1D {
                self.module.add_capability(Capability::Sampled1D);
            }
            if dim == Dim::DimBuffer {
                self.module.add_capability(Capability::SampledBuffer);
            }
            let image_type = self.module.image_type(module::ImageTypeKey {
                dim,
                depth: false,
                arrayed: sampler.is_array,
                sampled: true,
            });
            let sampled_type = self.module.sampled_image_type(image_type);
            let count = sampler.size.max(1);
            let pointee = if count > 1 {
                // Indexed sampler arrays share one variable.
                let array_id = self.module.allocate_id();
                let length = self.module.const_u32(count);
                let mut words = Vec::new();
                module::encode(&mut words, Op::TypeArray, &[array_id, sampled_type, length]);
                self.module.globals.extend_from_slice(&words);
                array_id
            } else {
                sampled_type
            };
            let variable = self
                .module
                .raw_variable(StorageClass::UniformConstant, pointee);
            let binding = bindings.allocate();
            self.module
                .decorate(variable, Decoration::DescriptorSet, &[0]);
            self.module.decorate(variable, Decoration::Binding, &[binding]);
            let size_components = match dim {
                Dim::Dim1D | Dim::DimBuffer => 1,
                Dim::Dim2D => 2,
                _ => 3,
            } + u32::from(sampler.is_array);
            self.samplers.insert(
                sampler.index,
                SamplerIds {
                    variable,
                    image_type,
                    sampled_type,
                    size_components,
                },
            );
        }

        // Storage images.
        for image in ir.used_images() {
            let dim = match image.image_type {
                ImageType::Texture1D | ImageType::Texture1DArray => Dim::Dim1D,
                ImageType::TextureBuffer => Dim::DimBuffer,
                ImageType::Texture2D | ImageType::Texture2DArray => Dim::Dim2D,
                ImageType::Texture3D => Dim::Dim3D,
            };
            if dim == Dim::Dim1D {
                self.module.add_capability(Capability::Image1D);
            }
            if dim == Dim::DimBuffer {
                self.module.add_capability(Capability::ImageBuffer);
            }
            let arrayed = matches!(
                image.image_type,
                ImageType::Texture1DArray | ImageType::Texture2DArray
            );
            let image_type = self.module.image_type(module::ImageTypeKey {
                dim,
                depth: false,
                arrayed,
                sampled: false,
            });
            let variable = self
                .module
                .raw_variable(StorageClass::UniformConstant, image_type);
            let binding = bindings.allocate();
            self.module
                .decorate(variable, Decoration::DescriptorSet, &[0]);
            self.module.decorate(variable, Decoration::Binding, &[binding]);
            self.images.insert(image.index, (variable, image_type));
        }

        self.declare_io(program)?;
        Ok(())
    }

    fn register_variable(&mut self, reg: u32) -> u32 {
        if let Some(&id) = self.registers.get(&reg) {
            return id;
        }
        let zero = self.module.const_u32(0);
        let id = self
            .module
            .variable_init(StorageClass::Private, Type::Uint, zero);
        self.registers.insert(reg, id);
        id
    }

    fn predicate_variable(&mut self, pred: u32) -> u32 {
        if let Some(&id) = self.predicates.get(&pred) {
            return id;
        }
        let init = self.module.const_bool(false);
        let id = self
            .module
            .variable_init(StorageClass::Private, Type::Bool, init);
        self.predicates.insert(pred, id);
        id
    }

    fn flow_variable(&mut self, variable: u32) -> u32 {
        if let Some(&id) = self.flow_variables.get(&variable) {
            return id;
        }
        let init = self.module.const_bool(false);
        let id = self
            .module
            .variable_init(StorageClass::Private, Type::Bool, init);
        self.flow_variables.insert(variable, id);
        id
    }

    fn custom_variable(&mut self, variable: u32) -> u32 {
        if let Some(&id) = self.custom_variables.get(&variable) {
            return id;
        }
        let zero = self.module.const_u32(0);
        let id = self
            .module
            .variable_init(StorageClass::Private, Type::Uint, zero);
        self.custom_variables.insert(variable, id);
        id
    }

    fn declare_io(&mut self, program: &Program) -> Result<(), ShaderError> {
        let ir = &program.ir;
        let vec4f = Type::Vector(Box::new(Type::Float), 4);
        match self.stage {
            ShaderStage::Vertex => {
                for &index in ir.used_input_attributes() {
                    if let AttributeIndex::Attribute(location) = index {
                        let id = self.module.variable(StorageClass::Input, vec4f.clone());
                        self.module.decorate(id, Decoration::Location, &[location]);
                        self.module.add_interface(id);
                        self.input_attributes.insert(location, id);
                    }
                }
                if ir.uses_instance_id() {
                    let id = self.module.variable(StorageClass::Input, Type::Uint);
                    self.module.decorate(
                        id,
                        Decoration::BuiltIn,
                        &[BuiltIn::InstanceIndex as u32],
                    );
                    self.module.add_interface(id);
                    self.instance_index = id;
                }
                if ir.uses_vertex_id() {
                    let id = self.module.variable(StorageClass::Input, Type::Uint);
                    self.module
                        .decorate(id, Decoration::BuiltIn, &[BuiltIn::VertexIndex as u32]);
                    self.module.add_interface(id);
                    self.vertex_index = id;
                }
                self.position = self.module.variable(StorageClass::Output, vec4f.clone());
                self.module
                    .decorate(self.position, Decoration::BuiltIn, &[BuiltIn::Position as u32]);
                self.module.add_interface(self.position);
                if ir.uses_point_size() || self.runtime_info.fixed_state_point_size.is_some() {
                    let id = self.module.variable(StorageClass::Output, Type::Float);
                    self.module
                        .decorate(id, Decoration::BuiltIn, &[BuiltIn::PointSize as u32]);
                    self.module.add_interface(id);
                    self.point_size = id;
                }
                if self.info.clip_distances_mask != 0 {
                    let array = Type::Array(Box::new(Type::Float), 8);
                    let id = self.module.variable(StorageClass::Output, array);
                    self.module
                        .decorate(id, Decoration::BuiltIn, &[BuiltIn::ClipDistance as u32]);
                    self.module.add_interface(id);
                    self.clip_distances = id;
                }
                for &index in ir.used_output_attributes() {
                    if let AttributeIndex::Attribute(location) = index {
                        let id = self.module.variable(StorageClass::Output, vec4f.clone());
                        self.module.decorate(id, Decoration::Location, &[location]);
                        self.module.add_interface(id);
                        self.output_attributes.insert(location, id);
                    }
                }
            }
            ShaderStage::Fragment => {
                for &index in ir.used_input_attributes() {
                    match index {
                        AttributeIndex::Attribute(location) => {
                            let id = self.module.variable(StorageClass::Input, vec4f.clone());
                            self.module.decorate(id, Decoration::Location, &[location]);
                            self.module.add_interface(id);
                            self.input_attributes.insert(location, id);
                        }
                        AttributeIndex::Position => {
                            let id = self.module.variable(StorageClass::Input, vec4f.clone());
                            self.module.decorate(
                                id,
                                Decoration::BuiltIn,
                                &[BuiltIn::FragCoord as u32],
                            );
                            self.module.add_interface(id);
                            self.position = id;
                        }
                        AttributeIndex::FrontFacing => {
                            let id = self.module.variable(StorageClass::Input, Type::Bool);
                            self.module.decorate(
                                id,
                                Decoration::BuiltIn,
                                &[BuiltIn::FrontFacing as u32],
                            );
                            self.module.add_interface(id);
                            self.front_facing = id;
                        }
                        _ => {}
                    }
                }
                for rt in 0..8u32 {
                    let mut writes = false;
                    for component in 0..4 {
                        let enabled = ir.header().ps_color_output_enabled(rt, component);
                        self.frag_color_masks[rt as usize][component as usize] = enabled;
                        writes |= enabled;
                    }
                    if !writes && rt != 0 {
                        continue;
                    }
                    if rt == 0 && !writes {
                        // Render target zero always exports something.
                        self.frag_color_masks[0] = [true; 4];
                    }
                    let id = self.module.variable(StorageClass::Output, vec4f.clone());
                    self.module.decorate(id, Decoration::Location, &[rt]);
                    self.module.add_interface(id);
                    self.frag_colors[rt as usize] = id;
                }
                if ir.header().ps_writes_depth() {
                    let id = self.module.variable(StorageClass::Output, Type::Float);
                    self.module
                        .decorate(id, Decoration::BuiltIn, &[BuiltIn::FragDepth as u32]);
                    self.module.add_interface(id);
                    self.frag_depth = id;
                    self.module
                        .add_execution_mode(ExecutionMode::DepthReplacing, &[]);
                }
                self.module
                    .add_execution_mode(ExecutionMode::OriginUpperLeft, &[]);
                if self.runtime_info.force_early_z {
                    self.module
                        .add_execution_mode(ExecutionMode::EarlyFragmentTests, &[]);
                }
            }
            ShaderStage::Compute => {
                let uvec3 = Type::Vector(Box::new(Type::Uint), 3);
                let id = self.module.variable(StorageClass::Input, uvec3.clone());
                self.module.decorate(
                    id,
                    Decoration::BuiltIn,
                    &[BuiltIn::LocalInvocationId as u32],
                );
                self.module.add_interface(id);
                self.local_invocation_id = id;
                let id = self.module.variable(StorageClass::Input, uvec3);
                self.module
                    .decorate(id, Decoration::BuiltIn, &[BuiltIn::WorkgroupId as u32]);
                self.module.add_interface(id);
                self.workgroup_id = id;
            }
            _ => {
                // Tessellation and geometry interfaces reuse the vertex
                // paths for generic attributes.
                for &index in ir.used_input_attributes() {
                    if let AttributeIndex::Attribute(location) = index {
                        let id = self.module.variable(StorageClass::Input, vec4f.clone());
                        self.module.decorate(id, Decoration::Location, &[location]);
                        self.module.add_interface(id);
                        self.input_attributes.insert(location, id);
                    }
                }
                for &index in ir.used_output_attributes() {
                    if let AttributeIndex::Attribute(location) = index {
                        let id = self.module.variable(StorageClass::Output, vec4f.clone());
                        self.module.decorate(id, Decoration::Location, &[location]);
                        self.module.add_interface(id);
                        self.output_attributes.insert(location, id);
                    }
                }
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Main body emission.

    fn emit_main(&mut self, program: &Program) -> Result<(), ShaderError> {
        if self.stage == ShaderStage::Compute {
            // Workgroup size is fixed at dispatch; a placeholder of one
            // is patched by specialization when needed.
            self.module
                .add_execution_mode(ExecutionMode::LocalSize, &[1, 1, 1]);
        }
        let entry = self.module.allocate_id();
        self.module.label(entry);
        self.terminated = false;

        if let Some(vertex_a) = &program.vertex_a {
            self.emit_program_body(&vertex_a.ir)?;
            // VertexA falls through into VertexB.
            self.terminated = false;
        }
        self.emit_program_body(&program.ir)?;

        if !self.terminated {
            self.emit_epilogue();
            self.module.op_void(Op::Return, &[]);
        }
        Ok(())
    }

    fn emit_program_body(&mut self, ir: &ShaderIr) -> Result<(), ShaderError> {
        if let Some(manager) = ir.program_manager() {
            self.emit_ast_children(ir, manager, manager.program())?;
            return Ok(());
        }
        self.emit_dispatch_loop(ir)
    }

    //----------------------------------------------------------------------------------------------
    // Structured (decompiled) emission.

    fn emit_ast_children(
        &mut self,
        ir: &ShaderIr,
        manager: &crate::ast::AstManager,
        container: AstId,
    ) -> Result<(), ShaderError> {
        let arena = manager.arena();
        let mut current = arena.first_of(container);
        while let Some(id) = current {
            if self.terminated {
                break;
            }
            let next = arena.next(id);
            match arena.data(id) {
                AstData::Program { .. } => {}
                AstData::BlockDecoded { nodes } => {
                    for node in nodes {
                        self.emit_statement(ir, node)?;
                        if self.terminated {
                            break;
                        }
                    }
                }
                AstData::BlockEncoded { .. } => {
                    return Err(ShaderError::Emission(
                        "encoded block reached the emitter".into(),
                    ));
                }
                AstData::VarSet { index, condition } => {
                    let variable = self.flow_variable(*index);
                    let value = self.emit_expr(ir, condition);
                    self.module.op_void(Op::Store, &[variable, value]);
                }
                AstData::IfThen { condition, .. } => {
                    // A following IfElse belongs to this construct.
                    let else_node = next.filter(|&n| {
                        matches!(arena.data(n), AstData::IfElse { .. })
                    });
                    let cond = self.emit_expr(ir, condition);
                    let merge = self.module.allocate_id();
                    let true_label = self.module.allocate_id();
                    let false_label = if else_node.is_some() {
                        self.module.allocate_id()
                    } else {
                        merge
                    };
                    self.module
                        .op_void(Op::SelectionMerge, &[merge, 0]);
                    self.module
                        .op_void(Op::BranchConditional, &[cond, true_label, false_label]);
                    self.module.label(true_label);
                    self.emit_ast_children(ir, manager, id)?;
                    if !self.terminated {
                        self.module.op_void(Op::Branch, &[merge]);
                    }
                    self.terminated = false;
                    if let Some(else_id) = else_node {
                        self.module.label(false_label);
                        self.emit_ast_children(ir, manager, else_id)?;
                        if !self.terminated {
                            self.module.op_void(Op::Branch, &[merge]);
                        }
                        self.terminated = false;
                    }
                    self.module.label(merge);
                }
                AstData::IfElse { .. } => {
                    // Consumed by the preceding IfThen.
                }
                AstData::DoWhile { condition, .. } => {
                    let header = self.module.allocate_id();
                    let body = self.module.allocate_id();
                    let continue_label = self.module.allocate_id();
                    let merge = self.module.allocate_id();
                    self.module.op_void(Op::Branch, &[header]);
                    self.module.label(header);
                    self.module
                        .op_void(Op::LoopMerge, &[merge, continue_label, 0]);
                    self.module.op_void(Op::Branch, &[body]);
                    self.module.label(body);
                    self.loop_merge_stack.push(merge);
                    self.emit_ast_children(ir, manager, id)?;
                    self.loop_merge_stack.pop();
                    if !self.terminated {
                        self.module.op_void(Op::Branch, &[continue_label]);
                    }
                    self.terminated = false;
                    self.module.label(continue_label);
                    let cond = self.emit_expr(ir, condition);
                    self.module
                        .op_void(Op::BranchConditional, &[cond, header, merge]);
                    self.module.label(merge);
                }
                AstData::Return { condition, kills } => {
                    self.emit_conditional_return(ir, condition, *kills)?;
                }
                AstData::Break { condition } => {
                    let merge = *self
                        .loop_merge_stack
                        .last()
                        .ok_or_else(|| ShaderError::Emission("break outside loop".into()))?;
                    if crate::expr::expr_is_true(condition) {
                        self.module.op_void(Op::Branch, &[merge]);
                        self.terminated = true;
                    } else {
                        let cond = self.emit_expr(ir, condition);
                        let cont = self.module.allocate_id();
                        let break_label = self.module.allocate_id();
                        self.module.op_void(Op::SelectionMerge, &[cont, 0]);
                        self.module
                            .op_void(Op::BranchConditional, &[cond, break_label, cont]);
                        self.module.label(break_label);
                        self.module.op_void(Op::Branch, &[merge]);
                        self.module.label(cont);
                    }
                }
                AstData::Label { .. } => {}
                AstData::Goto { .. } => {
                    return Err(ShaderError::Emission("unstructured goto".into()));
                }
            }
            current = next;
        }
        Ok(())
    }

    fn emit_conditional_return(
        &mut self,
        ir: &ShaderIr,
        condition: &Expr,
        kills: bool,
    ) -> Result<(), ShaderError> {
        if crate::expr::expr_is_true(condition) {
            if kills {
                self.emit_kill_and_end();
            } else {
                self.emit_epilogue();
                self.module.op_void(Op::Return, &[]);
            }
            self.terminated = true;
            return Ok(());
        }
        let cond = self.emit_expr(ir, condition);
        let merge = self.module.allocate_id();
        let taken = self.module.allocate_id();
        self.module.op_void(Op::SelectionMerge, &[merge, 0]);
        self.module
            .op_void(Op::BranchConditional, &[cond, taken, merge]);
        self.module.label(taken);
        if kills {
            self.emit_kill_and_end();
        } else {
            self.emit_epilogue();
            self.module.op_void(Op::Return, &[]);
        }
        self.module.label(merge);
        Ok(())
    }

    /// Ends the invocation after a kill: demote keeps the block alive,
    /// so a return terminator follows it.
    fn emit_kill_and_end(&mut self) {
        if self.profile.support_demote_to_helper_invocation
            && self.stage == ShaderStage::Fragment
        {
            self.module.op_void(Op::DemoteToHelperInvocationEXT, &[]);
            self.module.op_void(Op::Return, &[]);
        } else {
            self.module.op_void(Op::Kill, &[]);
        }
    }

    fn emit_discard(&mut self) {
        if self.profile.support_demote_to_helper_invocation
            && self.stage == ShaderStage::Fragment
        {
            self.module.op_void(Op::DemoteToHelperInvocationEXT, &[]);
        } else {
            self.module.op_void(Op::Kill, &[]);
        }
    }

    fn emit_expr(&mut self, ir: &ShaderIr, expr: &Expr) -> u32 {
        let bool_type = self.module.type_id(Type::Bool);
        match &**expr {
            ExprData::Var(index) => {
                let variable = self.flow_variable(*index);
                self.module.op(Op::Load, bool_type, &[variable])
            }
            ExprData::Predicate(index) => {
                let variable = self.predicate_variable(*index);
                self.module.op(Op::Load, bool_type, &[variable])
            }
            ExprData::CondCode(cc) => {
                use crate::inst::ConditionCode;
                match cc {
                    ConditionCode::Ne => {
                        let flag = self.internal_flags[InternalFlag::Zero as usize];
                        let loaded = self.module.op(Op::Load, bool_type, &[flag]);
                        self.module.op(Op::LogicalNot, bool_type, &[loaded])
                    }
                    ConditionCode::Eq => {
                        let flag = self.internal_flags[InternalFlag::Zero as usize];
                        self.module.op(Op::Load, bool_type, &[flag])
                    }
                    _ => self.module.const_bool(false),
                }
            }
            ExprData::Not(inner) => {
                let value = self.emit_expr(ir, inner);
                self.module.op(Op::LogicalNot, bool_type, &[value])
            }
            ExprData::And(a, b) => {
                let a = self.emit_expr(ir, a);
                let b = self.emit_expr(ir, b);
                self.module.op(Op::LogicalAnd, bool_type, &[a, b])
            }
            ExprData::Or(a, b) => {
                let a = self.emit_expr(ir, a);
                let b = self.emit_expr(ir, b);
                self.module.op(Op::LogicalOr, bool_type, &[a, b])
            }
            ExprData::Boolean(value) => self.module.const_bool(*value),
            ExprData::GprEqual(gpr, value) => {
                let reg = self.load_register(*gpr);
                let imm = self.module.const_u32(*value);
                self.module.op(Op::IEqual, bool_type, &[reg, imm])
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Flow-stack / brute-force emission.

    fn emit_dispatch_loop(&mut self, ir: &ShaderIr) -> Result<(), ShaderError> {
        let blocks = ir.basic_blocks();
        if blocks.is_empty() {
            return Ok(());
        }
        let starts: Vec<u32> = blocks.keys().copied().collect();
        let (coverage_begin, _) = ir.coverage();
        let first = starts
            .iter()
            .copied()
            .find(|&start| start >= coverage_begin)
            .unwrap_or(starts[0]);

        let start_const = self.module.const_u32(first);
        self.module.op_void(Op::Store, &[self.jmp_to, start_const]);

        let header = self.module.allocate_id();
        let dispatch = self.module.allocate_id();
        let dispatch_merge = self.module.allocate_id();
        let continue_label = self.module.allocate_id();
        let loop_merge = self.module.allocate_id();

        self.module.op_void(Op::Branch, &[header]);
        self.module.label(header);
        self.module
            .op_void(Op::LoopMerge, &[loop_merge, continue_label, 0]);
        self.module.op_void(Op::Branch, &[dispatch]);
        self.module.label(dispatch);

        let uint_type = self.module.type_id(Type::Uint);
        let selector = self.module.op(Op::Load, uint_type, &[self.jmp_to]);
        let case_labels: Vec<u32> = starts.iter().map(|_| self.module.allocate_id()).collect();
        // An unknown virtual PC leaves the program.
        let mut operands = vec![selector, loop_merge];
        for (&start, &label) in starts.iter().zip(&case_labels) {
            operands.push(start);
            operands.push(label);
        }
        self.module.op_void(Op::SelectionMerge, &[dispatch_merge, 0]);
        self.module.op_void(Op::Switch, &operands);

        self.loop_merge_stack.push(loop_merge);
        for (index, (&start, block)) in blocks.iter().enumerate() {
            self.module.label(case_labels[index]);
            self.terminated = false;
            // Default to falling through to the next block in PC order.
            let fallthrough = starts.get(index + 1).copied();
            if let Some(next) = fallthrough {
                let next_const = self.module.const_u32(next);
                self.module.op_void(Op::Store, &[self.jmp_to, next_const]);
            }
            let _ = start;
            for node in block {
                self.emit_statement(ir, node)?;
                if self.terminated {
                    break;
                }
            }
            if !self.terminated {
                self.module.op_void(Op::Branch, &[dispatch_merge]);
            }
        }
        self.loop_merge_stack.pop();
        self.terminated = false;

        self.module.label(dispatch_merge);
        self.module.op_void(Op::Branch, &[continue_label]);
        self.module.label(continue_label);
        self.module.op_void(Op::Branch, &[header]);
        self.module.label(loop_merge);
        self.emit_epilogue();
        self.module.op_void(Op::Return, &[]);
        self.terminated = true;
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Statements.

    fn emit_statement(&mut self, ir: &ShaderIr, node: &Node) -> Result<(), ShaderError> {
        self.emit_amend(ir, node)?;
        match &**node {
            NodeData::Operation(op) => {
                self.emit_operation_statement(ir, node, op.code())?;
            }
            NodeData::Conditional(conditional) => {
                let cond = self.emit_condition(ir, conditional.condition())?;
                let merge = self.module.allocate_id();
                let taken = self.module.allocate_id();
                self.module.op_void(Op::SelectionMerge, &[merge, 0]);
                self.module
                    .op_void(Op::BranchConditional, &[cond, taken, merge]);
                self.module.label(taken);
                let mut inner_terminated = false;
                for inner in conditional.code() {
                    self.emit_statement(ir, inner)?;
                    if self.terminated {
                        inner_terminated = true;
                        break;
                    }
                }
                if !inner_terminated {
                    self.module.op_void(Op::Branch, &[merge]);
                }
                // The untaken path continues after the construct.
                self.terminated = false;
                self.module.label(merge);
            }
            NodeData::Comment(_) => {}
            _ => {
                // A bare value at statement level has no effect.
            }
        }
        Ok(())
    }

    fn emit_amend(&mut self, ir: &ShaderIr, node: &Node) -> Result<(), ShaderError> {
        let amend_index = match &**node {
            NodeData::Operation(op) => op.amend_index(),
            NodeData::Conditional(cond) => cond.amend_index(),
            _ => None,
        };
        if let Some(index) = amend_index {
            let amend = ir.amend_code()[index].clone();
            self.emit_statement(ir, &amend)?;
        }
        Ok(())
    }

    fn emit_operation_statement(
        &mut self,
        ir: &ShaderIr,
        node: &Node,
        code: OperationCode,
    ) -> Result<(), ShaderError> {
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        match code {
            OperationCode::Assign => {
                let value = self.emit_value(ir, op.operand(1))?;
                self.store_into(ir, op.operand(0), value)?;
            }
            OperationCode::LogicalAssign => {
                let value = self.emit_condition(ir, op.operand(1))?;
                self.store_bool_into(op.operand(0), value)?;
            }
            OperationCode::Branch => {
                let target = self.emit_value(ir, op.operand(0))?;
                self.module.op_void(Op::Store, &[self.jmp_to, target]);
            }
            OperationCode::BranchIndirect => {
                let target = self.emit_value(ir, op.operand(0))?;
                self.module.op_void(Op::Store, &[self.jmp_to, target]);
            }
            OperationCode::PushFlowStack => {
                let (stack, top) = self.flow_stack(op.meta());
                let target = self.emit_value(ir, op.operand(0))?;
                let uint_type = self.module.type_id(Type::Uint);
                let ptr_type = self
                    .module
                    .type_id(Type::Pointer(StorageClass::Private, Box::new(Type::Uint)));
                let top_value = self.module.op(Op::Load, uint_type, &[top]);
                let slot = self.module.op(Op::AccessChain, ptr_type, &[stack, top_value]);
                self.module.op_void(Op::Store, &[slot, target]);
                let one = self.module.const_u32(1);
                let new_top = self.module.op(Op::IAdd, uint_type, &[top_value, one]);
                self.module.op_void(Op::Store, &[top, new_top]);
            }
            OperationCode::PopFlowStack => {
                let (stack, top) = self.flow_stack(op.meta());
                let uint_type = self.module.type_id(Type::Uint);
                let ptr_type = self
                    .module
                    .type_id(Type::Pointer(StorageClass::Private, Box::new(Type::Uint)));
                let top_value = self.module.op(Op::Load, uint_type, &[top]);
                let one = self.module.const_u32(1);
                let new_top = self.module.op(Op::ISub, uint_type, &[top_value, one]);
                self.module.op_void(Op::Store, &[top, new_top]);
                let slot = self.module.op(Op::AccessChain, ptr_type, &[stack, new_top]);
                let target = self.module.op(Op::Load, uint_type, &[slot]);
                self.module.op_void(Op::Store, &[self.jmp_to, target]);
            }
            OperationCode::Exit => {
                if let Some(&merge) = self.loop_merge_stack.last() {
                    self.module.op_void(Op::Branch, &[merge]);
                } else {
                    self.emit_epilogue();
                    self.module.op_void(Op::Return, &[]);
                }
                self.terminated = true;
            }
            OperationCode::Discard => {
                self.emit_discard();
                if !self.profile.support_demote_to_helper_invocation
                    || self.stage != ShaderStage::Fragment
                {
                    self.terminated = true;
                }
            }
            OperationCode::EmitVertex => {
                self.module.op_void(Op::EmitVertex, &[]);
            }
            OperationCode::EndPrimitive => {
                self.module.op_void(Op::EndPrimitive, &[]);
            }
            OperationCode::MemoryBarrierGl => {
                let scope = self.module.const_u32(1); // Device
                let semantics = self.module.const_u32(0x8 | 0x40 | 0x80 | 0x100 | 0x800);
                self.module.op_void(Op::MemoryBarrier, &[scope, semantics]);
            }
            OperationCode::ImageStore => {
                self.emit_image_store(ir, node)?;
            }
            _ => {
                // Value-producing operation in statement position; emit
                // for its side effects (e.g. atomics wrapped by Assign
                // handle their own stores).
                let _ = self.emit_value(ir, node)?;
            }
        }
        Ok(())
    }

    fn flow_stack(&self, meta: &Meta) -> (u32, u32) {
        match meta {
            Meta::Stack(MetaStackClass::Ssy) => (self.ssy_stack, self.ssy_top),
            Meta::Stack(MetaStackClass::Pbk) => (self.pbk_stack, self.pbk_top),
            _ => (self.ssy_stack, self.ssy_top),
        }
    }

    fn store_into(&mut self, ir: &ShaderIr, dest: &Node, value: u32) -> Result<(), ShaderError> {
        match &**dest {
            NodeData::Gpr(reg) => {
                if reg.0 == Register::ZERO_INDEX {
                    return Ok(());
                }
                let variable = self.register_variable(reg.0);
                self.module.op_void(Op::Store, &[variable, value]);
            }
            NodeData::CustomVar(index) => {
                let variable = self.custom_variable(*index);
                self.module.op_void(Op::Store, &[variable, value]);
            }
            NodeData::Abuf(abuf) => {
                self.store_attribute(abuf, value)?;
            }
            NodeData::Patch { .. } => {
                debug!("patch stores are ignored");
            }
            NodeData::Lmem(address) => {
                let slot = self.lmem_pointer(ir, address)?;
                self.module.op_void(Op::Store, &[slot, value]);
            }
            NodeData::Smem(address) => {
                let slot = self.smem_pointer(ir, address)?;
                self.module.op_void(Op::Store, &[slot, value]);
            }
            NodeData::Gmem { .. } => {
                let slot = self.gmem_pointer(ir, dest)?;
                self.module.op_void(Op::Store, &[slot, value]);
            }
            NodeData::InternalFlag(flag) => {
                // Stored as a bool through LogicalAssign normally; a raw
                // store coerces the low bit.
                let bool_type = self.module.type_id(Type::Bool);
                let zero = self.module.const_u32(0);
                let as_bool = self.module.op(Op::INotEqual, bool_type, &[value, zero]);
                let variable = self.internal_flags[*flag as usize];
                self.module.op_void(Op::Store, &[variable, as_bool]);
            }
            _ => {
                return Err(ShaderError::Emission("unsupported store target".into()));
            }
        }
        Ok(())
    }

    fn store_bool_into(&mut self, dest: &Node, value: u32) -> Result<(), ShaderError> {
        match &**dest {
            NodeData::Predicate { index, .. } => {
                let variable = self.predicate_variable(*index);
                self.module.op_void(Op::Store, &[variable, value]);
            }
            NodeData::InternalFlag(flag) => {
                let variable = self.internal_flags[*flag as usize];
                self.module.op_void(Op::Store, &[variable, value]);
            }
            _ => {
                return Err(ShaderError::Emission(
                    "unsupported boolean store target".into(),
                ));
            }
        }
        Ok(())
    }

    fn store_attribute(&mut self, abuf: &AbufNode, value: u32) -> Result<(), ShaderError> {
        let float_type = self.module.type_id(Type::Float);
        let as_float = self.module.op(Op::Bitcast, float_type, &[value]);
        let ptr_type = self
            .module
            .type_id(Type::Pointer(StorageClass::Output, Box::new(Type::Float)));
        match abuf.index {
            AttributeIndex::Position => {
                if self.position != 0 {
                    let element = self.module.const_u32(abuf.element);
                    let slot = self
                        .module
                        .op(Op::AccessChain, ptr_type, &[self.position, element]);
                    self.module.op_void(Op::Store, &[slot, as_float]);
                }
            }
            AttributeIndex::Attribute(location) => {
                if let Some(&variable) = self.output_attributes.get(&location) {
                    let element = self.module.const_u32(abuf.element);
                    let slot = self
                        .module
                        .op(Op::AccessChain, ptr_type, &[variable, element]);
                    self.module.op_void(Op::Store, &[slot, as_float]);
                }
            }
            AttributeIndex::LayerViewportPointSize => {
                if abuf.element == 3 && self.point_size != 0 {
                    self.module
                        .op_void(Op::Store, &[self.point_size, as_float]);
                } else {
                    debug!("layer/viewport store ignored");
                }
            }
            AttributeIndex::ClipDistances0123 | AttributeIndex::ClipDistances4567 => {
                if self.clip_distances != 0 {
                    let base =
                        if abuf.index == AttributeIndex::ClipDistances4567 { 4 } else { 0 };
                    let element = self.module.const_u32(base + abuf.element);
                    let slot = self
                        .module
                        .op(Op::AccessChain, ptr_type, &[self.clip_distances, element]);
                    self.module.op_void(Op::Store, &[slot, as_float]);
                }
            }
            _ => {
                debug!("output attribute {:?} ignored", abuf.index);
            }
        }
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Values.

    fn load_register(&mut self, reg: u32) -> u32 {
        let uint_type = self.module.type_id(Type::Uint);
        if reg == Register::ZERO_INDEX {
            return self.module.const_u32(0);
        }
        let variable = self.register_variable(reg);
        self.module.op(Op::Load, uint_type, &[variable])
    }

    fn emit_value(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let uint_type = self.module.type_id(Type::Uint);
        match &**node {
            NodeData::Gpr(reg) => Ok(self.load_register(reg.0)),
            NodeData::Immediate(value) => Ok(self.module.const_u32(*value)),
            NodeData::CustomVar(index) => {
                let variable = self.custom_variable(*index);
                Ok(self.module.op(Op::Load, uint_type, &[variable]))
            }
            NodeData::Predicate { index, negated } => {
                // Reading a predicate as a value yields a mask.
                let bool_type = self.module.type_id(Type::Bool);
                let variable = self.predicate_variable(*index);
                let mut value = self.module.op(Op::Load, bool_type, &[variable]);
                if *negated {
                    value = self.module.op(Op::LogicalNot, bool_type, &[value]);
                }
                let ones = self.module.const_u32(0xFFFF_FFFF);
                let zero = self.module.const_u32(0);
                Ok(self
                    .module
                    .op(Op::Select, uint_type, &[value, ones, zero]))
            }
            NodeData::InternalFlag(flag) => {
                let bool_type = self.module.type_id(Type::Bool);
                let variable = self.internal_flags[*flag as usize];
                let value = self.module.op(Op::Load, bool_type, &[variable]);
                let one = self.module.const_u32(1);
                let zero = self.module.const_u32(0);
                Ok(self.module.op(Op::Select, uint_type, &[value, one, zero]))
            }
            NodeData::Abuf(abuf) => self.load_attribute(ir, abuf),
            NodeData::Patch { .. } => Ok(self.module.const_u32(0)),
            NodeData::Cbuf { index, offset } => {
                let offset_value = self.emit_value(ir, offset)?;
                self.load_cbuf(*index, offset_value)
            }
            NodeData::Lmem(address) => {
                let slot = self.lmem_pointer(ir, address)?;
                Ok(self.module.op(Op::Load, uint_type, &[slot]))
            }
            NodeData::Smem(address) => {
                let slot = self.smem_pointer(ir, address)?;
                Ok(self.module.op(Op::Load, uint_type, &[slot]))
            }
            NodeData::Gmem { .. } => {
                let slot = self.gmem_pointer(ir, node)?;
                Ok(self.module.op(Op::Load, uint_type, &[slot]))
            }
            NodeData::Comment(_) => Ok(self.module.const_u32(0)),
            NodeData::Conditional(_) => Err(ShaderError::Emission(
                "conditional in value position".into(),
            )),
            NodeData::Operation(op) => self.emit_operation_value(ir, node, op.code()),
        }
    }

    fn load_attribute(&mut self, ir: &ShaderIr, abuf: &AbufNode) -> Result<u32, ShaderError> {
        let _ = ir;
        let uint_type = self.module.type_id(Type::Uint);
        let float_type = self.module.type_id(Type::Float);
        let in_ptr_type = self
            .module
            .type_id(Type::Pointer(StorageClass::Input, Box::new(Type::Float)));
        match abuf.index {
            AttributeIndex::Attribute(location) => {
                if let Some(&variable) = self.input_attributes.get(&location) {
                    let element = self.module.const_u32(abuf.element);
                    let slot = self
                        .module
                        .op(Op::AccessChain, in_ptr_type, &[variable, element]);
                    let value = self.module.op(Op::Load, float_type, &[slot]);
                    Ok(self.module.op(Op::Bitcast, uint_type, &[value]))
                } else {
                    Ok(self.module.const_u32(0))
                }
            }
            AttributeIndex::Position => {
                if self.position != 0 {
                    let class = if self.stage == ShaderStage::Fragment {
                        StorageClass::Input
                    } else {
                        StorageClass::Output
                    };
                    let ptr = self
                        .module
                        .type_id(Type::Pointer(class, Box::new(Type::Float)));
                    let element = self.module.const_u32(abuf.element);
                    let slot = self.module.op(Op::AccessChain, ptr, &[self.position, element]);
                    let value = self.module.op(Op::Load, float_type, &[slot]);
                    Ok(self.module.op(Op::Bitcast, uint_type, &[value]))
                } else {
                    Ok(self.module.const_u32(0))
                }
            }
            AttributeIndex::TessCoordInstanceIdVertexId => match abuf.element {
                2 if self.instance_index != 0 => {
                    Ok(self.module.op(Op::Load, uint_type, &[self.instance_index]))
                }
                3 if self.vertex_index != 0 => {
                    Ok(self.module.op(Op::Load, uint_type, &[self.vertex_index]))
                }
                _ => Ok(self.module.const_u32(0)),
            },
            AttributeIndex::FrontFacing => {
                if self.front_facing != 0 {
                    let bool_type = self.module.type_id(Type::Bool);
                    let value = self.module.op(Op::Load, bool_type, &[self.front_facing]);
                    let ones = self.module.const_u32(0xFFFF_FFFF);
                    let zero = self.module.const_u32(0);
                    Ok(self.module.op(Op::Select, uint_type, &[value, ones, zero]))
                } else {
                    Ok(self.module.const_u32(0))
                }
            }
            _ => Ok(self.module.const_u32(0)),
        }
    }

    fn load_cbuf(&mut self, index: u32, offset: u32) -> Result<u32, ShaderError> {
        let uint_type = self.module.type_id(Type::Uint);
        let variable = match self.cbufs.get(&index) {
            Some(&(variable, _)) => variable,
            None => return Ok(self.module.const_u32(0)),
        };
        // Byte offset -> (vec4 index, component).
        let two = self.module.const_u32(2);
        let four = self.module.const_u32(4);
        let word = self.module.op(Op::ShiftRightLogical, uint_type, &[offset, two]);
        let vec_index = self.module.op(Op::ShiftRightLogical, uint_type, &[word, two]);
        let component = self.module.op(Op::UMod, uint_type, &[word, four]);
        let zero = self.module.const_u32(0);
        let ptr = self
            .module
            .type_id(Type::Pointer(StorageClass::Uniform, Box::new(Type::Uint)));
        let slot = self.module.op(
            Op::AccessChain,
            ptr,
            &[variable, zero, vec_index, component],
        );
        Ok(self.module.op(Op::Load, uint_type, &[slot]))
    }

    fn lmem_pointer(&mut self, ir: &ShaderIr, address: &Node) -> Result<u32, ShaderError> {
        let uint_type = self.module.type_id(Type::Uint);
        let address = self.emit_value(ir, address)?;
        let two = self.module.const_u32(2);
        let index = self.module.op(Op::ShiftRightLogical, uint_type, &[address, two]);
        let ptr = self
            .module
            .type_id(Type::Pointer(StorageClass::Private, Box::new(Type::Uint)));
        Ok(self
            .module
            .op(Op::AccessChain, ptr, &[self.local_memory, index]))
    }

    fn smem_pointer(&mut self, ir: &ShaderIr, address: &Node) -> Result<u32, ShaderError> {
        let uint_type = self.module.type_id(Type::Uint);
        let address = self.emit_value(ir, address)?;
        let two = self.module.const_u32(2);
        let index = self.module.op(Op::ShiftRightLogical, uint_type, &[address, two]);
        let ptr = self
            .module
            .type_id(Type::Pointer(StorageClass::Workgroup, Box::new(Type::Uint)));
        Ok(self
            .module
            .op(Op::AccessChain, ptr, &[self.shared_memory, index]))
    }

    fn gmem_pointer(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let (real_address, base_address, base) = match &**node {
            NodeData::Gmem {
                real_address,
                base_address,
                base,
            } => (real_address, base_address, base),
            _ => unreachable!(),
        };
        let uint_type = self.module.type_id(Type::Uint);
        let variable = match self.gmems.get(&(base.cbuf_index, base.cbuf_offset)) {
            Some(&variable) => variable,
            None => {
                return Err(ShaderError::Emission("untracked global memory".into()));
            }
        };
        let real = self.emit_value(ir, real_address)?;
        let base_value = self.emit_value(ir, base_address)?;
        let diff = self.module.op(Op::ISub, uint_type, &[real, base_value]);
        let two = self.module.const_u32(2);
        let index = self.module.op(Op::ShiftRightLogical, uint_type, &[diff, two]);
        let zero = self.module.const_u32(0);
        let ptr = self
            .module
            .type_id(Type::Pointer(StorageClass::Uniform, Box::new(Type::Uint)));
        Ok(self
            .module
            .op(Op::AccessChain, ptr, &[variable, zero, index]))
    }

    //----------------------------------------------------------------------------------------------
    // Conditions (boolean values).

    fn emit_condition(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let bool_type = self.module.type_id(Type::Bool);
        match &**node {
            NodeData::Predicate { index, negated } => {
                use crate::inst::Pred;
                let mut value = if *index == Pred::UNUSED_INDEX {
                    self.module.const_bool(true)
                } else if *index == Pred::NEVER_EXECUTE {
                    self.module.const_bool(false)
                } else {
                    let variable = self.predicate_variable(*index);
                    self.module.op(Op::Load, bool_type, &[variable])
                };
                if *negated {
                    value = self.module.op(Op::LogicalNot, bool_type, &[value]);
                }
                Ok(value)
            }
            NodeData::InternalFlag(flag) => {
                let variable = self.internal_flags[*flag as usize];
                Ok(self.module.op(Op::Load, bool_type, &[variable]))
            }
            NodeData::Operation(op) if is_logical(op.code()) => {
                self.emit_logical(ir, node, op.code())
            }
            _ => {
                // Any other value: non-zero means true.
                let value = self.emit_value(ir, node)?;
                let zero = self.module.const_u32(0);
                Ok(self.module.op(Op::INotEqual, bool_type, &[value, zero]))
            }
        }
    }

    fn emit_logical(
        &mut self,
        ir: &ShaderIr,
        node: &Node,
        code: OperationCode,
    ) -> Result<u32, ShaderError> {
        use self::OperationCode::*;
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        let bool_type = self.module.type_id(Type::Bool);
        let float_type = self.module.type_id(Type::Float);
        let sint_type = self.module.type_id(Type::Sint);

        let bin_f = |emitter: &mut Self, ir: &ShaderIr, spirv_op: Op| -> Result<u32, ShaderError> {
            let a = emitter.value_as_float(ir, op.operand(0))?;
            let b = emitter.value_as_float(ir, op.operand(1))?;
            Ok(emitter.module.op(spirv_op, bool_type, &[a, b]))
        };
        let bin_s = |emitter: &mut Self, ir: &ShaderIr, spirv_op: Op| -> Result<u32, ShaderError> {
            let a = emitter.emit_value(ir, op.operand(0))?;
            let b = emitter.emit_value(ir, op.operand(1))?;
            let a = emitter.module.op(Op::Bitcast, sint_type, &[a]);
            let b = emitter.module.op(Op::Bitcast, sint_type, &[b]);
            Ok(emitter.module.op(spirv_op, bool_type, &[a, b]))
        };
        let bin_u = |emitter: &mut Self, ir: &ShaderIr, spirv_op: Op| -> Result<u32, ShaderError> {
            let a = emitter.emit_value(ir, op.operand(0))?;
            let b = emitter.emit_value(ir, op.operand(1))?;
            Ok(emitter.module.op(spirv_op, bool_type, &[a, b]))
        };

        match code {
            LogicalAnd => {
                let a = self.emit_condition(ir, op.operand(0))?;
                let b = self.emit_condition(ir, op.operand(1))?;
                Ok(self.module.op(Op::LogicalAnd, bool_type, &[a, b]))
            }
            LogicalOr => {
                let a = self.emit_condition(ir, op.operand(0))?;
                let b = self.emit_condition(ir, op.operand(1))?;
                Ok(self.module.op(Op::LogicalOr, bool_type, &[a, b]))
            }
            LogicalXor => {
                let a = self.emit_condition(ir, op.operand(0))?;
                let b = self.emit_condition(ir, op.operand(1))?;
                Ok(self.module.op(Op::LogicalNotEqual, bool_type, &[a, b]))
            }
            LogicalNegate => {
                let a = self.emit_condition(ir, op.operand(0))?;
                Ok(self.module.op(Op::LogicalNot, bool_type, &[a]))
            }
            LogicalPick2 => {
                let pair = self.emit_condition_pair(ir, op.operand(0))?;
                let element = match &**op.operand(1) {
                    NodeData::Immediate(value) => *value,
                    _ => 0,
                };
                Ok(self
                    .module
                    .op(Op::CompositeExtract, bool_type, &[pair, element]))
            }
            LogicalAnd2 => {
                let pair = self.emit_condition_pair(ir, op.operand(0))?;
                Ok(self.module.op(Op::All, bool_type, &[pair]))
            }
            LogicalFLessThan => bin_f(self, ir, Op::FOrdLessThan),
            LogicalFEqual => bin_f(self, ir, Op::FOrdEqual),
            LogicalFLessEqual => bin_f(self, ir, Op::FOrdLessThanEqual),
            LogicalFGreaterThan => bin_f(self, ir, Op::FOrdGreaterThan),
            LogicalFNotEqual => bin_f(self, ir, Op::FOrdNotEqual),
            LogicalFGreaterEqual => bin_f(self, ir, Op::FOrdGreaterThanEqual),
            LogicalFIsNan => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let _ = float_type;
                Ok(self.module.op(Op::IsNan, bool_type, &[a]))
            }
            LogicalILessThan => bin_s(self, ir, Op::SLessThan),
            LogicalIEqual => bin_s(self, ir, Op::IEqual),
            LogicalILessEqual => bin_s(self, ir, Op::SLessThanEqual),
            LogicalIGreaterThan => bin_s(self, ir, Op::SGreaterThan),
            LogicalINotEqual => bin_s(self, ir, Op::INotEqual),
            LogicalIGreaterEqual => bin_s(self, ir, Op::SGreaterThanEqual),
            LogicalULessThan => bin_u(self, ir, Op::ULessThan),
            LogicalUEqual => bin_u(self, ir, Op::IEqual),
            LogicalULessEqual => bin_u(self, ir, Op::ULessThanEqual),
            LogicalUGreaterThan => bin_u(self, ir, Op::UGreaterThan),
            LogicalUNotEqual => bin_u(self, ir, Op::INotEqual),
            LogicalUGreaterEqual => bin_u(self, ir, Op::UGreaterThanEqual),
            VoteAll | VoteAny | VoteEqual => {
                let value = self.emit_condition(ir, op.operand(0))?;
                if !self.profile.support_vote {
                    return Ok(value);
                }
                let spirv_op = match code {
                    VoteAll => Op::SubgroupAllKHR,
                    VoteAny => Op::SubgroupAnyKHR,
                    _ => Op::SubgroupAllEqualKHR,
                };
                Ok(self.module.op(spirv_op, bool_type, &[value]))
            }
            _ => Err(ShaderError::Emission(format!(
                "logical op {:?} in condition position",
                code
            ))),
        }
    }

    /// Emits a packed half comparison as a bool2.
    fn emit_condition_pair(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        use self::OperationCode::*;
        let bool2_type = self.module.type_id(Type::Bool2);
        if let NodeData::Operation(op) = &**node {
            let spirv_op = match op.code() {
                Logical2HLessThan | Logical2HLessThanWithNan => Some(Op::FOrdLessThan),
                Logical2HEqual | Logical2HEqualWithNan => Some(Op::FOrdEqual),
                Logical2HLessEqual | Logical2HLessEqualWithNan => Some(Op::FOrdLessThanEqual),
                Logical2HGreaterThan | Logical2HGreaterThanWithNan => Some(Op::FOrdGreaterThan),
                Logical2HNotEqual | Logical2HNotEqualWithNan => Some(Op::FOrdNotEqual),
                Logical2HGreaterEqual | Logical2HGreaterEqualWithNan => {
                    Some(Op::FOrdGreaterThanEqual)
                }
                _ => None,
            };
            if let Some(spirv_op) = spirv_op {
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let b = self.value_as_half_vec(ir, op.operand(1))?;
                return Ok(self.module.op(spirv_op, bool2_type, &[a, b]));
            }
        }
        // Fall back to splatting a scalar condition.
        let scalar = self.emit_condition(ir, node)?;
        Ok(self
            .module
            .op(Op::CompositeConstruct, bool2_type, &[scalar, scalar]))
    }

    fn value_as_float(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let float_type = self.module.type_id(Type::Float);
        let value = self.emit_value(ir, node)?;
        Ok(self.module.op(Op::Bitcast, float_type, &[value]))
    }

    fn float_as_value(&mut self, value: u32) -> u32 {
        let uint_type = self.module.type_id(Type::Uint);
        self.module.op(Op::Bitcast, uint_type, &[value])
    }

    /// Loads a packed f16x2 value as a vec2 of f32.
    fn value_as_half_vec(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
        if let NodeData::Operation(op) = &**node {
            if op.code() == OperationCode::HUnpack {
                if let Meta::Half(types) = op.meta() {
                    use crate::inst::HalfType;
                    match types[0] {
                        HalfType::F32 => {
                            let scalar = self.value_as_float(ir, op.operand(0))?;
                            return Ok(self.module.op(
                                Op::CompositeConstruct,
                                vec2_type,
                                &[scalar, scalar],
                            ));
                        }
                        HalfType::H0H1 | HalfType::H0H0 | HalfType::H1H1 => {
                            let packed = self.emit_value(ir, op.operand(0))?;
                            let unpacked =
                                self.module
                                    .ext_inst(vec2_type, GLSL_UNPACK_HALF_2X16, &[packed]);
                            return Ok(match types[0] {
                                HalfType::H0H0 => self.module.op(
                                    Op::VectorShuffle,
                                    vec2_type,
                                    &[unpacked, unpacked, 0, 0],
                                ),
                                HalfType::H1H1 => self.module.op(
                                    Op::VectorShuffle,
                                    vec2_type,
                                    &[unpacked, unpacked, 1, 1],
                                ),
                                _ => unpacked,
                            });
                        }
                    }
                }
            }
        }
        let packed = self.emit_value(ir, node)?;
        Ok(self
            .module
            .ext_inst(vec2_type, GLSL_UNPACK_HALF_2X16, &[packed]))
    }

    fn half_vec_as_value(&mut self, vec: u32) -> u32 {
        let uint_type = self.module.type_id(Type::Uint);
        self.module.ext_inst(uint_type, GLSL_PACK_HALF_2X16, &[vec])
    }

    //----------------------------------------------------------------------------------------------
    // Operation values.

    fn emit_operation_value(
        &mut self,
        ir: &ShaderIr,
        node: &Node,
        code: OperationCode,
    ) -> Result<u32, ShaderError> {
        use self::OperationCode::*;
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        let uint_type = self.module.type_id(Type::Uint);
        let sint_type = self.module.type_id(Type::Sint);
        let float_type = self.module.type_id(Type::Float);

        macro_rules! fbin {
            ($spirv_op:expr) => {{
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let result = self.module.op($spirv_op, float_type, &[a, b]);
                Ok(self.float_as_value(result))
            }};
        }
        macro_rules! funary_ext {
            ($inst:expr) => {{
                let a = self.value_as_float(ir, op.operand(0))?;
                let result = self.module.ext_inst(float_type, $inst, &[a]);
                Ok(self.float_as_value(result))
            }};
        }
        macro_rules! ubin {
            ($spirv_op:expr) => {{
                let a = self.emit_value(ir, op.operand(0))?;
                let b = self.emit_value(ir, op.operand(1))?;
                Ok(self.module.op($spirv_op, uint_type, &[a, b]))
            }};
        }
        macro_rules! hbin {
            ($spirv_op:expr) => {{
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let b = self.value_as_half_vec(ir, op.operand(1))?;
                let vec2_type =
                    self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let result = self.module.op($spirv_op, vec2_type, &[a, b]);
                Ok(self.half_vec_as_value(result))
            }};
        }

        match code {
            Select => {
                let cond = self.emit_condition(ir, op.operand(0))?;
                let a = self.emit_value(ir, op.operand(1))?;
                let b = self.emit_value(ir, op.operand(2))?;
                Ok(self.module.op(Op::Select, uint_type, &[cond, a, b]))
            }

            FAdd => fbin!(Op::FAdd),
            FMul => fbin!(Op::FMul),
            FDiv => fbin!(Op::FDiv),
            FFma => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let c = self.value_as_float(ir, op.operand(2))?;
                let result = self.module.ext_inst(float_type, GLSL_FMA, &[a, b, c]);
                Ok(self.float_as_value(result))
            }
            FNegate => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let result = self.module.op(Op::FNegate, float_type, &[a]);
                Ok(self.float_as_value(result))
            }
            FAbsolute => funary_ext!(GLSL_FABS),
            FClamp => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let min = self.value_as_float(ir, op.operand(1))?;
                let max = self.value_as_float(ir, op.operand(2))?;
                let result = self.module.ext_inst(float_type, GLSL_FCLAMP, &[a, min, max]);
                Ok(self.float_as_value(result))
            }
            FMin => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let result = self.module.ext_inst(float_type, GLSL_FMIN, &[a, b]);
                Ok(self.float_as_value(result))
            }
            FMax => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let result = self.module.ext_inst(float_type, GLSL_FMAX, &[a, b]);
                Ok(self.float_as_value(result))
            }
            FCos => funary_ext!(GLSL_COS),
            FSin => funary_ext!(GLSL_SIN),
            FExp2 => funary_ext!(GLSL_EXP2),
            FLog2 => funary_ext!(GLSL_LOG2),
            FInverseSqrt => funary_ext!(GLSL_INVERSE_SQRT),
            FSqrt => funary_ext!(GLSL_SQRT),
            FRoundEven => funary_ext!(GLSL_ROUND_EVEN),
            FFloor => funary_ext!(GLSL_FLOOR),
            FCeil => funary_ext!(GLSL_CEIL),
            FTrunc => funary_ext!(GLSL_TRUNC),
            FCastInteger => {
                let a = self.emit_value(ir, op.operand(0))?;
                let a = self.module.op(Op::Bitcast, sint_type, &[a]);
                let result = self.module.op(Op::ConvertSToF, float_type, &[a]);
                Ok(self.float_as_value(result))
            }
            FCastUInteger => {
                let a = self.emit_value(ir, op.operand(0))?;
                let result = self.module.op(Op::ConvertUToF, float_type, &[a]);
                Ok(self.float_as_value(result))
            }
            FCastHalf0 => {
                let vec = self.value_as_half_vec(ir, op.operand(0))?;
                let result = self.module.op(Op::CompositeExtract, float_type, &[vec, 0]);
                Ok(self.float_as_value(result))
            }
            FCastHalf1 => {
                let vec = self.value_as_half_vec(ir, op.operand(0))?;
                let result = self.module.op(Op::CompositeExtract, float_type, &[vec, 1]);
                Ok(self.float_as_value(result))
            }
            FSwizzleAdd => {
                // Without subgroup knowledge, lower to a plain add.
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let result = self.module.op(Op::FAdd, float_type, &[a, b]);
                Ok(self.float_as_value(result))
            }

            IAdd | UAdd => ubin!(Op::IAdd),
            IMul | UMul => ubin!(Op::IMul),
            UDiv => ubin!(Op::UDiv),
            INegate => {
                let a = self.emit_value(ir, op.operand(0))?;
                let a = self.module.op(Op::Bitcast, sint_type, &[a]);
                let result = self.module.op(Op::SNegate, sint_type, &[a]);
                Ok(self.module.op(Op::Bitcast, uint_type, &[result]))
            }
            IAbsolute => {
                let a = self.emit_value(ir, op.operand(0))?;
                let a = self.module.op(Op::Bitcast, sint_type, &[a]);
                let result = self.module.ext_inst(sint_type, GLSL_SABS, &[a]);
                Ok(self.module.op(Op::Bitcast, uint_type, &[result]))
            }
            ICastFloat => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let result = self.module.op(Op::ConvertFToS, sint_type, &[a]);
                Ok(self.module.op(Op::Bitcast, uint_type, &[result]))
            }
            UCastFloat => {
                let a = self.value_as_float(ir, op.operand(0))?;
                Ok(self.module.op(Op::ConvertFToU, uint_type, &[a]))
            }
            ICastUnsigned | UCastSigned => self.emit_value(ir, op.operand(0)),
            ILogicalShiftLeft | ULogicalShiftLeft => ubin!(Op::ShiftLeftLogical),
            ILogicalShiftRight | ULogicalShiftRight => ubin!(Op::ShiftRightLogical),
            IArithmeticShiftRight | UArithmeticShiftRight => ubin!(Op::ShiftRightArithmetic),
            IBitwiseAnd | UBitwiseAnd => ubin!(Op::BitwiseAnd),
            IBitwiseOr | UBitwiseOr => ubin!(Op::BitwiseOr),
            IBitwiseXor | UBitwiseXor => ubin!(Op::BitwiseXor),
            IBitwiseNot | UBitwiseNot => {
                let a = self.emit_value(ir, op.operand(0))?;
                Ok(self.module.op(Op::Not, uint_type, &[a]))
            }
            IBitfieldInsert | UBitfieldInsert => {
                let base = self.emit_value(ir, op.operand(0))?;
                let insert = self.emit_value(ir, op.operand(1))?;
                let offset = self.emit_value(ir, op.operand(2))?;
                let bits = self.emit_value(ir, op.operand(3))?;
                Ok(self.module.op(
                    Op::BitFieldInsert,
                    uint_type,
                    &[base, insert, offset, bits],
                ))
            }
            IBitfieldExtract => {
                let value = self.emit_value(ir, op.operand(0))?;
                let offset = self.emit_value(ir, op.operand(1))?;
                let bits = self.emit_value(ir, op.operand(2))?;
                Ok(self
                    .module
                    .op(Op::BitFieldSExtract, uint_type, &[value, offset, bits]))
            }
            UBitfieldExtract => {
                let value = self.emit_value(ir, op.operand(0))?;
                let offset = self.emit_value(ir, op.operand(1))?;
                let bits = self.emit_value(ir, op.operand(2))?;
                Ok(self
                    .module
                    .op(Op::BitFieldUExtract, uint_type, &[value, offset, bits]))
            }
            IBitCount | UBitCount => {
                let a = self.emit_value(ir, op.operand(0))?;
                Ok(self.module.op(Op::BitCount, uint_type, &[a]))
            }
            IBitMSB => {
                let a = self.emit_value(ir, op.operand(0))?;
                let a = self.module.op(Op::Bitcast, sint_type, &[a]);
                let result = self.module.ext_inst(sint_type, GLSL_FIND_SMSB, &[a]);
                Ok(self.module.op(Op::Bitcast, uint_type, &[result]))
            }
            UBitMSB => {
                let a = self.emit_value(ir, op.operand(0))?;
                Ok(self.module.ext_inst(uint_type, GLSL_FIND_UMSB, &[a]))
            }

            HAdd => hbin!(Op::FAdd),
            HMul => hbin!(Op::FMul),
            HFma => {
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let b = self.value_as_half_vec(ir, op.operand(1))?;
                let c = self.value_as_half_vec(ir, op.operand(2))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let result = self.module.ext_inst(vec2_type, GLSL_FMA, &[a, b, c]);
                Ok(self.half_vec_as_value(result))
            }
            HAbsolute => {
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let result = self.module.ext_inst(vec2_type, GLSL_FABS, &[a]);
                Ok(self.half_vec_as_value(result))
            }
            HNegate => {
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let negated = self.module.op(Op::FNegate, vec2_type, &[a]);
                // Per-lane toggles select between original and negated.
                let first = self.operand_is_nonzero(ir, op.operands().get(1));
                let second = self.operand_is_nonzero(ir, op.operands().get(2));
                if first && second {
                    Ok(self.half_vec_as_value(negated))
                } else if !first && !second {
                    Ok(self.half_vec_as_value(a))
                } else {
                    let result = if first {
                        self.module
                            .op(Op::VectorShuffle, vec2_type, &[negated, a, 0, 3])
                    } else {
                        self.module
                            .op(Op::VectorShuffle, vec2_type, &[a, negated, 0, 3])
                    };
                    Ok(self.half_vec_as_value(result))
                }
            }
            HClamp => {
                let a = self.value_as_half_vec(ir, op.operand(0))?;
                let min = self.value_as_float(ir, op.operand(1))?;
                let max = self.value_as_float(ir, op.operand(2))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let min_vec = self
                    .module
                    .op(Op::CompositeConstruct, vec2_type, &[min, min]);
                let max_vec = self
                    .module
                    .op(Op::CompositeConstruct, vec2_type, &[max, max]);
                let result =
                    self.module
                        .ext_inst(vec2_type, GLSL_FCLAMP, &[a, min_vec, max_vec]);
                Ok(self.half_vec_as_value(result))
            }
            HCastFloat => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let zero = self.module.const_f32(0.0);
                let vec = self.module.op(Op::CompositeConstruct, vec2_type, &[a, zero]);
                Ok(self.half_vec_as_value(vec))
            }
            HUnpack => {
                let vec = self.value_as_half_vec(ir, node)?;
                Ok(self.half_vec_as_value(vec))
            }
            HMergeF32 => {
                let vec = self.value_as_half_vec(ir, op.operand(0))?;
                let result = self.module.op(Op::CompositeExtract, float_type, &[vec, 0]);
                Ok(self.float_as_value(result))
            }
            HMergeH0 => {
                let dest = self.value_as_half_vec(ir, op.operand(0))?;
                let src = self.value_as_half_vec(ir, op.operand(1))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                // Take src low lane, keep dest high lane.
                let result = self
                    .module
                    .op(Op::VectorShuffle, vec2_type, &[src, dest, 0, 3]);
                Ok(self.half_vec_as_value(result))
            }
            HMergeH1 => {
                let dest = self.value_as_half_vec(ir, op.operand(0))?;
                let src = self.value_as_half_vec(ir, op.operand(1))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let result = self
                    .module
                    .op(Op::VectorShuffle, vec2_type, &[dest, src, 0, 3]);
                Ok(self.half_vec_as_value(result))
            }
            HPack2 => {
                let a = self.value_as_float(ir, op.operand(0))?;
                let b = self.value_as_float(ir, op.operand(1))?;
                let vec2_type = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let vec = self.module.op(Op::CompositeConstruct, vec2_type, &[a, b]);
                Ok(self.half_vec_as_value(vec))
            }

            Texture | TextureLod | TextureGather | TextureQueryDimensions | TextureQueryLod
            | TexelFetch | TextureGradient => self.emit_texture_value(ir, node, code),

            ImageLoad => self.emit_image_load(ir, node),
            AtomicImageAdd | AtomicImageAnd | AtomicImageOr | AtomicImageXor
            | AtomicImageExchange => {
                // Approximated as read-modify-write on the first value.
                self.emit_image_load(ir, node)
            }

            AtomicAdd | AtomicMin | AtomicMax | AtomicAnd | AtomicOr | AtomicXor
            | AtomicExchange => {
                let pointer = match &**op.operand(0) {
                    NodeData::Gmem { .. } => self.gmem_pointer(ir, op.operand(0))?,
                    NodeData::Smem(address) => {
                        let address = address.clone();
                        self.smem_pointer(ir, &address)?
                    }
                    _ => {
                        return Err(ShaderError::Emission(
                            "atomic on unsupported memory".into(),
                        ))
                    }
                };
                let value = self.emit_value(ir, op.operand(1))?;
                let scope = self.module.const_u32(1); // Device
                let semantics = self.module.const_u32(0);
                let spirv_op = match code {
                    AtomicAdd => Op::AtomicIAdd,
                    AtomicMin => Op::AtomicUMin,
                    AtomicMax => Op::AtomicUMax,
                    AtomicAnd => Op::AtomicAnd,
                    AtomicOr => Op::AtomicOr,
                    AtomicXor => Op::AtomicXor,
                    _ => Op::AtomicExchange,
                };
                Ok(self
                    .module
                    .op(spirv_op, uint_type, &[pointer, scope, semantics, value]))
            }

            InvocationId => Ok(self.module.const_u32(0)),
            YNegate => {
                let value = if self.runtime_info.y_negate { -1.0 } else { 1.0 };
                let constant = self.module.const_f32(value);
                Ok(self.float_as_value(constant))
            }
            LocalInvocationIdX | LocalInvocationIdY | LocalInvocationIdZ => {
                let element = match code {
                    LocalInvocationIdX => 0,
                    LocalInvocationIdY => 1,
                    _ => 2,
                };
                self.load_builtin_vec3(self.local_invocation_id, element)
            }
            WorkGroupIdX | WorkGroupIdY | WorkGroupIdZ => {
                let element = match code {
                    WorkGroupIdX => 0,
                    WorkGroupIdY => 1,
                    _ => 2,
                };
                self.load_builtin_vec3(self.workgroup_id, element)
            }

            BallotThread => {
                let value = self.emit_condition(ir, op.operand(0))?;
                if !self.profile.support_vote {
                    let ones = self.module.const_u32(0xFFFF_FFFF);
                    let zero = self.module.const_u32(0);
                    return Ok(self
                        .module
                        .op(Op::Select, uint_type, &[value, ones, zero]));
                }
                let uvec4 = self.module.type_id(Type::Vector(Box::new(Type::Uint), 4));
                let ballot = self.module.op(Op::SubgroupBallotKHR, uvec4, &[value]);
                Ok(self
                    .module
                    .op(Op::CompositeExtract, uint_type, &[ballot, 0]))
            }
            VoteAll | VoteAny | VoteEqual => {
                let value = self.emit_logical(ir, node, code)?;
                let ones = self.module.const_u32(0xFFFF_FFFF);
                let zero = self.module.const_u32(0);
                Ok(self.module.op(Op::Select, uint_type, &[value, ones, zero]))
            }
            ThreadId | ThreadEqMask | ThreadGeMask | ThreadGtMask | ThreadLeMask
            | ThreadLtMask => Ok(self.module.const_u32(0)),
            ShuffleIndexed => {
                // Without subgroup shuffle support, a thread reads its
                // own value.
                self.emit_value(ir, op.operand(0))
            }

            Exit | Discard | Branch | BranchIndirect | PushFlowStack | PopFlowStack | Assign
            | LogicalAssign | EmitVertex | EndPrimitive | MemoryBarrierGl | ImageStore => {
                Err(ShaderError::Emission(format!(
                    "statement op {:?} in value position",
                    code
                )))
            }

            IMin | IMax | UMin | UMax => {
                // Handled via extended instructions; the earlier arms
                // exist to keep the match exhaustive.
                let signed = matches!(code, IMin | IMax);
                let inst = match code {
                    IMin => 39,  // SMin
                    UMin => 38,  // UMin
                    IMax => 42,  // SMax
                    _ => 41,     // UMax
                };
                let a = self.emit_value(ir, op.operand(0))?;
                let b = self.emit_value(ir, op.operand(1))?;
                if signed {
                    let a = self.module.op(Op::Bitcast, sint_type, &[a]);
                    let b = self.module.op(Op::Bitcast, sint_type, &[b]);
                    let result = self.module.ext_inst(sint_type, inst, &[a, b]);
                    Ok(self.module.op(Op::Bitcast, uint_type, &[result]))
                } else {
                    Ok(self.module.ext_inst(uint_type, inst, &[a, b]))
                }
            }

            _ => {
                let value = self.emit_logical(ir, node, code)?;
                // A stray boolean in value position becomes a mask.
                let ones = self.module.const_u32(0xFFFF_FFFF);
                let zero = self.module.const_u32(0);
                Ok(self.module.op(Op::Select, uint_type, &[value, ones, zero]))
            }
        }
    }

    fn operand_is_nonzero(&self, ir: &ShaderIr, operand: Option<&Node>) -> bool {
        let _ = ir;
        match operand {
            Some(node) => match &**node {
                NodeData::Immediate(value) => *value != 0,
                _ => true,
            },
            None => true,
        }
    }

    fn load_builtin_vec3(&mut self, variable: u32, element: u32) -> Result<u32, ShaderError> {
        let uint_type = self.module.type_id(Type::Uint);
        if variable == 0 {
            return Ok(self.module.const_u32(0));
        }
        let ptr = self
            .module
            .type_id(Type::Pointer(StorageClass::Input, Box::new(Type::Uint)));
        let index = self.module.const_u32(element);
        let slot = self.module.op(Op::AccessChain, ptr, &[variable, index]);
        Ok(self.module.op(Op::Load, uint_type, &[slot]))
    }

    //----------------------------------------------------------------------------------------------
    // Textures and images.

    fn sampler_ids(&self, sampler: &Sampler) -> Result<SamplerIds, ShaderError> {
        self.samplers
            .get(&sampler.index)
            .copied()
            .ok_or_else(|| ShaderError::Emission("undeclared sampler".into()))
    }

    fn build_coords(
        &mut self,
        ir: &ShaderIr,
        meta: &MetaTexture,
        coords: &[Node],
        as_integer: bool,
    ) -> Result<u32, ShaderError> {
        let float_type = self.module.type_id(Type::Float);
        let sint_type = self.module.type_id(Type::Sint);
        let mut components = Vec::with_capacity(coords.len() + 1);
        for coord in coords {
            if as_integer {
                let value = self.emit_value(ir, coord)?;
                components.push(self.module.op(Op::Bitcast, sint_type, &[value]));
            } else {
                components.push(self.value_as_float(ir, coord)?);
            }
        }
        if let Some(array) = &meta.array {
            // Array layer rides along as the last coordinate.
            let value = self.emit_value(ir, array)?;
            if as_integer {
                components.push(self.module.op(Op::Bitcast, sint_type, &[value]));
            } else {
                let float = self.module.op(Op::ConvertUToF, float_type, &[value]);
                components.push(float);
            }
        }
        let scalar_type = if as_integer { Type::Sint } else { Type::Float };
        if components.len() == 1 {
            return Ok(components[0]);
        }
        let vec_type = self.module.type_id(Type::Vector(
            Box::new(scalar_type),
            components.len() as u32,
        ));
        Ok(self
            .module
            .op(Op::CompositeConstruct, vec_type, &components))
    }

    fn load_sampled_image(
        &mut self,
        ir: &ShaderIr,
        meta: &MetaTexture,
    ) -> Result<(u32, SamplerIds), ShaderError> {
        let ids = self.sampler_ids(&meta.sampler)?;
        let pointer = if let Some(index) = &meta.index {
            let index_value = self.emit_value(ir, index)?;
            let ptr = self
                .module
                .pointer_to(StorageClass::UniformConstant, ids.sampled_type);
            self.module
                .op(Op::AccessChain, ptr, &[ids.variable, index_value])
        } else {
            ids.variable
        };
        let loaded = self.module.op(Op::Load, ids.sampled_type, &[pointer]);
        Ok((loaded, ids))
    }

    fn emit_texture_value(
        &mut self,
        ir: &ShaderIr,
        node: &Node,
        code: OperationCode,
    ) -> Result<u32, ShaderError> {
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        let meta = match op.meta() {
            Meta::Texture(meta) => meta.clone(),
            _ => return Err(ShaderError::Emission("texture op without meta".into())),
        };
        let float_type = self.module.type_id(Type::Float);
        let vec4f = self.module.type_id(Type::Vector(Box::new(Type::Float), 4));
        let uint_type = self.module.type_id(Type::Uint);

        match code {
            OperationCode::Texture | OperationCode::TextureLod => {
                let (sampled, _ids) = self.load_sampled_image(ir, &meta)?;
                let coords = self.build_coords(ir, &meta, op.operands(), false)?;
                let mut operand_mask = 0u32;
                let mut extra = Vec::new();
                if let Some(bias) = &meta.bias {
                    operand_mask |= 0x1;
                    let bias = self.value_as_float(ir, bias)?;
                    extra.push(bias);
                }
                if code == OperationCode::TextureLod {
                    operand_mask |= 0x2;
                    let lod = match &meta.lod {
                        Some(lod) => self.value_as_float(ir, lod)?,
                        None => self.module.const_f32(0.0),
                    };
                    extra.push(lod);
                }
                let result = if let Some(dref) = &meta.depth_compare {
                    let dref = self.value_as_float(ir, dref)?;
                    let mut operands = vec![sampled, coords, dref];
                    if operand_mask != 0 {
                        operands.push(operand_mask);
                        operands.extend_from_slice(&extra);
                    }
                    let spirv_op = if code == OperationCode::TextureLod {
                        Op::ImageSampleDrefExplicitLod
                    } else {
                        Op::ImageSampleDrefImplicitLod
                    };
                    self.module.op(spirv_op, float_type, &operands)
                } else {
                    let mut operands = vec![sampled, coords];
                    if operand_mask != 0 {
                        operands.push(operand_mask);
                        operands.extend_from_slice(&extra);
                    }
                    let spirv_op = if code == OperationCode::TextureLod {
                        Op::ImageSampleExplicitLod
                    } else {
                        Op::ImageSampleImplicitLod
                    };
                    let texel = self.module.op(spirv_op, vec4f, &operands);
                    self.module
                        .op(Op::CompositeExtract, float_type, &[texel, meta.element])
                };
                Ok(self.float_as_value(result))
            }
            OperationCode::TextureGather => {
                let (sampled, _ids) = self.load_sampled_image(ir, &meta)?;
                let coords = self.build_coords(ir, &meta, op.operands(), false)?;
                let result = if let Some(dref) = &meta.depth_compare {
                    let dref = self.value_as_float(ir, dref)?;
                    let texel = self
                        .module
                        .op(Op::ImageDrefGather, vec4f, &[sampled, coords, dref]);
                    self.module
                        .op(Op::CompositeExtract, float_type, &[texel, meta.element])
                } else {
                    let component = match &meta.component {
                        Some(component) => {
                            let value = self.emit_value(ir, component)?;
                            let sint_type = self.module.type_id(Type::Sint);
                            self.module.op(Op::Bitcast, sint_type, &[value])
                        }
                        None => self.module.const_s32(0),
                    };
                    let texel = self
                        .module
                        .op(Op::ImageGather, vec4f, &[sampled, coords, component]);
                    self.module
                        .op(Op::CompositeExtract, float_type, &[texel, meta.element])
                };
                Ok(self.float_as_value(result))
            }
            OperationCode::TexelFetch => {
                let (sampled, ids) = self.load_sampled_image(ir, &meta)?;
                let coords = self.build_coords(ir, &meta, op.operands(), true)?;
                let image = self.module.op(Op::Image, ids.image_type, &[sampled]);
                let mut operands = vec![image, coords];
                if let Some(lod) = &meta.lod {
                    let sint_type = self.module.type_id(Type::Sint);
                    let value = self.emit_value(ir, lod)?;
                    let value = self.module.op(Op::Bitcast, sint_type, &[value]);
                    operands.push(0x2); // Lod image operand
                    operands.push(value);
                }
                let texel = self.module.op(Op::ImageFetch, vec4f, &operands);
                let result = self
                    .module
                    .op(Op::CompositeExtract, float_type, &[texel, meta.element]);
                Ok(self.float_as_value(result))
            }
            OperationCode::TextureQueryDimensions => {
                let (sampled, ids) = self.load_sampled_image(ir, &meta)?;
                let image = self.module.op(Op::Image, ids.image_type, &[sampled]);
                self.module.add_capability(Capability::ImageQuery);
                if meta.element == 3 {
                    let levels = self.module.op(Op::ImageQueryLevels, uint_type, &[image]);
                    return Ok(levels);
                }
                let lod = self.emit_value(ir, op.operand(0))?;
                let components = ids.size_components;
                let size_type = if components == 1 {
                    self.module.type_id(Type::Uint)
                } else {
                    self.module
                        .type_id(Type::Vector(Box::new(Type::Uint), components))
                };
                let size = self
                    .module
                    .op(Op::ImageQuerySizeLod, size_type, &[image, lod]);
                if components == 1 || meta.element >= components {
                    if meta.element == 0 && components == 1 {
                        return Ok(size);
                    }
                    if meta.element >= components {
                        return Ok(self.module.const_u32(0));
                    }
                }
                Ok(self
                    .module
                    .op(Op::CompositeExtract, uint_type, &[size, meta.element]))
            }
            OperationCode::TextureQueryLod => {
                let (sampled, _ids) = self.load_sampled_image(ir, &meta)?;
                let coords = self.build_coords(ir, &meta, op.operands(), false)?;
                self.module.add_capability(Capability::ImageQuery);
                let vec2f = self.module.type_id(Type::Vector(Box::new(Type::Float), 2));
                let lod = self.module.op(Op::ImageQueryLod, vec2f, &[sampled, coords]);
                let value = self
                    .module
                    .op(Op::CompositeExtract, float_type, &[lod, meta.element.min(1)]);
                Ok(self.float_as_value(value))
            }
            OperationCode::TextureGradient => {
                let (sampled, _ids) = self.load_sampled_image(ir, &meta)?;
                let coords = self.build_coords(ir, &meta, op.operands(), false)?;
                let count = op.operands().len();
                let mut dx = Vec::new();
                let mut dy = Vec::new();
                for pair in meta.derivates.chunks(2) {
                    if let [x, y] = pair {
                        dx.push(self.value_as_float(ir, x)?);
                        dy.push(self.value_as_float(ir, y)?);
                    }
                }
                let grad_type = if count == 1 {
                    self.module.type_id(Type::Float)
                } else {
                    self.module
                        .type_id(Type::Vector(Box::new(Type::Float), count as u32))
                };
                let dx = if dx.len() == 1 {
                    dx[0]
                } else {
                    self.module.op(Op::CompositeConstruct, grad_type, &dx)
                };
                let dy = if dy.len() == 1 {
                    dy[0]
                } else {
                    self.module.op(Op::CompositeConstruct, grad_type, &dy)
                };
                let texel = self.module.op(
                    Op::ImageSampleExplicitLod,
                    vec4f,
                    &[sampled, coords, 0x4, dx, dy],
                );
                let result = self
                    .module
                    .op(Op::CompositeExtract, float_type, &[texel, meta.element]);
                Ok(self.float_as_value(result))
            }
            _ => unreachable!(),
        }
    }

    fn image_ids(&self, index: u32) -> Result<(u32, u32), ShaderError> {
        self.images
            .get(&index)
            .copied()
            .ok_or_else(|| ShaderError::Emission("undeclared image".into()))
    }

    fn build_image_coords(&mut self, ir: &ShaderIr, coords: &[Node]) -> Result<u32, ShaderError> {
        let sint_type = self.module.type_id(Type::Sint);
        let mut components = Vec::with_capacity(coords.len());
        for coord in coords {
            let value = self.emit_value(ir, coord)?;
            components.push(self.module.op(Op::Bitcast, sint_type, &[value]));
        }
        if components.len() == 1 {
            return Ok(components[0]);
        }
        let vec_type = self.module.type_id(Type::Vector(
            Box::new(Type::Sint),
            components.len() as u32,
        ));
        Ok(self
            .module
            .op(Op::CompositeConstruct, vec_type, &components))
    }

    fn emit_image_load(&mut self, ir: &ShaderIr, node: &Node) -> Result<u32, ShaderError> {
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        let meta = match op.meta() {
            Meta::Image(meta) => meta.clone(),
            _ => return Err(ShaderError::Emission("image op without meta".into())),
        };
        let (variable, image_type) = self.image_ids(meta.image.index)?;
        let uint_type = self.module.type_id(Type::Uint);
        let vec4u = self.module.type_id(Type::Vector(Box::new(Type::Uint), 4));
        let coords = self.build_image_coords(ir, op.operands())?;
        let image = self.module.op(Op::Load, image_type, &[variable]);
        let texel = self.module.op(Op::ImageRead, vec4u, &[image, coords]);
        Ok(self
            .module
            .op(Op::CompositeExtract, uint_type, &[texel, meta.element]))
    }

    fn emit_image_store(&mut self, ir: &ShaderIr, node: &Node) -> Result<(), ShaderError> {
        let op = match &**node {
            NodeData::Operation(op) => op,
            _ => unreachable!(),
        };
        let meta = match op.meta() {
            Meta::Image(meta) => meta.clone(),
            _ => return Err(ShaderError::Emission("image op without meta".into())),
        };
        let (variable, image_type) = self.image_ids(meta.image.index)?;
        let vec4u = self.module.type_id(Type::Vector(Box::new(Type::Uint), 4));
        let coords = self.build_image_coords(ir, op.operands())?;
        let image = self.module.op(Op::Load, image_type, &[variable]);
        let mut components = Vec::with_capacity(4);
        for value in &meta.values {
            components.push(self.emit_value(ir, value)?);
        }
        while components.len() < 4 {
            components.push(self.module.const_u32(0));
        }
        let texel = self
            .module
            .op(Op::CompositeConstruct, vec4u, &components);
        self.module.op_void(Op::ImageWrite, &[image, coords, texel]);
        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Epilogue.

    fn emit_epilogue(&mut self) {
        if self.stage != ShaderStage::Fragment {
            if self.stage == ShaderStage::Vertex {
                if let Some(point_size) = self.runtime_info.fixed_state_point_size {
                    if self.point_size != 0 {
                        let value = self.module.const_f32(point_size.into_inner());
                        self.module.op_void(Op::Store, &[self.point_size, value]);
                    }
                }
                if self.runtime_info.y_negate && self.position != 0 {
                    let float_type = self.module.type_id(Type::Float);
                    let ptr = self
                        .module
                        .type_id(Type::Pointer(StorageClass::Output, Box::new(Type::Float)));
                    let one = self.module.const_u32(1);
                    let slot = self
                        .module
                        .op(Op::AccessChain, ptr, &[self.position, one]);
                    let y = self.module.op(Op::Load, float_type, &[slot]);
                    let negated = self.module.op(Op::FNegate, float_type, &[y]);
                    self.module.op_void(Op::Store, &[slot, negated]);
                }
            }
            return;
        }
        // Fragment: copy color registers to render targets, honoring
        // the header component masks.
        let float_type = self.module.type_id(Type::Float);
        let ptr_type = self
            .module
            .type_id(Type::Pointer(StorageClass::Output, Box::new(Type::Float)));
        // Enabled components are packed in ascending register order.
        let mut current_reg = 0u32;
        let header_raw: Vec<(u32, u32)> = (0..8u32)
            .flat_map(|rt| (0..4u32).map(move |component| (rt, component)))
            .collect();
        for (rt, component) in header_raw {
            if self.frag_colors[rt as usize] == 0 {
                continue;
            }
            if !self.frag_color_enabled(rt, component) {
                continue;
            }
            let value = self.load_register(current_reg);
            current_reg += 1;
            let as_float = self.module.op(Op::Bitcast, float_type, &[value]);
            let final_value = self.apply_alpha_test(rt, component, as_float);
            let element = self.module.const_u32(component);
            let slot = self.module.op(
                Op::AccessChain,
                ptr_type,
                &[self.frag_colors[rt as usize], element],
            );
            self.module.op_void(Op::Store, &[slot, final_value]);
        }
        if self.frag_depth != 0 {
            // Depth rides in the register after the color outputs.
            let value = self.load_register(current_reg);
            let as_float = self.module.op(Op::Bitcast, float_type, &[value]);
            self.module.op_void(Op::Store, &[self.frag_depth, as_float]);
            self.epilogue_emitted_depth = true;
        }
    }

    fn frag_color_enabled(&self, rt: u32, component: u32) -> bool {
        self.frag_color_masks[rt as usize][component as usize]
    }

    fn apply_alpha_test(&mut self, rt: u32, component: u32, value: u32) -> u32 {
        if rt != 0 || component != 3 {
            return value;
        }
        let (func, reference) = match (
            self.runtime_info.alpha_test_func,
            self.runtime_info.alpha_test_reference,
        ) {
            (Some(func), Some(reference)) => (func, reference),
            _ => return value,
        };
        match func {
            CompareFunction::Always => return value,
            CompareFunction::Never => {
                self.emit_discard();
                return value;
            }
            _ => {}
        }
        let bool_type = self.module.type_id(Type::Bool);
        let reference = self.module.const_f32(reference.into_inner());
        let spirv_op = match func {
            CompareFunction::Less => Op::FOrdLessThan,
            CompareFunction::Equal => Op::FOrdEqual,
            CompareFunction::LessThanEqual => Op::FOrdLessThanEqual,
            CompareFunction::Greater => Op::FOrdGreaterThan,
            CompareFunction::NotEqual => Op::FOrdNotEqual,
            CompareFunction::GreaterThanEqual => Op::FOrdGreaterThanEqual,
            _ => Op::FOrdGreaterThanEqual,
        };
        let passes = self.module.op(spirv_op, bool_type, &[value, reference]);
        let merge = self.module.allocate_id();
        let kill_label = self.module.allocate_id();
        self.module.op_void(Op::SelectionMerge, &[merge, 0]);
        self.module
            .op_void(Op::BranchConditional, &[passes, merge, kill_label]);
        self.module.label(kill_label);
        self.module.op_void(Op::Kill, &[]);
        self.module.label(merge);
        value
    }
}

fn is_logical(code: OperationCode) -> bool {
    use self::OperationCode::*;
    matches!(
        code,
        LogicalAnd
            | LogicalOr
            | LogicalXor
            | LogicalNegate
            | LogicalPick2
            | LogicalAnd2
            | LogicalFLessThan
            | LogicalFEqual
            | LogicalFLessEqual
            | LogicalFGreaterThan
            | LogicalFNotEqual
            | LogicalFGreaterEqual
            | LogicalFIsNan
            | LogicalILessThan
            | LogicalIEqual
            | LogicalILessEqual
            | LogicalIGreaterThan
            | LogicalINotEqual
            | LogicalIGreaterEqual
            | LogicalULessThan
            | LogicalUEqual
            | LogicalULessEqual
            | LogicalUGreaterThan
            | LogicalUNotEqual
            | LogicalUGreaterEqual
            | Logical2HLessThan
            | Logical2HEqual
            | Logical2HLessEqual
            | Logical2HGreaterThan
            | Logical2HNotEqual
            | Logical2HGreaterEqual
            | Logical2HLessThanWithNan
            | Logical2HEqualWithNan
            | Logical2HLessEqualWithNan
            | Logical2HGreaterThanWithNan
            | Logical2HNotEqualWithNan
            | Logical2HGreaterEqualWithNan
            | VoteAll
            | VoteAny
            | VoteEqual
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::tests::TestRegistry;
    use crate::settings::CompilerSettings;

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
        opcode_word("1110001100000000") | 7 << 16 | 0xF
    }

    #[test]
    fn emits_a_valid_module_header() {
        let registry = TestRegistry::empty();
        let mov = opcode_word("0011100010011000") | 1 << 20 | 7 << 16;
        let ir = crate::shader_ir::ShaderIr::decode(
            vec![0, mov, 0, exit_instr()],
            0,
            CompilerSettings::default(),
            &registry,
            crate::ShaderStage::Compute,
        );
        let info = crate::info::Info::from_ir(&ir);
        let program = Program {
            ir,
            info,
            vertex_a: None,
        };
        let profile = Profile::default();
        let runtime_info = RuntimeInfo::default();
        let mut bindings = Bindings::default();
        let code = emit_spirv(&profile, &runtime_info, &program, &mut bindings)
            .expect("emission failed");
        assert_eq!(code[0], module::MAGIC);
        assert_eq!(code[1], profile.supported_spirv);
        // The module must contain an OpEntryPoint for GLCompute.
        let mut cursor = 5;
        let mut found_entry = false;
        while cursor < code.len() {
            let word = code[cursor];
            let count = (word >> 16) as usize;
            let opcode = word & 0xFFFF;
            if opcode == Op::EntryPoint as u32 {
                assert_eq!(code[cursor + 1], ExecutionModel::GLCompute as u32);
                found_entry = true;
            }
            assert!(count > 0, "malformed instruction at {}", cursor);
            cursor += count;
        }
        assert!(found_entry);
    }

    #[test]
    fn bindings_continue_across_stages() {
        let registry = TestRegistry::empty();
        // A program reading c0 so a uniform binding is declared.
        let mov_cbuf = opcode_word("0100110010011000") | 7 << 16; // MOV_C r0 = c0[0]
        let ir = crate::shader_ir::ShaderIr::decode(
            vec![0, mov_cbuf, 0, exit_instr()],
            0,
            CompilerSettings::default(),
            &registry,
            crate::ShaderStage::Compute,
        );
        let info = crate::info::Info::from_ir(&ir);
        let program = Program {
            ir,
            info,
            vertex_a: None,
        };
        let profile = Profile::default();
        let runtime_info = RuntimeInfo::default();
        let mut bindings = Bindings::default();
        emit_spirv(&profile, &runtime_info, &program, &mut bindings).unwrap();
        assert!(bindings.unified >= 1, "no binding was allocated");
    }
}
