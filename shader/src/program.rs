//! Whole-program translation entry points.

use crate::info::Info;
use crate::registry::Registry;
use crate::settings::CompilerSettings;
use crate::shader_ir::ShaderIr;
use crate::{ShaderError, ShaderStage};

/// Per-stage view of the guest program and its engine state. This is
/// the seam to the front-end memory manager; translation never touches
/// guest memory directly.
pub trait Environment: Registry {
    /// Entry point of the program in instruction slots.
    fn start_address(&self) -> u32;

    /// The program words, from slot zero up to the cached size.
    fn code(&self) -> &[u64];

    fn local_memory_size(&self) -> u64;

    fn shared_memory_size(&self) -> u32;

    /// Constant buffer holding bound texture handles.
    fn texture_bound_buffer(&self) -> u32;

    /// Compute only.
    fn workgroup_size(&self) -> [u32; 3];

    fn stage(&self) -> ShaderStage;
}

/// A translated stage: the IR plus its reflection snapshot.
pub struct Program<'r> {
    pub ir: ShaderIr<'r>,
    pub info: Info,
    /// Merged VertexA program emitted before this one's code.
    pub vertex_a: Option<Box<Program<'r>>>,
}

/// Translates one stage. Control-flow failures degrade internally; an
/// empty program is the only hard error.
pub fn translate_program<'r, E: Environment>(
    env: &'r E,
    settings: CompilerSettings,
) -> Result<Program<'r>, ShaderError> {
    let code = env.code().to_vec();
    if code.is_empty() {
        return Err(ShaderError::EmptyProgram);
    }
    let ir = ShaderIr::decode(
        code,
        env.start_address(),
        settings,
        env as &dyn Registry,
        env.stage(),
    );
    let mut info = Info::from_ir(&ir);
    info.local_memory_size = info.local_memory_size.max(env.local_memory_size());
    Ok(Program {
        ir,
        info,
        vertex_a: None,
    })
}

/// Stitches a VertexA program in front of a VertexB program. The
/// combined reflection is the union of both stages.
pub fn merge_dual_vertex_programs<'r>(
    vertex_a: Program<'r>,
    mut vertex_b: Program<'r>,
) -> Program<'r> {
    vertex_b.info = merge_info(&vertex_a.info, &vertex_b.info);
    vertex_b.vertex_a = Some(Box::new(vertex_a));
    vertex_b
}

fn merge_info(a: &Info, b: &Info) -> Info {
    let mut merged = b.clone();
    merged.usage |= a.usage;
    merged.constant_buffer_mask |= a.constant_buffer_mask;
    for (index, &size) in a.constant_buffer_used_sizes.iter().enumerate() {
        merged.constant_buffer_used_sizes[index] =
            merged.constant_buffer_used_sizes[index].max(size);
    }
    for i in 0..4 {
        merged.loads.mask[i] |= a.loads.mask[i];
        merged.stores.mask[i] |= a.stores.mask[i];
        merged.passthrough.mask[i] |= a.passthrough.mask[i];
    }
    merged.clip_distances_mask |= a.clip_distances_mask;
    for descriptor in &a.constant_buffer_descriptors {
        if !merged
            .constant_buffer_descriptors
            .iter()
            .any(|d| d.index == descriptor.index)
        {
            merged.constant_buffer_descriptors.push(*descriptor);
        }
    }
    for descriptor in &a.storage_buffers_descriptors {
        if !merged.storage_buffers_descriptors.iter().any(|d| {
            d.cbuf_index == descriptor.cbuf_index && d.cbuf_offset == descriptor.cbuf_offset
        }) {
            merged.storage_buffers_descriptors.push(*descriptor);
        }
    }
    for descriptor in &a.texture_descriptors {
        if !merged.texture_descriptors.iter().any(|d| {
            d.cbuf_index == descriptor.cbuf_index && d.cbuf_offset == descriptor.cbuf_offset
        }) {
            merged.texture_descriptors.push(*descriptor);
        }
    }
    for descriptor in &a.image_descriptors {
        if !merged.image_descriptors.iter().any(|d| {
            d.cbuf_index == descriptor.cbuf_index && d.cbuf_offset == descriptor.cbuf_offset
        }) {
            merged.image_descriptors.push(*descriptor);
        }
    }
    merged.local_memory_size = merged.local_memory_size.max(a.local_memory_size);
    merged
}

impl<'r> Program<'r> {
    pub fn stage(&self) -> ShaderStage {
        self.ir.stage()
    }
}
