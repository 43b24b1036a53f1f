//! Host capability profile and per-invocation runtime state.

use crate::ShaderStage;
use ordered_float::NotNan;

/// Capabilities and known quirks of the host driver. Kept as a plain
/// options struct so the pipeline cache key never depends on driver
/// identity.
#[derive(Clone, Debug)]
pub struct Profile {
    /// Highest SPIR-V version the host accepts, `0x0001_0400` style.
    pub supported_spirv: u32,

    pub support_int8: bool,
    pub support_int16: bool,
    pub support_int64: bool,
    pub support_vote: bool,
    pub support_viewport_index_layer_non_geometry: bool,
    pub support_typeless_image_loads: bool,
    pub support_demote_to_helper_invocation: bool,
    pub support_derivative_control: bool,
    pub support_geometry_shader_passthrough: bool,
    pub support_int64_atomics: bool,
    pub support_fp16_denorm_flush: bool,
    pub support_fp32_denorm_flush: bool,

    pub warp_size_potentially_larger_than_guest: bool,

    pub has_broken_spirv_clamp: bool,
    pub has_broken_signed_operations: bool,
    pub ignore_nan_fp_comparisons: bool,
}

impl Default for Profile {
    fn default() -> Profile {
        Profile {
            supported_spirv: 0x0001_0300,
            support_int8: true,
            support_int16: true,
            support_int64: true,
            support_vote: true,
            support_viewport_index_layer_non_geometry: false,
            support_typeless_image_loads: true,
            support_demote_to_helper_invocation: true,
            support_derivative_control: true,
            support_geometry_shader_passthrough: false,
            support_int64_atomics: false,
            support_fp16_denorm_flush: false,
            support_fp32_denorm_flush: false,
            warp_size_potentially_larger_than_guest: false,
            has_broken_spirv_clamp: false,
            has_broken_signed_operations: false,
            ignore_nan_fp_comparisons: false,
        }
    }
}

/// Translation toggles that depend on the host but not on pipeline
/// state.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostTranslateInfo {
    pub support_float16: bool,
    pub support_int64: bool,
    pub needs_demote_reorder: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InputTopology {
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
}

impl Default for InputTopology {
    fn default() -> InputTopology {
        InputTopology::Triangles
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessThanEqual,
    Greater,
    NotEqual,
    GreaterThanEqual,
    Always,
}

/// One transform-feedback varying slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TransformFeedbackVarying {
    pub buffer: u32,
    pub stride: u32,
    pub offset: u32,
    pub components: u32,
}

/// Fixed state the emitter needs for one stage of one pipeline.
#[derive(Clone, Debug, Default)]
pub struct RuntimeInfo {
    /// Varyings stored by the previous stage, for input pruning.
    pub previous_stage_stores: crate::info::VaryingState,

    pub input_topology: InputTopology,

    /// Point size to write when the fixed state forces one.
    pub fixed_state_point_size: Option<NotNan<f32>>,
    pub alpha_test_func: Option<CompareFunction>,
    pub alpha_test_reference: Option<NotNan<f32>>,

    pub tess_clockwise: bool,

    pub force_early_z: bool,
    pub y_negate: bool,
    pub convert_depth_mode: bool,

    /// Vertex attribute base types, two bits per attribute.
    pub generic_input_types: u64,

    pub xfb_varyings: Vec<TransformFeedbackVarying>,
}

impl RuntimeInfo {
    pub fn for_stage(_stage: ShaderStage) -> RuntimeInfo {
        RuntimeInfo::default()
    }
}
