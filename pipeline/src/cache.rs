//! The pipeline cache.
//!
//! Drives the per-draw lookup: refresh the guest-shader hashes and the
//! fixed-state key, try the previous pipeline's transition list, then
//! the hash map, and finally translate + build on a miss. Builds run on
//! a worker pool; completed pipelines are serialized to disk on a
//! single-thread queue so the file keeps completion order.

use crate::compute::{ComputePipeline, ComputePipelineCacheKey};
use crate::descriptor::DescriptorLayoutBuilder;
use crate::disk::{self, CacheRecord};
use crate::env::FileEnvironment;
use crate::fixed_state::FixedPipelineState;
use crate::graphics::{GraphicsPipeline, GraphicsPipelineCacheKey, MAX_PROGRAMS};
use crate::notify::ShaderNotify;
use crate::traits::{BuildObserver, Device};
use crate::worker::{thread_worker, StopToken, ThreadWorker};
use crate::{CacheError, CacheSettings, LoadCallbackStage};
use fxhash::FxHashMap;
use maxwell_shader::backend::spirv::emit_spirv;
use maxwell_shader::backend::Bindings;
use maxwell_shader::info::Info;
use maxwell_shader::profile::{
    CompareFunction, HostTranslateInfo, InputTopology, Profile, RuntimeInfo,
};
use maxwell_shader::program::{merge_dual_vertex_programs, translate_program, Program};
use maxwell_shader::settings::CompilerSettings;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Draw parameters consulted by the asynchronous-build heuristic.
#[derive(Copy, Clone, Debug, Default)]
pub struct DrawParams {
    pub has_depth_target: bool,
    pub index_count: u32,
    pub vertex_count: u32,
}

/// The guest state the cache reads each draw: shader snapshots and the
/// fixed-function registers.
pub trait GuestShaderState {
    /// Per-program-slot environments; `None` when shaders are disabled
    /// entirely.
    fn graphics_environments(&mut self) -> Option<Vec<Option<FileEnvironment>>>;

    fn compute_environment(&mut self) -> Option<FileEnvironment>;

    /// Packs the current fixed-function state, honoring the host
    /// capabilities that shorten the key.
    fn refresh_fixed_state(
        &mut self,
        has_extended_dynamic_state: bool,
        has_dynamic_vertex_input: bool,
        state: &mut FixedPipelineState,
    );

    fn draw_params(&self) -> DrawParams {
        DrawParams::default()
    }
}

pub type LoadCallback<'a> = dyn FnMut(LoadCallbackStage, usize, usize) + 'a;

pub struct PipelineCache<D: Device> {
    device: Arc<D>,
    settings: CacheSettings,
    profile: Profile,
    host_info: HostTranslateInfo,

    graphics_cache: FxHashMap<GraphicsPipelineCacheKey, Arc<GraphicsPipeline<D>>>,
    compute_cache: FxHashMap<ComputePipelineCacheKey, Arc<ComputePipeline<D>>>,
    current_pipeline: Option<Arc<GraphicsPipeline<D>>>,
    graphics_key: GraphicsPipelineCacheKey,

    workers: ThreadWorker,
    serialization_thread: ThreadWorker,
    notify: Arc<ShaderNotify>,
    cache_file: Option<PathBuf>,
}

impl<D: Device> PipelineCache<D> {
    pub fn new(
        device: Arc<D>,
        settings: CacheSettings,
        profile: Profile,
        host_info: HostTranslateInfo,
        notify: Arc<ShaderNotify>,
    ) -> PipelineCache<D> {
        let concurrency = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        let workers = thread_worker(concurrency.max(2) - 1, "maxwell:PipelineBuilder");
        let serialization_thread = thread_worker(1, "maxwell:PipelineSerialization");
        PipelineCache {
            device,
            settings,
            profile,
            host_info,
            graphics_cache: FxHashMap::default(),
            compute_cache: FxHashMap::default(),
            current_pipeline: None,
            graphics_key: GraphicsPipelineCacheKey::default(),
            workers,
            serialization_thread,
            notify,
            cache_file: None,
        }
    }

    pub fn notify(&self) -> &Arc<ShaderNotify> {
        &self.notify
    }

    pub fn graphics_cache_len(&self) -> usize {
        self.graphics_cache.len()
    }

    pub fn compute_cache_len(&self) -> usize {
        self.compute_cache.len()
    }

    /// Per-draw graphics lookup.
    pub fn current_graphics_pipeline<S: GuestShaderState>(
        &mut self,
        state: &mut S,
    ) -> Option<Arc<GraphicsPipeline<D>>> {
        let envs = match state.graphics_environments() {
            Some(envs) => envs,
            None => {
                self.current_pipeline = None;
                return None;
            }
        };
        let mut key = GraphicsPipelineCacheKey::default();
        for (index, env) in envs.iter().enumerate().take(MAX_PROGRAMS) {
            key.unique_hashes[index] = env.as_ref().map_or(0, FileEnvironment::unique_hash);
        }
        state.refresh_fixed_state(
            self.device.has_extended_dynamic_state(),
            self.device.has_dynamic_vertex_input(),
            &mut key.state,
        );
        self.graphics_key = key;

        if let Some(current) = &self.current_pipeline {
            if let Some(next) = GraphicsPipeline::next(current, &key) {
                self.current_pipeline = Some(Arc::clone(&next));
                return self.built_pipeline(next, state);
            }
        }
        self.current_graphics_pipeline_slow_path(state, envs)
    }

    fn current_graphics_pipeline_slow_path<S: GuestShaderState>(
        &mut self,
        state: &mut S,
        envs: Vec<Option<FileEnvironment>>,
    ) -> Option<Arc<GraphicsPipeline<D>>> {
        let key = self.graphics_key;
        let pipeline = match self.graphics_cache.get(&key) {
            Some(pipeline) => Arc::clone(pipeline),
            None => {
                let pipeline = self.create_graphics_pipeline(key, envs, true)?;
                self.graphics_cache.insert(key, Arc::clone(&pipeline));
                pipeline
            }
        };
        if let Some(current) = &self.current_pipeline {
            current.add_transition(key, Arc::clone(&pipeline));
        }
        self.current_pipeline = Some(Arc::clone(&pipeline));
        self.built_pipeline(pipeline, state)
    }

    /// Applies the asynchronous-shaders policy: skip disposable draws
    /// whose pipeline is still building.
    fn built_pipeline<S: GuestShaderState>(
        &self,
        pipeline: Arc<GraphicsPipeline<D>>,
        state: &S,
    ) -> Option<Arc<GraphicsPipeline<D>>> {
        if pipeline.is_built() || !self.settings.use_asynchronous_shaders {
            return Some(pipeline);
        }
        let params = state.draw_params();
        // Depth-tested draws contribute lasting state; skip them until
        // the pipeline exists.
        if params.has_depth_target {
            return None;
        }
        // Tiny draws are usually one-shot full-screen quads; wait for
        // those instead of dropping them.
        if params.index_count <= 6 || params.vertex_count <= 6 {
            return Some(pipeline);
        }
        None
    }

    /// Per-dispatch compute lookup.
    pub fn current_compute_pipeline<S: GuestShaderState>(
        &mut self,
        state: &mut S,
    ) -> Option<Arc<ComputePipeline<D>>> {
        let env = state.compute_environment()?;
        let key = ComputePipelineCacheKey {
            unique_hash: env.unique_hash(),
            shared_memory_size: env.shared_memory_size,
            workgroup_size: env.workgroup_size,
        };
        if let Some(pipeline) = self.compute_cache.get(&key) {
            return Some(Arc::clone(pipeline));
        }
        let pipeline = self.create_compute_pipeline(key, env, true)?;
        self.compute_cache.insert(key, Arc::clone(&pipeline));
        Some(pipeline)
    }

    fn create_graphics_pipeline(
        &mut self,
        key: GraphicsPipelineCacheKey,
        envs: Vec<Option<FileEnvironment>>,
        build_in_parallel: bool,
    ) -> Option<Arc<GraphicsPipeline<D>>> {
        let result = build_graphics_pipeline(
            &*self.device,
            &self.profile,
            &self.host_info,
            self.settings.compiler,
            &key,
            &envs,
        );
        let pipeline = match result {
            Ok(pipeline) => Arc::new(pipeline),
            Err(error) => {
                error!("Graphics pipeline creation failed: {}", error);
                return None;
            }
        };
        self.dispatch_build(Arc::clone(&pipeline), build_in_parallel);
        self.queue_serialization(CacheRecord::Graphics {
            key,
            envs: envs.into_iter().flatten().collect(),
        });
        Some(pipeline)
    }

    fn create_compute_pipeline(
        &mut self,
        key: ComputePipelineCacheKey,
        env: FileEnvironment,
        build_in_parallel: bool,
    ) -> Option<Arc<ComputePipeline<D>>> {
        let result = build_compute_pipeline(
            &*self.device,
            &self.profile,
            &self.host_info,
            self.settings.compiler,
            key,
            &env,
        );
        let pipeline = match result {
            Ok(pipeline) => Arc::new(pipeline),
            Err(error) => {
                error!("Compute pipeline creation failed: {}", error);
                return None;
            }
        };
        let device = Arc::clone(&self.device);
        let notify = Arc::clone(&self.notify);
        notify.mark_shader_building();
        if build_in_parallel {
            let worker_pipeline = Arc::clone(&pipeline);
            self.workers.queue_work(move |_| {
                if let Err(error) = worker_pipeline.build(&*device) {
                    error!("Async compute pipeline build failed: {}", error);
                }
                notify.mark_shader_complete();
            });
        } else {
            if let Err(error) = pipeline.build(&*device) {
                error!("Compute pipeline build failed: {}", error);
                notify.mark_shader_complete();
                return None;
            }
            notify.mark_shader_complete();
        }
        self.queue_serialization(CacheRecord::Compute { key, env });
        Some(pipeline)
    }

    fn dispatch_build(&self, pipeline: Arc<GraphicsPipeline<D>>, build_in_parallel: bool) {
        let device = Arc::clone(&self.device);
        let notify = Arc::clone(&self.notify);
        notify.mark_shader_building();
        if build_in_parallel {
            self.workers.queue_work(move |_| {
                if let Err(error) = pipeline.build(&*device) {
                    error!("Async graphics pipeline build failed: {}", error);
                }
                notify.mark_shader_complete();
            });
        } else {
            if let Err(error) = pipeline.build(&*device) {
                error!("Graphics pipeline build failed: {}", error);
            }
            notify.mark_shader_complete();
        }
    }

    fn queue_serialization(&self, record: CacheRecord) {
        let path = match &self.cache_file {
            Some(path) => path.clone(),
            None => return,
        };
        self.serialization_thread.queue_work(move |_| {
            if let Err(error) = disk::append_record(&path, &record) {
                error!("Failed to serialize pipeline: {}", error);
            }
        });
    }

    /// Loads the per-title disk cache, building every entry on the
    /// worker pool. Cooperatively cancellable; partial results stay.
    pub fn load_disk_resources(
        &mut self,
        title_id: u64,
        stop: &StopToken,
        callback: &mut LoadCallback,
    ) {
        let base_dir = match &self.settings.shader_cache_dir {
            Some(dir) => dir.join(format!("{:016x}", title_id)),
            None => return,
        };
        if let Err(error) = std::fs::create_dir_all(&base_dir) {
            error!("Failed to create pipeline cache directories: {}", error);
            return;
        }
        let path = base_dir.join("pipelines.bin");
        self.cache_file = Some(path.clone());

        let graphics_results: Arc<
            Mutex<Vec<(GraphicsPipelineCacheKey, Arc<GraphicsPipeline<D>>)>>,
        > = Arc::new(Mutex::new(Vec::new()));
        let compute_results: Arc<
            Mutex<Vec<(ComputePipelineCacheKey, Arc<ComputePipeline<D>>)>>,
        > = Arc::new(Mutex::new(Vec::new()));
        let built = Arc::new(Mutex::new(0usize));

        let has_eds = self.device.has_extended_dynamic_state();
        let has_dvi = self.device.has_dynamic_vertex_input();
        let mut total = 0usize;
        callback(LoadCallbackStage::Prepare, 0, 0);

        let load_result = disk::load_records(&path, stop, |record| match record {
            CacheRecord::Graphics { key, envs } => {
                // Skip records whose embedded capability bits no longer
                // match the device.
                if key.state.extended_dynamic_state() != has_eds
                    || key.state.dynamic_vertex_input() != has_dvi
                {
                    return;
                }
                total += 1;
                let device = Arc::clone(&self.device);
                let profile = self.profile.clone();
                let host_info = self.host_info;
                let compiler = self.settings.compiler;
                let results = Arc::clone(&graphics_results);
                let built = Arc::clone(&built);
                let notify = Arc::clone(&self.notify);
                self.workers.queue_work(move |_| {
                    notify.mark_shader_building();
                    let mut slots: Vec<Option<FileEnvironment>> = vec![None; MAX_PROGRAMS];
                    let mut cursor = 0usize;
                    for (index, hash) in key.unique_hashes.iter().enumerate() {
                        if *hash != 0 && cursor < envs.len() {
                            slots[index] = Some(envs[cursor].clone());
                            cursor += 1;
                        }
                    }
                    match build_graphics_pipeline(
                        &*device, &profile, &host_info, compiler, &key, &slots,
                    ) {
                        Ok(pipeline) => {
                            let pipeline = Arc::new(pipeline);
                            if let Err(error) = pipeline.build(&*device) {
                                error!("Cached pipeline failed to build: {}", error);
                            } else {
                                results.lock().unwrap().push((key, pipeline));
                            }
                        }
                        Err(error) => {
                            // Unbuildable entries are dropped silently;
                            // the next boot recreates them on demand.
                            warn!("Dropping cached pipeline: {}", error);
                        }
                    }
                    notify.mark_shader_complete();
                    *built.lock().unwrap() += 1;
                });
            }
            CacheRecord::Compute { key, env } => {
                total += 1;
                let device = Arc::clone(&self.device);
                let profile = self.profile.clone();
                let host_info = self.host_info;
                let compiler = self.settings.compiler;
                let results = Arc::clone(&compute_results);
                let built = Arc::clone(&built);
                let notify = Arc::clone(&self.notify);
                self.workers.queue_work(move |_| {
                    notify.mark_shader_building();
                    match build_compute_pipeline(
                        &*device, &profile, &host_info, compiler, key, &env,
                    ) {
                        Ok(pipeline) => {
                            let pipeline = Arc::new(pipeline);
                            if let Err(error) = pipeline.build(&*device) {
                                error!("Cached pipeline failed to build: {}", error);
                            } else {
                                results.lock().unwrap().push((key, pipeline));
                            }
                        }
                        Err(error) => {
                            warn!("Dropping cached pipeline: {}", error);
                        }
                    }
                    notify.mark_shader_complete();
                    *built.lock().unwrap() += 1;
                });
            }
        });
        if let Err(error) = load_result {
            error!("Failed to load the pipeline cache: {}", error);
        }
        info!("Total pipeline count: {}", total);

        callback(LoadCallbackStage::Build, 0, total);
        self.workers.wait_for_requests(Some(stop));
        callback(LoadCallbackStage::Complete, *built.lock().unwrap(), total);

        for (key, pipeline) in graphics_results.lock().unwrap().drain(..) {
            self.graphics_cache.entry(key).or_insert(pipeline);
        }
        for (key, pipeline) in compute_results.lock().unwrap().drain(..) {
            self.compute_cache.entry(key).or_insert(pipeline);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Stage translation and host object construction, shared by the draw
// path and the disk loader.

fn make_runtime_info(
    key: &GraphicsPipelineCacheKey,
    previous_stage: Option<&Info>,
) -> RuntimeInfo {
    let mut runtime_info = RuntimeInfo::default();
    if let Some(previous) = previous_stage {
        runtime_info.previous_stage_stores = previous.stores;
    }
    runtime_info.input_topology = match key.state.topology() {
        0 => InputTopology::Points,
        1 | 2 | 0xE => InputTopology::Lines,
        0xA => InputTopology::LinesAdjacency,
        _ => InputTopology::Triangles,
    };
    runtime_info.force_early_z = key.state.early_z();
    runtime_info.y_negate = key.state.y_negate();
    runtime_info.tess_clockwise = key.state.tessellation_clockwise();
    let alpha_func = match key.state.alpha_test_func() {
        0 => CompareFunction::Never,
        1 => CompareFunction::Less,
        2 => CompareFunction::Equal,
        3 => CompareFunction::LessThanEqual,
        4 => CompareFunction::Greater,
        5 => CompareFunction::NotEqual,
        6 => CompareFunction::GreaterThanEqual,
        _ => CompareFunction::Always,
    };
    if alpha_func != CompareFunction::Always {
        runtime_info.alpha_test_func = Some(alpha_func);
        if let Ok(reference) =
            ordered_float_not_nan(f32::from_bits(key.state.alpha_test_ref))
        {
            runtime_info.alpha_test_reference = Some(reference);
        }
    }
    runtime_info.generic_input_types = (u64::from(key.state.attribute_types[1]) << 32)
        | u64::from(key.state.attribute_types[0]);
    runtime_info
}

fn ordered_float_not_nan(
    value: f32,
) -> Result<ordered_float::NotNan<f32>, ordered_float::FloatIsNan> {
    ordered_float::NotNan::new(value)
}

fn build_graphics_pipeline<D: Device>(
    device: &D,
    profile: &Profile,
    host_info: &HostTranslateInfo,
    compiler: CompilerSettings,
    key: &GraphicsPipelineCacheKey,
    envs: &[Option<FileEnvironment>],
) -> Result<GraphicsPipeline<D>, CacheError> {
    let _ = host_info;
    let uses_vertex_a = key.unique_hashes[0] != 0;
    let uses_vertex_b = key.unique_hashes[1] != 0;

    // Translate every present program slot.
    let mut programs: Vec<Option<Program>> = Vec::with_capacity(MAX_PROGRAMS);
    for slot in 0..MAX_PROGRAMS {
        let env = envs.get(slot).and_then(Option::as_ref);
        let program = match env {
            Some(env) => Some(translate_program(env, compiler)?),
            None => None,
        };
        programs.push(program);
    }
    if uses_vertex_a && uses_vertex_b {
        // VertexB is the entry point when both vertex programs exist.
        let vertex_a = programs[0].take().expect("vertex A without environment");
        let vertex_b = programs[1].take().expect("vertex B without environment");
        programs[1] = Some(merge_dual_vertex_programs(vertex_a, vertex_b));
    } else if uses_vertex_a && !uses_vertex_b {
        // A lone VertexA acts as the vertex stage.
        programs.swap(0, 1);
    }

    let mut bindings = Bindings::default();
    let mut modules: Vec<Option<D::ShaderModule>> = Vec::new();
    let mut infos: Vec<Option<Info>> = Vec::new();
    let mut previous_info: Option<Info> = None;
    for slot in 1..MAX_PROGRAMS {
        let program = match &programs[slot] {
            Some(program) => program,
            None => {
                modules.push(None);
                infos.push(None);
                continue;
            }
        };
        let runtime_info = make_runtime_info(key, previous_info.as_ref());
        let code = emit_spirv(profile, &runtime_info, program, &mut bindings)?;
        let module = device
            .create_shader_module(&code)
            .map_err(|error| CacheError::Build(error.to_string()))?;
        modules.push(Some(module));
        infos.push(Some(program.info.clone()));
        previous_info = Some(program.info.clone());
    }

    let mut builder = DescriptorLayoutBuilder::new();
    for (stage, info) in infos.iter().enumerate() {
        if let Some(info) = info {
            builder.add(info, stage);
        }
    }
    let uses_push_descriptor = builder.can_use_push_descriptor(device.max_push_descriptors());
    let (set_layout, update_template): (Option<D::DescriptorSetLayout>, Option<D::UpdateTemplate>) =
        if builder.bindings().is_empty() {
        (None, None)
    } else {
        let set_layout = device
            .create_descriptor_set_layout(builder.bindings(), uses_push_descriptor)
            .map_err(|error| CacheError::Build(error.to_string()))?;
        (Some(set_layout), None)
    };
    let pipeline_layout = device
        .create_pipeline_layout(set_layout.as_ref())
        .map_err(|error| CacheError::Build(error.to_string()))?;
    let update_template = match (&set_layout, update_template) {
        (Some(set_layout), None) if !builder.entries().is_empty() => Some(
            device
                .create_update_template(
                    builder.entries(),
                    set_layout,
                    &pipeline_layout,
                    uses_push_descriptor,
                )
                .map_err(|error| CacheError::Build(error.to_string()))?,
        ),
        _ => None,
    };

    Ok(GraphicsPipeline::new(
        *key,
        modules,
        set_layout,
        pipeline_layout,
        update_template,
        uses_push_descriptor,
        infos,
    ))
}

fn build_compute_pipeline<D: Device>(
    device: &D,
    profile: &Profile,
    host_info: &HostTranslateInfo,
    compiler: CompilerSettings,
    key: ComputePipelineCacheKey,
    env: &FileEnvironment,
) -> Result<ComputePipeline<D>, CacheError> {
    let _ = host_info;
    let program = translate_program(env, compiler)?;
    let runtime_info = RuntimeInfo::default();
    let mut bindings = Bindings::default();
    let code = emit_spirv(profile, &runtime_info, &program, &mut bindings)?;
    let module = device
        .create_shader_module(&code)
        .map_err(|error| CacheError::Build(error.to_string()))?;

    let mut builder = DescriptorLayoutBuilder::new();
    builder.add(&program.info, 0);
    let uses_push_descriptor = builder.can_use_push_descriptor(device.max_push_descriptors());
    let set_layout = if builder.bindings().is_empty() {
        None
    } else {
        Some(
            device
                .create_descriptor_set_layout(builder.bindings(), uses_push_descriptor)
                .map_err(|error| CacheError::Build(error.to_string()))?,
        )
    };
    let pipeline_layout = device
        .create_pipeline_layout(set_layout.as_ref())
        .map_err(|error| CacheError::Build(error.to_string()))?;
    let update_template = match &set_layout {
        Some(layout) if !builder.entries().is_empty() => Some(
            device
                .create_update_template(
                    builder.entries(),
                    layout,
                    &pipeline_layout,
                    uses_push_descriptor,
                )
                .map_err(|error| CacheError::Build(error.to_string()))?,
        ),
        _ => None,
    };

    Ok(ComputePipeline::new(
        key,
        module,
        set_layout,
        pipeline_layout,
        update_template,
        uses_push_descriptor,
        program.info.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorSetLayoutBinding, UpdateTemplateEntry};
    use crate::traits::DeviceError;
    use crate::worker::StopToken;
    use maxwell_shader::ShaderStage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockDevice {
        pipelines_created: AtomicUsize,
    }

    impl MockDevice {
        fn new() -> MockDevice {
            MockDevice {
                pipelines_created: AtomicUsize::new(0),
            }
        }
    }

    impl Device for MockDevice {
        type ShaderModule = Vec<u32>;
        type DescriptorSetLayout = Vec<DescriptorSetLayoutBinding>;
        type PipelineLayout = ();
        type UpdateTemplate = Vec<UpdateTemplateEntry>;
        type Pipeline = u64;
        type Buffer = u64;
        type BufferView = u64;
        type ImageView = u64;
        type Sampler = u64;

        fn create_shader_module(&self, code: &[u32]) -> Result<Vec<u32>, DeviceError> {
            Ok(code.to_vec())
        }

        fn create_descriptor_set_layout(
            &self,
            bindings: &[DescriptorSetLayoutBinding],
            _use_push_descriptor: bool,
        ) -> Result<Self::DescriptorSetLayout, DeviceError> {
            Ok(bindings.to_vec())
        }

        fn create_pipeline_layout(
            &self,
            _set_layout: Option<&Self::DescriptorSetLayout>,
        ) -> Result<(), DeviceError> {
            Ok(())
        }

        fn create_update_template(
            &self,
            entries: &[UpdateTemplateEntry],
            _set_layout: &Self::DescriptorSetLayout,
            _pipeline_layout: &(),
            _use_push_descriptor: bool,
        ) -> Result<Self::UpdateTemplate, DeviceError> {
            Ok(entries.to_vec())
        }

        fn create_graphics_pipeline(
            &self,
            _state: &FixedPipelineState,
            _modules: &[Option<Vec<u32>>],
            _layout: &(),
        ) -> Result<u64, DeviceError> {
            let count = self.pipelines_created.fetch_add(1, Ordering::SeqCst);
            Ok(count as u64 + 1)
        }

        fn create_compute_pipeline(&self, _module: &Vec<u32>, _layout: &()) -> Result<u64, DeviceError> {
            let count = self.pipelines_created.fetch_add(1, Ordering::SeqCst);
            Ok(count as u64 + 1)
        }
    }

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

    fn vertex_env(seed: u64) -> FileEnvironment {
        // Header-sized prelude, then a sched slot, a seed word that
        // decodes to nothing and the exit.
        let mut code = vec![0u64; 10];
        code.push(seed);
        code.push(exit_instr());
        code.extend_from_slice(&[0, 0]);
        FileEnvironment::new(code, 10, ShaderStage::Vertex)
    }

    struct MockGuest {
        vertex: FileEnvironment,
        compute: Option<FileEnvironment>,
        topology: u32,
        params: DrawParams,
    }

    impl MockGuest {
        fn new(seed: u64) -> MockGuest {
            MockGuest {
                vertex: vertex_env(seed),
                compute: None,
                topology: 4,
                params: DrawParams::default(),
            }
        }
    }

    impl GuestShaderState for MockGuest {
        fn graphics_environments(&mut self) -> Option<Vec<Option<FileEnvironment>>> {
            let mut envs: Vec<Option<FileEnvironment>> = vec![None; MAX_PROGRAMS];
            envs[1] = Some(self.vertex.clone());
            Some(envs)
        }

        fn compute_environment(&mut self) -> Option<FileEnvironment> {
            self.compute.clone()
        }

        fn refresh_fixed_state(
            &mut self,
            _has_eds: bool,
            _has_dvi: bool,
            state: &mut FixedPipelineState,
        ) {
            state.set_topology(self.topology);
        }

        fn draw_params(&self) -> DrawParams {
            self.params
        }
    }

    fn test_cache(settings: CacheSettings) -> PipelineCache<MockDevice> {
        PipelineCache::new(
            Arc::new(MockDevice::new()),
            settings,
            Profile::default(),
            HostTranslateInfo::default(),
            Arc::new(ShaderNotify::new()),
        )
    }

    #[test]
    fn cache_hit_returns_the_same_pipeline() {
        let mut cache = test_cache(CacheSettings::default());
        let mut guest = MockGuest::new(0x1111);
        let first = cache
            .current_graphics_pipeline(&mut guest)
            .expect("first draw built no pipeline");
        assert_eq!(cache.graphics_cache_len(), 1);
        let second = cache
            .current_graphics_pipeline(&mut guest)
            .expect("second draw missed");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.graphics_cache_len(), 1);
    }

    #[test]
    fn transitions_take_the_fast_path() {
        let mut cache = test_cache(CacheSettings::default());
        let mut guest = MockGuest::new(0x2222);

        let first = cache.current_graphics_pipeline(&mut guest).unwrap();
        // Same shaders with a different fixed state key.
        guest.topology = 1;
        let second = cache.current_graphics_pipeline(&mut guest).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.graphics_cache_len(), 2);
        assert_eq!(first.transition_count(), 1);

        // Replaying the draw order walks the transition list, not the
        // map: cache size stays put and the same object returns.
        guest.topology = 4;
        let third = cache.current_graphics_pipeline(&mut guest).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        guest.topology = 1;
        let fourth = cache.current_graphics_pipeline(&mut guest).unwrap();
        assert!(Arc::ptr_eq(&second, &fourth));
        assert_eq!(cache.graphics_cache_len(), 2);
    }

    #[test]
    fn async_policy_skips_disposable_draws() {
        let settings = CacheSettings {
            use_asynchronous_shaders: true,
            ..CacheSettings::default()
        };
        let mut cache = test_cache(settings);
        let mut guest = MockGuest::new(0x3333);
        guest.params = DrawParams {
            has_depth_target: true,
            index_count: 100,
            vertex_count: 100,
        };
        // The first draw may be skipped while the build is in flight.
        let first = cache.current_graphics_pipeline(&mut guest);
        if let Some(pipeline) = &first {
            assert!(pipeline.is_built());
        }
        // Once built, the pipeline is always returned.
        let pipeline = cache
            .graphics_cache
            .values()
            .next()
            .expect("pipeline missing from the cache")
            .clone();
        pipeline.wait_until_built();
        let second = cache.current_graphics_pipeline(&mut guest);
        assert!(second.is_some());
    }

    #[test]
    fn compute_pipelines_build_even_in_brute_force() {
        let mut cache = test_cache(CacheSettings::default());
        let mut guest = MockGuest::new(0x4444);
        // An unresolvable BRX: no compile-time constant buffer value.
        let imnmx = opcode_word("0011100000100000") | 5 | 6 << 8 | 2 << 20 | 7 << 16;
        let shl = opcode_word("0011100001001000") | 5 | 5 << 8 | 2 << 20 | 7 << 16;
        let ldc = opcode_word("1110111110010000") | 5 | 5 << 8 | 4 << 48 | 7 << 16;
        let brx = opcode_word("1110001001010000") | 5 << 8 | 7 << 16 | 0xF | 0xFFFFF8u64 << 20;
        let code = vec![0, imnmx, shl, ldc, brx, exit_instr(), 0, 0];
        let mut env = FileEnvironment::new(code, 0, ShaderStage::Compute);
        env.workgroup_size = [8, 8, 1];
        env.shared_memory_size = 0x100;
        guest.compute = Some(env);

        let pipeline = cache
            .current_compute_pipeline(&mut guest)
            .expect("compute pipeline failed to build");
        pipeline.wait_until_built();
        assert!(pipeline.with_handle(|_| ()).is_some());
        assert_eq!(cache.compute_cache_len(), 1);

        // The same dispatch hits the cache.
        let again = cache.current_compute_pipeline(&mut guest).unwrap();
        assert!(Arc::ptr_eq(&pipeline, &again));
    }

    #[test]
    fn disk_cache_round_trips_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings {
            shader_cache_dir: Some(dir.path().to_path_buf()),
            ..CacheSettings::default()
        };
        let stop = StopToken::new();

        // First boot: load (creates the file), then build two pipelines.
        let mut cache = test_cache(settings.clone());
        cache.load_disk_resources(1, &stop, &mut |_, _, _| {});
        let mut guest = MockGuest::new(0x5555);
        cache.current_graphics_pipeline(&mut guest).unwrap();
        guest.topology = 1;
        cache.current_graphics_pipeline(&mut guest).unwrap();
        assert_eq!(cache.graphics_cache_len(), 2);
        // Drain the serialization queue before "shutting down".
        cache.serialization_thread.wait_for_requests(None);

        // Second boot: loading must rebuild both pipelines.
        let mut reloaded = test_cache(settings);
        let mut stages = Vec::new();
        reloaded.load_disk_resources(1, &stop, &mut |stage, _, total| {
            stages.push((stage, total));
        });
        assert_eq!(reloaded.graphics_cache_len(), 2);
        assert!(stages.contains(&(LoadCallbackStage::Build, 2)));
        assert!(stages
            .iter()
            .any(|(stage, _)| *stage == LoadCallbackStage::Complete));

        // And the loaded entries satisfy the same draw without a build.
        let mut guest = MockGuest::new(0x5555);
        let pipeline = reloaded.current_graphics_pipeline(&mut guest).unwrap();
        assert!(pipeline.is_built());
    }
}
