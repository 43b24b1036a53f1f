//! Host pipeline orchestration for the Maxwell recompiler.
//!
//! Owns the pipeline caches (deduplicated, asynchronously built,
//! persisted to disk), descriptor-set layout synthesis from shader
//! reflection, and the worker/fence infrastructure underneath them.
//! The host graphics API itself is reached only through the traits in
//! [`traits`].
#[macro_use]
extern crate log;

pub mod cache;
pub mod compute;
pub mod descriptor;
pub mod disk;
pub mod env;
pub mod fence;
pub mod fixed_state;
pub mod graphics;
pub mod notify;
pub mod traits;
pub mod worker;

use std::error::Error;
use std::fmt;

/// Cache-level failures. Most paths recover by dropping the pipeline.
#[derive(Debug)]
pub enum CacheError {
    Shader(maxwell_shader::ShaderError),
    Build(String),
    Persistence(std::io::Error),
    VersionMismatch { found: u32, expected: u32 },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheError::Shader(error) => write!(f, "shader translation failed: {}", error),
            CacheError::Build(message) => write!(f, "pipeline build failed: {}", message),
            CacheError::Persistence(error) => write!(f, "cache persistence failed: {}", error),
            CacheError::VersionMismatch { found, expected } => write!(
                f,
                "cache version mismatch: found {} expected {}",
                found, expected
            ),
        }
    }
}

impl Error for CacheError {}

impl From<maxwell_shader::ShaderError> for CacheError {
    fn from(error: maxwell_shader::ShaderError) -> CacheError {
        CacheError::Shader(error)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> CacheError {
        CacheError::Persistence(error)
    }
}

/// Settings surface of the pipeline layer.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub compiler: maxwell_shader::settings::CompilerSettings,
    pub use_asynchronous_shaders: bool,
    /// Base directory for the on-disk cache; per-title files live
    /// underneath it.
    pub shader_cache_dir: Option<std::path::PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> CacheSettings {
        CacheSettings {
            compiler: Default::default(),
            use_asynchronous_shaders: false,
            shader_cache_dir: None,
        }
    }
}

/// Progress stages reported while loading the disk cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadCallbackStage {
    Prepare,
    Build,
    Complete,
}
