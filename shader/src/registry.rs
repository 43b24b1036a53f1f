//! The seam between the recompiler and the guest state it reads.
//!
//! During translation the recompiler needs a handful of queries answered
//! about the engine state the program was bound with: compile-time
//! constant-buffer values (jump tables), sampler metadata for bound and
//! bindless handles, and driver parameters. Collaborators implement
//! [`Registry`]; translation never touches guest memory directly.

use crate::inst::TextureType;

/// Sampler metadata resolved from a texture handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct SamplerDescriptor {
    pub texture_type: Option<TextureType>,
    pub is_array: bool,
    pub is_shadow: bool,
    pub is_buffer: bool,
}

/// Driver-specific parameters deduced from observed guest behavior.
#[derive(Copy, Clone, Debug)]
pub struct GuestDriverProfile {
    texture_handler_size: Option<u32>,
}

impl GuestDriverProfile {
    /// Offset distance of two adjacent bound samplers when the driver
    /// has not yet been observed.
    pub const DEFAULT_TEXTURE_HANDLER_SIZE: u32 = 0x8;

    pub fn new() -> GuestDriverProfile {
        GuestDriverProfile {
            texture_handler_size: None,
        }
    }

    pub fn texture_handler_size(&self) -> u32 {
        self.texture_handler_size
            .unwrap_or(Self::DEFAULT_TEXTURE_HANDLER_SIZE)
    }

    pub fn is_texture_handler_size_known(&self) -> bool {
        self.texture_handler_size.is_some()
    }

    /// Deduces the handler size as the minimum distance between two
    /// bound sampler offsets, in bytes.
    pub fn deduce_texture_handler_size(&mut self, mut bound_offsets: Vec<u32>) {
        if bound_offsets.len() < 2 {
            return;
        }
        bound_offsets.sort_unstable();
        let min_distance = bound_offsets
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&d| d != 0)
            .min();
        if let Some(distance) = min_distance {
            self.texture_handler_size = Some(distance * 4);
        }
    }
}

impl Default for GuestDriverProfile {
    fn default() -> GuestDriverProfile {
        GuestDriverProfile::new()
    }
}

/// Guest-state queries the recompiler is allowed to make.
pub trait Registry {
    /// Compile-time-constant constant-buffer read, or `None` when the
    /// value is not statically known.
    fn obtain_key(&self, buffer: u32, offset: u32) -> Option<u32>;

    /// Metadata for a sampler bound through the texture constant buffer.
    fn obtain_bound_sampler(&self, offset: u32) -> Option<SamplerDescriptor>;

    /// Metadata for a bindless sampler handle read from an arbitrary
    /// constant buffer.
    fn obtain_bindless_sampler(&self, buffer: u32, offset: u32) -> Option<SamplerDescriptor>;

    /// Index of the constant buffer holding bound texture handles.
    fn bound_buffer(&self) -> u32;

    fn guest_driver(&self) -> GuestDriverProfile {
        GuestDriverProfile::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_size_deduced_from_min_distance() {
        let mut profile = GuestDriverProfile::new();
        assert_eq!(
            profile.texture_handler_size(),
            GuestDriverProfile::DEFAULT_TEXTURE_HANDLER_SIZE
        );
        profile.deduce_texture_handler_size(vec![0x10, 0x18, 0x28]);
        assert!(profile.is_texture_handler_size_known());
        assert_eq!(profile.texture_handler_size(), 0x8 * 4);
    }
}
