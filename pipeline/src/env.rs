//! Shader environments.
//!
//! An environment is a per-stage snapshot of the guest program and the
//! engine state translation needs: raw code, compile-time constant-
//! buffer values observed for jump tables, and sampler metadata. The
//! same type backs live translation and the on-disk cache records.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;
use maxwell_shader::inst::TextureType;
use maxwell_shader::program::Environment;
use maxwell_shader::registry::{GuestDriverProfile, Registry, SamplerDescriptor};
use maxwell_shader::ShaderStage;
use std::io::{Read, Write};

#[derive(Clone, Debug)]
pub struct FileEnvironment {
    pub code: Vec<u64>,
    pub start_address: u32,
    pub stage: ShaderStage,
    pub bound_samplers: FxHashMap<u32, SamplerDescriptor>,
    pub bindless_samplers: FxHashMap<(u32, u32), SamplerDescriptor>,
    pub cbuf_values: FxHashMap<(u32, u32), u32>,
    pub texture_bound_buffer: u32,
    pub local_memory_size: u64,
    pub shared_memory_size: u32,
    pub workgroup_size: [u32; 3],
}

impl FileEnvironment {
    pub fn new(code: Vec<u64>, start_address: u32, stage: ShaderStage) -> FileEnvironment {
        FileEnvironment {
            code,
            start_address,
            stage,
            bound_samplers: FxHashMap::default(),
            bindless_samplers: FxHashMap::default(),
            cbuf_values: FxHashMap::default(),
            texture_bound_buffer: 0,
            local_memory_size: 0,
            shared_memory_size: 0,
            workgroup_size: [1, 1, 1],
        }
    }

    /// Identity of the guest program: a 64-bit hash of the raw words.
    pub fn unique_hash(&self) -> u64 {
        fxhash::hash64(&self.code)
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.start_address)?;
        writer.write_u8(stage_to_u8(self.stage))?;
        writer.write_u64::<LittleEndian>(self.local_memory_size)?;
        writer.write_u32::<LittleEndian>(self.shared_memory_size)?;
        writer.write_u32::<LittleEndian>(self.texture_bound_buffer)?;
        for value in &self.workgroup_size {
            writer.write_u32::<LittleEndian>(*value)?;
        }
        writer.write_u32::<LittleEndian>(self.code.len() as u32)?;
        for word in &self.code {
            writer.write_u64::<LittleEndian>(*word)?;
        }
        writer.write_u32::<LittleEndian>(self.cbuf_values.len() as u32)?;
        for (&(buffer, offset), &value) in &self.cbuf_values {
            writer.write_u32::<LittleEndian>(buffer)?;
            writer.write_u32::<LittleEndian>(offset)?;
            writer.write_u32::<LittleEndian>(value)?;
        }
        writer.write_u32::<LittleEndian>(self.bound_samplers.len() as u32)?;
        for (&offset, descriptor) in &self.bound_samplers {
            writer.write_u32::<LittleEndian>(offset)?;
            write_sampler(writer, descriptor)?;
        }
        writer.write_u32::<LittleEndian>(self.bindless_samplers.len() as u32)?;
        for (&(buffer, offset), descriptor) in &self.bindless_samplers {
            writer.write_u32::<LittleEndian>(buffer)?;
            writer.write_u32::<LittleEndian>(offset)?;
            write_sampler(writer, descriptor)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> std::io::Result<FileEnvironment> {
        let start_address = reader.read_u32::<LittleEndian>()?;
        let stage = stage_from_u8(reader.read_u8()?)?;
        let local_memory_size = reader.read_u64::<LittleEndian>()?;
        let shared_memory_size = reader.read_u32::<LittleEndian>()?;
        let texture_bound_buffer = reader.read_u32::<LittleEndian>()?;
        let mut workgroup_size = [0u32; 3];
        for value in &mut workgroup_size {
            *value = reader.read_u32::<LittleEndian>()?;
        }
        let code_len = reader.read_u32::<LittleEndian>()? as usize;
        let mut code = Vec::with_capacity(code_len);
        for _ in 0..code_len {
            code.push(reader.read_u64::<LittleEndian>()?);
        }
        let mut cbuf_values = FxHashMap::default();
        for _ in 0..reader.read_u32::<LittleEndian>()? {
            let buffer = reader.read_u32::<LittleEndian>()?;
            let offset = reader.read_u32::<LittleEndian>()?;
            let value = reader.read_u32::<LittleEndian>()?;
            cbuf_values.insert((buffer, offset), value);
        }
        let mut bound_samplers = FxHashMap::default();
        for _ in 0..reader.read_u32::<LittleEndian>()? {
            let offset = reader.read_u32::<LittleEndian>()?;
            bound_samplers.insert(offset, read_sampler(reader)?);
        }
        let mut bindless_samplers = FxHashMap::default();
        for _ in 0..reader.read_u32::<LittleEndian>()? {
            let buffer = reader.read_u32::<LittleEndian>()?;
            let offset = reader.read_u32::<LittleEndian>()?;
            bindless_samplers.insert((buffer, offset), read_sampler(reader)?);
        }
        Ok(FileEnvironment {
            code,
            start_address,
            stage,
            bound_samplers,
            bindless_samplers,
            cbuf_values,
            texture_bound_buffer,
            local_memory_size,
            shared_memory_size,
            workgroup_size,
        })
    }
}

fn stage_to_u8(stage: ShaderStage) -> u8 {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::TesselationControl => 1,
        ShaderStage::TesselationEval => 2,
        ShaderStage::Geometry => 3,
        ShaderStage::Fragment => 4,
        ShaderStage::Compute => 5,
    }
}

fn stage_from_u8(value: u8) -> std::io::Result<ShaderStage> {
    Ok(match value {
        0 => ShaderStage::Vertex,
        1 => ShaderStage::TesselationControl,
        2 => ShaderStage::TesselationEval,
        3 => ShaderStage::Geometry,
        4 => ShaderStage::Fragment,
        5 => ShaderStage::Compute,
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid shader stage",
            ))
        }
    })
}

fn texture_type_to_u8(texture_type: Option<TextureType>) -> u8 {
    match texture_type {
        None => 0xFF,
        Some(TextureType::Texture1D) => 0,
        Some(TextureType::Texture2D) => 1,
        Some(TextureType::Texture3D) => 2,
        Some(TextureType::TextureCube) => 3,
    }
}

fn texture_type_from_u8(value: u8) -> Option<TextureType> {
    match value {
        0 => Some(TextureType::Texture1D),
        1 => Some(TextureType::Texture2D),
        2 => Some(TextureType::Texture3D),
        3 => Some(TextureType::TextureCube),
        _ => None,
    }
}

fn write_sampler<W: Write>(writer: &mut W, descriptor: &SamplerDescriptor) -> std::io::Result<()> {
    writer.write_u8(texture_type_to_u8(descriptor.texture_type))?;
    let mut flags = 0u8;
    flags |= descriptor.is_array as u8;
    flags |= (descriptor.is_shadow as u8) << 1;
    flags |= (descriptor.is_buffer as u8) << 2;
    writer.write_u8(flags)
}

fn read_sampler<R: Read>(reader: &mut R) -> std::io::Result<SamplerDescriptor> {
    let texture_type = texture_type_from_u8(reader.read_u8()?);
    let flags = reader.read_u8()?;
    Ok(SamplerDescriptor {
        texture_type,
        is_array: flags & 1 != 0,
        is_shadow: flags & 2 != 0,
        is_buffer: flags & 4 != 0,
    })
}

impl Registry for FileEnvironment {
    fn obtain_key(&self, buffer: u32, offset: u32) -> Option<u32> {
        self.cbuf_values.get(&(buffer, offset)).copied()
    }

    fn obtain_bound_sampler(&self, offset: u32) -> Option<SamplerDescriptor> {
        self.bound_samplers.get(&offset).copied()
    }

    fn obtain_bindless_sampler(&self, buffer: u32, offset: u32) -> Option<SamplerDescriptor> {
        self.bindless_samplers.get(&(buffer, offset)).copied()
    }

    fn bound_buffer(&self) -> u32 {
        self.texture_bound_buffer
    }

    fn guest_driver(&self) -> GuestDriverProfile {
        GuestDriverProfile::new()
    }
}

impl Environment for FileEnvironment {
    fn start_address(&self) -> u32 {
        self.start_address
    }

    fn code(&self) -> &[u64] {
        &self.code
    }

    fn local_memory_size(&self) -> u64 {
        self.local_memory_size
    }

    fn shared_memory_size(&self) -> u32 {
        self.shared_memory_size
    }

    fn texture_bound_buffer(&self) -> u32 {
        self.texture_bound_buffer
    }

    fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    fn stage(&self) -> ShaderStage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut env = FileEnvironment::new(vec![0, 0xDEAD_BEEF, 42], 8, ShaderStage::Fragment);
        env.cbuf_values.insert((0, 16), 0x10);
        env.bound_samplers.insert(
            8,
            SamplerDescriptor {
                texture_type: Some(TextureType::TextureCube),
                is_array: true,
                is_shadow: false,
                is_buffer: false,
            },
        );
        env.bindless_samplers.insert(
            (2, 0x30),
            SamplerDescriptor {
                texture_type: Some(TextureType::Texture2D),
                is_array: false,
                is_shadow: true,
                is_buffer: false,
            },
        );
        env.local_memory_size = 0x200;
        env.workgroup_size = [8, 4, 1];

        let mut bytes = Vec::new();
        env.serialize(&mut bytes).unwrap();
        let restored = FileEnvironment::deserialize(&mut bytes.as_slice()).unwrap();

        assert_eq!(restored.code, env.code);
        assert_eq!(restored.start_address, env.start_address);
        assert_eq!(restored.stage, env.stage);
        assert_eq!(restored.cbuf_values, env.cbuf_values);
        assert_eq!(restored.bound_samplers, env.bound_samplers);
        assert_eq!(restored.bindless_samplers, env.bindless_samplers);
        assert_eq!(restored.local_memory_size, env.local_memory_size);
        assert_eq!(restored.workgroup_size, env.workgroup_size);
        assert_eq!(restored.unique_hash(), env.unique_hash());
    }

    #[test]
    fn unique_hash_depends_on_code() {
        let a = FileEnvironment::new(vec![1, 2, 3], 0, ShaderStage::Vertex);
        let b = FileEnvironment::new(vec![1, 2, 4], 0, ShaderStage::Vertex);
        assert_ne!(a.unique_hash(), b.unique_hash());
    }
}
