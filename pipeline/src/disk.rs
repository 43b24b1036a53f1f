//! On-disk pipeline cache format.
//!
//! `[u32 version]` followed by records: `[u8 kind][key bytes]
//! [u32 num_envs][env…]`, kind 0 = compute, 1 = graphics. The key is
//! the raw bytes of the packed struct; the unique-object-representation
//! invariant of the keys makes that well defined. A version mismatch
//! truncates the file and starts fresh.

use crate::compute::ComputePipelineCacheKey;
use crate::env::FileEnvironment;
use crate::graphics::GraphicsPipelineCacheKey;
use crate::worker::StopToken;
use crate::CacheError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

pub const CACHE_VERSION: u32 = 1;

const KIND_COMPUTE: u8 = 0;
const KIND_GRAPHICS: u8 = 1;

pub enum CacheRecord {
    Compute {
        key: ComputePipelineCacheKey,
        env: FileEnvironment,
    },
    Graphics {
        key: GraphicsPipelineCacheKey,
        envs: Vec<FileEnvironment>,
    },
}

/// Appends one record, writing the header first on a fresh file.
/// Serialization runs on a single thread so records keep their
/// completion order.
pub fn append_record(path: &Path, record: &CacheRecord) -> Result<(), CacheError> {
    let is_new = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len() == 0,
        Err(_) => true,
    };
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if is_new {
        writer.write_u32::<LittleEndian>(CACHE_VERSION)?;
    }
    match record {
        CacheRecord::Compute { key, env } => {
            writer.write_u8(KIND_COMPUTE)?;
            writer.write_all(key.as_bytes())?;
            writer.write_u32::<LittleEndian>(1)?;
            env.serialize(&mut writer)?;
        }
        CacheRecord::Graphics { key, envs } => {
            writer.write_u8(KIND_GRAPHICS)?;
            writer.write_all(key.as_bytes())?;
            writer.write_u32::<LittleEndian>(envs.len() as u32)?;
            for env in envs {
                env.serialize(&mut writer)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads every record, invoking the callback per entry. Returns the
/// record count. Corruption or a version mismatch truncates the file
/// so the next boot starts fresh.
pub fn load_records<F>(
    path: &Path,
    stop: &StopToken,
    mut on_record: F,
) -> Result<usize, CacheError>
where
    F: FnMut(CacheRecord),
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(error.into()),
    };
    let mut reader = BufReader::new(file);
    let version = match reader.read_u32::<LittleEndian>() {
        Ok(version) => version,
        Err(_) => {
            truncate(path);
            return Ok(0);
        }
    };
    if version != CACHE_VERSION {
        warn!(
            "Pipeline cache version mismatch (found {}, expected {}), starting fresh",
            version, CACHE_VERSION
        );
        truncate(path);
        return Ok(0);
    }
    let mut count = 0usize;
    loop {
        if stop.stop_requested() {
            return Ok(count);
        }
        let kind = match reader.read_u8() {
            Ok(kind) => kind,
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => break,
            Err(error) => {
                warn!("Pipeline cache corrupted, truncating: {}", error);
                truncate(path);
                break;
            }
        };
        let record = match read_record(&mut reader, kind) {
            Ok(record) => record,
            Err(error) => {
                warn!("Pipeline cache corrupted, truncating: {}", error);
                truncate(path);
                break;
            }
        };
        on_record(record);
        count += 1;
    }
    Ok(count)
}

fn read_record<R: Read>(reader: &mut R, kind: u8) -> Result<CacheRecord, CacheError> {
    match kind {
        KIND_COMPUTE => {
            let mut key = ComputePipelineCacheKey::default();
            read_pod(reader, bytemuck::bytes_of_mut(&mut key))?;
            let num_envs = reader.read_u32::<LittleEndian>()?;
            if num_envs != 1 {
                return Err(CacheError::Build("compute record with env fan-out".into()));
            }
            let env = FileEnvironment::deserialize(reader)?;
            Ok(CacheRecord::Compute { key, env })
        }
        KIND_GRAPHICS => {
            let mut key = GraphicsPipelineCacheKey::default();
            read_pod(reader, bytemuck::bytes_of_mut(&mut key))?;
            let num_envs = reader.read_u32::<LittleEndian>()?;
            let mut envs = Vec::with_capacity(num_envs as usize);
            for _ in 0..num_envs {
                envs.push(FileEnvironment::deserialize(reader)?);
            }
            Ok(CacheRecord::Graphics { key, envs })
        }
        other => Err(CacheError::Build(format!("unknown record kind {}", other))),
    }
}

fn read_pod<R: Read>(reader: &mut R, bytes: &mut [u8]) -> std::io::Result<()> {
    reader.read_exact(bytes)
}

fn truncate(path: &Path) {
    if let Err(error) = File::create(path) {
        error!("Failed to truncate pipeline cache: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maxwell_shader::ShaderStage;

    fn graphics_record(seed: u64) -> CacheRecord {
        let mut key = GraphicsPipelineCacheKey::default();
        key.unique_hashes[1] = seed;
        let env = FileEnvironment::new(vec![seed, seed + 1], 2, ShaderStage::Vertex);
        CacheRecord::Graphics {
            key,
            envs: vec![env],
        }
    }

    #[test]
    fn round_trips_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        append_record(&path, &graphics_record(10)).unwrap();
        append_record(&path, &graphics_record(11)).unwrap();
        let env = FileEnvironment::new(vec![99], 0, ShaderStage::Compute);
        let key = ComputePipelineCacheKey {
            unique_hash: env.unique_hash(),
            shared_memory_size: 0x40,
            workgroup_size: [4, 2, 1],
        };
        append_record(&path, &CacheRecord::Compute { key, env }).unwrap();

        let stop = StopToken::new();
        let mut seen = Vec::new();
        let count = load_records(&path, &stop, |record| match record {
            CacheRecord::Graphics { key, envs } => {
                seen.push((key.unique_hashes[1], envs[0].code.clone()));
            }
            CacheRecord::Compute { key, env } => {
                assert_eq!(key.shared_memory_size, 0x40);
                assert_eq!(env.code, vec![99]);
            }
        })
        .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, vec![(10, vec![10, 11]), (11, vec![11, 12])]);
    }

    #[test]
    fn version_mismatch_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        {
            let mut file = File::create(&path).unwrap();
            file.write_u32::<LittleEndian>(CACHE_VERSION + 1).unwrap();
            file.write_all(&[0xAB; 64]).unwrap();
        }
        let stop = StopToken::new();
        let count = load_records(&path, &stop, |_| panic!("no records expected")).unwrap();
        assert_eq!(count, 0);
        // The file was truncated and can be reused.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        append_record(&path, &graphics_record(1)).unwrap();
        let count = load_records(&path, &stop, |_| {}).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn corrupt_tail_keeps_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        append_record(&path, &graphics_record(5)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[KIND_GRAPHICS, 1, 2]).unwrap();
        }
        let stop = StopToken::new();
        let mut seen = 0;
        let count = load_records(&path, &stop, |_| seen += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(seen, 1);
    }

    #[test]
    fn cancellation_stops_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.bin");
        for seed in 0..8 {
            append_record(&path, &graphics_record(seed)).unwrap();
        }
        let stop = StopToken::new();
        stop.request_stop();
        let count = load_records(&path, &stop, |_| panic!("cancelled")).unwrap();
        assert_eq!(count, 0);
    }
}
