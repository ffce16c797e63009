//! Shader module loading and the on-disk stage cache
//!
//! The engine consumes pre-compiled SPIR-V: `.spv` files are loaded as raw
//! `u32` words and `code_size` must be a multiple of 4. Compiled stages are
//! cached one file per stage at `<cache_dir>/<hash>.spv`, where `<hash>` is a
//! 16-hex-digit FNV-style hash over the preprocessed source, the stage, the
//! entry point and the sorted enabled-defines list. GLSL front-end
//! compilation lives outside this crate; only its cache contract is here.

use super::context::{VulkanError, VulkanResult};
use crate::foundation::hash;
use ash::{vk, Device};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SPIR-V magic number in the file's endianness
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader loading and caching failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    /// The stage failed to compile or the bytecode is malformed
    #[error("shader compilation failed: {log}")]
    CompileFailed {
        /// Compiler or validator output
        log: String,
    },
    /// Pipeline linking failed
    #[error("shader link failed: {log}")]
    LinkFailed {
        /// Linker output
        log: String,
    },
    /// The cache has no entry for the requested stage
    #[error("shader cache miss")]
    CacheMiss,
    /// The shader file does not exist
    #[error("shader file not found: {path}")]
    FileNotFound {
        /// The missing path
        path: PathBuf,
    },
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex stage (`.vert`)
    Vertex,
    /// Fragment stage (`.frag`)
    Fragment,
    /// Compute stage (`.comp`)
    Compute,
    /// Geometry stage (`.geom`)
    Geometry,
    /// Tessellation control stage (`.tesc`)
    TessControl,
    /// Tessellation evaluation stage (`.tese`)
    TessEval,
    /// Ray generation stage (`.rgen`)
    RayGen,
    /// Any-hit stage (`.rahit`)
    AnyHit,
    /// Closest-hit stage (`.rchit`)
    ClosestHit,
    /// Miss stage (`.rmiss`)
    Miss,
    /// Intersection stage (`.rint`)
    Intersection,
    /// Callable stage (`.rcall`)
    Callable,
}

impl ShaderStage {
    /// Map to the backend stage flag
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessEval => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::RayGen => vk::ShaderStageFlags::RAYGEN_KHR,
            Self::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
            Self::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            Self::Miss => vk::ShaderStageFlags::MISS_KHR,
            Self::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
            Self::Callable => vk::ShaderStageFlags::CALLABLE_KHR,
        }
    }

    /// Stage inferred from a source file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            "geom" => Some(Self::Geometry),
            "tesc" => Some(Self::TessControl),
            "tese" => Some(Self::TessEval),
            "rgen" => Some(Self::RayGen),
            "rahit" => Some(Self::AnyHit),
            "rchit" => Some(Self::ClosestHit),
            "rmiss" => Some(Self::Miss),
            "rint" => Some(Self::Intersection),
            "rcall" => Some(Self::Callable),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
            Self::Geometry => "geom",
            Self::TessControl => "tesc",
            Self::TessEval => "tese",
            Self::RayGen => "rgen",
            Self::AnyHit => "rahit",
            Self::ClosestHit => "rchit",
            Self::Miss => "rmiss",
            Self::Intersection => "rint",
            Self::Callable => "rcall",
        }
    }
}

/// Cache key for a compiled stage
///
/// Defines are sorted before hashing, so the same set in any order maps to
/// the same cache file.
pub fn cache_key(
    preprocessed_source: &str,
    stage: ShaderStage,
    entry_point: &str,
    defines: &[String],
) -> u64 {
    let mut sorted = defines.to_vec();
    sorted.sort();
    let mut key = hash::fnv1a_str(preprocessed_source);
    key = hash::combine(key, hash::fnv1a_str(stage.tag()));
    key = hash::combine(key, hash::fnv1a_str(entry_point));
    for define in &sorted {
        key = hash::combine(key, hash::fnv1a_str(define));
    }
    key
}

/// Cache file path for a compiled stage
pub fn cache_path(
    cache_dir: &Path,
    preprocessed_source: &str,
    stage: ShaderStage,
    entry_point: &str,
    defines: &[String],
) -> PathBuf {
    let key = cache_key(preprocessed_source, stage, entry_point, defines);
    cache_dir.join(format!("{key:016x}.spv"))
}

/// Load a cached stage, failing with [`ShaderError::CacheMiss`] when absent
pub fn load_cached(
    cache_dir: &Path,
    preprocessed_source: &str,
    stage: ShaderStage,
    entry_point: &str,
    defines: &[String],
) -> Result<Vec<u32>, ShaderError> {
    let path = cache_path(cache_dir, preprocessed_source, stage, entry_point, defines);
    if !path.exists() {
        return Err(ShaderError::CacheMiss);
    }
    read_spirv_file(&path)
}

/// Store a compiled stage into the cache
pub fn store_cached(
    cache_dir: &Path,
    preprocessed_source: &str,
    stage: ShaderStage,
    entry_point: &str,
    defines: &[String],
    words: &[u32],
) -> Result<PathBuf, ShaderError> {
    std::fs::create_dir_all(cache_dir).map_err(|error| ShaderError::CompileFailed {
        log: format!("cannot create shader cache dir: {error}"),
    })?;
    let path = cache_path(cache_dir, preprocessed_source, stage, entry_point, defines);
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    std::fs::write(&path, bytes).map_err(|error| ShaderError::CompileFailed {
        log: format!("cannot write shader cache entry: {error}"),
    })?;
    Ok(path)
}

/// Read a `.spv` file as SPIR-V words
pub fn read_spirv_file(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|_| ShaderError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    spirv_words(&bytes)
}

/// Reinterpret raw bytes as SPIR-V words, validating size and magic
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(ShaderError::CompileFailed {
            log: format!("SPIR-V code size {} is not a multiple of 4", bytes.len()),
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(ShaderError::CompileFailed {
            log: format!("bad SPIR-V magic number {:#010x}", words[0]),
        });
    }
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    /// Create a module from validated SPIR-V words
    pub fn from_words(device: Device, stage: ShaderStage, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    /// The raw module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// The stage this module was built for
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Build the pipeline stage info for this module
    pub fn stage_info(&self, entry_point: &std::ffi::CStr) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.to_vk())
            .module(self.module)
            .name(entry_point)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_deterministic_and_define_order_free() {
        let a = cache_key(
            "void main() {}",
            ShaderStage::Fragment,
            "main",
            &["USE_FOG".to_string(), "MSAA=4".to_string()],
        );
        let b = cache_key(
            "void main() {}",
            ShaderStage::Fragment,
            "main",
            &["MSAA=4".to_string(), "USE_FOG".to_string()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_separates_stage_entry_and_source() {
        let base = cache_key("src", ShaderStage::Vertex, "main", &[]);
        assert_ne!(base, cache_key("src2", ShaderStage::Vertex, "main", &[]));
        assert_ne!(base, cache_key("src", ShaderStage::Fragment, "main", &[]));
        assert_ne!(base, cache_key("src", ShaderStage::Vertex, "other", &[]));
        assert_ne!(
            base,
            cache_key("src", ShaderStage::Vertex, "main", &["X".to_string()])
        );
    }

    #[test]
    fn test_cache_path_is_sixteen_hex_digits() {
        let path = cache_path(Path::new("cache"), "src", ShaderStage::Compute, "main", &[]);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), "0123456789abcdef.spv".len());
        assert!(name.ends_with(".spv"));
        assert!(name[..16].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_misaligned_spirv_is_rejected() {
        let error = spirv_words(&[0x03, 0x02, 0x23]).unwrap_err();
        assert!(matches!(error, ShaderError::CompileFailed { .. }));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let bytes = 0xdead_beef_u32.to_le_bytes();
        let error = spirv_words(&bytes).unwrap_err();
        assert!(matches!(error, ShaderError::CompileFailed { .. }));
    }

    #[test]
    fn test_valid_spirv_roundtrips_through_cache() {
        let words = vec![SPIRV_MAGIC, 0x0001_0500, 0, 1, 0];
        let cache_dir = std::env::temp_dir().join(format!(
            "graph_engine_shader_cache_{}",
            std::process::id()
        ));

        let stored = store_cached(&cache_dir, "src", ShaderStage::Vertex, "main", &[], &words)
            .expect("store");
        assert!(stored.exists());

        let loaded = load_cached(&cache_dir, "src", ShaderStage::Vertex, "main", &[]).expect("load");
        assert_eq!(loaded, words);

        assert_eq!(
            load_cached(&cache_dir, "other src", ShaderStage::Vertex, "main", &[]),
            Err(ShaderError::CacheMiss)
        );

        let _ = std::fs::remove_dir_all(cache_dir);
    }
}
