// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::util::read_spv;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Directory the build script compiled the triangle shaders into.
pub const BUILTIN_SHADER_DIR: &str = env!("TRIGON_SHADER_DIR");

pub const VERTEX_SHADER_FILE: &str = "tri.vert.spv";
pub const FRAGMENT_SHADER_FILE: &str = "tri.frag.spv";

/// Where the vertex and fragment bytecode live.
#[derive(Clone, Debug)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl ShaderPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            vertex: dir.join(VERTEX_SHADER_FILE),
            fragment: dir.join(FRAGMENT_SHADER_FILE),
        }
    }
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self::in_dir(BUILTIN_SHADER_DIR)
    }
}

/// Reads a whole SPIR-V file into properly aligned words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_spv(&mut file).with_context(|| format!("read SPIR-V {}", path.display()))
}
