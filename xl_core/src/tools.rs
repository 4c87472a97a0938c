//! External tool registry
//!
//! Each tool defaults to its bare program name (resolved through PATH when
//! spawned). `XL_<TOOL>` environment variables override individual paths,
//! e.g. `XL_CJXL=/opt/libjxl/bin/cjxl`.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Cjxl,
    Djxl,
    Jxlinfo,
    Cjpegli,
    Magick,
    Avifenc,
    Avifdec,
    Oxipng,
    Exiftool,
}

impl Tool {
    pub const ALL: [Tool; 9] = [
        Tool::Cjxl,
        Tool::Djxl,
        Tool::Jxlinfo,
        Tool::Cjpegli,
        Tool::Magick,
        Tool::Avifenc,
        Tool::Avifdec,
        Tool::Oxipng,
        Tool::Exiftool,
    ];

    pub fn program_name(self) -> &'static str {
        match self {
            Tool::Cjxl => "cjxl",
            Tool::Djxl => "djxl",
            Tool::Jxlinfo => "jxlinfo",
            Tool::Cjpegli => "cjpegli",
            Tool::Magick => "magick",
            Tool::Avifenc => "avifenc",
            Tool::Avifdec => "avifdec",
            Tool::Oxipng => "oxipng",
            Tool::Exiftool => "exiftool",
        }
    }

    fn env_var(self) -> String {
        format!("XL_{}", self.program_name().to_uppercase())
    }
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    paths: [PathBuf; 9],
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            paths: Tool::ALL.map(|t| PathBuf::from(t.program_name())),
        }
    }
}

impl ToolPaths {
    /// Defaults overridden by any `XL_<TOOL>` variables that are set.
    pub fn from_env() -> Self {
        let mut paths = Self::default();
        for tool in Tool::ALL {
            if let Ok(value) = std::env::var(tool.env_var()) {
                if !value.trim().is_empty() {
                    paths.set(tool, PathBuf::from(value));
                }
            }
        }
        paths
    }

    pub fn path(&self, tool: Tool) -> &Path {
        &self.paths[tool as usize]
    }

    pub fn set(&mut self, tool: Tool, path: impl Into<PathBuf>) {
        self.paths[tool as usize] = path.into();
    }

    /// Resolves a tool through `which`; `None` when it cannot be found.
    pub fn locate(&self, tool: Tool) -> Option<PathBuf> {
        which::which(self.path(tool)).ok()
    }

    pub fn availability(&self) -> Vec<(Tool, Option<PathBuf>)> {
        Tool::ALL.iter().map(|&t| (t, self.locate(t))).collect()
    }
}
