//! Pipeline configuration file (TOML)
//!
//! ```toml
//! [input]
//! sandbox = true
//! prefer_embedded = false
//!
//! [output]
//! binary = true
//!
//! [[stages]]
//! name = "quantize-positions"
//! position_bits = 12
//!
//! [[stages]]
//! name = "prune-buffers"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::reader::ReadOptions;
use crate::stage::{StageConfig, StagePipeline};
use crate::writer::WriteOptions;

#[derive(Debug, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub input: InputSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// How input documents and their resources are read
#[derive(Debug, Default, Deserialize)]
pub struct InputSection {
    /// Directory external URIs resolve against. Defaults to the input file's directory.
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    #[serde(default)]
    pub prefer_embedded: bool,
}

/// How processed documents are written
#[derive(Debug, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub embed_resources: bool,
    /// Create missing output directories on write.
    /// Default: true
    #[serde(default = "default_create_directory")]
    pub create_directory: bool,
    /// Prefix for generated resource file names. Defaults to the output file stem.
    pub resource_stem: Option<String>,
}

fn default_create_directory() -> bool {
    true
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            binary: false,
            embed_resources: false,
            create_directory: default_create_directory(),
            resource_stem: None,
        }
    }
}

impl PipelineConfig {
    /// Load config from file; relative paths resolve against the file's directory
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let mut config = Self::parse(&content)?;

        let dir = path.parent().unwrap_or(Path::new(""));
        if let Some(base) = &mut config.input.base_path {
            *base = dir.join(&*base);
        }
        for root in &mut config.input.allowed_roots {
            *root = dir.join(&*root);
        }
        Ok(config)
    }

    /// Parse config from string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|err| PipelineError::Config(err.to_string()))?;
        // Surface bad stage parameters at load time rather than mid-run
        config.stage_pipeline()?;
        Ok(config)
    }

    /// Read options, with `fallback_base` used when the file names no base path
    pub fn read_options(&self, fallback_base: &Path) -> ReadOptions {
        ReadOptions {
            base_path: self
                .input
                .base_path
                .clone()
                .unwrap_or_else(|| fallback_base.to_path_buf()),
            sandbox: self.input.sandbox,
            allowed_roots: self.input.allowed_roots.clone(),
            prefer_embedded: self.input.prefer_embedded,
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        let defaults = WriteOptions::default();
        WriteOptions {
            binary: self.output.binary,
            embed_resources: self.output.embed_resources,
            output_base_path: None,
            resource_stem: self
                .output
                .resource_stem
                .clone()
                .unwrap_or(defaults.resource_stem),
        }
    }

    pub fn stage_pipeline(&self) -> Result<StagePipeline> {
        StagePipeline::from_configs(&self.stages)
    }
}
