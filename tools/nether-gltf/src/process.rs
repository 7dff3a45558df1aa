//! End-to-end processing: read, run stages, write, persist

use gltf_json as json;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::reader::{self, ReadOptions};
use crate::stage::StagePipeline;
use crate::writer::{self, WriteOptions, WriteOutput};

/// Stage list plus the read/write options applied to every asset
pub struct AssetPipeline {
    pub stages: StagePipeline,
    pub read_options: ReadOptions,
    pub write_options: WriteOptions,
    /// Create missing parent directories when persisting
    pub create_directory: bool,
}

impl Default for AssetPipeline {
    fn default() -> Self {
        Self::new(StagePipeline::default())
    }
}

impl AssetPipeline {
    pub fn new(stages: StagePipeline) -> Self {
        Self {
            stages,
            read_options: ReadOptions::default(),
            write_options: WriteOptions::default(),
            create_directory: true,
        }
    }

    /// Build a pipeline from a config; `input_dir` is the fallback base path
    pub fn from_config(config: &PipelineConfig, input_dir: &Path) -> Result<Self> {
        Ok(Self {
            stages: config.stage_pipeline()?,
            read_options: config.read_options(input_dir),
            write_options: config.write_options(),
            create_directory: config.output.create_directory,
        })
    }

    /// Process raw JSON text or container bytes
    pub fn process_bytes(&self, input: &[u8]) -> Result<WriteOutput> {
        self.process_bytes_with(input, &self.read_options, &self.write_options)
    }

    /// Process an already-parsed document
    pub fn process_json(&self, root: json::Root) -> Result<WriteOutput> {
        let model = reader::read_root(root, &self.read_options)?;
        let model = self.stages.run(model)?;
        writer::write(model, &self.write_options)
    }

    /// Process a file; external URIs resolve against its directory unless a
    /// base path was configured explicitly
    pub fn process_file(&self, path: &Path) -> Result<WriteOutput> {
        let input = fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => PipelineError::not_found(path, err.to_string()),
            _ => PipelineError::io(path, err),
        })?;
        let read_options = self.read_options_for(path);
        self.process_bytes_with(&input, &read_options, &self.write_options)
    }

    /// Process `input` and write the result, and its external resources, at `output`
    pub fn process_file_to_disk(&self, input: &Path, output: &Path) -> Result<WriteOutput> {
        tracing::info!("Processing {} -> {}", input.display(), output.display());
        let bytes = fs::read(input).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => PipelineError::not_found(input, err.to_string()),
            _ => PipelineError::io(input, err),
        })?;
        let read_options = self.read_options_for(input);
        let write_options = self.write_options_for(output);
        let result = self.process_bytes_with(&bytes, &read_options, &write_options)?;
        persist(&result, output, self.create_directory)?;
        Ok(result)
    }

    /// Process a parsed document and write the result at `output`
    pub fn process_json_to_disk(&self, root: json::Root, output: &Path) -> Result<WriteOutput> {
        let model = reader::read_root(root, &self.read_options)?;
        let model = self.stages.run(model)?;
        let result = writer::write(model, &self.write_options_for(output))?;
        persist(&result, output, self.create_directory)?;
        Ok(result)
    }

    fn process_bytes_with(
        &self,
        input: &[u8],
        read_options: &ReadOptions,
        write_options: &WriteOptions,
    ) -> Result<WriteOutput> {
        let model = reader::read(input, read_options)?;
        let model = self.stages.run(model)?;
        writer::write(model, write_options)
    }

    fn read_options_for(&self, input: &Path) -> ReadOptions {
        let mut options = self.read_options.clone();
        if options.base_path == ReadOptions::default().base_path {
            if let Some(parent) = input.parent().filter(|p| !p.as_os_str().is_empty()) {
                options.base_path = parent.to_path_buf();
            }
        }
        options
    }

    /// Output options for a destination file: `.glb` implies binary, the
    /// resource stem follows the file stem, resources land next to the document
    fn write_options_for(&self, output: &Path) -> WriteOptions {
        let mut options = self.write_options.clone();
        let is_glb = output
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("glb"));
        if is_glb {
            options.binary = true;
        }
        if options.resource_stem == WriteOptions::default().resource_stem {
            if let Some(stem) = output.file_stem().and_then(|s| s.to_str()) {
                options.resource_stem = stem.to_string();
            }
        }
        if options.output_base_path.is_none() {
            options.output_base_path = Some(
                output
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(PathBuf::new),
            );
        }
        options
    }
}

/// Write a document and its external resources
///
/// Resources are written in parallel. Every file is first written to a hidden
/// `.partial` sibling and only renamed into place once all writes succeeded,
/// so a failure leaves no output behind. With `create_directory` false a
/// missing parent directory is an I/O error.
pub fn persist(output: &WriteOutput, document_path: &Path, create_directory: bool) -> Result<()> {
    if create_directory {
        let parents = std::iter::once(document_path)
            .chain(output.external_writes.iter().map(|w| w.path.as_path()))
            .filter_map(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty());
        for dir in parents {
            fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
        }
    }

    let files: Vec<(&Path, &[u8])> = output
        .external_writes
        .iter()
        .map(|write| (write.path.as_path(), write.bytes.as_slice()))
        .chain(std::iter::once((document_path, output.document.as_slice())))
        .collect();

    let staged: Vec<(PathBuf, Result<()>)> = files
        .par_iter()
        .map(|&(path, bytes)| {
            tracing::debug!("Writing {}", path.display());
            let partial = partial_path(path);
            let result = fs::write(&partial, bytes).map_err(|err| PipelineError::io(path, err));
            (partial, result)
        })
        .collect();

    let mut partials = Vec::with_capacity(staged.len());
    let mut first_error = None;
    for (partial, result) in staged {
        partials.push(partial);
        if let Err(err) = result {
            first_error.get_or_insert(err);
        }
    }
    if let Some(err) = first_error {
        discard(partials.iter().map(PathBuf::as_path));
        return Err(err);
    }

    for (i, (partial, (path, _))) in partials.iter().zip(&files).enumerate() {
        if let Err(err) = fs::rename(partial, path) {
            discard(partials[i..].iter().map(PathBuf::as_path));
            discard(files[..i].iter().map(|(path, _)| *path));
            return Err(PipelineError::io(*path, err));
        }
    }

    tracing::info!(
        "Wrote {} ({} bytes, {} external resource(s))",
        document_path.display(),
        output.document.len(),
        output.external_writes.len()
    );
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".partial");
    path.with_file_name(name)
}

/// Best-effort removal; the original error is what gets reported
fn discard<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        if fs::remove_file(path).is_ok() {
            tracing::debug!("Removed {}", path.display());
        }
    }
}
