//! nether-gltf - Nethercore glTF pipeline tool
//!
//! Reads a glTF or GLB asset, runs the configured stages, and writes glTF
//! (external or embedded resources) or GLB.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use nether_gltf::container::{self, CHUNK_BIN, CHUNK_JSON};
use nether_gltf::stage::{DeclareExtensions, PruneBuffers, QuantizePositions};
use nether_gltf::{AssetPipeline, InputForm, PipelineConfig, ReadOptions};

#[derive(Parser)]
#[command(name = "nether-gltf")]
#[command(about = "Nethercore glTF asset pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an asset through the stage pipeline
    Process {
        /// Input glTF/GLB file
        input: PathBuf,

        /// Output file (.gltf or .glb)
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write a binary container regardless of the output extension
        #[arg(long)]
        binary: bool,

        /// Embed resources as data URIs
        #[arg(long)]
        embed: bool,

        /// Refuse external resources outside the input directory
        #[arg(long)]
        sandbox: bool,

        /// Quantize positions to this many bits (appended after configured stages)
        #[arg(long)]
        quantize: Option<u8>,

        /// Remove unreferenced buffer views and buffers (runs last)
        #[arg(long)]
        prune: bool,

        /// Extensions to declare as required
        #[arg(long = "require-extension")]
        require_extension: Vec<String>,
    },

    /// Print container framing and document summary
    Inspect {
        /// Input glTF/GLB file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            config,
            binary,
            embed,
            sandbox,
            quantize,
            prune,
            require_extension,
        } => {
            let config = match config {
                Some(path) => PipelineConfig::load(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => PipelineConfig::default(),
            };
            let input_dir = input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let mut pipeline = AssetPipeline::from_config(&config, input_dir)?;

            pipeline.write_options.binary |= binary;
            pipeline.write_options.embed_resources |= embed;
            pipeline.read_options.sandbox |= sandbox;
            if let Some(bits) = quantize {
                pipeline.stages.push(Box::new(QuantizePositions::new(bits)?));
            }
            if !require_extension.is_empty() {
                pipeline
                    .stages
                    .push(Box::new(DeclareExtensions::new(Vec::new(), require_extension)));
            }
            if prune {
                pipeline.stages.push(Box::new(PruneBuffers));
            }

            tracing::info!("Stages: {:?}", pipeline.stages.stage_names());
            pipeline
                .process_file_to_disk(&input, &output)
                .with_context(|| format!("Failed to process {:?}", input))?;
            tracing::info!("Done!");
        }

        Commands::Inspect { input } => inspect(&input)?,
    }

    Ok(())
}

fn inspect(input: &Path) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let form = InputForm::detect(&bytes);
    println!("{}: {:?}, {} bytes", input.display(), form, bytes.len());

    if form == InputForm::Container {
        if let Some(header) = container::ContainerHeader::from_bytes(&bytes) {
            println!(
                "  header: version {}, total length {}",
                header.version, header.total_length
            );
        }
        for chunk in container::chunk_table(&bytes)? {
            let kind = match chunk.kind {
                CHUNK_JSON => "JSON".to_string(),
                CHUNK_BIN => "BIN".to_string(),
                other => format!("0x{other:08X}"),
            };
            println!(
                "  chunk {:<10} length {:>10} framed {:>10}",
                kind, chunk.length, chunk.framed_length
            );
        }
    }

    let base = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let model = nether_gltf::read(&bytes, &ReadOptions::with_base_path(base))
        .with_context(|| format!("Failed to read {:?}", input))?;
    let root = &model.root;
    println!("  buffers:      {}", root.buffers.len());
    println!("  buffer views: {}", root.buffer_views.len());
    println!("  accessors:    {}", root.accessors.len());
    println!("  meshes:       {}", root.meshes.len());
    println!("  nodes:        {}", root.nodes.len());
    println!("  images:       {}", root.images.len());
    if !root.extensions_used.is_empty() {
        println!("  extensions used:     {}", root.extensions_used.join(", "));
    }
    if !root.extensions_required.is_empty() {
        println!("  extensions required: {}", root.extensions_required.join(", "));
    }
    Ok(())
}
