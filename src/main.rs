//! Command line front end: read a compilation description, write stylesheets and loader fragments.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use css_chunk_extract::builder::{ExtractBuilder, TracingWarnings};
use css_chunk_extract::config::PluginOptions;
use css_chunk_extract::models::{Compilation, ExtractArtifacts};

/// Name of the summary file written next to the stylesheets.
const SUMMARY_FILE: &str = "css-manifest.json";

/// Extract per-chunk stylesheets from a compilation description.
#[derive(Parser, Debug)]
#[command(name = "css-chunk-extract")]
#[command(about = "Extract CSS modules into per-chunk, per-skin stylesheets")]
struct Args {
  /// Compilation JSON with modules, chunks and chunk groups
  #[arg(short, long, value_name = "PATH")]
  input: PathBuf,

  /// Output directory
  #[arg(short, long, value_name = "DIR", default_value = "dist")]
  out: PathBuf,

  /// Configuration file; defaults to css-extract.config.* next to the input
  #[arg(short, long, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Verbose logging
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> Result<()> {
  let args = Args::parse();
  setup_tracing(args.verbose);

  let written = run(&args)?;
  tracing::info!(files = written.len(), out = %args.out.display(), "extraction complete");
  Ok(())
}

fn setup_tracing(verbose: bool) {
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("css_chunk_extract=debug,info")
    } else {
      EnvFilter::new("info")
    }
  });
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn load_options(args: &Args) -> Result<PluginOptions> {
  let options = match &args.config {
    Some(path) => PluginOptions::from_path(path)
      .with_context(|| format!("loading configuration {}", path.display()))?,
    None => {
      let dir = args
        .input
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
      PluginOptions::discover(dir)
    }
  };
  Ok(options.with_env_overrides())
}

fn run(args: &Args) -> Result<Vec<PathBuf>> {
  let options = load_options(args)?;
  let raw = fs::read_to_string(&args.input)
    .with_context(|| format!("reading {}", args.input.display()))?;
  let compilation: Compilation = serde_json::from_str(&raw)
    .with_context(|| format!("parsing compilation {}", args.input.display()))?;

  let artifacts = ExtractBuilder::new(&options)
    .build(&compilation, &mut TracingWarnings)
    .context("extracting stylesheets")?;

  write_artifacts(&args.out, &artifacts)
}

fn write_artifacts(out: &Path, artifacts: &ExtractArtifacts) -> Result<Vec<PathBuf>> {
  let mut written = Vec::new();

  for entry in &artifacts.assets {
    let path = out.join(&entry.filename);
    write_file(&path, &entry.asset.source())?;
    written.push(path);
  }

  for (chunk, fragments) in &artifacts.runtime {
    let path = out.join(format!("css-runtime.{chunk}.js"));
    let code = format!("{}\n\n{}\n", fragments.local_vars, fragments.require_ensure);
    write_file(&path, &code)?;
    written.push(path);
  }

  let summary = serde_json::to_string_pretty(&artifacts.summary())?;
  let path = out.join(SUMMARY_FILE);
  write_file(&path, &summary)?;
  written.push(path);

  Ok(written)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
  }
  fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
  tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote file");
  Ok(())
}
