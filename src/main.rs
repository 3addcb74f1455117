// src/main.rs
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use fontpipe::dummy_surface::RenderMode;
use fontpipe::{probe_files, PipelineConfig, ProbeOptions, UsageType};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Usage {
    Character,
    Pinyin,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Renderer {
    /// Registered faces render with their own glyphs
    Active,
    /// Every face silently falls back to the system serif
    Fallback,
    /// The verification sandbox never loads
    Hang,
}

#[derive(Parser)]
#[command(version, about = "Run font files through the provisioning pipeline on a headless surface")]
struct Cli {
    /// Font files (.ttf, .otf, .woff, .woff2)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// What the fonts are used for
    #[arg(long, value_enum, default_value = "character")]
    usage: Usage,

    /// How the headless renderer treats registered faces
    #[arg(long, value_enum, default_value = "active")]
    renderer: Renderer,

    /// Force fallback rules even for fonts that verify
    #[arg(long)]
    proactive_fallback: bool,

    /// Encoder chunk size in bytes (rounded down to a multiple of 3)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Verification timeout in milliseconds
    #[arg(long)]
    verify_timeout_ms: Option<u64>,

    /// Release each font after probing and report leftovers
    #[arg(long)]
    release: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = PipelineConfig::default().with_proactive_fallback(cli.proactive_fallback);
    if let Some(size) = cli.chunk_size {
        config = config.with_encode_chunk_size(size);
    }
    if let Some(ms) = cli.verify_timeout_ms {
        config = config.with_verify_timeout(Duration::from_millis(ms));
    }

    let options = ProbeOptions {
        usage: match cli.usage {
            Usage::Character => UsageType::Character,
            Usage::Pinyin => UsageType::Pinyin,
        },
        render_mode: match cli.renderer {
            Renderer::Active => RenderMode::Active,
            Renderer::Fallback => RenderMode::Fallback,
            Renderer::Hang => RenderMode::HangingSandbox,
        },
        config,
        release: cli.release,
    };

    match probe_files(&cli.files, &options) {
        Ok(reports) => {
            for report in reports {
                print!("{report}");
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}
