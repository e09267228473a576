//! CLI for Mingle - batch image generation with local fallback.

use clap::{Args, Parser, Subcommand};
use mingle::fetch::decode_data_uri;
use mingle::{
    AspectRatio, AssetType, GenerationRequest, Orchestrator, RoutingPolicy, StudioConfig, Style,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mingle")]
#[command(about = "Generate image variations via Freepik, Hugging Face and Pollinations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a batch of image variations from a text prompt
    Generate(GenerateArgs),

    /// List providers and their credential status
    Providers(ProvidersArgs),
}

#[derive(Args)]
struct ProvidersArgs {
    /// Contact each backend to confirm the key is accepted
    #[arg(long)]
    check: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image
    prompt: String,

    /// Visual style (colourful, cyberpunk, real, modern, minimalist, vintage, bold, elegant, playful)
    #[arg(long, default_value = "modern")]
    style: String,

    /// Asset type (image, icon, logo, layout)
    #[arg(long, default_value = "image")]
    asset_type: String,

    /// Aspect ratio (1:1, 16:9, 9:16, 4:3, 3:4, 3:2, 2:3)
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,

    /// Send every variation to one provider (freepik, huggingface, pollinations, fallback)
    #[arg(short, long, conflicts_with = "multi")]
    provider: Option<String>,

    /// Spread variations across all providers
    #[arg(long)]
    multi: bool,

    /// Number of variations
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Style reference image (used by providers that accept one)
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Base seed for variations
    #[arg(long)]
    seed: Option<u64>,

    /// Directory to write images into
    #[arg(short, long, default_value = "mingle-out")]
    out_dir: PathBuf,
}

#[derive(serde::Serialize)]
struct SavedResult {
    index: u32,
    provider: String,
    is_fallback: bool,
    attempts: u32,
    model: Option<String>,
    error: Option<String>,
    output: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mingle=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => {
            generate(args, cli.json).await?;
        }
        Commands::Providers(args) => {
            list_providers(args, cli.json).await?;
        }
    }

    Ok(())
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let mut config = StudioConfig::from_env();
    if let Some(count) = args.count {
        config.variation_count = count.max(1);
    }
    if args.multi {
        config.routing = RoutingPolicy::multi();
    } else if let Some(name) = &args.provider {
        config.routing = RoutingPolicy::parse(name)
            .ok_or_else(|| anyhow::anyhow!("unknown provider '{}'", name))?;
    }

    let mut request = GenerationRequest::new(&args.prompt)
        .with_style(Style::from_name(&args.style))
        .with_asset_type(AssetType::from_name(&args.asset_type))
        .with_aspect_ratio(AspectRatio::from_name(&args.aspect_ratio));
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }
    if let Some(ref path) = args.reference {
        request = request.with_reference_image(std::fs::read(path)?);
    }

    let orchestrator = config.build_orchestrator();
    let batch = orchestrator.generate_batch(&request).await;

    std::fs::create_dir_all(&args.out_dir)?;
    let stem = batch.id.simple().to_string();
    let mut saved = Vec::with_capacity(batch.len());
    for result in &batch.results {
        let output = match &result.image_ref {
            Some(image_ref) => Some(save(image_ref, &args.out_dir, &stem[..8], result.index)?),
            None => None,
        };
        saved.push(SavedResult {
            index: result.index,
            provider: result.provider.to_string(),
            is_fallback: result.is_fallback,
            attempts: result.attempts,
            model: result.model.clone(),
            error: result.error_message.clone(),
            output: output.map(|p| p.display().to_string()),
        });
    }

    if json_output {
        let report = serde_json::json!({
            "batch_id": batch.id,
            "summary": batch.summary(),
            "fallbacks": batch.fallback_count(),
            "results": saved,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for r in &saved {
            let marker = if r.is_fallback { "fallback" } else { "generated" };
            println!(
                "  [{}] {} via {} -> {}",
                r.index,
                marker,
                r.provider,
                r.output.as_deref().unwrap_or("(no image)")
            );
            if let Some(err) = &r.error {
                println!("      {}", err);
            }
        }
        println!("{}", batch.summary());
    }

    Ok(())
}

fn save(image_ref: &str, dir: &Path, stem: &str, index: u32) -> anyhow::Result<PathBuf> {
    let (format, data) = decode_data_uri(image_ref)?;
    let path = dir.join(format!("{}-{}.{}", stem, index, format.extension()));
    std::fs::write(&path, data)?;
    Ok(path)
}

async fn list_providers(args: ProvidersArgs, json_output: bool) -> anyhow::Result<()> {
    let orchestrator = StudioConfig::from_env().build_orchestrator();
    if args.check {
        return check_providers(&orchestrator, json_output).await;
    }
    let health = orchestrator.provider_health();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("Providers:\n");
        for d in &health {
            let status = match d.credential_status {
                mingle::CredentialStatus::Valid => "✓ ready",
                mingle::CredentialStatus::InvalidFormat => "✗ key has wrong format",
                mingle::CredentialStatus::Unconfigured => "✗ no key configured",
            };
            println!("  {} ({})", d.id, status);
            println!(
                "    task-based: {}, style reference: {}",
                d.is_task_based, d.supports_reference_image
            );
        }
        println!("  fallback (✓ always available)");
    }

    Ok(())
}

async fn check_providers(orchestrator: &Orchestrator, json_output: bool) -> anyhow::Result<()> {
    let checks = orchestrator.check_connections().await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        println!("Connection checks:\n");
        for check in &checks {
            let mark = if check.ok { "✓" } else { "✗" };
            println!("  {} {} ({})", mark, check.provider, check.message);
        }
        let failed = checks.iter().filter(|c| !c.ok).count();
        if failed > 0 {
            println!("\n{} of {} providers unreachable", failed, checks.len());
        }
    }

    Ok(())
}
