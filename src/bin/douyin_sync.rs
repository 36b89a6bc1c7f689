#![forbid(unsafe_code)]

//! Command-line entry point for the Douyin data tooling: single-video
//! queries, Feishu Bitable sync, content translation, transcript extraction,
//! and the local brand registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use douyin_tools::bitable::FeishuClient;
use douyin_tools::brands::BrandRegistry;
use douyin_tools::config::{Config, load_config};
use douyin_tools::ident::{self, HttpRedirectResolver};
use douyin_tools::parse::VideoMetadata;
use douyin_tools::reconcile;
use douyin_tools::subtitle::{self, CachedTranscript, SpeechToText};
use douyin_tools::tikhub::DouyinApi;

#[derive(Debug, Parser)]
#[command(name = "douyin_sync", about = "Douyin video data sync tools", version)]
struct Cli {
    /// Show debug-level diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and print one video's metadata
    Query {
        /// Video id (19 decimal digits)
        #[arg(long)]
        video_id: Option<String>,
        /// Video URL or share link
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Reconcile a Feishu Bitable against fresh video data
    Sync {
        /// Bitable app token
        #[arg(long)]
        app_token: String,
        /// Table id inside the app
        #[arg(long)]
        table_id: String,
        /// Optional view to list records from
        #[arg(long)]
        view_id: Option<String>,
        /// Refresh every row, even complete ones
        #[arg(long)]
        force: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Translate text through the content-translate endpoint
    Translate {
        /// Text to translate (capped at 5000 characters)
        #[arg(long)]
        content: String,
        /// Target language code (zh-Hans, en, ja, ko, ...)
        #[arg(long, default_value = "zh-Hans")]
        lang: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Extract a video script from the local cache or via speech recognition
    Script {
        /// Video id (19 decimal digits)
        #[arg(long)]
        video_id: Option<String>,
        /// Video URL or share link
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum, default_value_t = ScriptFormat::Text)]
        output: ScriptFormat,
        /// Write the JSON result to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Manage the Yuntu brand registry
    Brands {
        /// List configured brands
        #[arg(long)]
        list: bool,
        /// Add a brand: KEY NAME AADVID [INDUSTRY]
        #[arg(long, num_args = 3..=4, value_names = ["KEY", "NAME", "AADVID", "INDUSTRY"])]
        add: Option<Vec<String>>,
        /// Print the dashboard URL of a brand
        #[arg(long, value_name = "BRAND_KEY")]
        url: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScriptFormat {
    Text,
    Json,
    Srt,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Query {
            video_id,
            url,
            output,
        } => cmd_query(video_id, url, output),
        Commands::Sync {
            app_token,
            table_id,
            view_id,
            force,
            output,
        } => cmd_sync(&app_token, &table_id, view_id.as_deref(), force, output),
        Commands::Translate {
            content,
            lang,
            output,
        } => cmd_translate(&content, &lang, output),
        Commands::Script {
            video_id,
            url,
            output,
            save,
        } => cmd_script(video_id, url, output, save),
        Commands::Brands { list, add, url } => cmd_brands(list, add, url),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn video_input(video_id: Option<String>, url: Option<String>) -> Result<String> {
    video_id.or(url).context("provide --video-id or --url")
}

fn cmd_query(video_id: Option<String>, url: Option<String>, output: OutputFormat) -> Result<()> {
    let config = load_config()?;
    config.validate(false)?;
    let input = video_input(video_id, url)?;

    let api = DouyinApi::new(config.require_api_key()?, &config.douyin_api_url)?;
    let resolver = HttpRedirectResolver::new()?;

    info!("querying video {input}");
    let Some(metadata) = api.fetch_video(&input, &resolver)? else {
        match output {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "error": "video fetch failed",
                    "input": input,
                }))?
            ),
            OutputFormat::Text => eprintln!("Error: video fetch failed for {input}"),
        }
        process::exit(1);
    };

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&metadata.to_simple_json())?)
        }
        OutputFormat::Text => print_video_info(&metadata),
    }
    Ok(())
}

fn print_video_info(metadata: &VideoMetadata) {
    let stats = &metadata.statistics;

    println!();
    println!("{}", "=".repeat(60));
    println!("Video ID: {}", metadata.aweme_id);
    println!("URL: {}", metadata.share_url);
    println!("{}", "-".repeat(60));
    println!("Title: {}", metadata.display_title());
    println!(
        "Author: {} (@{})",
        metadata.author.nickname, metadata.author.unique_id
    );
    println!("Duration: {:.2} s", metadata.duration_ms as f64 / 1000.0);
    println!("{}", "-".repeat(60));
    println!("Plays: {}", stats.play_count);
    println!("Likes: {}", stats.digg_count);
    println!("Comments: {}", stats.comment_count);
    println!("Shares: {}", stats.share_count);
    println!("Collects: {}", stats.collect_count);
    println!("{}", "-".repeat(60));
    if !metadata.hashtags.is_empty() {
        let tags: Vec<String> = metadata.hashtags.iter().map(|tag| format!("#{tag}")).collect();
        println!("Hashtags: {}", tags.join(" "));
    }
    println!("Source: {}", metadata.data_source);
    if metadata.is_deleted {
        println!("Status: video removed");
    }
    println!("{}", "=".repeat(60));
    println!();
}

fn cmd_sync(
    app_token: &str,
    table_id: &str,
    view_id: Option<&str>,
    force: bool,
    output: OutputFormat,
) -> Result<()> {
    let config = load_config()?;
    config.validate(true)?;

    match sync_table(&config, app_token, table_id, view_id, force, output) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("sync failed: {err:#}");
            if output == OutputFormat::Json {
                println!("{}", json!({ "error": err.to_string() }));
            }
            process::exit(1);
        }
    }
}

fn sync_table(
    config: &Config,
    app_token: &str,
    table_id: &str,
    view_id: Option<&str>,
    force: bool,
    output: OutputFormat,
) -> Result<()> {
    let app_id = config.feishu_app_id.as_deref().context("FEISHU_APP_ID not set")?;
    let app_secret = config
        .feishu_app_secret
        .as_deref()
        .context("FEISHU_APP_SECRET not set")?;

    let mut feishu = FeishuClient::new(app_id, app_secret)?;
    let api = DouyinApi::new(config.require_api_key()?, &config.douyin_api_url)?;
    let resolver = HttpRedirectResolver::new()?;

    info!("connecting to Feishu");
    feishu.authenticate()?;

    let records = feishu.list_records(app_token, table_id, view_id)?;
    if records.is_empty() {
        println!("The table has no records.");
        return Ok(());
    }
    let total_records = records.len();

    let plan = reconcile::plan(records, force, &resolver);
    if plan.groups.is_empty() {
        println!("No valid video ids in the table.");
        return Ok(());
    }

    info!(
        "{} video(s) need updating, {} already have data",
        plan.to_fetch.len(),
        plan.skipped()
    );

    if plan.to_fetch.is_empty() {
        println!("All {} video(s) are already up to date.", plan.groups.len());
        return Ok(());
    }

    info!("fetching data from Douyin");
    let fetched: HashMap<String, Option<VideoMetadata>> = api.fetch_videos_batch(&plan.to_fetch);
    let updated = plan
        .to_fetch
        .iter()
        .filter(|id| matches!(fetched.get(*id), Some(Some(_))))
        .count();

    let updates = reconcile::apply_results(&plan, &fetched);
    if !updates.is_empty() {
        info!("updating the Feishu table");
        feishu.update_records(app_token, table_id, &updates)?;
    }

    let summary = json!({
        "status": "success",
        "total_records": total_records,
        "unique_videos": plan.groups.len(),
        "updated": updated,
        "skipped": plan.skipped(),
        "failed": plan.to_fetch.len() - updated,
    });

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!();
            println!("Sync complete:");
            println!("  - total records: {total_records}");
            println!("  - unique videos: {}", plan.groups.len());
            println!("  - updated: {updated}");
            println!("  - skipped: {}", plan.skipped());
            println!("  - failed: {}", plan.to_fetch.len() - updated);
        }
    }

    Ok(())
}

fn cmd_translate(content: &str, lang: &str, output: OutputFormat) -> Result<()> {
    let config = load_config()?;
    config.validate(false)?;

    let api = DouyinApi::new(config.require_api_key()?, &config.douyin_api_url)?;
    let result = api.translate(content, lang)?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if result.success {
                println!();
                println!("{}", "=".repeat(50));
                println!("Source: {}", result.source);
                println!("{}", "=".repeat(50));
                println!("Target language: {}", result.target_lang);
                println!(
                    "Translation: {}",
                    result.translated.as_deref().unwrap_or("no translation returned")
                );
                println!("{}", "=".repeat(50));
            } else {
                eprintln!(
                    "Translation failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                process::exit(1);
            }
        }
    }
    Ok(())
}

fn cmd_script(
    video_id: Option<String>,
    url: Option<String>,
    output: ScriptFormat,
    save: Option<PathBuf>,
) -> Result<()> {
    let input = video_input(video_id, url)?;
    let config = load_config()?;

    let resolver = HttpRedirectResolver::new()?;
    let video_id = ident::resolve(&input, &resolver).unwrap_or_else(|| input.clone());

    info!("extracting script for video {video_id}");

    // The Yuntu cache costs nothing and often already has the script.
    if let Some(cached) = subtitle::lookup_cached(&config.transcript_cache_file(), &video_id)? {
        print_cached_transcript(&cached, output)?;
        return Ok(());
    }

    config.validate(false)?;
    let api = DouyinApi::new(config.require_api_key()?, &config.douyin_api_url)?;
    let stt = SpeechToText::new(config.groq_api_key.clone(), config.openai_api_key.clone())?;

    let transcript = subtitle::extract_transcript(&api, &stt, &video_id)?;

    match output {
        ScriptFormat::Text => println!("{}", transcript.text),
        ScriptFormat::Json => println!("{}", serde_json::to_string_pretty(&transcript)?),
        ScriptFormat::Srt => {
            if transcript.segments.is_empty() {
                warn!("provider returned no timing information, printing plain text");
                println!("{}", transcript.text);
            } else {
                print!("{}", subtitle::render_srt(&transcript.segments));
            }
        }
    }

    if let Some(path) = save {
        std::fs::write(&path, serde_json::to_string_pretty(&transcript)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Saved to {}", path.display());
    }

    Ok(())
}

fn loose_value_text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(loose_value_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn print_cached_transcript(cached: &CachedTranscript, output: ScriptFormat) -> Result<()> {
    if output == ScriptFormat::Json {
        let result = json!({
            "video_id": cached.video_id,
            "title": cached.title,
            "method": "yuntu_cache",
            "content_formula": cached.content_formula,
            "script_segments": cached.script_segments,
            "raw_script": cached.raw_script,
            "talent_name": cached.talent_name,
            "views": cached.views,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    // Cached scripts carry no timing, so the SRT format degrades to text.
    let title: String = cached.title.chars().take(50).collect();
    println!();
    println!("{}", "=".repeat(60));
    println!("Video: {title}...");
    println!("Talent: {}", cached.talent_name.as_deref().unwrap_or("-"));
    println!("Views: {}", loose_value_text(&cached.views));
    println!("Formula: {}", loose_value_text(&cached.content_formula));
    println!("{}", "=".repeat(60));
    if !cached.script_segments.is_empty() {
        for segment in &cached.script_segments {
            println!();
            println!("[{}]", segment.tag);
            println!("{}", segment.content);
        }
    } else if !cached.raw_script.is_empty() {
        println!();
        println!("{}", cached.raw_script);
    }
    println!();
    println!("{}", "=".repeat(60));
    println!("Source: local cache");
    Ok(())
}

fn cmd_brands(list: bool, add: Option<Vec<String>>, url: Option<String>) -> Result<()> {
    let config = load_config()?;
    let mut registry = BrandRegistry::load(&config.brands_file())?;

    if list {
        println!();
        println!("{}", "=".repeat(60));
        println!("Configured brands:");
        println!("{}", "=".repeat(60));
        for (key, brand) in registry.iter() {
            println!();
            println!("  [{key}]");
            println!("    name: {}", brand.name);
            println!("    aadvid: {}", brand.aadvid);
            println!(
                "    industry: {}",
                if brand.industry.is_empty() { "-" } else { &brand.industry }
            );
            println!("    URL: {}", brand.yuntu_url);
        }
        println!();
        println!("{}", "=".repeat(60));
        return Ok(());
    }

    if let Some(values) = add {
        let industry = values.get(3).map(String::as_str).unwrap_or("");
        registry.add(&values[0], &values[1], &values[2], industry)?;
        println!("Added brand {} (aadvid {})", values[1], values[2]);
        return Ok(());
    }

    if let Some(key) = url {
        match registry.url(&key) {
            Some(dashboard) => println!("{dashboard}"),
            None => {
                eprintln!("Error: unknown brand {key:?}");
                process::exit(1);
            }
        }
        return Ok(());
    }

    println!("Use --list, --add or --url.");
    process::exit(1);
}
