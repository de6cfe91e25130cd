//! nv CLI: Semantic search over a note vault

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use nv_core::{
    ChunkType, Config, DEFAULT_LIMIT, DEFAULT_SIMILAR_LIMIT, DEFAULT_THRESHOLD, Embedder,
    FastEmbedder, FileOutcome, IndexManager, IndexOptions, IndexProgress, NvError, ScoredChunk,
    SearchEngine, SearchFilters, SearchOptions, Span, discover,
};
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use syntect::util::{LinesWithEndings, as_24_bit_terminal_escaped};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "nv")]
#[command(about = "Semantic search over a note vault", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Search query (when no subcommand is given)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a vault in the current directory
    Init,

    /// Index new and changed files in the vault
    Index {
        /// Re-index every file, even unchanged ones
        #[arg(short, long)]
        force: bool,
    },

    /// Back up the index and rebuild it from scratch
    Rebuild,

    /// Index a single file
    File {
        path: PathBuf,

        /// Re-index even if unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Remove a file's chunks from the index
    Remove { path: PathBuf },

    /// Check that the index files are consistent
    Validate,

    /// Show index status and statistics
    Status,

    /// Find chunks similar to the given chunk
    Similar {
        /// Chunk id, as printed by `nv search`
        chunk_id: String,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = DEFAULT_SIMILAR_LIMIT)]
        limit: usize,
    },

    /// Search for chunks matching a query
    Search {
        /// Search query
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Minimum cosine similarity
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,

        /// Only files whose path matches this pattern
        #[arg(long)]
        path: Option<String>,

        /// Only files with this extension
        #[arg(long = "type")]
        file_type: Option<String>,

        /// Only chunks of this kind (function, code, section, paragraph, generic)
        #[arg(long)]
        chunk_type: Option<ChunkType>,

        /// Rank by raw similarity only
        #[arg(long)]
        no_rerank: bool,

        /// Number of context lines to show
        #[arg(short = 'C', long, default_value = "2")]
        context: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Some(Commands::Init) => cmd_init()?,
        Some(Commands::Index { force }) => cmd_index(force, false).await?,
        Some(Commands::Rebuild) => cmd_index(true, true).await?,
        Some(Commands::File { path, force }) => cmd_file(&path, force).await?,
        Some(Commands::Remove { path }) => cmd_remove(&path).await?,
        Some(Commands::Validate) => cmd_validate().await?,
        Some(Commands::Status) => cmd_status().await?,
        Some(Commands::Similar { chunk_id, limit }) => cmd_similar(&chunk_id, limit).await?,
        Some(Commands::Search {
            query,
            limit,
            threshold,
            path,
            file_type,
            chunk_type,
            no_rerank,
            context,
        }) => {
            let options = SearchOptions {
                threshold,
                limit,
                filters: SearchFilters {
                    file_path: path,
                    file_type,
                    chunk_type,
                },
                rerank: !no_rerank,
            };
            cmd_search(&query.join(" "), &options, context).await?;
        }
        None => {
            if cli.query.is_empty() {
                println!("Usage: nv <query> or nv <command>");
                println!("Run 'nv --help' for more information.");
            } else {
                cmd_search(&cli.query.join(" "), &SearchOptions::default(), 2).await?;
            }
        }
    }

    Ok(())
}

/// Stand-in for commands that read the index but never embed.
struct NoEmbedder {
    dimension: usize,
}

#[async_trait]
impl Embedder for NoEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> nv_core::Result<Vec<f32>> {
        Err(NvError::Embedding("no model loaded for this command".into()))
    }
}

fn vault_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    discover::find_vault_root(&cwd).context("Not in a vault. Run 'nv init' first.")
}

fn model_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let embedder = FastEmbedder::new(config).context("Failed to load embedding model")?;
    Ok(Arc::new(embedder))
}

fn offline_embedder(config: &Config) -> Arc<dyn Embedder> {
    Arc::new(NoEmbedder {
        dimension: config.dimension,
    })
}

async fn open_manager(embed: bool) -> Result<IndexManager> {
    let root = vault_root()?;
    let config = Config::load(&root)?;
    let embedder = if embed {
        model_embedder(&config)?
    } else {
        offline_embedder(&config)
    };
    Ok(IndexManager::with_config(root, config, embedder).await?)
}

fn cmd_init() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let index_dir = discover::index_dir(&cwd);

    if index_dir.exists() {
        return Err(NvError::AlreadyInitialized(index_dir).into());
    }

    std::fs::create_dir(&index_dir)?;
    Config::default().save(&cwd)?;

    println!("Initialized vault in {}", index_dir.display());
    println!("Run 'nv index' to index files.");

    Ok(())
}

async fn cmd_index(force: bool, rebuild: bool) -> Result<()> {
    let manager = open_manager(true).await?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    pb.set_message("Scanning files...");

    let (tx, mut rx) = mpsc::unbounded_channel::<IndexProgress>();
    let reporter = tokio::spawn({
        let pb = pb.clone();
        async move {
            while let Some(progress) = rx.recv().await {
                pb.set_length(progress.total as u64);
                pb.set_position(progress.processed as u64);
                pb.set_message(format!("{}% ({} chunks)", progress.percent, progress.chunks));
            }
        }
    });

    let result = if rebuild {
        manager.rebuild_index(Some(tx)).await
    } else {
        manager
            .index_vault(IndexOptions {
                force,
                progress: Some(tx),
            })
            .await
    };
    reporter.await?;
    pb.finish_and_clear();

    let stats = result?;
    if rebuild {
        println!("✓ Rebuild complete (previous index backed up as .bak):");
    } else {
        println!("✓ Indexing complete:");
    }
    println!("  Files scanned:  {}", stats.total_files);
    println!("  Files indexed:  {}", stats.indexed_files);
    println!("  Total chunks:   {}", stats.total_chunks);
    println!("  Files removed:  {}", stats.pruned);
    if stats.errors > 0 {
        println!("  \x1b[31mErrors:         {}\x1b[0m", stats.errors);
    }

    Ok(())
}

async fn cmd_file(path: &Path, force: bool) -> Result<()> {
    let manager = open_manager(true).await?;
    match manager.index_file(path, force).await? {
        FileOutcome::Indexed { chunk_count } => {
            println!("✓ Indexed {} ({} chunks)", path.display(), chunk_count);
        }
        FileOutcome::Skipped(reason) => {
            println!("Skipped {} ({})", path.display(), reason.as_str());
        }
    }
    Ok(())
}

async fn cmd_remove(path: &Path) -> Result<()> {
    let manager = open_manager(false).await?;
    manager.remove_file(path).await?;
    println!("✓ Removed {} from the index", path.display());
    Ok(())
}

async fn cmd_validate() -> Result<()> {
    let manager = open_manager(false).await?;
    let verdict = manager.validate_index().await;
    match verdict.into_result() {
        Ok(()) => {
            println!("✓ Index is valid");
            Ok(())
        }
        Err(e) => {
            println!("\x1b[31m✗ {}\x1b[0m", e);
            println!("Run 'nv rebuild' to recreate the index.");
            Err(e.into())
        }
    }
}

async fn cmd_status() -> Result<()> {
    let manager = open_manager(false).await?;
    let config = manager.config();
    let state = manager.state().await;

    println!("Vault: {}", manager.root().display());
    println!();
    println!("Configuration:");
    println!("  Model: {}", config.model);
    println!("  Dimension: {}", config.dimension);
    println!("  Window size: {} chars", config.window_size);
    println!("  Max file size: {} bytes", config.max_file_size);
    println!();

    let engine = SearchEngine::new(manager.root(), config, offline_embedder(config));
    engine.load_index().await?;
    let stats = engine.stats();

    println!("Index (format {}):", state.version);
    println!("  Files tracked: {}", state.files.len());
    println!("  Files indexed: {}", state.indexed_count());
    println!("  Chunks: {} across {} files", stats.total_chunks, stats.total_files);
    for (chunk_type, count) in &stats.chunk_types {
        println!("    {:<10} {}", chunk_type.as_str(), count);
    }
    println!("  Errors in last run: {}", state.stats.errors);
    match state.last_index_time {
        Some(ms) => println!("  Last indexed: {}s ago", age_secs(ms)),
        None => println!("  Last indexed: never"),
    }

    let verdict = manager.validate_index().await;
    if let Some(reason) = verdict.reason.filter(|_| !verdict.valid) {
        println!();
        println!("\x1b[33m! Index needs a rebuild: {}\x1b[0m", reason);
    }

    Ok(())
}

fn age_secs(ms: u64) -> u64 {
    nv_core::state::now_millis().saturating_sub(ms) / 1000
}

async fn cmd_similar(chunk_id: &str, limit: usize) -> Result<()> {
    let root = vault_root()?;
    let config = Config::load(&root)?;
    let engine = SearchEngine::new(&root, &config, offline_embedder(&config));
    engine.load_index().await?;

    let Some(target) = engine.chunk(chunk_id) else {
        anyhow::bail!("No chunk with id {}", chunk_id);
    };

    let results = engine.find_similar(chunk_id, limit);
    if results.is_empty() {
        println!("No similar chunks found.");
        return Ok(());
    }

    let highlighter = SyntaxHighlighter::new();
    println!("Chunks similar to {}:\n", target.id);
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result, &root, &highlighter, 2)?;
    }

    Ok(())
}

async fn cmd_search(query: &str, options: &SearchOptions, context_lines: usize) -> Result<()> {
    let root = vault_root()?;
    let config = Config::load(&root)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Searching...");

    let engine = SearchEngine::new(&root, &config, model_embedder(&config)?);
    engine.load_index().await?;
    let results = engine.try_search(query, options).await;

    pb.finish_and_clear();
    let results = results?;

    if results.is_empty() {
        println!("No results found for: {}", query);
        return Ok(());
    }

    let highlighter = SyntaxHighlighter::new();

    println!("Results for: {}\n", query);

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result, &root, &highlighter, context_lines)?;
    }

    Ok(())
}

/// 1-based line numbers covered by a character span of `content`.
fn line_range(content: &str, span: Span) -> (usize, usize) {
    let newlines_before =
        |chars: usize| content.chars().take(chars).filter(|&c| c == '\n').count();
    let start = newlines_before(span.start) + 1;
    let end = newlines_before(span.end.saturating_sub(1)) + 1;
    (start, end.max(start))
}

const MAX_DISPLAY_LINES: usize = 12;
const HEAD_LINES: usize = 5;
const TAIL_LINES: usize = 3;

/// Pretty-print a search hit with syntax highlighting.
fn print_result(
    index: usize,
    result: &ScoredChunk,
    root: &Path,
    highlighter: &SyntaxHighlighter,
    context_lines: usize,
) -> Result<()> {
    let chunk = &result.chunk;
    let score_color = if result.score > 0.7 {
        "\x1b[32m"
    } else if result.score > 0.5 {
        "\x1b[33m"
    } else {
        "\x1b[31m"
    };

    // The file may have changed since indexing; only trust it if the span
    // still holds the indexed text.
    let content = std::fs::read_to_string(root.join(&chunk.file_path))
        .ok()
        .filter(|content| {
            let indexed: String = content
                .chars()
                .skip(chunk.span.start)
                .take(chunk.span.end.saturating_sub(chunk.span.start))
                .collect();
            indexed == chunk.text
        });

    let location = match &content {
        Some(content) => {
            let (start, end) = line_range(content, chunk.span);
            format!(":\x1b[33m{}-{}\x1b[0m", start, end)
        }
        None => String::new(),
    };
    let heading = chunk
        .metadata
        .heading
        .as_deref()
        .map(|h| format!("  \x1b[2m# {}\x1b[0m", h))
        .unwrap_or_default();

    println!(
        "\x1b[1;36m[{}]\x1b[0m {}{:.3}\x1b[0m  \x1b[1m{}\x1b[0m{}  {}{}",
        index,
        score_color,
        result.score,
        chunk.file_path,
        location,
        chunk.chunk_type,
        heading,
    );
    println!("\x1b[2m    id: {}\x1b[0m", chunk.id);

    let display = match &content {
        Some(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let (match_start, match_end) = line_range(content, chunk.span);
            let start = match_start.saturating_sub(context_lines + 1);
            let end = (match_end + context_lines).min(lines.len());
            let numbered: Vec<(usize, &str)> = lines[start..end]
                .iter()
                .enumerate()
                .map(|(i, line)| (start + i + 1, *line))
                .collect();
            format_lines(&numbered, |n| n >= match_start && n <= match_end)
        }
        None => {
            let numbered: Vec<(usize, &str)> =
                chunk.text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
            format_lines(&numbered, |_| true)
        }
    };

    let extension = Path::new(&chunk.file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("txt");

    println!("{}", highlighter.highlight(&display, extension));
    println!();

    Ok(())
}

/// Render numbered lines, collapsing the middle of long excerpts.
fn format_lines(lines: &[(usize, &str)], in_match: impl Fn(usize) -> bool) -> String {
    let render = |out: &mut String, (num, line): &(usize, &str)| {
        let prefix = if in_match(*num) { "│" } else { "┊" };
        out.push_str(&format!("{} {:4} │ {}\n", prefix, num, line));
    };

    let mut out = String::new();
    if lines.len() <= MAX_DISPLAY_LINES {
        for line in lines {
            render(&mut out, line);
        }
    } else {
        for line in &lines[..HEAD_LINES] {
            render(&mut out, line);
        }
        out.push_str(&format!(
            "\x1b[2m     ┊  ... {} more lines ...\x1b[0m\n",
            lines.len() - HEAD_LINES - TAIL_LINES
        ));
        for line in &lines[lines.len() - TAIL_LINES..] {
            render(&mut out, line);
        }
    }
    out
}

/// Wrapper around syntect for syntax highlighting.
struct SyntaxHighlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl SyntaxHighlighter {
    fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }

    fn highlight(&self, code: &str, extension: &str) -> String {
        let syntax = self
            .syntax_set
            .find_syntax_by_extension(extension)
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let theme = &self.theme_set.themes["base16-ocean.dark"];
        let mut highlighter = HighlightLines::new(syntax, theme);

        let mut output = String::new();
        for line in LinesWithEndings::from(code) {
            match highlighter.highlight_line(line, &self.syntax_set) {
                Ok(ranges) => output.push_str(&as_24_bit_terminal_escaped(&ranges[..], false)),
                Err(_) => output.push_str(line),
            }
        }
        output.push_str("\x1b[0m");

        output
    }
}
