use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use journal_summary::core::{BlockId, OutlineNode, PageId, PageRef};
use journal_summary::format::{SlotContext, render_outcome, render_text};
use journal_summary::graph::MemoryGraph;
use journal_summary::host::{self, ClickEvent, ClickModel, JUMP_TAG, MemorySink, SlotEvent};
use journal_summary::settings::{SummarySettings, settings_schema};
use journal_summary::storage::Navigator;
use journal_summary::summary::{summarize_block, summarize_page};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "journal-summary",
    about = "Sum the time logged per tag in an outline graph",
    version
)]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize the log section of one page.
    Summary(SummaryArgs),

    /// Render every journal-summary macro the way a host would.
    Render(RenderArgs),

    /// Follow a tag link and print the tag's page.
    Jump(JumpArgs),

    /// Load a graph and print its pages.
    Parse(ParseArgs),

    /// Print the settings declaration as JSON.
    Schema,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// JSON settings file (`keyword`, `nest`).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Exact content of the log block; overrides the settings file.
    #[arg(long)]
    keyword: Option<String>,
    /// Levels below the log block where entries sit; overrides the settings file.
    #[arg(long)]
    nest: Option<usize>,
}

impl SettingsArgs {
    fn resolve(self) -> Result<SummarySettings> {
        let base = match &self.settings {
            Some(path) => SummarySettings::load(path)?,
            None => SummarySettings::default(),
        };
        Ok(base.with_overrides(self.keyword, self.nest))
    }
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// Markdown page or directory of pages.
    graph: PathBuf,
    /// Page to summarize.
    #[arg(long, conflicts_with_all = ["block", "date"])]
    page: Option<String>,
    /// Summarize the page holding this block.
    #[arg(long, conflicts_with = "date")]
    block: Option<Uuid>,
    /// Journal date to summarize. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    #[command(flatten)]
    settings: SettingsArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    emit: OutputFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Html,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Markdown page or directory of pages.
    graph: PathBuf,
    /// Only render macros on this page.
    #[arg(long)]
    page: Option<String>,
    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Debug, Args)]
struct JumpArgs {
    /// Markdown page or directory of pages.
    graph: PathBuf,
    /// Tag as shown in the summary table.
    tag: String,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Markdown page or directory of pages.
    graph: PathBuf,
    /// Emit JSON instead of an outline.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Summary(args) => handle_summary(args).await,
        Commands::Render(args) => handle_render(args).await,
        Commands::Jump(args) => handle_jump(args),
        Commands::Parse(args) => handle_parse(args),
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&settings_schema())?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("journal_summary=debug,info")
        } else {
            EnvFilter::new("journal_summary=warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn handle_summary(args: SummaryArgs) -> Result<()> {
    let SummaryArgs {
        graph: graph_path,
        page,
        block,
        date,
        settings,
        emit,
    } = args;
    let settings = settings.resolve()?;
    let graph = load_graph(&graph_path)?;

    let outcome = match (block, page) {
        (Some(block), _) => summarize_block(&graph, &settings, BlockId(block)).await,
        (None, Some(name)) => summarize_page(&graph, &settings, lookup_page(&graph, &name)?).await,
        (None, None) => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let name = journal_page_name(date);
            summarize_page(&graph, &settings, lookup_page(&graph, &name)?).await
        }
    };

    match emit {
        OutputFormat::Text => {
            let run = outcome?;
            print!("{}", render_text(&run.report));
        }
        OutputFormat::Json => {
            let run = outcome?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        OutputFormat::Html => {
            let ctx = SlotContext {
                slot: "cli",
                block: block.map(BlockId),
            };
            print!("{}", render_outcome(&outcome, ctx).template);
        }
    }
    Ok(())
}

async fn handle_render(args: RenderArgs) -> Result<()> {
    let RenderArgs {
        graph: graph_path,
        page,
        settings,
    } = args;
    let settings = settings.resolve()?;
    let graph = load_graph(&graph_path)?;
    let page = page
        .as_deref()
        .map(|name| lookup_page(&graph, name))
        .transpose()?;

    let markers: Vec<BlockId> = graph.marker_blocks(page).iter().map(|n| n.id).collect();
    if markers.is_empty() {
        eprintln!("No {} macros found.", host::RENDERER_TYPE);
        return Ok(());
    }

    let mut sink = MemorySink::new();
    for (idx, block) in markers.into_iter().enumerate() {
        let event = SlotEvent::for_block(format!("slot-{}", idx + 1), block);
        host::on_macro_renderer_slotted(&graph, &settings, &mut sink, &event).await;
    }

    for request in sink.iter() {
        println!("== {} ==", request.key);
        print!("{}", request.template);
    }
    Ok(())
}

/// Prints the target page and its outline.
struct PrintNavigator<'a> {
    graph: &'a MemoryGraph,
}

impl Navigator for PrintNavigator<'_> {
    fn push_page(&mut self, name: &str) -> Result<()> {
        let page = self
            .graph
            .page_by_name(name)
            .with_context(|| format!("page {name:?} not found in graph"))?;
        print_page(page, self.graph.tree(page.id).unwrap_or_default());
        Ok(())
    }
}

fn handle_jump(args: JumpArgs) -> Result<()> {
    let JumpArgs {
        graph: graph_path,
        tag,
    } = args;
    let graph = load_graph(&graph_path)?;
    let model = ClickModel::new();
    let mut navigator = PrintNavigator { graph: &graph };
    model.dispatch(
        &mut navigator,
        &ClickEvent {
            action: JUMP_TAG.to_string(),
            data_ref: tag,
        },
    )
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs {
        graph: graph_path,
        json,
    } = args;
    let graph = load_graph(&graph_path)?;

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            page: &'a PageRef,
            blocks: &'a [OutlineNode],
        }

        let payload: Vec<JsonOutput<'_>> = graph
            .loaded_pages()
            .map(|(page, blocks)| JsonOutput { page, blocks })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (page, blocks)) in graph.loaded_pages().enumerate() {
            if idx > 0 {
                println!();
            }
            print_page(page, blocks);
        }
    }
    Ok(())
}

fn load_graph(path: &Path) -> Result<MemoryGraph> {
    MemoryGraph::load_path(path).with_context(|| format!("loading graph {:?}", path))
}

fn lookup_page(graph: &MemoryGraph, name: &str) -> Result<PageId> {
    graph
        .page_by_name(name)
        .map(|p| p.id)
        .with_context(|| format!("page {name:?} not found in graph"))
}

/// Journal pages are named after their file: `YYYY_MM_DD`.
fn journal_page_name(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

fn print_page(page: &PageRef, blocks: &[OutlineNode]) {
    println!("== {} ==", page.original_name);
    for block in blocks {
        print_outline(block, 0);
    }
}

fn print_outline(node: &OutlineNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut lines = node.content.lines();
    println!("{indent}- {}", lines.next().unwrap_or(""));
    for line in lines {
        println!("{indent}  {line}");
    }
    for child in &node.children {
        print_outline(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn journal_page_name_uses_file_convention() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(journal_page_name(date), "2025_01_05");
    }

    #[test]
    fn settings_file_then_flags() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("settings.json");
        fs::write(&path, r####"{"keyword": "### Time", "nest": 2}"####).expect("write settings");

        let args = SettingsArgs {
            settings: Some(path.clone()),
            keyword: None,
            nest: Some(0),
        };
        let settings = args.resolve().expect("resolve");
        assert_eq!(settings.keyword, "### Time");
        assert_eq!(settings.nest, 0);

        let defaults = SettingsArgs {
            settings: None,
            keyword: None,
            nest: None,
        }
        .resolve()
        .expect("resolve");
        assert_eq!(defaults, SummarySettings::default());
    }

    #[test]
    fn lookup_page_reports_missing_page() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("2025_01_05.md"), "- ## Log\n").expect("write page");
        let graph = load_graph(tmp.path()).expect("load");

        assert!(lookup_page(&graph, "2025_01_05").is_ok());
        let err = lookup_page(&graph, "2025_01_06").unwrap_err();
        assert!(err.to_string().contains("2025_01_06"));
    }

    #[test]
    fn page_and_block_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "journal-summary",
            "summary",
            "graph",
            "--page",
            "a",
            "--block",
            "6f1d1e46-9c39-4c1e-9a4a-0d7a8d8e2f11",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn summary_flags_parse() {
        let cli = Cli::try_parse_from([
            "journal-summary",
            "summary",
            "graph",
            "--date",
            "2025-01-05",
            "--nest",
            "2",
            "--emit",
            "html",
        ])
        .expect("parse");
        match cli.command {
            Commands::Summary(args) => {
                assert_eq!(args.date, NaiveDate::from_ymd_opt(2025, 1, 5));
                assert_eq!(args.settings.nest, Some(2));
                assert_eq!(args.emit, OutputFormat::Html);
            }
            other => panic!("expected summary command, got {:?}", other),
        }
    }

    #[test]
    fn jump_fails_for_unknown_tag() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("today.md"), "- 09:00 - 10:00 [[042]]\n").expect("write page");

        let ok = handle_jump(JumpArgs {
            graph: tmp.path().to_path_buf(),
            tag: "042".to_string(),
        });
        assert!(ok.is_ok());

        let err = handle_jump(JumpArgs {
            graph: tmp.path().to_path_buf(),
            tag: "999".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("999"));
    }
}
