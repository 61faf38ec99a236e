use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::action::RecordingExecutor;
use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::query::{Interrupt, MatchOptions, QueryEngine};
use crate::rules;
use crate::scheduler::{Scheduler, TreeEvent};
use crate::selector::{self, Selector};
use crate::tree::cache::NodeCache;
use crate::tree::fixture::{FixtureNode, FixtureTree};
use crate::tree::{Attr, TreeSource};

use super::exit_codes;
use super::output::{
    self, CheckData, CompileErrorData, FiredData, NodeData, OutputMode, QueryData, SelectorData,
    SimulateData, VerifyData,
};

#[derive(Parser)]
#[command(name = "axsel")]
#[command(about = "Selector language and rule scheduler for live accessibility trees")]
#[command(version)]
pub struct Cli {
    /// Path to config file (overrides AXSEL_CONFIG env var and default location)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (auto-enabled when stdout is piped)
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Force text output even when stdout is piped
    #[arg(long, global = true, conflicts_with = "json")]
    pub no_json: bool,

    /// Suppress all output on success (errors still go to stderr)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile selectors and report errors or their canonical form
    Check {
        /// Selector source text(s)
        #[arg(required = true)]
        selectors: Vec<String>,
    },

    /// Run a selector against a JSON fixture tree
    Query {
        /// Fixture tree file (JSON node description)
        #[arg(short, long)]
        tree: PathBuf,

        /// Selector source text
        selector: String,

        /// Use the indexed lookup for the first segment
        #[arg(long)]
        quick_find: bool,

        /// Use the indexed lookup anchored at the last keyed segment
        #[arg(long)]
        fast_query: bool,
    },

    /// Rule set commands
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Drive the scheduler against a fixture tree with synthetic events
    Simulate {
        /// Fixture tree file (JSON node description)
        #[arg(short, long)]
        tree: PathBuf,

        /// Foreground app id
        #[arg(short, long)]
        app: String,

        /// Foreground page id
        #[arg(long)]
        activity: Option<String>,

        /// Number of content-changed events to send
        #[arg(short, long, default_value_t = 1)]
        events: usize,

        /// Pause between events in milliseconds
        #[arg(long, default_value_t = 50)]
        interval_ms: u64,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Check the config file for errors
    Verify,

    /// Show the rules that would be active
    List,
}

pub fn execute(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    let output_mode = OutputMode::from_flags(cli.json, cli.no_json, cli.quiet);

    match cli.command {
        Commands::Check { selectors } => cmd_check(&selectors, output_mode),

        Commands::Query {
            tree,
            selector,
            quick_find,
            fast_query,
        } => cmd_query(
            &tree,
            &selector,
            MatchOptions {
                quick_find,
                fast_query,
            },
            output_mode,
        ),

        Commands::Rules { command } => match command {
            RulesCommands::Verify => cmd_rules_verify(config_path, output_mode),
            RulesCommands::List => cmd_rules_list(config_path, output_mode),
        },

        Commands::Simulate {
            tree,
            app,
            activity,
            events,
            interval_ms,
        } => cmd_simulate(
            config_path,
            &tree,
            &app,
            activity.as_deref(),
            events,
            Duration::from_millis(interval_ms),
            output_mode,
        ),
    }
}

fn selector_data(source: &str, selector: &Selector) -> SelectorData {
    SelectorData {
        source: source.to_string(),
        canonical: selector.to_string(),
        segments: selector.segments.len(),
        root_anchored: selector.root_anchored,
        use_cache: selector.use_cache,
        quick_find: selector.quick_find.is_some(),
        fast_query: !selector.fast_query.is_empty(),
    }
}

fn cmd_check(sources: &[String], output_mode: OutputMode) -> Result<()> {
    let mut data = CheckData {
        compiled: Vec::new(),
        errors: Vec::new(),
    };

    for source in sources {
        match selector::compile(source) {
            Ok(selector) => {
                if output_mode.is_text() {
                    println!("{}", selector);
                }
                data.compiled.push(selector_data(source, &selector));
            }
            Err(err) => {
                if !output_mode.is_json() {
                    eprintln!("{}", err.render(source));
                }
                data.errors.push(CompileErrorData {
                    source: source.clone(),
                    message: err.kind.to_string(),
                    start: err.span.start,
                    end: err.span.end,
                });
            }
        }
    }

    if output_mode.is_json() {
        output::print_json(&data);
    }

    if !data.errors.is_empty() {
        std::process::exit(exit_codes::COMPILE_ERROR);
    }
    Ok(())
}

fn load_tree(path: &Path) -> Result<FixtureTree> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree file: {}", path.display()))?;
    FixtureTree::from_json(&content)
        .with_context(|| format!("Failed to parse tree file: {}", path.display()))
}

fn node_data(tree: &FixtureTree, node: &FixtureNode) -> NodeData {
    let text_attr = |attr: Attr| {
        tree.attr(node, attr)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    };
    NodeData {
        description: tree.describe(node),
        id: text_attr(Attr::Id),
        text: text_attr(Attr::Text),
    }
}

fn cmd_query(
    tree_path: &Path,
    source: &str,
    options: MatchOptions,
    output_mode: OutputMode,
) -> Result<()> {
    let selector = match selector::compile(source) {
        Ok(selector) => selector,
        Err(err) => {
            if output_mode.is_json() {
                output::print_json_error(exit_codes::COMPILE_ERROR, &err.to_string());
            } else {
                eprintln!("{}", err.render(source));
            }
            std::process::exit(exit_codes::COMPILE_ERROR);
        }
    };

    let tree = load_tree(tree_path)?;
    let cache = NodeCache::new(Default::default());
    let engine = QueryEngine::new(&tree, Some(&cache), Default::default());
    let now = SystemClock.now_ms();

    tree.reset_reads();
    let chain = engine
        .query_chain(&selector, None, options, Interrupt::none(), now)
        .unwrap_or_default()
        .unwrap_or_default();

    let target = chain
        .get(selector.target_index())
        .map(|n| node_data(&tree, n));
    let data = QueryData {
        selector: selector.to_string(),
        matched: target.is_some(),
        chain: chain.iter().map(|n| node_data(&tree, n)).collect(),
        target,
        reads: tree.reads(),
    };

    if output_mode.is_json() {
        output::print_json(&data);
    } else if output_mode.is_text() {
        match &data.target {
            Some(target) => {
                for (i, node) in data.chain.iter().enumerate() {
                    let marker = if i == selector.target_index() { "$" } else { " " };
                    println!("{} {}", marker, node.description);
                }
                eprintln!("matched {} ({} tree reads)", target.description, data.reads);
            }
            None => eprintln!("no match ({} tree reads)", data.reads),
        }
    }

    if !data.matched {
        std::process::exit(exit_codes::NO_MATCH);
    }
    Ok(())
}

fn cmd_rules_verify(config_path: Option<&Path>, output_mode: OutputMode) -> Result<()> {
    let path = config::get_config_path(config_path)?;

    let errors = match config::verify(&path) {
        Ok(errors) => errors,
        Err(e) => {
            if output_mode.is_json() {
                output::print_json_error(exit_codes::CONFIG_ERROR, &e.to_string());
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    let data = VerifyData {
        path: path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    };

    if output_mode.is_json() {
        if data.valid {
            output::print_json(&data);
        } else {
            output::print_json_error_with_details(
                exit_codes::CONFIG_ERROR,
                "config has errors",
                data.errors.clone(),
            );
        }
    } else if data.valid {
        if output_mode.is_text() {
            println!("✓ {} is valid", data.path);
        }
    } else {
        eprintln!("✗ {} has {} error(s):", data.path, data.errors.len());
        for error in &data.errors {
            eprintln!("  - {}", error);
        }
    }

    if !data.valid {
        std::process::exit(exit_codes::CONFIG_ERROR);
    }
    Ok(())
}

fn cmd_rules_list(config_path: Option<&Path>, output_mode: OutputMode) -> Result<()> {
    let config = config::load(config_path)?;
    let loaded = rules::load(&config.rules, &config.settings, SystemClock.now_ms());

    if output_mode.is_json() {
        let list: Vec<serde_json::Value> = loaded
            .rules
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id.to_string(),
                    "name": r.name,
                    "action": r.action.to_string(),
                    "selectors": r.selectors().map(|s| s.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        output::print_json(&list);
    } else if output_mode.is_text() {
        for rule in &loaded.rules {
            println!(
                "{:<24} {:<12} {}",
                rule.id.to_string(),
                rule.action.to_string(),
                rule.name.as_deref().unwrap_or("")
            );
            for selector in rule.selectors() {
                println!("    {}", selector);
            }
        }
        if !loaded.errors.is_empty() {
            eprintln!("{} rule(s) rejected, run `axsel rules verify`", loaded.errors.len());
        }
    }
    Ok(())
}

fn cmd_simulate(
    config_path: Option<&Path>,
    tree_path: &Path,
    app: &str,
    activity: Option<&str>,
    events: usize,
    interval: Duration,
    output_mode: OutputMode,
) -> Result<()> {
    let config = config::load(config_path)?;
    let tree = Arc::new(load_tree(tree_path)?);
    let executor: Arc<RecordingExecutor<FixtureNode>> = Arc::new(RecordingExecutor::new());
    let follow_up = Duration::from_millis(config.settings.follow_up_delay_ms);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let stats = runtime.block_on(async {
        let handle = Scheduler::new(tree.clone(), executor.clone())
            .with_settings(config.settings.clone())
            .with_rules(config.rules.clone())
            .start()?;

        handle.send(TreeEvent::window_changed(app, activity));
        for _ in 0..events {
            tokio::time::sleep(interval).await;
            handle.send(TreeEvent::content_changed(app, tree.root_node()));
        }
        tokio::time::sleep(follow_up + interval).await;

        let stats = handle.stats();
        handle.shutdown().await;
        anyhow::Ok(stats)
    })?;

    let fired: Vec<FiredData> = executor
        .performed()
        .iter()
        .map(|(node, action)| FiredData {
            target: tree.describe(node),
            action: action.to_string(),
        })
        .collect();

    let data = SimulateData {
        app: app.to_string(),
        activity: activity.map(str::to_string),
        events,
        fired,
        batches: stats.batches,
        skipped_batches: stats.skipped_batches,
        evaluations: stats.evaluations,
        cache_hits: stats.cache.hits,
        cache_misses: stats.cache.misses,
    };

    if output_mode.is_json() {
        output::print_json(&data);
    } else if output_mode.is_text() {
        for fired in &data.fired {
            println!("{} -> {}", fired.action, fired.target);
        }
        eprintln!(
            "{} action(s), {} batch(es), {} skipped, {} evaluation(s)",
            data.fired.len(),
            data.batches,
            data.skipped_batches,
            data.evaluations
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "axsel",
            "query",
            "--tree",
            "tree.json",
            "[text='OK']",
            "--quick-find",
        ])
        .unwrap();
        match cli.command {
            Commands::Query {
                selector,
                quick_find,
                fast_query,
                ..
            } => {
                assert_eq!(selector, "[text='OK']");
                assert!(quick_find);
                assert!(!fast_query);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_cli_verbosity_counts() {
        let cli = Cli::try_parse_from(["axsel", "-vv", "rules", "verify"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Rules {
                command: RulesCommands::Verify
            }
        ));
    }

    #[test]
    fn test_cli_check_requires_selector() {
        assert!(Cli::try_parse_from(["axsel", "check"]).is_err());
    }

    #[test]
    fn test_selector_data_flags() {
        let selector = selector::compile("[id='a'] > [text='b']").unwrap();
        let data = selector_data("[id='a'] > [text='b']", &selector);
        assert_eq!(data.segments, 2);
        assert!(data.quick_find);
        assert!(data.use_cache);
    }

    #[test]
    fn test_node_data_reads_attrs() {
        let tree = FixtureTree::from_json(r#"{ "name": "Button", "id": "app:id/ok", "text": "OK" }"#)
            .unwrap();
        let root = tree.root_node().unwrap();
        let data = node_data(&tree, &root);
        assert_eq!(data.id.as_deref(), Some("app:id/ok"));
        assert_eq!(data.text.as_deref(), Some("OK"));
        assert_eq!(data.description, "Button#ok \"OK\"");
    }
}
