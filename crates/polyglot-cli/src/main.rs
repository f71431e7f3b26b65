use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use polyglot_common::Config;
use polyglot_common::config::FileStore;
use polyglot_common::telemetry::{self, TelemetryConfig};
use polyglot_compiler::{
    CompileOutput, CompileRequest, CompilerHost, ExecutionContext, Fallback, LanguageRegistry,
};
use polyglot_worker::WorkerHost;
use tracing::Level;

#[derive(Parser)]
#[command(version, about = "Polyglot - compile playground languages to HTML, CSS and JavaScript", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a .json or .toml config file
    #[arg(long, global = true, env = "POLYGLOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file; the language comes from its extension
    Compile {
        file: PathBuf,

        /// Language id, overriding the file extension
        #[arg(long)]
        lang: Option<String>,

        /// Run every pass in this process
        #[arg(long)]
        no_worker: bool,

        /// Write the compiled code here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit this instead of failing when the compile errors
        #[arg(long, value_enum)]
        fallback: Option<FallbackArg>,

        /// Print the full compile output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the registered languages
    Languages,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FallbackArg {
    Empty,
    LastGood,
    ErrorMarker,
}

impl From<FallbackArg> for Fallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Empty => Fallback::Empty,
            FallbackArg::LastGood => Fallback::LastGood,
            FallbackArg::ErrorMarker => Fallback::ErrorMarker,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette()?;

    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    telemetry::init(TelemetryConfig::from_env("polyglot-cli").with_level(level));

    let config = match &cli.config {
        Some(path) => Config::load(&FileStore::new(path)).await?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Compile {
            file,
            lang,
            no_worker,
            output,
            fallback,
            json,
        } => {
            let options = CompileOptions {
                lang,
                use_worker: config.use_worker && !no_worker,
                fallback: fallback.map(Fallback::from),
                json,
            };
            compile_file(&file, output.as_deref(), options, config).await?;
        }
        Commands::Languages => list_languages(),
    }

    Ok(())
}

struct CompileOptions {
    lang: Option<String>,
    use_worker: bool,
    fallback: Option<Fallback>,
    json: bool,
}

async fn compile_file(
    file: &Path,
    dest: Option<&Path>,
    options: CompileOptions,
    config: Config,
) -> Result<()> {
    let source = tokio::fs::read_to_string(file).await.into_diagnostic()?;
    let host = CompilerHost::builtin(&config);
    let language = match options.lang {
        Some(lang) => lang,
        None => host.registry().resolve_path(file)?.name.to_string(),
    };

    let context = if options.use_worker {
        let worker = WorkerHost::spawn_builtin(&config).into_diagnostic()?;
        ExecutionContext::with_worker(Arc::new(worker))
    } else {
        ExecutionContext::main()
    };
    let request = CompileRequest::new(language.as_str(), source)
        .with_config(config)
        .with_context(context);

    let start = std::time::Instant::now();
    let output = match options.fallback {
        None => host.compile(&request).await?,
        Some(fallback) => {
            let recovered = host.compile_or_recover(&request, fallback).await;
            if let Some(error) = &recovered.error {
                eprintln!("⚠ {error}");
            }
            recovered.output
        }
    };
    for error in &output.block_errors {
        eprintln!("⚠ {error}");
    }

    let rendered = render_output(&output, options.json)?;
    match dest {
        Some(dest) => {
            if let Some(parent) = dest.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent).await.into_diagnostic()?;
                }
            }
            tokio::fs::write(dest, rendered).await.into_diagnostic()?;
            eprintln!(
                "✓ {} ({language} → {}) in {:.2}s",
                dest.display(),
                output.compiled_language,
                start.elapsed().as_secs_f64()
            );
        }
        None => println!("{rendered}"),
    }

    Ok(())
}

fn render_output(output: &CompileOutput, json: bool) -> Result<String> {
    if json {
        serde_json::to_string_pretty(output).into_diagnostic()
    } else {
        Ok(output.code.clone())
    }
}

fn list_languages() {
    let registry = LanguageRegistry::builtin();
    for spec in registry.iter() {
        let extensions: Vec<String> = spec.extensions.iter().map(|ext| format!(".{ext}")).collect();
        println!(
            "{:<12} {:<12} → {:<11} {}",
            spec.name,
            spec.title,
            spec.output_language(),
            extensions.join(" ")
        );
    }
}

fn init_miette() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    miette::set_panic_hook();
    Ok(())
}
