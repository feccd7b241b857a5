//! rnaseq_dge command-line interface

use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_dge::cli::{Cli, Commands, EnrichmentArgs, InputArgs, TestingArgs};
use rnaseq_dge::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "normalize", "enrich", "diagnose", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rnaseq_dge {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            inputs,
            testing,
            enrichment,
        }) => run_full(&inputs, &testing, &enrichment),
        Some(Commands::Normalize { inputs }) => run_normalize_only(&inputs),
        Some(Commands::Enrich {
            dge,
            inputs,
            testing,
            enrichment,
        }) => run_enrich(&dge, &inputs, &testing, &enrichment),
        Some(Commands::Diagnose { inputs }) => run_diagnose(&inputs),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rnaseq_dge v{}", VERSION);
    println!("Run `rnaseq_dge -h` for usage or `rnaseq_dge --help` for detailed information.");
}

fn print_short_help() {
    println!("rnaseq_dge v{}", VERSION);
    println!();
    println!("Usage: rnaseq_dge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline");
    println!("  normalize  Filter and normalize only");
    println!("  enrich     Gene-set enrichment from an existing results table");
    println!("  diagnose   PCA bias diagnostics");
    println!();
    println!("Run `rnaseq_dge <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rnaseq_dge v{}", VERSION);
    println!("Paired RNA-seq differential expression with CQN and bias-aware enrichment");
    println!();
    println!("Usage: rnaseq_dge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline");
    println!("               - CPM filter and conditional quantile normalization");
    println!("               - Paired NB quasi-likelihood GLM with robust moderation");
    println!("               - TREAT against a log2 fold-change threshold");
    println!("               - Enrichment with Wallenius, sampling or hypergeometric nulls");
    println!("  normalize  Filter and normalize only, writes CQN offsets");
    println!("  enrich     Gene-set enrichment from an existing results table");
    println!("  diagnose   PCA of expression against GC and length bias");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rnaseq_dge run --config config.json");
    println!();
    println!("  rnaseq_dge run -c counts.tsv -s samples.tsv -a annotation.tsv \\");
    println!("    -g msigdb.tsv --reference control -o results/");
    println!();
    println!("  rnaseq_dge enrich --dge results/dge_results.tsv -g msigdb.tsv --method sampling");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn configure_threads(threads: usize) {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }
}

fn prepare(
    inputs: &InputArgs,
    testing: Option<&TestingArgs>,
    enrichment: Option<&EnrichmentArgs>,
) -> Result<PipelineConfig> {
    let mut config = inputs.load_config()?;
    if let Some(t) = testing {
        t.apply(&mut config);
    }
    if let Some(e) = enrichment {
        e.apply(&mut config)?;
    }
    config.validate()?;
    configure_threads(config.threads);
    Ok(config)
}

fn run_full(inputs: &InputArgs, testing: &TestingArgs, enrichment: &EnrichmentArgs) -> Result<()> {
    let config = prepare(inputs, Some(testing), Some(enrichment))?;
    let output = run_pipeline(&config)?;

    println!();
    println!("{}", output.results.summary());
    for table in &output.enrichment {
        println!(
            "  {:<12} {:<4} {:>5} DE genes, {:>5} sets tested, {:>4} significant (alpha {})",
            table.universe,
            table.subset,
            table.n_de,
            table.rows.len(),
            table.n_significant(),
            table.alpha
        );
    }
    Ok(())
}

fn run_normalize_only(inputs: &InputArgs) -> Result<()> {
    let config = prepare(inputs, None, None)?;
    let normalized = run_normalize(&config)?;
    info!(
        "Normalized {} genes x {} samples (spline df {}, {} genes in the fit)",
        normalized.set.n_genes(),
        normalized.set.n_samples(),
        normalized.cqn.spline_df,
        normalized.cqn.n_fit_genes
    );
    Ok(())
}

fn run_enrich(dge: &Path, inputs: &InputArgs, testing: &TestingArgs, enrichment: &EnrichmentArgs) -> Result<()> {
    let config = prepare(inputs, Some(testing), Some(enrichment))?;
    let tables = run_enrichment_from_table(&config, dge)?;
    for table in &tables {
        info!(
            "{} / {}: {} of {} sets significant",
            table.universe,
            table.subset,
            table.n_significant(),
            table.rows.len()
        );
    }
    Ok(())
}

fn run_diagnose(inputs: &InputArgs) -> Result<()> {
    let config = prepare(inputs, None, None)?;
    let rows = run_diagnostics(&config)?;
    for row in &rows {
        println!(
            "{:<4} PC{:<2} {:>6.2}%  cor(GC) {:>7.3}  cor(length) {:>7.3}",
            row.stage,
            row.component,
            100.0 * row.variance_explained,
            row.cor_gc,
            row.cor_length
        );
    }
    Ok(())
}
