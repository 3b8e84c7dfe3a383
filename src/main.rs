// src/main.rs
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use dedupe_lib::models::{CandidatePair, FieldDefinition, FieldSet, Label, TrainingSet};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::get_memory_usage;
use dedupe_lib::utils::input::load_records_from_path;
use dedupe_lib::utils::progress_config::ProgressConfig;
use dedupe_lib::{DedupeConfig, DedupeError, DedupeSession};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct DedupeArgs {
    /// JSON file with the records to deduplicate
    #[arg(long)]
    input: PathBuf,

    /// Comparison fields, e.g. `name,city:exact,notes:text` (default: every column)
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,

    /// Minimum labeled pairs before training is allowed
    #[arg(long)]
    min_labels: Option<usize>,

    /// Match probability at or above which two records are linked
    #[arg(long)]
    threshold: Option<f64>,

    /// JSON file of previously collected labels: {"match": [...], "distinct": [...]}
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Write the final clusters here as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

enum Command {
    Match,
    Distinct,
    Skip,
    Finish,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(Command::Match),
        "n" | "no" => Some(Command::Distinct),
        "s" | "skip" => Some(Command::Skip),
        "f" | "finish" => Some(Command::Finish),
        "q" | "quit" => Some(Command::Quit),
        _ => None,
    }
}

fn parse_field(spec: &str) -> Result<FieldDefinition> {
    let (name, kind) = match spec.split_once(':') {
        Some((name, kind)) => (name.trim(), kind.trim()),
        None => (spec.trim(), "string"),
    };
    if name.is_empty() {
        bail!("Empty field name in '{}'", spec);
    }
    match kind {
        "string" => Ok(FieldDefinition::string(name)),
        "exact" => Ok(FieldDefinition::exact(name)),
        "text" => Ok(FieldDefinition::text(name)),
        other => bail!("Unknown field kind '{}' for field '{}'", other, name),
    }
}

/// Message shown for a session error that does not end the labeling loop.
fn describe_error(e: &DedupeError) -> String {
    match e {
        DedupeError::InsufficientTrainingData { .. } => format!("{} Keep labeling.", e),
        _ => e.to_string(),
    }
}

fn print_pair(session: &DedupeSession, pair: &CandidatePair) {
    let stats = session.stats();
    println!();
    println!(
        "--- {} match / {} distinct labeled, {} pairs remaining ---",
        stats.labeled_match, stats.labeled_distinct, stats.pairs_remaining
    );
    for field in session.fields().fields() {
        let left = session
            .records()
            .get(pair.first())
            .and_then(|r| r.get(&field.name))
            .unwrap_or("");
        let right = session
            .records()
            .get(pair.second())
            .and_then(|r| r.get(&field.name))
            .unwrap_or("");
        println!("{:>16}: {:<32} | {}", field.name, left, right);
    }
    print!("Same entity? (y)es / (n)o / (s)kip / (f)inish / (q)uit: ");
    let _ = io::stdout().flush();
}

fn print_clusters(session: &DedupeSession) {
    println!();
    println!("=== {} clusters ===", session.clusters().len());
    for (i, (cluster, records)) in session
        .clusters()
        .iter()
        .zip(session.render_clusters())
        .enumerate()
    {
        println!(
            "Cluster {} ({} records, coherence {:.3})",
            i, cluster.len(), cluster.coherence.overall_score
        );
        for (record, score) in records.iter().zip(&cluster.scores) {
            let values: Vec<&str> = record.fields().values().map(String::as_str).collect();
            println!("  [{}] {:.3}  {}", record.id(), score, values.join(" | "));
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let args = DedupeArgs::parse();
    let start = Instant::now();

    let progress_config = ProgressConfig::from_env();
    let mut config = DedupeConfig::from_env();
    if let Some(min_labels) = args.min_labels {
        config.classifier.min_labeled_pairs = min_labels;
    }
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            bail!("--threshold must be between 0 and 1, got {}", threshold);
        }
        config.cluster.match_threshold = threshold;
    }
    config.log_config();

    let records = load_records_from_path(&args.input)
        .with_context(|| format!("Failed to load records from {}", args.input.display()))?;
    info!("Loaded {} records with columns {:?}", records.len(), records.columns());

    let mut session = match &args.fields {
        Some(specs) => {
            let fields = specs
                .iter()
                .map(|s| parse_field(s))
                .collect::<Result<Vec<_>>>()?;
            DedupeSession::with_fields(records, FieldSet::new(fields), config)
        }
        None => DedupeSession::new(records, config),
    }
    .context("Failed to start deduplication session")?;
    session.set_multi_progress(progress_config.create_multi_progress());

    if let Some(path) = &args.labels {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read labels from {}", path.display()))?;
        let labels: TrainingSet = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse labels in {}", path.display()))?;
        let added = session.mark_pairs(&labels).context("Failed to apply saved labels")?;
        info!("Applied {} saved labels", added);
    }

    session.prepare().context("Failed to prepare candidate pairs")?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut finished = false;
    loop {
        let current = match session.next_pair() {
            Ok(current) => current,
            Err(e) => {
                println!("{}", describe_error(&e));
                break;
            }
        };
        match &current {
            Some(pair) => print_pair(&session, pair),
            None => {
                println!();
                print!("No more pairs to label. (f)inish / (q)uit: ");
                let _ = io::stdout().flush();
            }
        }

        let Some(line) = lines.next() else { break };
        let line = line.context("Failed to read from stdin")?;
        let Some(command) = parse_command(&line) else {
            println!("Unrecognized input '{}'", line.trim());
            continue;
        };

        let outcome = match (command, current) {
            (Command::Match, Some(pair)) => session.label(pair, Label::Match),
            (Command::Distinct, Some(pair)) => session.label(pair, Label::Distinct),
            (Command::Skip, Some(pair)) => session.skip(pair),
            (Command::Finish, _) => match session.train().map(|model| model.version) {
                Ok(version) => {
                    info!("Partitioning with classifier v{}", version);
                    match session.partition().map(|_| ()) {
                        Ok(()) => {
                            finished = true;
                            break;
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            },
            (Command::Quit, _) => break,
            (_, None) => Ok(()),
        };

        if let Err(e) = outcome {
            println!("{}", describe_error(&e));
        }
    }

    if finished {
        print_clusters(&session);
        if let Some(path) = &args.output {
            let json = serde_json::to_string_pretty(session.clusters())
                .context("Failed to serialize clusters")?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write clusters to {}", path.display()))?;
            info!("Wrote clusters to {}", path.display());
        }
    } else {
        warn!("Session ended without partitioning");
    }

    let stats = session.stats();
    info!("=== Session Summary ===");
    info!("Session ID: {}", session.session_id());
    info!("Started at: {}", session.created_at().to_rfc3339());
    info!(
        "Labels: {} match, {} distinct (model v{})",
        stats.labeled_match, stats.labeled_distinct, stats.model_version
    );
    info!("Clusters: {}", session.clusters().len());
    if progress_config.should_show_cache_stats() {
        let (hits, misses) = session.feature_cache().get_stats();
        let (entries, capacity) = session.feature_cache().get_cache_info();
        info!(
            "Feature cache: {} hits, {} misses, {}/{} entries",
            hits, misses, entries, capacity
        );
    }
    if progress_config.should_show_memory() {
        info!("Final memory usage: {} MB", get_memory_usage());
    }
    info!("Total session time: {:.2?}", start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupe_lib::models::FieldKind;

    #[test]
    fn test_session_errors_become_messages() {
        let interrupted = DedupeError::Interrupted("Scoring".to_string());
        assert_eq!(describe_error(&interrupted), interrupted.to_string());

        let processing = DedupeError::Processing("Pair (0, 1) is already labeled".to_string());
        assert_eq!(describe_error(&processing), processing.to_string());
    }

    #[test]
    fn test_too_few_labels_asks_for_more() {
        let e = DedupeError::InsufficientTrainingData {
            matches: 1,
            distinct: 0,
            minimum: 2,
        };
        let message = describe_error(&e);
        assert!(message.starts_with(&e.to_string()));
        assert!(message.ends_with("Keep labeling."));
    }

    #[test]
    fn test_parse_command_and_field() {
        assert!(matches!(parse_command(" Y "), Some(Command::Match)));
        assert!(matches!(parse_command("finish"), Some(Command::Finish)));
        assert!(parse_command("maybe").is_none());

        assert_eq!(parse_field("city:exact").unwrap().kind, FieldKind::Exact);
        assert_eq!(parse_field("name").unwrap().kind, FieldKind::String);
        assert!(parse_field("notes:fuzzy").is_err());
        assert!(parse_field(":text").is_err());
    }
}
