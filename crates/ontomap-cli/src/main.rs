//! Ontomap CLI
//!
//! Unified command-line interface for:
//! - Running mapping batches over field inventories (`map`)
//! - Ingesting SQL DDL into field inventories (`ingest sql`)
//! - Validating and inspecting ontology documents (`ontology ...`)
//! - Managing the retrieval lesson set (`lessons ...`)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ontomap_engine::{
    BatchConfig, FieldDescriptor, Mapping, MappingOrchestrator, RunStats, UNMAPPED_CONCEPT_ID,
};
use ontomap_ontology::OntologyRegistry;
use ontomap_refine::retrieval::{load_lessons, save_lessons, LessonIndex, MappingLesson};
use ontomap_storage::JsonFileStore;

#[derive(Parser)]
#[command(name = "ontomap")]
#[command(
    author,
    version,
    about = "Ontomap: field-to-concept semantic mapping engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a field inventory onto the business ontology.
    Map {
        /// Field inventory JSON (array of field descriptors, or `{"fields": [...]}`).
        #[arg(long)]
        fields: PathBuf,
        /// Source system id recorded on the resulting mappings.
        #[arg(long)]
        source: String,
        /// Ontology JSON document; the builtin starter ontology when omitted.
        #[arg(long)]
        ontology: Option<PathBuf>,
        /// Enable retrieval refinement from a lesson file.
        #[arg(long)]
        lessons: Option<PathBuf>,
        /// Enable LLM validation of low-confidence mappings (enhanced mode).
        #[arg(long)]
        validate: bool,
        /// Confidence below which fields go to validation.
        #[arg(long, default_value_t = 0.80)]
        threshold: f64,
        /// Write mappings JSON here in addition to the report.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Persist mappings through a JSON file store.
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Ingest sources into field inventories.
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },

    /// Ontology document commands.
    Ontology {
        #[command(subcommand)]
        command: OntologyCommands,
    },

    /// Retrieval lesson set commands.
    Lessons {
        #[command(subcommand)]
        command: LessonCommands,
    },
}

#[derive(Subcommand)]
enum IngestCommands {
    /// Ingest SQL DDL (file or directory of `.sql` files) into a field inventory.
    Sql {
        /// Input `.sql` file or directory.
        input: PathBuf,
        /// Source system id stamped on every descriptor.
        #[arg(long)]
        source: String,
        /// Output inventory JSON.
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum OntologyCommands {
    /// Validate an ontology JSON document.
    Validate {
        /// Ontology JSON file.
        input: PathBuf,
    },
    /// Show the active ontology (builtin when no file is given).
    Show {
        /// Ontology JSON file.
        input: Option<PathBuf>,
        /// Emit the JSON document instead of the table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum LessonCommands {
    /// Add a confirmed mapping lesson to a lesson file.
    Add {
        /// Lesson file (created when missing).
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        field: String,
        #[arg(long, default_value = "")]
        table: String,
        #[arg(long)]
        concept: String,
    },
    /// List the lessons in a lesson file.
    List {
        #[arg(long)]
        index: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Map {
            fields,
            source,
            ontology,
            lessons,
            validate,
            threshold,
            out,
            store,
        } => {
            run_map(
                &fields, &source, ontology, lessons, validate, threshold, out, store,
            )
            .await
        }
        Commands::Ingest { command } => match command {
            IngestCommands::Sql { input, source, out } => run_ingest_sql(&input, &source, &out),
        },
        Commands::Ontology { command } => match command {
            OntologyCommands::Validate { input } => run_ontology_validate(&input),
            OntologyCommands::Show { input, json } => run_ontology_show(input.as_deref(), json),
        },
        Commands::Lessons { command } => match command {
            LessonCommands::Add {
                index,
                field,
                table,
                concept,
            } => run_lessons_add(&index, &field, &table, &concept),
            LessonCommands::List { index } => run_lessons_list(&index),
        },
    }
}

// ============================================================================
// map
// ============================================================================

/// Field inventory file: either a bare array or `{"fields": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    Wrapped { fields: Vec<FieldDescriptor> },
    Bare(Vec<FieldDescriptor>),
}

fn load_inventory(path: &Path) -> Result<Vec<FieldDescriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read inventory {}", path.display()))?;
    let document: InventoryDocument =
        serde_json::from_str(&text).context("failed to parse field inventory")?;
    Ok(match document {
        InventoryDocument::Wrapped { fields } => fields,
        InventoryDocument::Bare(fields) => fields,
    })
}

fn load_registry(ontology: Option<&Path>) -> Result<Arc<OntologyRegistry>> {
    let registry = match ontology {
        Some(path) => OntologyRegistry::from_file(path)
            .with_context(|| format!("invalid ontology {}", path.display()))?,
        None => OntologyRegistry::builtin(),
    };
    Ok(Arc::new(registry))
}

#[allow(clippy::too_many_arguments)]
async fn run_map(
    fields_path: &Path,
    source: &str,
    ontology: Option<PathBuf>,
    lessons: Option<PathBuf>,
    validate: bool,
    threshold: f64,
    out: Option<PathBuf>,
    store: Option<PathBuf>,
) -> Result<()> {
    let registry = load_registry(ontology.as_deref())?;
    let fields = load_inventory(fields_path)?;
    if fields.is_empty() {
        return Err(anyhow!("field inventory is empty"));
    }

    let mut config = BatchConfig {
        validation_confidence_threshold: threshold,
        ..BatchConfig::default()
    };
    let mut orchestrator = MappingOrchestrator::new(registry.clone());

    if let Some(lessons_path) = &lessons {
        let lesson_set = load_lessons(lessons_path)?;
        println!(
            "{} {} lessons from {}",
            "loaded".green(),
            lesson_set.len(),
            lessons_path.display()
        );
        orchestrator = orchestrator.with_retrieval(Arc::new(LessonIndex::from_lessons(lesson_set)));
        config.enable_retrieval = true;
    }

    if validate {
        orchestrator = attach_validation(orchestrator, &registry)?;
        config.enable_validation = true;
    }

    if let Some(store_path) = &store {
        orchestrator = orchestrator.with_store(Arc::new(JsonFileStore::open(store_path)?));
    }

    let (mappings, stats) = orchestrator
        .run_mapping_batch(source, fields, &config)
        .await?;

    print_report(&mappings, &stats);

    if let Some(out_path) = out {
        let json = serde_json::to_string_pretty(&mappings)?;
        std::fs::write(&out_path, json)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        println!(
            "{} {} mappings to {}",
            "wrote".green(),
            mappings.len(),
            out_path.display()
        );
    }
    Ok(())
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic", feature = "llm-local"))]
fn attach_validation(
    orchestrator: MappingOrchestrator,
    registry: &Arc<OntologyRegistry>,
) -> Result<MappingOrchestrator> {
    use ontomap_refine::llm::providers::UnifiedClient;
    use ontomap_refine::LlmValidationRefiner;

    let client = UnifiedClient::from_env().map_err(|e| {
        anyhow!("--validate needs an LLM provider (OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL): {e}")
    })?;
    let refiner = LlmValidationRefiner::new(Arc::new(client), registry.clone());
    Ok(orchestrator.with_validation(Arc::new(refiner)))
}

#[cfg(not(any(feature = "llm-openai", feature = "llm-anthropic", feature = "llm-local")))]
fn attach_validation(
    _orchestrator: MappingOrchestrator,
    _registry: &Arc<OntologyRegistry>,
) -> Result<MappingOrchestrator> {
    Err(anyhow!(
        "this binary was built without LLM support; rebuild with the llm-* features"
    ))
}

fn confidence_bar(value: f64) -> String {
    let filled = (value * 10.0).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled.min(10)))
}

fn print_report(mappings: &[Mapping], stats: &RunStats) {
    println!();
    println!("{}", "field mappings".bold());
    for mapping in mappings {
        let concept = if mapping.concept_id == UNMAPPED_CONCEPT_ID {
            mapping.concept_id.dimmed().to_string()
        } else {
            mapping.concept_id.cyan().to_string()
        };
        println!(
            "  {:40} -> {:24} {} {:.2} ({})",
            mapping.key.to_string(),
            concept,
            confidence_bar(mapping.confidence.value()),
            mapping.confidence.value(),
            mapping.method
        );
    }

    println!();
    println!(
        "{} {} fields | heuristic {} | retrieval {} | validated {} | unmapped {} | avg confidence {:.2} | {}ms",
        "run:".bold(),
        stats.fields_total,
        stats.heuristic_count,
        stats.retrieval_count,
        stats.validated_count,
        stats.unmapped_count,
        stats.average_confidence,
        stats.elapsed_ms
    );

    if stats.retrieval_fallback {
        println!(
            "{} retrieval degraded ({} lookups failed), results are heuristic-only",
            "warning:".yellow().bold(),
            stats.retrieval_failures
        );
    }
    if stats.validation_fallback {
        println!(
            "{} validation degraded, low-confidence mappings were not reviewed",
            "warning:".yellow().bold()
        );
    }
    if stats.store_write_failures > 0 {
        println!(
            "{} {} store writes failed, mappings kept in-memory only",
            "warning:".yellow().bold(),
            stats.store_write_failures
        );
    }
    if stats.cancelled {
        println!("{} run was cancelled, results are partial", "warning:".yellow().bold());
    }
}

// ============================================================================
// ingest sql
// ============================================================================

fn run_ingest_sql(input: &Path, source: &str, out: &Path) -> Result<()> {
    let mut sql_files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in walkdir::WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "sql") {
                sql_files.push(path.to_path_buf());
            }
        }
        if sql_files.is_empty() {
            return Err(anyhow!("no .sql files under {}", input.display()));
        }
    } else {
        sql_files.push(input.to_path_buf());
    }

    let mut inventory = Vec::new();
    for path in &sql_files {
        let sql = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut fields = ontomap_ingest_sql::parse_sql_inventory(source, &sql)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        println!(
            "  {} {:4} fields from {}",
            "parsed".green(),
            fields.len(),
            path.display()
        );
        inventory.append(&mut fields);
    }

    let json = serde_json::to_string_pretty(&inventory)?;
    std::fs::write(out, json).with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "{} {} fields to {}",
        "wrote".green(),
        inventory.len(),
        out.display()
    );
    Ok(())
}

// ============================================================================
// ontology
// ============================================================================

fn run_ontology_validate(input: &Path) -> Result<()> {
    match OntologyRegistry::from_file(input) {
        Ok(registry) => {
            println!(
                "{} {} concepts, fingerprint {}",
                "valid:".green().bold(),
                registry.len(),
                registry.fingerprint()
            );
            Ok(())
        }
        Err(err) => {
            println!("{} {}", "invalid:".red().bold(), err);
            Err(err.into())
        }
    }
}

fn run_ontology_show(input: Option<&Path>, json: bool) -> Result<()> {
    let registry = load_registry(input)?;

    if json {
        println!("{}", registry.to_json()?);
        return Ok(());
    }

    println!("{} ({} concepts)", "ontology".bold(), registry.len());
    for concept in registry.concepts() {
        let hints: Vec<&str> = concept.hints.iter().map(|h| h.pattern.as_str()).collect();
        println!(
            "  {:18} {:20} [{}] hints: {}",
            concept.id.cyan(),
            concept.label,
            concept.cluster.dimmed(),
            hints.join(", ")
        );
        if !concept.negative.is_empty() {
            let vetoes: Vec<&str> = concept.negative.iter().map(|n| n.pattern.as_str()).collect();
            println!("  {:18} {}", "", format!("vetoes: {}", vetoes.join(", ")).dimmed());
        }
    }
    Ok(())
}

// ============================================================================
// lessons
// ============================================================================

fn run_lessons_add(index: &Path, field: &str, table: &str, concept: &str) -> Result<()> {
    let mut lessons = if index.exists() {
        load_lessons(index)?
    } else {
        Vec::new()
    };
    lessons.push(MappingLesson::new(field, table, concept));
    save_lessons(index, &lessons)?;
    println!(
        "{} lesson {} -> {} ({} total)",
        "added".green(),
        field,
        concept,
        lessons.len()
    );
    Ok(())
}

fn run_lessons_list(index: &Path) -> Result<()> {
    let lessons = load_lessons(index)?;
    println!("{} ({} lessons)", "lesson set".bold(), lessons.len());
    for lesson in &lessons {
        let context = if lesson.table_name.is_empty() {
            String::new()
        } else {
            format!(" [{}]", lesson.table_name)
        };
        println!(
            "  {:32}{} -> {}",
            lesson.field_name,
            context.dimmed(),
            lesson.concept_id.cyan()
        );
    }
    Ok(())
}
