//! Regnav - regulatory question answering
//!
//! Entry point for the regnav binary. Short-lived commands (version,
//! config) skip the engine; everything else loads configuration, sets up
//! logging and builds only the components the command needs.

use clap::Parser;
use tracing::{error, info};

use regnav::app::{Corpus, Regnav};
use regnav::cli::{Cli, Commands, ConfigSubcommand, EngineArgs, PersonaSubcommand};
use regnav::compliance::Entity;
use regnav::config::{self, RegnavConfig};
use regnav::error::{Error, Result};
use regnav::logging;
use regnav::persona::PersonaRegistry;
use regnav::space::{ItemMetadata, NurembergNumber};
use regnav::workflow::{QueryRequest, QueryResponse, UserContext};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            if let Err(e) = handle_config_command(subcommand.clone()) {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            return Ok(());
        }
        _ => {}
    }

    let Some(engine_args) = engine_args(&cli.command) else {
        return Err(Error::Internal("command has no engine options".to_string()));
    };

    let mut config = match RegnavConfig::load(engine_args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };
    if let Some(ref corpus) = engine_args.corpus {
        config.storage.corpus_path = Some(shellexpand::tilde(corpus).to_string());
    }

    // The guards must outlive every command so buffered file lines flush
    let log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting regnav");

    let json = engine_args.json;
    let result = match cli.command {
        Commands::Query {
            query,
            backend,
            expertise,
            role,
            industry,
            region,
            entity,
            entity_at,
            attributes,
            ..
        } => build_request(query, expertise, role, industry, region, entity, entity_at, attributes)
            .and_then(|request| run_query(config, backend, request, json)),
        Commands::Map {
            domain,
            complexity,
            section,
            subsection,
            expertise,
            ..
        } => run_map(
            &config,
            ItemMetadata {
                domain,
                complexity,
                section,
                subsection,
                expertise,
            },
            json,
        ),
        Commands::Related {
            id,
            depth,
            relationship,
            ..
        } => run_related(&config, &id, depth, relationship.as_deref(), json),
        Commands::Persona {
            subcommand: PersonaSubcommand::List { .. },
        } => list_personas(&config, json),
        Commands::Version | Commands::Config { .. } => {
            // Already handled above
            unreachable!();
        }
    };

    if let Err(e) = result {
        error!(error = %e.format_for_log(), "Command failed");
        drop(log_guards);
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

fn engine_args(command: &Commands) -> Option<&EngineArgs> {
    match command {
        Commands::Query { engine, .. }
        | Commands::Map { engine, .. }
        | Commands::Related { engine, .. }
        | Commands::Persona {
            subcommand: PersonaSubcommand::List { engine },
        } => Some(engine),
        Commands::Version | Commands::Config { .. } => None,
    }
}

fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    println!();
    println!("Target:");
    println!("  OS:   {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    query: String,
    expertise: u8,
    role: Option<String>,
    industry: Option<String>,
    region: Option<String>,
    entity: Option<String>,
    entity_at: Option<String>,
    attributes: Vec<(String, String)>,
) -> Result<QueryRequest> {
    let mut request = QueryRequest::new(query);
    request.user_context = UserContext {
        expertise_level: expertise,
        role,
        industry,
        region,
        ..UserContext::default()
    };

    if let (Some(id), Some(at)) = (entity, entity_at) {
        let position: NurembergNumber = at.parse()?;
        let entity = attributes
            .into_iter()
            .fold(Entity::new(id, position.coordinate()), |e, (k, v)| e.with_attribute(k, v));
        request = request.with_entity(entity);
    }

    Ok(request)
}

/// Answer one question on a multi-threaded runtime
fn run_query(
    config: RegnavConfig,
    backend: Option<regnav::analysis::BackendKind>,
    request: QueryRequest,
    json: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(config.worker_threads())
        .thread_name("regnav-worker")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let app = match backend {
        Some(kind) => Regnav::with_backend_kind(config, kind)?,
        None => Regnav::from_config(config)?,
    };

    let response = runtime.block_on(app.query(request))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.response_text);
    println!();
    println!("Confidence: {:.2}", response.confidence_score);

    if !response.persona_contributions.is_empty() {
        let weights: Vec<String> = response
            .persona_contributions
            .iter()
            .map(|(id, w)| format!("{} {:.2}", id, w))
            .collect();
        println!("Personas:   {}", weights.join(", "));
    }

    if let Some(ref verification) = response.verification {
        println!(
            "Verified:   {} ({})",
            if verification.verified { "yes" } else { "no" },
            verification.recommendation
        );
    }

    if let Some(ref report) = response.compliance {
        println!("Compliance: {:?} for {}", report.decision, report.entity_id);
        for (id, finding) in &report.findings {
            if !finding.compliant {
                println!("  - {} unmet: {}", id, finding.unmet.join(", "));
            }
        }
    }

    let trail: Vec<&str> = response.state_history.iter().map(|r| r.state.name()).collect();
    println!("Path:       {}", trail.join(" -> "));
}

fn run_map(config: &RegnavConfig, metadata: ItemMetadata, json: bool) -> Result<()> {
    let mapper = regnav::space::CoordinateMapper::new(config.coordinates.clone())?;
    let coordinate = mapper.map(&metadata)?;
    let nuremberg = coordinate.nuremberg();

    if json {
        let out = serde_json::json!({
            "metadata": metadata,
            "coordinate": coordinate,
            "nuremberg": nuremberg,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Coordinate: {}", coordinate);
        println!("Nuremberg:  {}", nuremberg);
    }
    Ok(())
}

fn run_related(
    config: &RegnavConfig,
    id: &str,
    depth: Option<usize>,
    relationship: Option<&str>,
    json: bool,
) -> Result<()> {
    let corpus = Corpus::load(config)?;
    let depth = depth.unwrap_or(config.engine.traversal_depth);
    let related = corpus
        .space
        .related_items(id, relationship, depth)
        .ok_or_else(|| Error::ItemNotFound { id: id.to_string() })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&related)?);
        return Ok(());
    }

    if related.is_empty() {
        println!("No regulations reachable from {} within {} hops.", id, depth);
        return Ok(());
    }
    for item in &related {
        let tag = corpus
            .store
            .get(&item.id)
            .map(|i| i.tag.clone())
            .unwrap_or_default();
        println!(
            "{:indent$}{} [{}] via {} ({} hop{}) {}",
            "",
            item.id,
            item.relationship_type,
            item.via,
            item.depth,
            if item.depth == 1 { "" } else { "s" },
            tag,
            indent = (item.depth - 1) * 2
        );
    }
    Ok(())
}

fn list_personas(config: &RegnavConfig, json: bool) -> Result<()> {
    let registry = PersonaRegistry::new(config.personas.clone())?;

    if json {
        let profiles: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    println!("{:<12} {:<20} {:>7} {:>9}  EXPERTISE", "ID", "NAME", "WEIGHT", "THRESHOLD");
    for profile in registry.iter() {
        println!(
            "{:<12} {:<20} {:>7.2} {:>9.2}  {}",
            profile.id,
            profile.name,
            profile.consensus_weight,
            profile.confidence_threshold,
            profile.expertise.join(", ")
        );
    }
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = RegnavConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Wrote default configuration to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match RegnavConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
