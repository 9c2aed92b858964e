//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the regnav binary.

use clap::{Args, Parser, Subcommand};

use crate::analysis::BackendKind;

/// Regnav - regulatory question answering
///
/// Positions regulations in a 4D coordinate space, consults a panel of
/// expert personas and walks each question through an auditable
/// Algorithm of Thought workflow.
#[derive(Parser, Debug)]
#[command(name = "regnav")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that builds the engine
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Path to configuration file
    #[arg(short, long, env = "REGNAV_CONFIG")]
    pub config: Option<String>,

    /// Regulatory corpus (JSON) to load instead of the configured one
    #[arg(long)]
    pub corpus: Option<String>,

    /// Emit JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a regulatory question
    Query {
        /// The question
        query: String,

        #[command(flatten)]
        engine: EngineArgs,

        /// Analysis backend override (mock, openai)
        #[arg(long)]
        backend: Option<BackendKind>,

        /// Reader expertise from 1 (beginner) to 5 (specialist)
        #[arg(short, long, default_value = "3")]
        expertise: u8,

        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Also assess this entity's compliance
        #[arg(long, requires = "entity_at")]
        entity: Option<String>,

        /// The entity's Nuremberg number, e.g. 3.2.15.2
        #[arg(long, requires = "entity")]
        entity_at: Option<String>,

        /// Entity attribute as KEY=VALUE (repeatable)
        #[arg(long = "attr", value_parser = parse_key_value)]
        attributes: Vec<(String, String)>,
    },

    /// Map item metadata to a coordinate and Nuremberg number
    Map {
        /// Regulatory domain (SAFETY, QUALITY, COMPLIANCE, OPERATIONS, GOVERNANCE)
        #[arg(long)]
        domain: Option<String>,

        /// Complexity (FOUNDATIONAL, INTERMEDIATE, ADVANCED, EXPERT)
        #[arg(long)]
        complexity: Option<String>,

        #[arg(long, default_value = "0")]
        section: u32,

        #[arg(long, default_value = "0")]
        subsection: u32,

        /// Required expertise (ENTRY, INTERMEDIATE, ADVANCED, EXPERT, SPECIALIST)
        #[arg(long)]
        expertise: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List regulations reachable from an item over crosswalks
    Related {
        /// Start item id
        id: String,

        /// Maximum number of hops
        #[arg(short, long)]
        depth: Option<usize>,

        /// Only follow this relationship type
        #[arg(short = 't', long = "type")]
        relationship: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Persona panel inspection
    Persona {
        #[command(subcommand)]
        subcommand: PersonaSubcommand,
    },
}

/// Persona subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PersonaSubcommand {
    /// List the configured personas
    List {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_defaults() {
        let cli = Cli::parse_from(["regnav", "query", "What applies to us?"]);
        match cli.command {
            Commands::Query {
                query,
                engine,
                backend,
                expertise,
                entity,
                attributes,
                ..
            } => {
                assert_eq!(query, "What applies to us?");
                assert!(engine.config.is_none());
                assert!(!engine.json);
                assert!(backend.is_none());
                assert_eq!(expertise, 3);
                assert!(entity.is_none());
                assert!(attributes.is_empty());
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_query_with_options() {
        let cli = Cli::parse_from([
            "regnav",
            "query",
            "capital rules",
            "--expertise",
            "5",
            "--backend",
            "mock",
            "--industry",
            "banking",
            "--json",
        ]);
        match cli.command {
            Commands::Query {
                engine,
                backend,
                expertise,
                industry,
                ..
            } => {
                assert_eq!(expertise, 5);
                assert_eq!(backend, Some(BackendKind::Mock));
                assert_eq!(industry.as_deref(), Some("banking"));
                assert!(engine.json);
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_query_entity_attributes() {
        let cli = Cli::parse_from([
            "regnav",
            "query",
            "q",
            "--entity",
            "acme",
            "--entity-at",
            "3.2.15.2",
            "--attr",
            "encryption=aes256",
            "--attr",
            "mfa = enabled",
        ]);
        match cli.command {
            Commands::Query {
                entity,
                entity_at,
                attributes,
                ..
            } => {
                assert_eq!(entity.as_deref(), Some("acme"));
                assert_eq!(entity_at.as_deref(), Some("3.2.15.2"));
                assert_eq!(
                    attributes,
                    vec![
                        ("encryption".to_string(), "aes256".to_string()),
                        ("mfa".to_string(), "enabled".to_string()),
                    ]
                );
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_entity_requires_coordinate() {
        assert!(Cli::try_parse_from(["regnav", "query", "q", "--entity", "acme"]).is_err());
        assert!(Cli::try_parse_from(["regnav", "query", "q", "--attr", "novalue"]).is_err());
    }

    #[test]
    fn test_map_command() {
        let cli = Cli::parse_from([
            "regnav",
            "map",
            "--domain",
            "SAFETY",
            "--section",
            "1",
            "--subsection",
            "5",
        ]);
        match cli.command {
            Commands::Map {
                domain,
                complexity,
                section,
                subsection,
                ..
            } => {
                assert_eq!(domain.as_deref(), Some("SAFETY"));
                assert!(complexity.is_none());
                assert_eq!((section, subsection), (1, 5));
            }
            _ => panic!("Expected Map command"),
        }
    }

    #[test]
    fn test_related_command() {
        let cli = Cli::parse_from(["regnav", "related", "reg-cyber-001", "-d", "2", "--type", "implements"]);
        match cli.command {
            Commands::Related { id, depth, relationship, .. } => {
                assert_eq!(id, "reg-cyber-001");
                assert_eq!(depth, Some(2));
                assert_eq!(relationship.as_deref(), Some("implements"));
            }
            _ => panic!("Expected Related command"),
        }
    }

    #[test]
    fn test_persona_list() {
        let cli = Cli::parse_from(["regnav", "persona", "list"]);
        match cli.command {
            Commands::Persona { subcommand: PersonaSubcommand::List { .. } } => {}
            _ => panic!("Expected Persona List command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["regnav", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["regnav", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["regnav", "config", "show"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Show { config } } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["regnav", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
