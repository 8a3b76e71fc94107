//! Command line interface of the `cqi9` binary

use clap::{Parser, Subcommand};
use cqi9_common::errors::{AppError, Result};
use cqi9_common::knowledge::{load_dir, write_dataset, KnowledgeStats, KnowledgeStore};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "cqi9", version, about = "CQI-9 heat treat compliance portal")]
pub struct Cli {
    /// Configuration file (defaults to config/default, config/{APP_ENV}, config/local)
    #[arg(long, short, global = true, env = "CQI9_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Server {
        /// Bind address, overrides server.host
        #[arg(long)]
        host: Option<String>,

        /// Port, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Extract text and form fields from a document and print them as JSON
    Process {
        /// PDF or image file
        file: PathBuf,
    },
    /// Analyze a document against the relevant CQI-9 requirements
    Analyze {
        /// PDF or image file
        file: PathBuf,
    },
    /// Validate a knowledge dataset and install it into knowledge.data_dir
    InitKg {
        /// Directory holding knowledge.json or the CSV sources
        #[arg(long)]
        data_dir: PathBuf,
    },
}

/// Validate the knowledge sources in `source` and write the consolidated
/// dataset into `target`
pub fn install_knowledge(source: &Path, target: &Path) -> Result<(PathBuf, KnowledgeStats)> {
    let raw = load_dir(source)?.ok_or_else(|| AppError::Configuration {
        message: format!("No knowledge files found in {}", source.display()),
    })?;

    let store = KnowledgeStore::from_dataset(raw.into_dataset());
    let stats = store.stats();
    if stats.requirements == 0 {
        return Err(AppError::Configuration {
            message: format!("Knowledge sources in {} define no requirements", source.display()),
        });
    }

    let path = write_dataset(target, &store.dataset())?;
    tracing::info!(
        path = %path.display(),
        sections = stats.sections,
        requirements = stats.requirements,
        relationships = stats.relationships,
        "Knowledge dataset installed"
    );
    Ok((path, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["cqi9", "--config", "cfg.toml", "server", "--port", "8080"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        assert!(matches!(cli.command, Commands::Server { port: Some(8080), host: None }));

        let cli = Cli::try_parse_from(["cqi9", "init-kg", "--data-dir", "kg"]).unwrap();
        assert!(matches!(cli.command, Commands::InitKg { ref data_dir } if data_dir == &PathBuf::from("kg")));

        assert!(Cli::try_parse_from(["cqi9", "analyze"]).is_err());
    }

    #[test]
    fn test_install_knowledge_from_csv() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(
            source.path().join("sections.csv"),
            "number,title,description\n1,Management Responsibility,\n",
        )
        .unwrap();
        std::fs::write(
            source.path().join("requirements.csv"),
            "id,section,text,category,criticality\n1.1,1,Is there a dedicated heat treat person?,mandatory,high\n",
        )
        .unwrap();

        let (path, stats) = install_knowledge(source.path(), target.path()).unwrap();
        assert_eq!(stats.requirements, 1);
        assert_eq!(stats.sections, 1);

        let config = cqi9_common::config::KnowledgeConfig { data_dir: target.path().to_path_buf() };
        let store = KnowledgeStore::load(&config).unwrap();
        assert!(path.is_file());
        assert_eq!(store.requirement("1.1").map(|r| r.section.as_str()), Some("1"));
    }

    #[test]
    fn test_install_knowledge_rejects_empty_dir() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        assert!(matches!(
            install_knowledge(source.path(), target.path()),
            Err(AppError::Configuration { .. })
        ));
    }
}
