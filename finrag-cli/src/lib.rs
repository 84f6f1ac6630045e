//! Command-line front end: `finrag index` builds the local index from a
//! directory of PDFs, `finrag serve` answers questions over HTTP.

pub mod settings;
pub mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use finrag_rag::IndexOutcome;
use finrag_server::{AppState, ServerConfig, run_server};
use tracing::info;

pub use settings::{BackendKind, ProviderKind, Settings};
pub use wiring::build_orchestrator;

#[derive(Parser, Debug)]
#[command(name = "finrag")]
#[command(about = "Question answering over financial PDF reports", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load documents, embed their chunks and persist the index
    Index {
        /// Directory of PDF (and .txt/.md) files; defaults to DATA_DIR
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
    /// Serve POST /query and GET /health
    Serve {
        /// Listen address; defaults to HOST
        #[arg(long)]
        host: Option<String>,
        /// Listen port; defaults to PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Human-readable summary of an indexing run.
pub fn summarize(outcome: &IndexOutcome) -> String {
    let mut lines = Vec::new();
    let report = match outcome {
        IndexOutcome::Empty { report } => {
            lines.push(format!(
                "No documents were loaded ({} candidate files); the existing index was left untouched.",
                report.files_seen
            ));
            report
        }
        IndexOutcome::Built { report, chunk_count, location } => {
            lines.push(format!(
                "Indexed {} documents from {} files into {} chunks at {}",
                report.documents.len(),
                report.files_seen.saturating_sub(report.skipped.len()),
                chunk_count,
                location.display()
            ));
            report
        }
    };
    for (path, reason) in &report.skipped {
        lines.push(format!("  skipped {}: {reason}", path.display()));
    }
    lines.join("\n")
}

/// Run one command to completion.
pub async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let orchestrator =
        Arc::new(build_orchestrator(&settings).context("failed to configure the pipeline")?);

    match cli.command {
        Command::Index { source } => {
            let source = source.unwrap_or_else(|| settings.data_dir.clone());
            info!(source = %source.display(), "indexing");
            let outcome = orchestrator
                .index(&source)
                .await
                .with_context(|| format!("indexing {} failed", source.display()))?;
            println!("{}", summarize(&outcome));
            Ok(())
        }
        Command::Serve { host, port } => {
            let config = ServerConfig {
                host: host.unwrap_or(settings.host),
                port: port.unwrap_or(settings.port),
                ..ServerConfig::default()
            };
            run_server(AppState::new(orchestrator), config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use finrag_rag::{Document, IngestReport};

    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["finrag", "index", "--source", "reports"]).unwrap();
        assert_eq!(cli.command, Command::Index { source: Some(PathBuf::from("reports")) });

        let cli = Cli::try_parse_from(["finrag", "serve", "-p", "9000"]).unwrap();
        assert_eq!(cli.command, Command::Serve { host: None, port: Some(9000) });

        assert!(Cli::try_parse_from(["finrag"]).is_err());
    }

    #[test]
    fn summary_lists_skipped_files() {
        let report = IngestReport {
            documents: vec![Document {
                id: "a.pdf#p1".to_string(),
                text: "text".to_string(),
                metadata: Default::default(),
            }],
            files_seen: 2,
            skipped: vec![(PathBuf::from("broken.pdf"), "encrypted".to_string())],
        };
        let text = summarize(&IndexOutcome::Built {
            report,
            chunk_count: 3,
            location: Path::new("index").to_path_buf(),
        });
        assert!(text.starts_with("Indexed 1 documents from 1 files into 3 chunks"));
        assert!(text.contains("skipped broken.pdf: encrypted"));
    }

    fn offline_settings(index_dir: &Path) -> Settings {
        let index_dir = index_dir.display().to_string();
        Settings::from_lookup(move |key| match key {
            "FINRAG_PROVIDER" => Some("openai".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "INDEX_DIR" => Some(index_dir.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn indexing_an_empty_directory_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("reports");
        std::fs::create_dir(&source).unwrap();
        let index_dir = dir.path().join("index");

        let cli = Cli { command: Command::Index { source: Some(source) } };
        run(cli, offline_settings(&index_dir)).await.unwrap();
        assert!(!index_dir.exists());
    }

    #[tokio::test]
    async fn indexing_a_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli { command: Command::Index { source: Some(dir.path().join("absent")) } };

        let err = run(cli, offline_settings(&dir.path().join("index"))).await.unwrap_err();
        assert!(format!("{err:#}").contains("absent"));
    }

    #[test]
    fn empty_summary_says_nothing_changed() {
        let text = summarize(&IndexOutcome::Empty { report: IngestReport::default() });
        assert!(text.contains("left untouched"));
    }
}
