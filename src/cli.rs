//! CLI interface for sidelearn

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::classify::KeywordClassifier;
use crate::config::Config;
use crate::gating::LearningGate;
use crate::pipeline::LearningPipeline;
use crate::store::{LearnedStore, SqliteLearnedStore};
use crate::types::{category, LearningEvent};

#[derive(Parser)]
#[command(name = "sidelearn")]
#[command(about = "Learns from coding-assistant session byproducts and stores them as scored knowledge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show learned-data statistics
    Stats,
    /// List recent records in a category
    Recent {
        /// Category to list
        category: String,
        /// Maximum records to return
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Record negative feedback for a learned entry
    Feedback {
        /// Entry id to downvote
        entry_id: i64,
    },
    /// Manually feed learning input through the pipeline
    Learn {
        #[command(subcommand)]
        command: LearnCommands,
    },
    /// Configure the pipeline
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Enable learning
        #[arg(long)]
        enable: bool,
        /// Disable learning
        #[arg(long)]
        disable: bool,
        /// Set the currently active provider
        #[arg(long)]
        set_active_provider: Option<String>,
    },
}

#[derive(Subcommand)]
enum LearnCommands {
    /// Learn a question/answer pair
    Qa {
        question: String,
        answer: String,
        /// Files consulted while answering
        #[arg(short, long)]
        file: Vec<String>,
        /// Provenance tag
        #[arg(short, long, default_value = "manual")]
        source: String,
    },
    /// Learn an applied fix
    Fix {
        old_code: String,
        new_code: String,
        /// Why the code changed
        #[arg(short, long)]
        reason: Option<String>,
        /// Keywords to attach to the record
        #[arg(short, long)]
        keyword: Vec<String>,
        /// Provenance tag
        #[arg(short, long, default_value = "manual")]
        source: String,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Stats => {
            let pipeline = build_pipeline(&config).await?;
            let stats = pipeline.get_stats().await?;

            println!("Learned data (sampled, top record per category):");
            for cat in category::ALL {
                if let Some(count) = stats.categories.get(*cat) {
                    println!("  {:<24} {}", cat, count);
                }
            }
            println!("Sampled score total: {:.1}", stats.total_score);
        }
        Commands::Recent { category, limit } => {
            let store = open_store(&config).await?;
            let records = store.get_by_category(&category, limit).await?;

            if records.is_empty() {
                println!("No records in category '{}'", category);
            }
            for record in records {
                println!(
                    "[{}] score {:.1}, used {}x, source {} ({})",
                    record.id,
                    record.score,
                    record.use_count,
                    record.source,
                    record.updated_at.format("%Y-%m-%d %H:%M UTC"),
                );
                let first_line = record.content.lines().next().unwrap_or("");
                println!("    {}", first_line);
            }
        }
        Commands::Feedback { entry_id } => {
            let pipeline = build_pipeline(&config).await?;
            let mut events = pipeline.subscribe();

            pipeline.record_negative_feedback(entry_id);

            match timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(LearningEvent::NegativeFeedback { entry_id })) => {
                    println!("Recorded negative feedback for entry {}", entry_id);
                }
                Ok(Ok(LearningEvent::Error { message })) => {
                    anyhow::bail!("Feedback failed: {}", message);
                }
                _ => anyhow::bail!("Feedback was gated off or timed out"),
            }
        }
        Commands::Learn { command } => {
            let pipeline = build_pipeline(&config).await?;
            let mut events = pipeline.subscribe();

            match command {
                LearnCommands::Qa {
                    question,
                    answer,
                    file,
                    source,
                } => {
                    let files = if file.is_empty() { None } else { Some(file) };
                    pipeline.learn_from_question_answer(question, answer, files, source);
                }
                LearnCommands::Fix {
                    old_code,
                    new_code,
                    reason,
                    keyword,
                    source,
                } => {
                    let keywords = if keyword.is_empty() { None } else { Some(keyword) };
                    pipeline.learn_from_fix(old_code, new_code, reason, source, None, keywords);
                }
            }

            pipeline.wait_idle().await;
            while let Ok(event) = events.try_recv() {
                match event {
                    LearningEvent::Learned {
                        category,
                        content_preview,
                        confidence,
                    } => {
                        println!(
                            "Learned [{}] (confidence {:.2}): {}",
                            category, confidence, content_preview
                        );
                    }
                    LearningEvent::Error { message } => {
                        eprintln!("Learning failed: {}", message);
                    }
                    LearningEvent::NegativeFeedback { .. } => {}
                }
            }
        }
        Commands::Config {
            show,
            enable,
            disable,
            set_active_provider,
        } => {
            let mut config = config;
            let mut changed = false;

            if enable {
                config.learning.enabled = true;
                changed = true;
            }
            if disable {
                config.learning.enabled = false;
                changed = true;
            }
            if let Some(provider) = set_active_provider {
                config.learning.active_provider = provider;
                changed = true;
            }
            if changed {
                config.save()?;
                println!("Configuration saved");
            }
            if show || !changed {
                println!("enabled          = {}", config.learning.enabled);
                println!("provider         = {}", config.learning.provider);
                println!("active_provider  = {}", config.learning.active_provider);
                println!(
                    "database_path    = {}",
                    config.storage.database_path.display()
                );
            }
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<SqliteLearnedStore>> {
    Ok(Arc::new(
        SqliteLearnedStore::new(&config.storage.database_path).await?,
    ))
}

async fn build_pipeline(config: &Config) -> Result<Arc<LearningPipeline>> {
    let store = open_store(config).await?;
    let gate = Arc::new(LearningGate::new(
        config.learning.enabled,
        config.learning.active_provider.clone(),
    ));

    Ok(LearningPipeline::new(
        store,
        Arc::new(KeywordClassifier::new()),
        gate,
        config.learning.provider.clone(),
    ))
}
