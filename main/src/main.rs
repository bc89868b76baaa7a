use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use common::{
    error::AppError,
    storage::{conversation_store::ConversationStore, db::SurrealDbClient},
    utils::{
        config::{load_settings, AppConfig},
        embedding::EmbeddingProvider,
        llm::{OpenAiGenerator, TextGenerator},
    },
};
use retrieval_pipeline::{
    rate_limit::RateLimiter,
    search::{surreal::SurrealSearchIndex, HybridSearchClient},
    AnswerService, AskRequest, ChatResponse, FallbackController, RetrievalConfig, RetrievalTier,
    RetrievalTuning,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "faq", about = "Answer questions from the platform user guides")]
struct Cli {
    /// Identifies the asking user for conversations and rate limiting
    #[arg(long, default_value = "local-user")]
    user: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question, optionally continuing a conversation
    Ask {
        question: String,
        #[arg(long)]
        conversation: Option<String>,
        #[command(flatten)]
        retrieval: RetrievalArgs,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read questions from stdin, one per line, within one long-lived session.
    ///
    /// The session keeps the response cache and the rate limit windows. `/new`
    /// starts a fresh conversation and `/quit` ends the session.
    Chat {
        #[arg(long)]
        conversation: Option<String>,
        #[command(flatten)]
        retrieval: RetrievalArgs,
        #[arg(long)]
        json: bool,
    },
    /// List the user's most recently updated conversations
    Conversations {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Archive a conversation
    Archive { conversation_id: String },
}

#[derive(clap::Args)]
struct RetrievalArgs {
    /// Restrict retrieval to one guide category
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_enum, default_value_t = RetrievalTier::Hybrid)]
    start_tier: RetrievalTier,
}

impl RetrievalArgs {
    fn into_config(self, tuning: RetrievalTuning) -> RetrievalConfig {
        RetrievalConfig::new(tuning)
            .starting_at(self.start_tier)
            .with_category(self.category)
    }
}

/// Wires clients, index and store into a service with no cache and no rate limit.
fn build_service(config: &AppConfig, db: &SurrealDbClient, retrieval: RetrievalConfig) -> AnswerService {
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let embedder = Arc::new(EmbeddingProvider::from_config(config, Arc::clone(&openai_client)));
    info!(
        embedding_backend = embedder.backend_label(),
        embedding_dimension = embedder.dimension(),
        "Embedding provider initialized"
    );

    let generator: Arc<dyn TextGenerator> =
        Arc::new(OpenAiGenerator::from_config(config, openai_client));
    let index = Arc::new(SurrealSearchIndex::new(db.clone()));
    let controller = FallbackController::new(
        HybridSearchClient::new(embedder, index, timeout),
        Arc::clone(&generator),
    );

    AnswerService::new(controller, generator, Arc::new(db.clone()), retrieval)
        .with_store_timeout(timeout)
}

/// Service for a chat session: answers are cached and users rate limited for
/// as long as the session runs.
fn session_service(config: &AppConfig, db: &SurrealDbClient, retrieval: RetrievalConfig) -> AnswerService {
    build_service(config, db, retrieval)
        .with_cache(
            config.response_cache_capacity,
            Duration::from_secs(config.response_cache_ttl_secs),
        )
        .with_rate_limiter(RateLimiter::from_config(config))
}

/// Retryable failures become the apology response; anything else is returned.
fn apologize_on_retryable(
    result: Result<ChatResponse, AppError>,
) -> Result<ChatResponse, AppError> {
    match result {
        Err(err) if err.is_retryable() => {
            error!(error = %err, "Answering failed");
            Ok(ChatResponse::apology())
        }
        other => other,
    }
}

fn render(response: &ChatResponse, json: bool) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(response)?)
    } else {
        Ok(response.message.clone())
    }
}

async fn run_chat(
    service: &AnswerService,
    user_id: &str,
    mut conversation_id: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                conversation_id = None;
                continue;
            }
            _ => {}
        }

        let request = AskRequest {
            question: question.to_string(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.clone(),
        };
        match apologize_on_retryable(service.ask(request).await) {
            Ok(response) => {
                if response.conversation_id.is_some() {
                    conversation_id.clone_from(&response.conversation_id);
                }
                println!("{}\n", render(&response, json)?);
            }
            Err(err @ AppError::RateLimited(_)) => {
                warn!(error = %err, "Question rejected");
                eprintln!("Too many questions, please wait a moment and try again.");
            }
            Err(err) => {
                warn!(error = %err, "Question rejected");
                eprintln!("{err}");
            }
        }
    }

    if let Some(stats) = service.cache_stats() {
        info!(
            hits = stats.hits,
            misses = stats.misses,
            cached = stats.len,
            "Chat session ended"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let settings = load_settings()?;
    let config: AppConfig = settings.clone().try_deserialize()?;
    let tuning = RetrievalTuning::from_settings(&settings)?;

    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;
    db.ensure_initialized().await?;

    match cli.command {
        Command::Ask {
            question,
            conversation,
            retrieval,
            json,
        } => {
            let service = build_service(&config, &db, retrieval.into_config(tuning));
            let request = AskRequest {
                question,
                user_id: cli.user,
                conversation_id: conversation,
            };
            let response = apologize_on_retryable(service.ask(request).await)?;
            println!("{}", render(&response, json)?);
        }
        Command::Chat {
            conversation,
            retrieval,
            json,
        } => {
            let service = session_service(&config, &db, retrieval.into_config(tuning));
            run_chat(&service, &cli.user, conversation, json).await?;
        }
        Command::Conversations { limit } => {
            for conversation in db.list_conversations(&cli.user, limit).await? {
                println!(
                    "{}\t{}\t{:?}\t{}",
                    conversation.id,
                    conversation.updated_at.to_rfc3339(),
                    conversation.status,
                    conversation.title
                );
            }
        }
        Command::Archive { conversation_id } => {
            db.archive_conversation(&conversation_id).await?;
            info!(%conversation_id, "Conversation archived");
        }
    }

    Ok(())
}
