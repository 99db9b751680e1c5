use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use ragserve::{
    bootstrap, sanitize_query, source, GenerationClient, GenerationError, OpenAiEmbedder,
    Retriever, TableName,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ragserve-api",
    about = "HTTP endpoint that answers questions over a pre-embedded chunk corpus"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "RAGSERVE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Postgres connection string for the chunk corpus (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Schema holding the chunk table.
    #[arg(long, env = "RAGSERVE_SCHEMA", default_value = "public")]
    schema: String,

    /// Table storing {id, text, embedding} chunk rows.
    #[arg(long, env = "RAGSERVE_TABLE", default_value = "chunks")]
    table: String,

    /// Path of the persisted vector index artifact.
    #[arg(long, env = "RAGSERVE_INDEX_PATH", default_value = "embeddings.idx")]
    index_path: PathBuf,

    /// Embedding dimensionality shared by the corpus and the query model.
    #[arg(long, env = "RAGSERVE_DIMENSION", default_value_t = 384)]
    dimension: usize,

    /// Chunks retrieved per question.
    #[arg(long, env = "RAGSERVE_TOP_K", default_value_t = 5)]
    top_k: usize,

    /// Origin allowed to call the query endpoint.
    #[arg(long, env = "RAGSERVE_ALLOWED_ORIGIN")]
    allowed_origin: String,

    /// API key for query embeddings.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "RAGSERVE_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Optional embedding dimension override sent to the model.
    #[arg(long, env = "RAGSERVE_OPENAI_DIMENSIONS")]
    openai_dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible embedding endpoints.
    #[arg(
        long,
        env = "RAGSERVE_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "RAGSERVE_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, default_value_t = 5)]
    embed_max_retries: usize,

    /// Max cached query embeddings kept in memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// API key for the generation service.
    #[arg(long, env = "GEMINI_API_KEY")]
    gemini_api_key: String,

    /// Generation model identifier.
    #[arg(long, env = "RAGSERVE_GEMINI_MODEL", default_value = "gemini-2.0-pro")]
    gemini_model: String,

    /// Base URL for the generation service.
    #[arg(
        long,
        env = "RAGSERVE_GEMINI_BASE",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    gemini_base_url: String,

    /// Seconds before a generation request times out.
    #[arg(long, env = "RAGSERVE_GEMINI_TIMEOUT_SECS", default_value_t = 60)]
    gemini_timeout_secs: u64,

    /// Retry attempts for transient generation failures.
    #[arg(long, default_value_t = 3)]
    generation_max_retries: usize,
}

#[derive(Clone)]
struct AppState {
    retriever: Arc<Retriever<OpenAiEmbedder>>,
    generator: Arc<GenerationClient>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = ApiCli::parse();
    let table = TableName::new(cli.schema, cli.table)?;
    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.openai_model,
        cli.openai_dimensions,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
        cli.embed_max_retries.max(1),
    )?;
    let generator = GenerationClient::new(
        cli.gemini_api_key,
        cli.gemini_base_url,
        cli.gemini_model,
        Duration::from_secs(cli.gemini_timeout_secs.max(1)),
        cli.generation_max_retries.max(1),
    )?;

    let client = source::connect(&cli.database_url).await?;
    let records = source::fetch_chunks(&client, &table).await?;
    info!(chunks = records.len(), "corpus read complete");

    let context = bootstrap::prepare(records, &cli.index_path, cli.dimension)
        .context("failed to bootstrap retrieval structures")?;
    let retriever = Retriever::new(
        context,
        embedder,
        cli.top_k.max(1),
        cli.embedding_cache_size,
    );

    let state = AppState {
        retriever: Arc::new(retriever),
        generator: Arc::new(generator),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/query", post(query_handler))
        .layer(cors_layer(&cli.allowed_origin)?)
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!("ragserve-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorBody>)> {
    let query = sanitize_query(&request.query);
    if query.is_empty() {
        return Err(bad_request(
            "query cannot be empty or contain only invalid characters",
        ));
    }

    let retriever = state.retriever.clone();
    let question = query.clone();
    let chunks = tokio::task::spawn_blocking(move || retriever.retrieve_top_k(&question, None))
        .await
        .map_err(|err| internal_error(anyhow::anyhow!("retrieval task join error: {err}")))?
        .map_err(internal_error)?;

    let prompt = build_prompt(&query, &chunks);
    let answer = match state.generator.generate(&prompt).await {
        Ok(answer) => answer,
        Err(GenerationError::Status { status, body }) => {
            let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            return Err((status, Json(ErrorBody { message: body })));
        }
        Err(err @ GenerationError::Transport(_)) => {
            return Err(internal_error(anyhow::Error::new(err)));
        }
    };

    Ok(Json(QueryResponse { response: answer }))
}

fn build_prompt(question: &str, chunks: &[String]) -> String {
    let context_block = chunks.join("\n");
    format!("Answer the user query based on this context:\n{context_block}\n\nUser Question: {question}")
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin: HeaderValue = origin
        .parse()
        .with_context(|| format!("invalid allowed origin {origin:?}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_context_then_question() {
        let prompt = build_prompt(
            "who wins",
            &["first chunk".to_string(), "second chunk".to_string()],
        );

        assert!(prompt.starts_with("Answer the user query based on this context:\nfirst chunk\nsecond chunk"));
        assert!(prompt.ends_with("User Question: who wins"));
    }

    #[test]
    fn context_free_prompt_is_still_well_formed() {
        let prompt = build_prompt("lost question", &[]);
        assert!(prompt.contains("User Question: lost question"));
    }
}
