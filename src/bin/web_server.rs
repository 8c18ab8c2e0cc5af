use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use learnpath::{
    api::{ApiDoc, AppState, router},
    config::Config,
    store::SqliteStore,
    utils::init_log,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "learnpath.toml")]
    config: PathBuf,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Create the tables before serving
    #[arg(long)]
    init_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let _guard = init_log(config.log_dir.clone());

    let store = SqliteStore::connect(
        &config.database_url,
        config.content_cache_capacity,
        config.content_cache_ttl(),
    )
    .await?;
    if args.init_schema {
        store.create_schema().await?;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let request_timeout = config.submission_timeout() * 2;
    let app = router(Arc::new(AppState { store, config }))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}, swagger ui at http://{addr}/swagger-ui/");
    axum::serve(listener, app).await?;
    Ok(())
}
