use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pubdash_query::{
    application::PublicDashboardService,
    domain::{frames::QueryDataResponse, validation::parse_panel_id, DomainError, MetricRequest, ServiceIdentity},
    infrastructure::{
        adapters::{file_store::FileStoreAdapter, http_query::HttpQueryAdapter},
        cli::{variable_request, Cli, Commands},
        config::Settings,
    },
    ports::QueryDataService,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "pubdash_query=debug,info"
    } else {
        "pubdash_query=info,warn,error"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::from_env()?;
    let store = FileStoreAdapter::open(&settings.store_path).await?;
    tracing::debug!("Using dashboard store {}", store.path().display());

    let query_data: Arc<dyn QueryDataService> = match settings.query_url.as_deref() {
        Some(url) => {
            let adapter = HttpQueryAdapter::new(url, settings.query_token.as_deref(), settings.query_timeout)?;
            tracing::info!("Query backend configured at {}", adapter.endpoint());
            Arc::new(adapter)
        }
        None => Arc::new(Unconfigured),
    };

    let service = PublicDashboardService::new(Arc::new(store), query_data);

    // Ctrl-C aborts any in-flight query.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Query { panel, skip_cache } => {
            settings.require_query_url()?;
            let panel_id = parse_panel_id(&panel.panel)?;
            let query = panel.to_query();

            match service
                .get_query_data_response(&cancel, skip_cache, &query, panel_id, &panel.token)
                .await
            {
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(e) => {
                    eprintln!("Error querying panel {} ({}): {}", panel_id, e.status_code(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Request { panel } => {
            let panel_id = parse_panel_id(&panel.panel)?;
            let query = panel.to_query();

            match service.build_panel_request(&panel.token, panel_id, &query).await {
                Ok((_, request)) => {
                    if request.queries.is_empty() {
                        eprintln!("Panel {} has no queries to run", panel_id);
                    }
                    println!("{}", serde_json::to_string_pretty(&request)?);
                }
                Err(e) => {
                    eprintln!("Error building request for panel {} ({}): {}", panel_id, e.status_code(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Variable {
            token,
            name,
            vars,
            search,
        } => {
            let request = variable_request(&vars, &search);

            match service
                .get_variable_query_response(&cancel, &token, &name, &request)
                .await
            {
                Ok(options) => {
                    println!("Found {} options for ${}:", options.len(), name);
                    for option in options {
                        if option.text == option.value {
                            println!("  {}", option.text);
                        } else {
                            println!("  {} = {}", option.text, option.value);
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Error resolving variable {} ({}): {}", name, e.status_code(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::View { token } => match service.get_public_dashboard_view(&token).await {
            Ok(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            Err(e) => {
                eprintln!("Error loading public dashboard ({}): {}", e.status_code(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Stands in when no backend URL is set; query variables then fall back to
/// their current selection.
struct Unconfigured;

#[async_trait::async_trait]
impl QueryDataService for Unconfigured {
    async fn query_data(
        &self,
        _identity: &ServiceIdentity,
        _skip_cache: bool,
        _request: &MetricRequest,
    ) -> Result<QueryDataResponse, DomainError> {
        Err(DomainError::QueryExecution("no query backend configured".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "unconfigured"
    }
}
