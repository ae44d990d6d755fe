use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tracetour::{
    adapters::{
        AppState, CorsPolicy, build_router, in_memory_stores, install_panic_hook,
        memory_cache_repository::PURGE_INTERVAL,
    },
    config::{ServerConfig, ServerConfigValidator, load_config},
    telemetry::{self, Telemetry},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file; environment variables prefixed TRACETOUR__ override it
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Validate configuration file
    Validate,
    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => {
            validate_config_command(args.config.as_deref().unwrap_or("config.toml")).await
        }
        Commands::Init => init_config_command(args.config.as_deref().unwrap_or("config.toml")).await,
        Commands::Serve => serve(args.config.as_deref()).await,
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)
        .await
        .context("Failed to load configuration")?;
    ServerConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    install_panic_hook();

    let telemetry = if config.telemetry.enabled {
        Some(telemetry::init_telemetry(&config.service, &config.telemetry)?)
    } else {
        tracing::info!("Telemetry disabled; requests are logged but not traced");
        None
    };

    let result = run_server(&config, telemetry.as_ref()).await;

    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }
    result
}

async fn run_server(config: &ServerConfig, telemetry: Option<&Telemetry>) -> Result<()> {
    let shutdown_timeout = config
        .shutdown_timeout()
        .map_err(|e| eyre!("Invalid shutdown_timeout '{}': {}", config.shutdown_timeout, e))?;
    let shutdown = Arc::new(GracefulShutdown::with_timeout(shutdown_timeout));

    let (locator, cache) = in_memory_stores(telemetry.is_some());
    let purge = cache.spawn_purge_task(PURGE_INTERVAL, shutdown.token());
    let state = AppState::new(
        Arc::new(locator),
        telemetry.map(Telemetry::tracer),
        CorsPolicy::from_config(&config.cors),
    )
    .with_shutdown(shutdown.token());
    let app = build_router(state);
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!("Signal handler failed: {:?}", e);
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    tracing::info!(
        "{} v{} ({}) listening on {}",
        config.service.name,
        config.service.version,
        config.service.environment,
        config.listen_addr
    );

    let token = shutdown.token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            joined.context("Server task failed")?.context("Server error")?;
        }
        _ = shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Draining in-flight requests (timeout {:?})", shutdown.shutdown_timeout());
            match shutdown.drain(&mut server).await {
                Some(joined) => joined.context("Server task failed")?.context("Server error")?,
                None => server.abort(),
            }
        }
    }

    purge.abort();
    tracing::info!("Server stopped");
    Ok(())
}

/// Validate a configuration file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(Some(config_path)).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!(
                "   • Service: {} ({})",
                config.service.name, config.service.environment
            );
            println!("   • Telemetry Enabled: {}", config.telemetry.enabled);
            println!(
                "   • OTLP Endpoint: {}",
                config.telemetry.otlp_endpoint.as_deref().unwrap_or("none")
            );
            println!("   • CORS Origins: {}", config.cors.allow_origins.join(", "));
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the OTLP endpoint starts with http:// or https://");
            println!("   • Keep telemetry.sample_ratio between 0.0 and 1.0");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Use humantime units for shutdown_timeout (e.g., '30s')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# tracetour configuration
# Every value can be overridden with TRACETOUR__<SECTION>__<KEY>,
# e.g. TRACETOUR__TELEMETRY__OTLP_ENDPOINT=http://localhost:4317

# The address to listen on
listen_addr = "127.0.0.1:8080"

# How long in-flight requests may take to finish on shutdown
shutdown_timeout = "30s"

[service]
name = "tracetour"
environment = "development"

[logging]
level = "info"
# "json" or "pretty"
format = "pretty"

[telemetry]
enabled = true
sample_ratio = 1.0
# otlp_endpoint = "http://localhost:4317"

[cors]
allow_origins = ["*"]
max_age_secs = 86400
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'tracetour --config {config_path} serve' to start the server");
    Ok(())
}
