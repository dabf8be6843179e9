use custodia_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize the application (database, services, routes)
    let (state, router) = custodia_api::setup::initialize_app(config.clone()).await?;

    // Start the server
    custodia_api::setup::server::start_server(&config, state, router).await?;

    Ok(())
}
