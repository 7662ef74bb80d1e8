use anyhow::Result;
use log::info;

use sqlforge::build_orchestrator;
use sqlforge::shared::config::AppConfig;

/// Development driver: resolve one question against one database and print
/// the structured outcome. Production callers embed the library instead.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let database_id = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: sqlforge <database_id> <question> [evidence]"))?;
    let question = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: sqlforge <database_id> <question> [evidence]"))?;
    let evidence = args.next().unwrap_or_default();

    let config = AppConfig::load();
    let orchestrator = build_orchestrator(&config);

    info!("Processing question against {database_id}");
    let outcome = orchestrator
        .process_query(&database_id, &question, &evidence, None, None)
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
