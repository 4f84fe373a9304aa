use anyhow::{bail, Result};
use ingestion_service::{
    app::{AppState, Repositories},
    config::AppConfig,
    ingest::StagedUpload,
    observability,
};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: ingest_file <images|plants> <file_path>");
    }
    let (kind, file_path) = (args[1].as_str(), &args[2]);

    // Point INGESTION_CONFIG at the same file the service uses to write into its store.
    let cfg = AppConfig::load()?;
    let repos = Repositories::connect(&cfg.database).await?;
    let state = AppState::new(&cfg, repos);

    // The file belongs to the caller and is left in place.
    let upload = StagedUpload::retained(file_path);

    match kind {
        "images" => {
            let accepted = state.image_ingestion.accept(upload).await?;
            tracing::info!(rows_scheduled = accepted.rows_scheduled, "waiting for batch to complete");
            let report = accepted.completion.await?;
            tracing::info!(
                rows_failed = report.rows_failed,
                images_persisted = report.images_persisted,
                state = ?report.state,
                "image backfill finished"
            );
            if let Some(e) = report.persist_error {
                bail!("image batch {} was not persisted: {e}", report.batch);
            }
        }
        "plants" => {
            let stored = state.plant_ingestion.ingest(upload).await?;
            tracing::info!(stored, "plant backfill finished");
        }
        other => bail!("unknown upload kind {other:?}; expected images or plants"),
    }

    Ok(())
}
