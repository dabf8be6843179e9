//! Internal bucket setup

use std::sync::Arc;

use anyhow::{Context, Result};
use custodia_core::Config;
use custodia_storage::LocationSet;

/// Open the internal staging bucket and the location registry around it
pub async fn setup_storage(config: &Config) -> Result<Arc<LocationSet>> {
    let internal_config = config.internal_location_config()?;
    let locations =
        LocationSet::new(internal_config).context("Failed to open the internal bucket")?;

    // Fail fast when the internal bucket settings cannot produce a client.
    locations
        .internal()
        .bucket()
        .await
        .context("Internal bucket is not usable")?;

    tracing::info!("Internal bucket ready");
    Ok(Arc::new(locations))
}
