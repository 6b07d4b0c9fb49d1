use std::path::Path;

use allocation_engine::{Configuration, Position};
use anyhow::{Context, Result};

/// Load and validate the portfolio configuration.
pub async fn load_configuration(path: &Path) -> Result<Configuration> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read portfolio config {}", path.display()))?;
    let config = Configuration::from_json(&json)
        .with_context(|| format!("Invalid portfolio config {}", path.display()))?;
    Ok(config)
}

/// Read the current open positions. The file is re-read every cycle.
pub async fn load_positions(path: &Path) -> Result<Vec<Position>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read positions {}", path.display()))?;
    let positions: Vec<Position> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse positions {}", path.display()))?;
    Ok(positions)
}
