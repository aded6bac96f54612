//! Writes the OpenAPI document for the lesson API.
//!
//! Usage: `openapi [output-path]` (defaults to `openapi.json`).

use lingocast_api::router::ApiDoc;
use std::path::PathBuf;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi.json"));
    let spec_json = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, spec_json)?;
    println!("Wrote {}", path.display());
    Ok(())
}
