use learnpath::api::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or("openapi.json".to_string());
    std::fs::write(path, ApiDoc::openapi().to_pretty_json()?)?;
    Ok(())
}
