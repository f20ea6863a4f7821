//! Preload a small scene and print progress
//!
//! Runs offline: inline assets succeed and the remote one fails, which the
//! session reports without aborting. Point `SCENE_PRELOAD_CACHE_DIR` at a
//! directory to see the on-disk store.

use futures::StreamExt;
use scene_preload::{
    AssetLoader, EngineConfig, OfflineFetcher, PreloadOptions, ProgressPhase, ProgressSink,
    SceneDocument, ScenePreloadOrchestrator, StructuredSceneReader, TokioSpawner,
};
use std::sync::Arc;

const SCENE: &str = r#"
[[materials]]
name = "checker"
textures.base_color = { id = "checker", uri = "data:image/png;base64,iVBORw0KGgo=" }

[[nodes]]
name = "floor"
mesh = { id = "floor", uri = "data:;base64,AAECAwQFBgc=" }
material = 0

[[nodes.children]]
name = "statue"
mesh = { uri = "https://cdn.example.com/statue.glb", size = 1048576 }
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = EngineConfig::from_toml_str(
        r#"
        max_concurrent_loads = 2
        [mirrors]
        "cdn.example.com" = ["cdn-backup.example.com"]
        "#,
    )?;
    let store = Arc::new(config.open_store()?);
    let loader = AssetLoader::builder(store, Arc::new(OfflineFetcher))
        .mirrors(Arc::new(config.mirror_table()?))
        .fetch_timeout(config.fetch_timeout())
        .policy(config.network_policy())
        .eviction_policy(config.eviction_policy())
        .build();

    let orchestrator = ScenePreloadOrchestrator::new(Arc::new(loader), StructuredSceneReader, TokioSpawner::new())
        .with_config(config.preload_config());

    let document = SceneDocument::from_toml_str(SCENE)?;
    let (sink, mut events) = ProgressSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event.phase {
                ProgressPhase::Error => println!(
                    "[{}/{}] {} failed: {}",
                    event.settled(),
                    event.total,
                    event.asset_id,
                    event.error.unwrap_or_default()
                ),
                phase => println!("[{}/{}] {:?} {}", event.settled(), event.total, phase, event.asset_id),
            }
        }
    });

    let summary = orchestrator
        .preload_scene_resources("demo", &document, PreloadOptions::default().with_progress(sink))
        .await?;
    printer.await?;

    println!(
        "scene_preload v{}: {} of {} assets cached, {} failed",
        scene_preload::VERSION,
        summary.completed,
        summary.total,
        summary.failed
    );
    Ok(())
}
