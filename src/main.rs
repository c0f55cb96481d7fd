mod game;

use anyhow::{Context, Result};
use hive::engine::core::EngineConfig;
use hive::engine::Engine;

fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("failed to load config {path}"))?,
        None => EngineConfig {
            is_headless: true,
            max_frames: Some(600),
            ..EngineConfig::default()
        },
    };

    let mut engine = Engine::new(config)?;
    game::setup(&mut engine)?;
    engine.run()
}

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already set");
    }
}
