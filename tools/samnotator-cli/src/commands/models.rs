//! List configured models.

use samnotator_common::AppConfig;
use samnotator_inference::{configured_models, ModelRegistry};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Device: {}", config.device);
    println!();

    let registry = ModelRegistry::with_defaults(config);
    let known = registry.names();

    println!("Models:");
    for model in configured_models(config) {
        let available = if !known.contains(&model.wrapper_name) {
            "unknown backend"
        } else if model.wrapper_name.starts_with("sam3") && !model.model_path.is_dir() {
            "model directory missing"
        } else {
            "ok"
        };
        println!(
            "  [{}] {} -> {} at {} ({available})",
            model.kind,
            model.name,
            model.wrapper_name,
            model.model_path.display()
        );
    }
    println!();

    println!("Backends: {}", known.join(", "));
    Ok(())
}
