//! Validate a Samnotator project file.

use std::path::{Path, PathBuf};

use samnotator_project_model::AnnotationProject;

pub fn run(dir: PathBuf) -> anyhow::Result<()> {
    println!("Validating project at: {}", dir.display());

    let project =
        AnnotationProject::load(&dir).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    println!("  Version: {}", project.version);
    println!("  Frames: {}", project.frames.len());
    println!("  Instances: {}", project.instances.len());
    println!(
        "  Annotations: {} points, {} boxes",
        project.point_count(),
        project.bbox_count()
    );

    let mut issues = Vec::new();
    if let Err(e) = project.validate() {
        issues.push(e.to_string());
    }
    for (frame_id, load_info) in &project.frames {
        if !Path::new(load_info).is_file() {
            issues.push(format!("frame {frame_id} source missing: {load_info}"));
        }
    }

    if issues.is_empty() {
        println!("  Sources: All present");
        println!("\nProject is valid.");
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!(
            "\n{} issue(s) found. Project may not be fully usable.",
            issues.len()
        );
    }

    Ok(())
}
