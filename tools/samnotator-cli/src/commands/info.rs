//! Show project information.

use std::path::PathBuf;

use samnotator_project_model::AnnotationProject;

pub fn run(dir: PathBuf) -> anyhow::Result<()> {
    let project =
        AnnotationProject::load(&dir).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    println!("Project: {}", AnnotationProject::file_path(&dir).display());
    println!("  Version: {}", project.version);
    println!("  Created: {}", project.created_at);
    println!("  Modified: {}", project.modified_at);
    println!();

    println!("Frames: {}", project.frames.len());
    for (frame_id, load_info) in &project.frames {
        let points = project.point_annotations.get(frame_id).map_or(0, Vec::len);
        let boxes = project.bbox_annotations.get(frame_id).map_or(0, Vec::len);
        println!("  [{frame_id}] {load_info} ({points} points, {boxes} boxes)");
    }
    println!();

    println!("Instances: {}", project.instances.len());
    for record in project.instances.values() {
        let detections = project
            .detections
            .get(&record.instance_id)
            .map_or(0, Vec::len);
        println!(
            "  [{}] {} {} {}, {} detection(s)",
            record.instance_id,
            record.instance_name,
            record.colour,
            record
                .category_name
                .as_deref()
                .map(|c| format!("({c})"))
                .unwrap_or_default(),
            detections
        );
    }
    println!();

    println!("Annotations:");
    println!("  Points: {}", project.point_count());
    println!("  Boxes: {}", project.bbox_count());

    Ok(())
}
