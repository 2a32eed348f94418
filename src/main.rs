use std::{env, fs, path::PathBuf, process};

use anyhow::{Context, Result, bail};
use mvskel::config::TrackerConfig;
use mvskel::kinematics::load_skel_model;
use mvskel::skeleton::{serialize_skel_frames, Skeleton3d};
use mvskel::topology::SkelType;
use mvskel::{associate, camera, detection, edges, updater};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("{err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1).collect::<Vec<String>>();

    if args.len() < 4 {
        eprintln!(
            "Usage: mvskel <calibration.json> <skel-type> <output.txt> <detections-view0.txt> [detections-view1.txt ...] [--model-dir <dir>] [--config <file.json>] [--save-config <file.json>] [--remap-to <skel-type>]"
        );
        process::exit(2);
    }

    let calibration_path = PathBuf::from(args.remove(0));
    let skel_type = parse_skel_type(&args.remove(0))?;
    let output_path = PathBuf::from(args.remove(0));

    let mut model_dir: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut save_config_path: Option<PathBuf> = None;
    let mut remap_to: Option<SkelType> = None;
    let mut detection_paths: Vec<PathBuf> = Vec::new();

    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--model-dir" => {
                let value = args.get(index + 1).context("--model-dir requires a path")?;
                model_dir = Some(PathBuf::from(value));
                index += 2;
            }
            "--config" => {
                let value = args.get(index + 1).context("--config requires a path")?;
                config_path = Some(PathBuf::from(value));
                index += 2;
            }
            "--save-config" => {
                let value = args.get(index + 1).context("--save-config requires a path")?;
                save_config_path = Some(PathBuf::from(value));
                index += 2;
            }
            "--remap-to" => {
                let value = args.get(index + 1).context("--remap-to requires a skel-type")?;
                remap_to = Some(parse_skel_type(value)?);
                index += 2;
            }
            path => {
                detection_paths.push(PathBuf::from(path));
                index += 1;
            }
        }
    }

    if detection_paths.is_empty() {
        bail!("at least one detection file is required (one per camera view, in calibration order)");
    }

    let model_dir = model_dir.context("--model-dir is required: a skeleton template directory (joints.txt, jshape_blend.txt)")?;

    let config = match &config_path {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(path) = &save_config_path {
        config.save(path)?;
    }

    let calibration_json = fs::read_to_string(&calibration_path)
        .with_context(|| format!("failed to read calibration file: {}", calibration_path.display()))?;
    let cameras = camera::parse_cameras(&calibration_json)?;
    if cameras.len() != detection_paths.len() {
        bail!(
            "camera count ({}) does not match detection file count ({})",
            cameras.len(),
            detection_paths.len()
        );
    }

    let track_type = remap_to.unwrap_or(skel_type);
    let mut views: Vec<Vec<detection::Detection>> = Vec::with_capacity(detection_paths.len());
    for path in &detection_paths {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read detection file: {}", path.display()))?;
        let frames = detection::parse_detections(&text, skel_type)?;
        let frames = if track_type == skel_type {
            frames
        } else {
            frames
                .iter()
                .map(|d| d.remap(track_type))
                .collect::<mvskel::error::Result<Vec<_>>>()?
        };
        views.push(frames);
    }

    let frame_count = views.iter().map(|v| v.len()).min().unwrap_or(0);
    if views.iter().any(|v| v.len() != frame_count) {
        tracing::warn!("detection files disagree on frame count; truncating to {frame_count}");
    }

    let model = load_skel_model(track_type, &model_dir)?;
    let associater = associate::Associater::new(track_type, cameras.len(), config.association.clone());
    let mut tracker = updater::Tracker::new(model, config.triangulation.clone(), config.solver.clone(), config.tracking.clone());

    let mut output_frames: Vec<Vec<Skeleton3d>> = Vec::with_capacity(frame_count);
    for frame_idx in 0..frame_count {
        let mut frame_detections: Vec<detection::Detection> = views.iter().map(|v| v[frame_idx].clone()).collect();
        edges::normalize_pafs(&mut frame_detections, config.association.normalize_edges);

        let priors = tracker.priors();
        let rays = edges::calc_joint_rays(&frame_detections, &cameras);
        let edge_set = edges::EdgeSet::build(track_type, &frame_detections, &cameras, &rays, &priors, &config.association);
        let skels2d = associater.associate(&frame_detections, &edge_set, &priors);

        tracker.update(&skels2d, &cameras);
        output_frames.push(tracker.skels().values().cloned().collect());

        tracing::info!(frame = frame_idx, tracked = tracker.skels().len(), "processed frame");
    }

    let def = mvskel::topology::def(track_type);
    let text = serialize_skel_frames(&output_frames, def.joint_size);
    fs::write(&output_path, text).with_context(|| format!("failed to write output: {}", output_path.display()))?;

    println!("Processed {frame_count} frames across {} cameras, {} tracked identities at end", cameras.len(), tracker.skels().len());

    Ok(())
}

fn parse_skel_type(value: &str) -> Result<SkelType> {
    match value.to_ascii_lowercase().as_str() {
        "skel19" => Ok(SkelType::Skel19),
        "skel17" => Ok(SkelType::Skel17),
        "skel15" => Ok(SkelType::Skel15),
        "coco18" => Ok(SkelType::Coco18),
        "body25" => Ok(SkelType::Body25),
        "shelf15" => Ok(SkelType::Shelf15),
        _ => bail!("invalid skel-type: {value}"),
    }
}
