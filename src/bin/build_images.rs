//! Builds the per-language sandbox images from `images/<language>/Dockerfile`.
//!
//! Usage: build_images [LANGUAGE ...]
//!
//! Environment:
//! - `CODE_RUNNER_RUNTIME`: container engine CLI (default `docker`)
//! - `CODE_RUNNER_IMAGES_DIR`: directory holding one build context per language (default `images`)
//! - `CODE_RUNNER_IMAGE_PREFIX`: tag prefix (default `code-runner-`)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

fn main() -> Result<()> {
    let runtime = env::var("CODE_RUNNER_RUNTIME").unwrap_or_else(|_| "docker".to_string());
    let images_dir =
        PathBuf::from(env::var("CODE_RUNNER_IMAGES_DIR").unwrap_or_else(|_| "images".to_string()));
    let prefix = env::var("CODE_RUNNER_IMAGE_PREFIX").unwrap_or_else(|_| "code-runner-".to_string());

    let available = build_contexts(&images_dir)?;
    let requested: Vec<String> = env::args().skip(1).collect();
    let selected: Vec<&String> = if requested.is_empty() {
        available.iter().collect()
    } else {
        for language in &requested {
            if !available.contains(language) {
                bail!(
                    "no build context for {language:?} under {} (available: {})",
                    images_dir.display(),
                    available.join(", ")
                );
            }
        }
        available.iter().filter(|l| requested.contains(l)).collect()
    };

    let mut failed = vec![];
    for language in selected {
        let tag = format!("{prefix}{language}");
        let context = images_dir.join(language);
        let args = [
            "build".to_string(),
            "-t".to_string(),
            tag.clone(),
            context.display().to_string(),
        ];
        if !run_command(&runtime, &args)? {
            failed.push(tag);
        }
    }

    if !failed.is_empty() {
        bail!("failed to build: {}", failed.join(", "));
    }
    Ok(())
}

/// Subdirectories that contain a Dockerfile, sorted by name.
fn build_contexts(images_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(images_dir)
        .with_context(|| format!("reading {}", images_dir.display()))?;
    let mut languages = vec![];
    for entry in entries {
        let entry = entry?;
        if entry.path().join("Dockerfile").is_file() {
            if let Some(name) = entry.file_name().to_str() {
                languages.push(name.to_string());
            }
        }
    }
    languages.sort();
    Ok(languages)
}

fn run_command(program: &str, args: &[String]) -> Result<bool> {
    println!("$ {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("running {program}"))?;
    Ok(status.success())
}
