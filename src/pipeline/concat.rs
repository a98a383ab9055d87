use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::pipeline::media::{self, PROFILE_CANONICAL};
use crate::pipeline::probe;
use crate::ui;

/// Write an ffmpeg concat-demuxer list. Paths are absolute and single
/// quotes are escaped so arbitrary file names cannot break the list.
pub fn write_concat_list(paths: &[PathBuf], list_path: &Path) -> Result<()> {
    let mut contents = String::new();
    for path in paths {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve concat input {}", path.display()))?;
        contents.push_str(&format!(
            "file '{}'\n",
            escape_concat_path(&absolute.to_string_lossy())
        ));
    }
    fs::write(list_path, contents)
        .with_context(|| format!("Failed to write concat list {}", list_path.display()))?;
    Ok(())
}

fn escape_concat_path(path: &str) -> String {
    path.replace('\'', r"'\''")
}

/// Join canonical segments into one output file in a single pass.
///
/// Upstream canonicalization already normalized every stream, so the
/// re-encode here is a safety net rather than a requirement. The output
/// must exist, be non-empty and decode, or the whole run fails.
pub async fn concatenate(inputs: &[PathBuf], output: &Path, concat_dir: &Path) -> Result<()> {
    if inputs.is_empty() {
        bail!("no segments to concatenate");
    }

    for input in inputs {
        if !input.exists() {
            bail!("concat input does not exist: {}", input.display());
        }
    }

    if inputs.len() == 1 {
        fs::copy(&inputs[0], output).with_context(|| {
            format!(
                "Failed to copy single segment {} to {}",
                inputs[0].display(),
                output.display()
            )
        })?;
        return verify_output(output).await;
    }

    let list_path = concat_dir.join("concat_list.txt");
    write_concat_list(inputs, &list_path)?;

    let mut args = vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0".to_string(),
    ];
    PROFILE_CANONICAL.push_to(&mut args);
    args.push("-threads".to_string());
    args.push("0".to_string());
    args.push(output.to_string_lossy().into_owned());

    let result = media::run_ffmpeg(&args, &format!("to concatenate {} segments", inputs.len())).await;

    let _ = fs::remove_file(&list_path);
    result?;

    verify_output(output).await
}

/// Pairwise A+B=C concatenation. Equivalent output to the single pass;
/// keeps at most two inputs live at a time.
pub async fn concatenate_incremental(
    inputs: &[PathBuf],
    output: &Path,
    concat_dir: &Path,
) -> Result<()> {
    if inputs.len() < 2 {
        return concatenate(inputs, output, concat_dir).await;
    }

    ui::debug(
        "concat.incremental",
        &format!("incrementally concatenating {} segments", inputs.len()),
    );

    let mut current = concat_dir.join("incremental_0.mp4");
    fs::copy(&inputs[0], &current)
        .with_context(|| format!("Failed to seed incremental concat from {}", inputs[0].display()))?;

    for (i, next) in inputs[1..].iter().enumerate() {
        let step_output = concat_dir.join(format!("incremental_{}.mp4", i + 1));
        concatenate(&[current.clone(), next.clone()], &step_output, concat_dir).await?;
        let _ = fs::remove_file(&current);
        current = step_output;
    }

    fs::rename(&current, output).with_context(|| {
        format!(
            "Failed to move concatenated output into place at {}",
            output.display()
        )
    })?;

    verify_output(output).await
}

async fn verify_output(output: &Path) -> Result<()> {
    let size = fs::metadata(output)
        .with_context(|| format!("output file was not created: {}", output.display()))?
        .len();
    if size == 0 {
        bail!("output file is empty: {}", output.display());
    }
    if !probe::is_sound(output).await {
        bail!("output file failed validation: {}", output.display());
    }
    Ok(())
}
