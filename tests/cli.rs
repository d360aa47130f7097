//! Command-line behaviour that does not need a downloaded model
#![cfg(feature = "cli")]

use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bgstrip(cache: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_bgstrip"))
        .args(args)
        .env("BGSTRIP_CACHE_DIR", cache)
        .env_remove("RUST_LOG")
        .output()?)
}

fn write_png(path: &Path) -> Result<()> {
    image::RgbImage::from_pixel(32, 32, image::Rgb([10, 200, 30])).save(path)?;
    Ok(())
}

#[test]
fn test_show_cache_dir_prefers_flag_over_environment() -> Result<()> {
    let env_cache = TempDir::new()?;
    let flag_cache = TempDir::new()?;

    let output = bgstrip(env_cache.path(), &["--show-cache-dir"])?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains(&env_cache.path().display().to_string()));

    let flag = flag_cache.path().to_str().unwrap();
    let output = bgstrip(env_cache.path(), &["--show-cache-dir", "--cache-dir", flag])?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains(flag));
    Ok(())
}

#[test]
fn test_list_models_on_empty_cache() -> Result<()> {
    let cache = TempDir::new()?;
    let output = bgstrip(cache.path(), &["--list-models"])?;

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    for name in ["u2net", "u2netp", "u2net_human_seg", "isnet-general-use"] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }
    assert!(stdout.contains("not downloaded"));
    Ok(())
}

#[test]
fn test_clear_cache_removes_model_files() -> Result<()> {
    let cache = TempDir::new()?;
    let models = cache.path().join("models");
    std::fs::create_dir_all(&models)?;
    std::fs::write(models.join("u2netp.onnx"), vec![0u8; 1024])?;

    let output = bgstrip(cache.path(), &["--clear-cache"])?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.contains("Removed 1 model file"));
    assert!(!models.join("u2netp.onnx").exists());

    let output = bgstrip(cache.path(), &["--clear-cache"])?;
    assert!(String::from_utf8(output.stdout)?.contains("Cache was already empty"));
    Ok(())
}

#[test]
fn test_unsupported_inputs_are_skipped() -> Result<()> {
    let cache = TempDir::new()?;
    let work = TempDir::new()?;
    let notes = work.path().join("notes.txt");
    std::fs::write(&notes, "not an image")?;

    let output = bgstrip(cache.path(), &["--no-download", notes.to_str().unwrap()])?;

    assert!(output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("Skipping unsupported file"));
    Ok(())
}

#[test]
fn test_empty_directory_succeeds_with_warning() -> Result<()> {
    let cache = TempDir::new()?;
    let work = TempDir::new()?;

    let output = bgstrip(cache.path(), &[work.path().to_str().unwrap()])?;

    assert!(output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("No supported images found"));
    Ok(())
}

#[test]
fn test_missing_input_fails() -> Result<()> {
    let cache = TempDir::new()?;
    let work = TempDir::new()?;
    let missing = work.path().join("ghost.jpg");

    let output = bgstrip(cache.path(), &[missing.to_str().unwrap()])?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("does not exist"));
    Ok(())
}

#[test]
fn test_no_download_with_uncached_model_fails() -> Result<()> {
    let cache = TempDir::new()?;
    let work = TempDir::new()?;
    let input = work.path().join("leaf.png");
    write_png(&input)?;

    let output = bgstrip(cache.path(), &["--no-download", "-m", "u2netp", input.to_str().unwrap()])?;

    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("not cached"));
    assert!(!work.path().join("leaf_nobg.png").exists());
    Ok(())
}

#[test]
fn test_conflicting_and_invalid_flags_are_rejected() -> Result<()> {
    let cache = TempDir::new()?;

    let output = bgstrip(cache.path(), &["--only-download", "--no-download"])?;
    assert!(!output.status.success());

    let output = bgstrip(cache.path(), &["--compression", "ultra", "x.png"])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_stdout_refused_for_multiple_images() -> Result<()> {
    let cache = TempDir::new()?;
    let work = TempDir::new()?;
    let first = work.path().join("a.png");
    let second = work.path().join("b.png");
    write_png(&first)?;
    write_png(&second)?;

    let output = bgstrip(
        cache.path(),
        &["-o", "-", first.to_str().unwrap(), second.to_str().unwrap()],
    )?;

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8(output.stderr)?.contains("stdout"));
    Ok(())
}
