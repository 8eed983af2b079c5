//! `import` pulls another module's top-level bindings into the importing
//! document's store, resolving the path against the importing file's own
//! directory (the CLI's default search path).

use std::error::Error;
use std::fs;
use std::process::Command;

use tempfile::tempdir;

#[test]
fn import_copies_bindings_from_another_module() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;

    let module_path = dir.path().join("greeting.xmd");
    fs::write(&module_path, "<!-- xmd: set greeting \"hi\" -->")?;

    let main_path = dir.path().join("main.md");
    fs::write(
        &main_path,
        "<!-- xmd: import \"greeting.xmd\" -->\n{{greeting}}, world",
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_xmd"))
        .arg(&main_path)
        .output()?;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let rendered = String::from_utf8(output.stdout)?;
    assert!(rendered.contains("hi, world"));
    Ok(())
}

#[test]
fn importing_a_missing_module_fails_the_whole_document() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let main_path = dir.path().join("main.md");
    fs::write(
        &main_path,
        "<!-- xmd: import \"does-not-exist.xmd\" -->\nbody",
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_xmd"))
        .arg(&main_path)
        .output()?;

    assert!(!output.status.success());
    Ok(())
}
