//! The native filesystem capability is exercised end to end: a directive
//! writes a file, a later directive reads it back.

use std::error::Error;
use std::fs;
use std::process::Command;

use tempfile::tempdir;

#[test]
fn file_write_then_file_read_round_trips() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let target = dir.path().join("out.txt");
    let target_str = target.to_string_lossy().replace('\\', "\\\\");

    let main_path = dir.path().join("main.md");
    fs::write(
        &main_path,
        format!(
            "<!-- xmd: set ok file_write(\"{target_str}\", \"payload\") -->\n\
             <!-- xmd: set content file_read(\"{target_str}\") -->\n\
             {{{{content}}}}"
        ),
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_xmd"))
        .arg(&main_path)
        .output()?;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(fs::read_to_string(&target)?, "payload");
    let rendered = String::from_utf8(output.stdout)?;
    assert!(rendered.contains("payload"));
    Ok(())
}
