//! A function defined in one directive must be callable from the document's
//! final `{{ ... }}` interpolation pass, and must not leak its parameter
//! binding into the surrounding scope once it returns.

use std::error::Error;
use std::io::Write;
use std::process::Command;

use tempfile::Builder;

#[test]
fn user_function_is_callable_from_interpolation() -> Result<(), Box<dyn Error>> {
    let mut file = Builder::new().suffix(".md").tempfile()?;
    write!(
        file,
        "<!-- xmd: set x \"outer\" -->\n\
         <!-- xmd: function double x\nreturn x * 2 -->\n\
         {{{{double(21)}}}} x={{{{x}}}}"
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_xmd"))
        .arg(file.path())
        .output()?;

    assert!(output.status.success());
    let rendered = String::from_utf8(output.stdout)?;
    assert!(rendered.contains("42"));
    assert!(rendered.contains("x=outer"));
    Ok(())
}
