//! End-to-end tests driving the compiled `xmd` binary against literal
//! documents, mirroring the worked scenarios used throughout the processor
//! and evaluator unit tests.

use std::error::Error;
use std::io::Write;
use std::process::Command;

use tempfile::Builder;

fn render(source: &str) -> Result<String, Box<dyn Error>> {
    let mut file = Builder::new().suffix(".md").tempfile()?;
    file.write_all(source.as_bytes())?;

    let output = Command::new(env!("CARGO_BIN_EXE_xmd"))
        .arg(file.path())
        .output()?;

    assert!(
        output.status.success(),
        "xmd exited with {:?}, stderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8(output.stdout)?)
}

#[test]
fn variable_substitution() -> Result<(), Box<dyn Error>> {
    let rendered = render("<!-- xmd: set name \"World\" -->\nHello {{name}}!")?;
    assert_eq!(rendered, "\nHello World!");
    Ok(())
}

#[test]
fn conditional_picks_the_true_branch() -> Result<(), Box<dyn Error>> {
    let rendered = render(
        "<!-- xmd: set x 5 -->\n<!-- xmd: if x == 5 -->yes<!-- xmd: else -->no<!-- xmd: endif -->",
    )?;
    assert!(rendered.contains("yes"));
    assert!(!rendered.contains("no"));
    Ok(())
}

#[test]
fn for_loop_over_literal_array() -> Result<(), Box<dyn Error>> {
    let rendered = render(
        "<!-- xmd: for item in [\"a\",\"b\",\"c\"] -->- {{item}}\n<!-- xmd: endfor -->",
    )?;
    assert_eq!(rendered, "- a\n- b\n- c\n");
    Ok(())
}

#[test]
fn indexed_for_loop() -> Result<(), Box<dyn Error>> {
    let rendered = render(
        "<!-- xmd: for i, x in [\"p\",\"q\"] -->{{i}}:{{x}} <!-- xmd: endfor -->",
    )?;
    assert!(rendered.contains("0:p 1:q "));
    Ok(())
}

#[test]
fn join_with_custom_separator_after_assignment() -> Result<(), Box<dyn Error>> {
    let rendered = render(
        "<!-- xmd: set arr [\"debug\",\"mock\",\"test\"] -->\n<!-- xmd: set kw join arr \"|\" -->\n{{kw}}",
    )?;
    assert!(rendered.contains("debug|mock|test"));
    Ok(())
}
