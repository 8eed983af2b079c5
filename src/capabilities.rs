//! External collaborators the core evaluator depends on through narrow
//! trait contracts: shell execution, filesystem access, module loading,
//! command sandboxing and output formatting. Each trait ships a native
//! default implementation; callers that need sandboxing or mocking
//! substitute their own.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{self, Display};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::processor::ContentProcessor;
use crate::store::VariableStore;

// --- shell execution --------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShellError(pub String);

impl Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for ShellError {}

pub trait ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError>;
}

/// Shells out via `std::process::Command`. No shell metacharacter
/// interpretation happens here: the command is split on whitespace and
/// executed directly, never handed to `/bin/sh`.
pub struct NativeShellRunner;

impl ShellRunner for NativeShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ShellError("empty command".to_owned()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ShellError(format!("failed to spawn '{program}': {e}")))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| ShellError(e.to_string()))? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ShellError(format!("command timed out after {timeout:?}")));
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }

        Ok(ShellOutput {
            stdout,
            stderr,
            success: status.success(),
        })
    }
}

// --- filesystem ---------------------------------------------------------

pub trait FileSystem {
    fn read(&self, path: &str) -> std::io::Result<String>;
    fn write(&self, path: &str, content: &str) -> std::io::Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn delete(&self, path: &str) -> std::io::Result<()>;
    fn list(&self, path: &str) -> std::io::Result<Vec<String>>;
}

pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(path, content)
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn delete(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }

    fn list(&self, path: &str) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

// --- sandboxing -----------------------------------------------------

/// Gates `exec` before a command ever reaches a [`ShellRunner`].
pub trait SandboxPolicy {
    fn is_allowed(&self, command: &str) -> bool;
}

/// Default: every command is allowed. The crate ships runnable defaults
/// rather than bare trait contracts; embedders swap this out to restrict.
pub struct AllowAllPolicy;

impl SandboxPolicy for AllowAllPolicy {
    fn is_allowed(&self, _command: &str) -> bool {
        true
    }
}

pub struct DenyAllPolicy;

impl SandboxPolicy for DenyAllPolicy {
    fn is_allowed(&self, _command: &str) -> bool {
        false
    }
}

/// Permits a command only when its program name (the first whitespace
/// token, matching `NativeShellRunner`'s own splitting) is in the list.
pub struct AllowList(pub Vec<String>);

impl SandboxPolicy for AllowList {
    fn is_allowed(&self, command: &str) -> bool {
        command
            .split_whitespace()
            .next()
            .is_some_and(|program| self.0.iter().any(|allowed| allowed == program))
    }
}

// --- output formatting ------------------------------------------------

/// Post-processes the fully rendered document before it reaches the
/// caller. HTML/JSON escaping and ANSI stripping are out of scope, so the
/// default just passes the text through.
pub trait OutputFormatter {
    fn format(&self, raw: &str) -> String;
}

pub struct PassthroughFormatter;

impl OutputFormatter for PassthroughFormatter {
    fn format(&self, raw: &str) -> String {
        raw.to_owned()
    }
}

// --- module loading -------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleError(pub String);

impl Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for ModuleError {}

pub trait ModuleLoader {
    /// Reads and fully processes a module file, returning its top-level
    /// bindings for the importer to copy into its own store.
    fn load(&mut self, path: &str) -> Result<VariableStore, ModuleError>;
}

/// Resolves module paths against a configurable search list, caches loaded
/// modules, and rejects a module that is still being loaded higher up the
/// same import chain.
pub struct NativeModuleLoader {
    search_paths: Vec<PathBuf>,
    cache: HashMap<PathBuf, VariableStore>,
    in_flight: HashSet<PathBuf>,
}

impl NativeModuleLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(path);
        if direct.is_file() {
            return Some(direct);
        }
        self.search_paths
            .iter()
            .map(|base| base.join(path))
            .find(|candidate| candidate.is_file())
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn load(&mut self, path: &str) -> Result<VariableStore, ModuleError> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| ModuleError(format!("module '{path}' not found")))?;

        if let Some(cached) = self.cache.get(&resolved) {
            return Ok(cached.clone());
        }
        if !self.in_flight.insert(resolved.clone()) {
            return Err(ModuleError(format!("circular import of '{path}'")));
        }

        let source = std::fs::read_to_string(&resolved)
            .map_err(|e| ModuleError(format!("failed to read '{path}': {e}")))?;

        let mut store = VariableStore::new();
        let filename: Rc<str> = resolved.to_string_lossy().into_owned().into();
        let mut processor = ContentProcessor::new(
            &mut store,
            Some(filename),
            &NativeShellRunner,
            &NativeFileSystem,
            &AllowAllPolicy,
            self,
        );
        let result = processor.process(&source);

        self.in_flight.remove(&resolved);
        result.map_err(|e| ModuleError(e.to_string()))?;

        self.cache.insert(resolved, store.clone());
        Ok(store)
    }
}
