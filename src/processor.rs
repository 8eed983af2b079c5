//! Content processor: the piece that makes XMD a preprocessor rather than a
//! bare language. Walks Markdown input, dispatches `<!-- xmd: … -->`
//! directives to the evaluator, and splices their output back into the
//! surrounding document.
//!
//! The directive scan keeps an if-stack that gates verbatim copying, and
//! extracts `for`/`endfor` spans by depth-counted nesting before recursively
//! re-invoking the processor over that span.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::rc::Rc;

use crate::capabilities::{FileSystem, ModuleLoader, SandboxPolicy, ShellRunner};
use crate::eval::{ClassDef, EvalError, Evaluator, FunctionDef};
use crate::lexer::Lexer;
use crate::location::SourceLocation;
use crate::parser::Parser;
use crate::store::VariableStore;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessError {
    pub message: String,
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ProcessError {}

impl From<EvalError> for ProcessError {
    fn from(err: EvalError) -> Self {
        ProcessError {
            message: err.to_string(),
        }
    }
}

pub type ProcessResult<T> = Result<T, ProcessError>;

const MAX_IF_DEPTH: usize = 32;

struct IfFrame {
    condition_met: bool,
    branch_executed: bool,
}

pub struct ContentProcessor<'a> {
    store: &'a mut VariableStore,
    source_file: Option<Rc<str>>,
    shell: &'a dyn ShellRunner,
    fs: &'a dyn FileSystem,
    sandbox: &'a dyn SandboxPolicy,
    modules: &'a mut dyn ModuleLoader,
    functions: HashMap<String, FunctionDef>,
    classes: HashMap<String, ClassDef>,
}

impl<'a> ContentProcessor<'a> {
    pub fn new(
        store: &'a mut VariableStore,
        source_file: Option<Rc<str>>,
        shell: &'a dyn ShellRunner,
        fs: &'a dyn FileSystem,
        sandbox: &'a dyn SandboxPolicy,
        modules: &'a mut dyn ModuleLoader,
    ) -> Self {
        Self {
            store,
            source_file,
            shell,
            fs,
            sandbox,
            modules,
            functions: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::synthetic(
            self.source_file
                .clone()
                .unwrap_or_else(|| Rc::from("xmd_directive")),
        )
    }

    fn evaluator(&mut self) -> Evaluator<'_> {
        Evaluator::new(
            &mut *self.store,
            &mut self.functions,
            &mut self.classes,
            &*self.shell,
            &*self.fs,
            &mut *self.modules,
            &*self.sandbox,
        )
    }

    /// Processes `input`, returning the assembled, fully interpolated
    /// Markdown output.
    pub fn process(&mut self, input: &str) -> ProcessResult<String> {
        let mut output = String::with_capacity(input.len() * 2);
        let mut if_stack: Vec<IfFrame> = Vec::new();
        let mut suppressed_if_depth = 0usize;
        let mut cursor = 0usize;

        while cursor < input.len() {
            let Some(comment_start) = input[cursor..].find("<!--").map(|i| i + cursor) else {
                if should_execute(&if_stack) {
                    output.push_str(&input[cursor..]);
                }
                break;
            };

            if should_execute(&if_stack) {
                output.push_str(&input[cursor..comment_start]);
            }

            let Some(comment_end) = input[comment_start + 4..].find("-->").map(|i| i + comment_start + 4) else {
                if should_execute(&if_stack) {
                    output.push_str(&input[comment_start..]);
                }
                break;
            };
            let after_comment = comment_end + 3;

            let xmd_start = comment_start + 4;
            let trimmed = input[xmd_start..comment_end].trim_start();
            let Some(directive) = trimmed.strip_prefix("xmd:") else {
                if should_execute(&if_stack) {
                    output.push_str(&input[comment_start..after_comment]);
                }
                cursor = after_comment;
                continue;
            };
            let directive = directive.trim_start();

            if let Some(rest) = directive.strip_prefix("for ") {
                if should_execute(&if_stack) {
                    let header = rest.trim();
                    let Some((var_part, collection_expr)) = header.split_once(" in ") else {
                        cursor = after_comment;
                        continue;
                    };
                    let body_start = after_comment;
                    let Some((body_end, loop_end)) =
                        find_matching_endfor(&input[body_start..])
                    else {
                        cursor = input.len();
                        continue;
                    };
                    let loop_body = &input[body_start..body_start + body_end];

                    let collection = self.eval_expr_text(collection_expr.trim())?;
                    if let Value::Array(items) = collection {
                        for (index, item) in items.iter().enumerate() {
                            bind_loop_vars(&mut *self.store, var_part.trim(), index, item);
                            let iteration = self.process(loop_body)?;
                            output.push_str(&iteration);
                        }
                    }

                    cursor = body_start + loop_end;
                    continue;
                }
                cursor = after_comment;
                continue;
            }

            if directive.trim() == "endfor" {
                cursor = after_comment;
                continue;
            }

            if let Some(rest) = directive.strip_prefix("if ") {
                let result = self.eval_condition_text(rest.trim())?;
                if if_stack.len() < MAX_IF_DEPTH {
                    if_stack.push(IfFrame {
                        condition_met: result,
                        branch_executed: result,
                    });
                } else {
                    // Nesting ceiling reached: this `if` contributes no frame,
                    // so its matching `endif` must not pop one either. Track
                    // it here instead of desyncing the real stack.
                    suppressed_if_depth += 1;
                }
                cursor = after_comment;
                continue;
            }
            if let Some(rest) = directive.strip_prefix("elif ") {
                if let Some(frame) = if_stack.last_mut() {
                    if !frame.branch_executed {
                        let result = self.eval_condition_text(rest.trim())?;
                        frame.condition_met = result;
                        if result {
                            frame.branch_executed = true;
                        }
                    } else {
                        frame.condition_met = false;
                    }
                }
                cursor = after_comment;
                continue;
            }
            if directive.trim() == "else" {
                if let Some(frame) = if_stack.last_mut() {
                    frame.condition_met = !frame.branch_executed;
                }
                cursor = after_comment;
                continue;
            }
            if directive.trim() == "endif" {
                if suppressed_if_depth > 0 {
                    suppressed_if_depth -= 1;
                } else {
                    if_stack.pop();
                }
                cursor = after_comment;
                continue;
            }

            if should_execute(&if_stack) {
                let rendered = self.dispatch_directive(directive)?;
                output.push_str(&rendered);
            }
            cursor = after_comment;
        }

        self.interpolate(&output)
    }

    fn dispatch_directive(&mut self, directive: &str) -> ProcessResult<String> {
        if let Some(rest) = directive.strip_prefix("set ") {
            // `set name expr` has no `=`: the directive's own keyword
            // already carries the assignment meaning, so the tail is
            // "name" followed by a bare expression, not a full
            // `name = expr` statement.
            let mut tokens = Lexer::new(rest.trim(), self.filename())
                .lex()
                .map_err(|e| ProcessError {
                    message: e.to_string(),
                })?;
            if tokens.is_empty() {
                return Ok(String::new());
            }
            let name = match &tokens[0].kind {
                crate::lexer::TokenKind::Identifier(name) => name.clone(),
                _ => return Ok(String::new()),
            };
            tokens.remove(0);
            let mut parser = Parser::new(tokens);
            let expr = match parser.parse_expression() {
                Ok(expr) => expr,
                Err(_) => return Ok(String::new()),
            };
            let value = self.evaluator().eval_expr_pub(&expr)?;
            self.store.set(name, value);
            return Ok(String::new());
        }

        if let Some(rest) = directive.strip_prefix("import ") {
            let path = strip_quotes(rest.trim());
            let location = self.location();
            self.evaluator()
                .eval_program(&import_program(&path, location))?;
            return Ok(String::new());
        }

        let tokens = Lexer::new(directive, self.filename())
            .lex()
            .map_err(|e| ProcessError {
                message: e.to_string(),
            })?;
        let program = match Parser::new(tokens).parse_program() {
            Ok(program) => program,
            // A malformed directive body produces no output rather than
            // aborting the document.
            Err(_) => return Ok(String::new()),
        };

        let mut rendered = String::new();
        let mut evaluator = self.evaluator();
        for statement in &program.statements {
            if let crate::ast::Stmt::Expr(expr) = statement {
                // A bare expression statement's own value is spliced in
                // directly when it is a string; side effects like `print`
                // still land in the evaluator's output buffer.
                if let Value::String(s) = evaluator.eval_expr_pub(expr)? {
                    rendered.push_str(&s);
                }
            } else {
                evaluator.eval_statement_pub(statement)?;
            }
        }
        rendered.push_str(&evaluator.take_output());
        Ok(rendered)
    }

    fn filename(&self) -> Rc<str> {
        self.source_file
            .clone()
            .unwrap_or_else(|| Rc::from("xmd_directive"))
    }

    fn eval_expr_text(&mut self, expr_src: &str) -> ProcessResult<Value> {
        let tokens = Lexer::new(expr_src, self.filename())
            .lex()
            .map_err(|e| ProcessError {
                message: e.to_string(),
            })?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expression().map_err(|e| ProcessError {
            message: e.to_string(),
        })?;
        self.evaluator().eval_expr_pub(&expr).map_err(Into::into)
    }

    fn eval_condition_text(&mut self, expr_src: &str) -> ProcessResult<bool> {
        Ok(self.eval_expr_text(expr_src)?.is_truthy())
    }

    /// Final `{{ expr }}` substitution pass over the assembled output.
    /// Undefined identifiers and malformed expressions substitute the
    /// empty string rather than erroring.
    fn interpolate(&mut self, text: &str) -> ProcessResult<String> {
        let mut result = String::with_capacity(text.len());
        let mut cursor = 0usize;
        while let Some(start) = text[cursor..].find("{{").map(|i| i + cursor) {
            result.push_str(&text[cursor..start]);
            let Some(end) = text[start + 2..].find("}}").map(|i| i + start + 2) else {
                result.push_str(&text[start..]);
                cursor = text.len();
                break;
            };
            let expr_src = text[start + 2..end].trim();
            let value = self
                .eval_expr_text(expr_src)
                .unwrap_or(Value::string(""));
            result.push_str(&value.to_string());
            cursor = end + 2;
        }
        result.push_str(&text[cursor..]);
        Ok(result)
    }
}

fn should_execute(if_stack: &[IfFrame]) -> bool {
    if_stack.iter().all(|frame| frame.condition_met)
}

fn bind_loop_vars(store: &mut VariableStore, header: &str, index: usize, item: &Value) {
    if let Some((idx_name, value_name)) = header.split_once(',') {
        store.set(idx_name.trim().to_owned(), Value::Number(index as f64));
        store.set(value_name.trim().to_owned(), item.clone());
    } else {
        store.set(header.trim().to_owned(), item.clone());
    }
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        s[1..s.len() - 1].to_owned()
    } else {
        s.to_owned()
    }
}

fn import_program(path: &str, location: SourceLocation) -> crate::ast::Program {
    crate::ast::Program {
        statements: vec![crate::ast::Stmt::Import {
            path: path.to_owned(),
            location,
        }],
    }
}

/// Scans `input` (the text right after a `for` directive's `-->`) for the
/// `endfor` directive at the same nesting depth, counting nested `for`
/// directives along the way.
///
/// Returns `(body_len, after_len)`: the loop body is `input[..body_len]`,
/// and scanning should resume at `input[after_len..]`.
fn find_matching_endfor(input: &str) -> Option<(usize, usize)> {
    let mut depth = 1i32;
    let mut cursor = 0usize;
    let mut body_end = None;

    while cursor < input.len() {
        let comment_start = input[cursor..].find("<!--")? + cursor;
        let comment_end = input[comment_start + 4..].find("-->")? + comment_start + 4;
        let after = comment_end + 3;

        let trimmed = input[comment_start + 4..comment_end].trim_start();
        if let Some(directive) = trimmed.strip_prefix("xmd:") {
            let directive = directive.trim_start();
            if directive.starts_with("for ") {
                depth += 1;
            } else if directive.trim() == "endfor" {
                depth -= 1;
                if depth == 0 {
                    body_end = Some((comment_start, after));
                    break;
                }
            }
        }
        cursor = after;
    }

    body_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AllowAllPolicy, ModuleError, NativeFileSystem, NativeShellRunner};

    struct NoModules;
    impl ModuleLoader for NoModules {
        fn load(&mut self, path: &str) -> Result<VariableStore, ModuleError> {
            Err(ModuleError(format!("no modules in this test ('{path}')")))
        }
    }

    fn process(src: &str) -> String {
        let mut store = VariableStore::new();
        let mut modules = NoModules;
        let mut processor = ContentProcessor::new(
            &mut store,
            None,
            &NativeShellRunner,
            &NativeFileSystem,
            &AllowAllPolicy,
            &mut modules,
        );
        processor.process(src).unwrap()
    }

    #[test]
    fn variable_substitution() {
        let output = process("<!-- xmd: set name \"World\" -->\nHello {{name}}!");
        assert_eq!(output, "\nHello World!");
    }

    #[test]
    fn if_elif_else_picks_the_right_branch() {
        let output = process(
            "<!-- xmd: set x 5 -->\
<!-- xmd: if x == 1 -->one\
<!-- xmd: elif x == 5 -->five\
<!-- xmd: else -->other\
<!-- xmd: endif -->",
        );
        assert_eq!(output, "five");
    }

    #[test]
    fn for_loop_over_literal_array() {
        let output = process(
            "<!-- xmd: for item in [\"a\",\"b\",\"c\"] -->- {{item}}\n<!-- xmd: endfor -->",
        );
        assert_eq!(output, "- a\n- b\n- c\n");
    }

    #[test]
    fn indexed_for_loop() {
        let output = process(
            "<!-- xmd: for i, x in [\"p\",\"q\"] -->{{i}}:{{x}} <!-- xmd: endfor -->",
        );
        assert_eq!(output, "0:p 1:q ");
    }

    #[test]
    fn user_function_call_in_interpolation_does_not_leak_parameter() {
        let output = process(
            "<!-- xmd: function double x\nreturn x * 2 -->\n{{double(21)}}",
        );
        assert_eq!(output, "\n42");
    }

    #[test]
    fn join_with_custom_separator_after_assignment() {
        let output = process(
            "<!-- xmd: set arr [\"debug\",\"mock\",\"test\"] -->\n\
<!-- xmd: set kw join arr \"|\" -->\n\
{{kw}}",
        );
        assert_eq!(output, "\n\ndebug|mock|test");
    }

    #[test]
    fn unknown_directive_does_not_abort_the_document() {
        let output = process("before<!-- xmd: )( -->after");
        assert_eq!(output, "beforeafter");
    }

    #[test]
    fn non_xmd_comment_passes_through_verbatim() {
        let output = process("<!-- just a comment -->");
        assert_eq!(output, "<!-- just a comment -->");
    }

    #[test]
    fn if_nesting_past_the_depth_ceiling_does_not_desync_the_stack() {
        let mut src = String::new();
        for _ in 0..=MAX_IF_DEPTH {
            src.push_str("<!-- xmd: if true -->");
        }
        src.push_str("reached");
        for _ in 0..=MAX_IF_DEPTH {
            src.push_str("<!-- xmd: endif -->");
        }
        src.push_str("after");
        let output = process(&src);
        assert_eq!(output, "reachedafter");
    }
}
