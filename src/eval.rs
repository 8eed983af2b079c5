//! Tree-walking evaluator.
//!
//! [`Evaluator`] borrows the variable store non-owningly, since the content
//! processor that drives a document owns it for the document's lifetime,
//! and carries its own function/class tables, a module loader handle and an
//! output buffer fed by `print`.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::time::Duration;

use indexmap::IndexMap;

use crate::ast::{AssignOp, Block, BinaryOp, ElseBranch, Expr, Literal, LoopVars, Program, Stmt, UnaryOp};
use crate::capabilities::{FileSystem, ModuleLoader, SandboxPolicy, ShellRunner};
use crate::location::SourceLocation;
use crate::store::VariableStore;
use crate::value::Value;

const MAX_WHILE_ITERATIONS: usize = 1000;
const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
    pub location: SourceLocation,
}

impl Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.location)
    }
}

impl Error for EvalError {}

pub type EvalResult<T> = Result<T, EvalError>;

/// A proper sum type in place of sentinel break/continue strings threaded
/// through the evaluator's error channel. `Return` carries its value so it
/// can unwind through nested blocks without a second out-of-band field.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    None,
    Break,
    Continue,
    Return(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub parent: Option<String>,
    pub methods: HashMap<String, FunctionDef>,
}

/// Function/class definitions outlive any single [`Evaluator`] instance,
/// since the content processor keeps one table per document and hands out a
/// fresh evaluator per directive, while function definitions stay visible
/// to later directives and to the final `{{…}}` interpolation pass.
pub struct Evaluator<'a> {
    store: &'a mut VariableStore,
    functions: &'a mut HashMap<String, FunctionDef>,
    classes: &'a mut HashMap<String, ClassDef>,
    output: String,
    shell: &'a dyn ShellRunner,
    fs: &'a dyn FileSystem,
    modules: &'a mut dyn ModuleLoader,
    sandbox: &'a dyn SandboxPolicy,
    shell_timeout: Duration,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        store: &'a mut VariableStore,
        functions: &'a mut HashMap<String, FunctionDef>,
        classes: &'a mut HashMap<String, ClassDef>,
        shell: &'a dyn ShellRunner,
        fs: &'a dyn FileSystem,
        modules: &'a mut dyn ModuleLoader,
        sandbox: &'a dyn SandboxPolicy,
    ) -> Self {
        Self {
            store,
            functions,
            classes,
            output: String::new(),
            shell,
            fs,
            modules,
            sandbox,
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
        }
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    /// Drains the accumulated `print` output.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn eval_program(&mut self, program: &Program) -> EvalResult<ControlFlow> {
        self.eval_statements(&program.statements)
    }

    /// Evaluates a single statement standing alone, for callers (the content
    /// processor) that need per-statement results rather than a whole
    /// program's control flow.
    pub fn eval_statement_pub(&mut self, statement: &Stmt) -> EvalResult<ControlFlow> {
        self.eval_statement(statement)
    }

    pub fn eval_expr_pub(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.eval_expr(expr)
    }

    fn eval_statements(&mut self, statements: &[Stmt]) -> EvalResult<ControlFlow> {
        for statement in statements {
            let flow = self.eval_statement(statement)?;
            if flow != ControlFlow::None {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::None)
    }

    fn eval_statement(&mut self, statement: &Stmt) -> EvalResult<ControlFlow> {
        match statement {
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(ControlFlow::None)
            }
            Stmt::Assignment {
                name, op, value, ..
            } => {
                let evaluated = self.eval_expr(value)?;
                match op {
                    AssignOp::Assign => self.store.set(name.clone(), evaluated),
                    AssignOp::AddAssign => {
                        // `+=` against an unbound name binds the right-hand
                        // side as-is.
                        let combined = match self.store.get(name) {
                            Some(current) => {
                                Value::eval_binary(BinaryOp::Add, current.clone(), evaluated)
                            }
                            None => evaluated,
                        };
                        self.store.set(name.clone(), combined);
                    }
                }
                Ok(ControlFlow::None)
            }
            Stmt::FunctionDef {
                name, params, body, ..
            } => {
                self.functions.insert(
                    name.clone(),
                    FunctionDef {
                        params: params.clone(),
                        body: body.clone(),
                    },
                );
                Ok(ControlFlow::None)
            }
            Stmt::ClassDef {
                name,
                parent,
                methods,
                ..
            } => {
                let mut table = HashMap::new();
                for method in methods {
                    if let Stmt::FunctionDef {
                        name: method_name,
                        params,
                        body,
                        ..
                    } = method
                    {
                        table.insert(
                            method_name.clone(),
                            FunctionDef {
                                params: params.clone(),
                                body: body.clone(),
                            },
                        );
                    }
                }
                self.classes.insert(
                    name.clone(),
                    ClassDef {
                        parent: parent.clone(),
                        methods: table,
                    },
                );
                Ok(ControlFlow::None)
            }
            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(ControlFlow::Return(result))
            }
            Stmt::If {
                condition,
                then_block,
                else_branch,
                ..
            } => {
                if self.eval_expr(condition)?.is_truthy() {
                    self.eval_statements(&then_block.statements)
                } else {
                    self.eval_else_branch(else_branch)
                }
            }
            Stmt::For {
                vars,
                iterable,
                body,
                ..
            } => self.eval_for(vars, iterable, body),
            Stmt::While {
                condition, body, ..
            } => self.eval_while(condition, body),
            Stmt::Break(_) => Ok(ControlFlow::Break),
            Stmt::Continue(_) => Ok(ControlFlow::Continue),
            Stmt::Import { path, location } => {
                self.run_import(path, location)?;
                Ok(ControlFlow::None)
            }
        }
    }

    fn eval_else_branch(&mut self, branch: &ElseBranch) -> EvalResult<ControlFlow> {
        match branch {
            ElseBranch::None => Ok(ControlFlow::None),
            ElseBranch::Block(block) => self.eval_statements(&block.statements),
            ElseBranch::ElseIf(stmt) => self.eval_statement(stmt),
        }
    }

    fn eval_for(&mut self, vars: &LoopVars, iterable: &Expr, body: &Block) -> EvalResult<ControlFlow> {
        let Value::Array(items) = self.eval_expr(iterable)? else {
            // Non-array iterables produce no iterations rather than an error.
            return Ok(ControlFlow::None);
        };

        for (index, item) in items.iter().enumerate() {
            match vars {
                LoopVars::Single(name) => self.store.set(name.clone(), item.clone()),
                LoopVars::Indexed { index: idx, value } => {
                    self.store.set(idx.clone(), Value::Number(index as f64));
                    self.store.set(value.clone(), item.clone());
                }
            }

            match self.eval_statements(&body.statements)? {
                ControlFlow::Break => break,
                ControlFlow::Continue | ControlFlow::None => {}
                returned @ ControlFlow::Return(_) => return Ok(returned),
            }
        }
        Ok(ControlFlow::None)
    }

    fn eval_while(&mut self, condition: &Expr, body: &Block) -> EvalResult<ControlFlow> {
        let mut iterations = 0;
        while iterations < MAX_WHILE_ITERATIONS {
            if !self.eval_expr(condition)?.is_truthy() {
                break;
            }
            match self.eval_statements(&body.statements)? {
                ControlFlow::Break => break,
                ControlFlow::Continue | ControlFlow::None => {}
                returned @ ControlFlow::Return(_) => return Ok(returned),
            }
            iterations += 1;
        }
        Ok(ControlFlow::None)
    }

    fn run_import(&mut self, path: &str, location: &SourceLocation) -> EvalResult<()> {
        let bindings = self.modules.load(path).map_err(|e| EvalError {
            message: e.to_string(),
            location: location.clone(),
        })?;
        for key in bindings.keys() {
            if let Some(value) = bindings.get(&key) {
                self.store.set(key, value.clone());
            }
        }
        Ok(())
    }

    fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(literal, _) => Ok(match literal {
                Literal::String(s) => Value::string(self.interpolate(s)),
                Literal::Number(n) => Value::Number(*n),
                Literal::Boolean(b) => Value::Boolean(*b),
            }),
            Expr::ArrayLiteral(elements, _) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval_expr(element)?);
                }
                Ok(Value::array(values))
            }
            Expr::ObjectLiteral(entries, _) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    let value = self.eval_expr(value_expr)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            // Missing identifiers resolve to the empty string, never an
            // error, so Markdown substitution degrades gracefully instead
            // of aborting the document.
            Expr::Identifier(name, _) => {
                Ok(self.store.get(name).cloned().unwrap_or(Value::string("")))
            }
            Expr::ArrayAccess { target, index, .. } => self.eval_array_access(target, index),
            Expr::ObjectAccess {
                target, property, ..
            } => self.eval_object_access(target, property),
            Expr::Binary {
                op, left, right, ..
            } => {
                let left_value = self.eval_expr(left)?;
                // Logical operators short-circuit on the left operand.
                match op {
                    BinaryOp::And if !left_value.is_truthy() => return Ok(Value::Boolean(false)),
                    BinaryOp::Or if left_value.is_truthy() => return Ok(Value::Boolean(true)),
                    _ => {}
                }
                let right_value = self.eval_expr(right)?;
                Ok(Value::eval_binary(*op, left_value, right_value))
            }
            Expr::Unary { op, operand, .. } => {
                let value = self.eval_expr(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Boolean(!value.is_truthy()),
                    UnaryOp::Neg => match value {
                        Value::Number(n) => Value::Number(-n),
                        _ => Value::Null,
                    },
                })
            }
            Expr::Call {
                name,
                args,
                location,
            } => self.eval_call(name, args, location),
        }
    }

    fn eval_array_access(&mut self, target: &Expr, index: &Expr) -> EvalResult<Value> {
        let target_value = self.eval_expr(target)?;
        let index_value = self.eval_expr(index)?;
        Ok(match (&target_value, &index_value) {
            (Value::Array(items), Value::Number(n)) if *n >= 0.0 => {
                items.get(*n as usize).cloned().unwrap_or(Value::Null)
            }
            (Value::Object(map), Value::String(key)) => {
                map.get(key.as_ref()).cloned().unwrap_or(Value::Null)
            }
            (Value::String(s), Value::Number(n)) if *n >= 0.0 => s
                .chars()
                .nth(*n as usize)
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        })
    }

    /// Dot-style property access. No surface syntax produces this today
    /// (the lexer has no `.` token; `obj["key"]` covers the same ground via
    /// [`Self::eval_array_access`]), but the node stays evaluable as a
    /// distinct AST case for any future syntax that targets it.
    fn eval_object_access(&mut self, target: &Expr, property: &str) -> EvalResult<Value> {
        Ok(match self.eval_expr(target)? {
            Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        })
    }

    fn eval_call(&mut self, name: &str, args: &[Expr], location: &SourceLocation) -> EvalResult<Value> {
        match name {
            "print" => {
                if let Some(first) = args.first() {
                    let value = self.eval_expr(first)?;
                    self.output.push_str(&self.interpolate(&value.to_string()));
                }
                self.output.push('\n');
                Ok(Value::string(""))
            }
            "join" => self.eval_join(args),
            "exec" => self.eval_exec(args),
            "import" => {
                let Some(path_expr) = args.first() else {
                    return Ok(Value::string(""));
                };
                let path = self.eval_expr(path_expr)?.to_string();
                self.run_import(&path, location)?;
                Ok(Value::string(""))
            }
            "file_read" => {
                let Some(path) = self.first_arg_as_string(args)? else {
                    return Ok(Value::string(""));
                };
                Ok(self
                    .fs
                    .read(&path)
                    .map(Value::string)
                    .unwrap_or(Value::string("")))
            }
            "file_write" => {
                let mut iter = args.iter();
                let (Some(path_expr), Some(content_expr)) = (iter.next(), iter.next()) else {
                    return Ok(Value::Boolean(false));
                };
                let path = self.eval_expr(path_expr)?.to_string();
                let content = self.eval_expr(content_expr)?.to_string();
                Ok(Value::Boolean(self.fs.write(&path, &content).is_ok()))
            }
            "file_exists" => {
                let Some(path) = self.first_arg_as_string(args)? else {
                    return Ok(Value::Boolean(false));
                };
                Ok(Value::Boolean(self.fs.exists(&path)))
            }
            "file_delete" => {
                let Some(path) = self.first_arg_as_string(args)? else {
                    return Ok(Value::Boolean(false));
                };
                Ok(Value::Boolean(self.fs.delete(&path).is_ok()))
            }
            "file_list" => {
                let Some(path) = self.first_arg_as_string(args)? else {
                    return Ok(Value::array(vec![]));
                };
                Ok(self
                    .fs
                    .list(&path)
                    .map(|names| Value::array(names.into_iter().map(Value::string).collect()))
                    .unwrap_or(Value::array(vec![])))
            }
            _ => self.call_user_function(name, args),
        }
    }

    /// Substitutes each `${name}` with the current binding of `name` (or the
    /// empty string if unbound), the same lookup rule a bare identifier uses.
    /// Applied to every string literal as it's evaluated, and again to a
    /// `print` argument's already-stringified value, so a variable holding
    /// text like `"${x}"` is also interpolated when printed.
    fn interpolate(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            let Some(end) = rest[start + 2..].find('}') else {
                result.push_str(rest);
                return result;
            };
            let end = start + 2 + end;
            result.push_str(&rest[..start]);
            let name = &rest[start + 2..end];
            let value = self.store.get(name).cloned().unwrap_or(Value::string(""));
            result.push_str(&value.to_string());
            rest = &rest[end + 1..];
        }
        result.push_str(rest);
        result
    }

    fn first_arg_as_string(&mut self, args: &[Expr]) -> EvalResult<Option<String>> {
        match args.first() {
            Some(expr) => Ok(Some(self.eval_expr(expr)?.to_string())),
            None => Ok(None),
        }
    }

    fn eval_join(&mut self, args: &[Expr]) -> EvalResult<Value> {
        let mut iter = args.iter();
        let Some(array_expr) = iter.next() else {
            return Ok(Value::string(""));
        };
        let array_value = self.eval_expr(array_expr)?;
        let separator = match iter.next() {
            Some(sep_expr) => self.eval_expr(sep_expr)?.to_string(),
            None => ", ".to_owned(),
        };
        Ok(match array_value {
            Value::Array(items) => Value::string(
                items
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(&separator),
            ),
            other => Value::string(other.to_string()),
        })
    }

    fn eval_exec(&mut self, args: &[Expr]) -> EvalResult<Value> {
        let Some(command_expr) = args.first() else {
            return Ok(Value::string(""));
        };
        let command = self.eval_expr(command_expr)?.to_string();
        if !self.sandbox.is_allowed(&command) {
            return Ok(Value::string(format!(
                "exec error: '{command}' is not permitted"
            )));
        }
        Ok(match self.shell.run(&command, self.shell_timeout) {
            Ok(output) if output.success => Value::string(output.stdout),
            Ok(output) => Value::string(format!("exec error: {}", output.stderr.trim())),
            Err(err) => Value::string(format!("exec error: {err}")),
        })
    }

    /// Parameter binding: back up any existing binding of each parameter
    /// name, bind the evaluated argument, run the body, then restore the
    /// backup (or remove the binding if it didn't exist). Dynamic scope
    /// limited to parameter shadowing, nothing leaks out.
    fn call_user_function(&mut self, name: &str, args: &[Expr]) -> EvalResult<Value> {
        let Some(def) = self.functions.get(name).cloned() else {
            return Ok(Value::string(""));
        };
        if args.len() != def.params.len() {
            return Ok(Value::string(""));
        }

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.eval_expr(arg)?);
        }

        let backups: Vec<Option<Value>> = def
            .params
            .iter()
            .map(|param| self.store.get(param).cloned())
            .collect();
        for (param, value) in def.params.iter().zip(evaluated) {
            self.store.set(param.clone(), value);
        }

        let result = self.eval_statements(&def.body.statements);

        for (param, backup) in def.params.iter().zip(backups) {
            match backup {
                Some(value) => self.store.set(param.clone(), value),
                None => {
                    self.store.remove(param);
                }
            }
        }

        match result? {
            ControlFlow::Return(value) => Ok(value),
            _ => Ok(Value::string("")),
        }
    }
}
