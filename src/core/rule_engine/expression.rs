#![allow(clippy::result_large_err)]

use crate::core::config::SandboxConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use dashmap::DashMap;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, FnPtr, Map, AST};
use serde_json::{Map as JsonMap, Number, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Identifies the call site of an evaluation for error reporting.
#[derive(Debug, Clone, Default)]
pub struct EvalMeta {
    pub caller: String,
    pub template_id: Option<String>,
    pub workflow_id: Option<String>,
    pub task_id: Option<String>,
}

impl EvalMeta {
    pub fn for_caller(caller: impl Into<String>) -> Self {
        EvalMeta {
            caller: caller.into(),
            ..Default::default()
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = caller.into();
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub(crate) fn annotate(&self, mut error: AppError) -> AppError {
        if !self.caller.is_empty() {
            error.add_context("fn", &self.caller);
        }
        if let Some(ref template_id) = self.template_id {
            error.add_context("template_id", template_id);
        }
        if let Some(ref workflow_id) = self.workflow_id {
            error.add_context("workflow_id", workflow_id);
        }
        if let Some(ref task_id) = self.task_id {
            error.add_context("task_id", task_id);
        }
        error
    }
}

/// Per-call evaluation options.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    pub meta: EvalMeta,
    pub default_value: Option<Value>,
}

impl EvalOptions {
    pub fn new(meta: EvalMeta) -> Self {
        EvalOptions {
            meta,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Expression evaluation engine using a locked-down Rhai configuration.
///
/// Template expressions are script closures (`|documents| ...`). Each
/// distinct source string is compiled once and its AST cached; results
/// are never cached because the inputs change between task operations.
pub struct ExpressionEngine {
    engine: Engine,
    cache: DashMap<String, Arc<AST>>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        ExpressionEngine::new(&SandboxConfig::default())
    }
}

impl ExpressionEngine {
    pub fn new(limits: &SandboxConfig) -> Self {
        ExpressionEngineBuilder::new(limits.clone()).build()
    }

    pub fn builder(limits: SandboxConfig) -> ExpressionEngineBuilder {
        ExpressionEngineBuilder::new(limits)
    }

    /// Compile an expression into an AST without touching the cache.
    pub fn compile(&self, source: &str) -> Result<AST, AppError> {
        self.engine.compile(source).map_err(|err| {
            AppError::new(
                ErrorCategory::ExpressionError,
                format!("expression compile error: {}", err),
            )
            .with_code("TPE-EXPR-001")
        })
    }

    /// Number of distinct expression sources compiled so far.
    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    /// Evaluate a template expression against positional arguments.
    ///
    /// The expression must evaluate to a function; it is invoked with as
    /// many of `args` as it declares parameters. Failures yield the
    /// configured default value when one is present, otherwise an error
    /// annotated with the call-site metadata.
    pub fn eval_with_args(
        &self,
        source: &str,
        args: &[Value],
        opts: &EvalOptions,
    ) -> Result<Value, AppError> {
        match self.eval_inner(source, args, &opts.meta) {
            Ok(value) => Ok(value),
            Err(error) => match opts.default_value {
                Some(ref default) => {
                    tracing::debug!(
                        code = %error.code,
                        "expression failed, substituting default: {}",
                        error.message
                    );
                    Ok(default.clone())
                }
                None => Err(error),
            },
        }
    }

    /// Evaluate a condition expression; the result must be a boolean.
    pub fn eval_predicate(
        &self,
        source: &str,
        args: &[Value],
        meta: &EvalMeta,
    ) -> Result<bool, AppError> {
        match self.eval_inner(source, args, meta)? {
            Value::Bool(flag) => Ok(flag),
            other => Err(meta.annotate(
                AppError::new(
                    ErrorCategory::ExpressionError,
                    format!("condition returned a non-boolean value: {}", other),
                )
                .with_code("TPE-EXPR-002"),
            )),
        }
    }

    fn fetch(&self, source: &str) -> Result<Arc<AST>, AppError> {
        if let Some(ast) = self.cache.get(source) {
            return Ok(ast.clone());
        }
        let ast = Arc::new(self.compile(source)?);
        self.cache.insert(source.to_string(), ast.clone());
        Ok(ast)
    }

    fn eval_inner(&self, source: &str, args: &[Value], meta: &EvalMeta) -> Result<Value, AppError> {
        let ast = self.fetch(source)?;
        let target = self.engine.eval_ast::<Dynamic>(&ast).map_err(|err| {
            meta.annotate(
                AppError::new(
                    ErrorCategory::ExpressionError,
                    format!("expression evaluation error: {}", err),
                )
                .with_code("TPE-EXPR-002"),
            )
        })?;

        let fn_ptr = target.try_cast::<FnPtr>().ok_or_else(|| {
            meta.annotate(
                AppError::new(
                    ErrorCategory::ExpressionError,
                    "expression does not evaluate to a function",
                )
                .with_code("TPE-EXPR-003"),
            )
        })?;

        let mut call_args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
        // Templates usually declare only the leading parameters they use;
        // match the call to the declared arity, padding the rest with unit.
        if let Some(arity) = script_fn_arity(&ast, &fn_ptr) {
            call_args.truncate(arity);
            while call_args.len() < arity {
                call_args.push(Dynamic::UNIT);
            }
        }

        let result = fn_ptr
            .call::<Dynamic>(&self.engine, &ast, call_args)
            .map_err(|err| {
                meta.annotate(
                    AppError::new(
                        ErrorCategory::ExpressionError,
                        format!("expression evaluation error: {}", err),
                    )
                    .with_code("TPE-EXPR-002"),
                )
            })?;
        Ok(from_dynamic(result))
    }
}

/// Builds an [`ExpressionEngine`], optionally with extra audited helpers
/// callable from template expressions.
pub struct ExpressionEngineBuilder {
    engine: Engine,
}

impl ExpressionEngineBuilder {
    pub fn new(limits: SandboxConfig) -> Self {
        let mut engine = Engine::new_raw();
        // Standard package minus blob and time support: array, map, math
        // and string helpers stay available, wall-clock access does not.
        engine.register_global_module(CorePackage::new().as_shared_module());
        engine.register_global_module(BasicArrayPackage::new().as_shared_module());
        engine.register_global_module(BasicMapPackage::new().as_shared_module());
        engine.register_global_module(BasicMathPackage::new().as_shared_module());
        engine.register_global_module(MoreStringPackage::new().as_shared_module());
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_max_string_size(limits.max_string_size);
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});
        engine.register_fn("sha256_hex", |text: &str| {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hex::encode(hasher.finalize())
        });
        ExpressionEngineBuilder { engine }
    }

    /// Register a host helper under the given name.
    pub fn with_helper<F>(mut self, name: &str, helper: F) -> Self
    where
        F: Fn(Dynamic) -> Dynamic + Send + Sync + 'static,
    {
        self.engine.register_fn(name, helper);
        self
    }

    pub fn build(self) -> ExpressionEngine {
        ExpressionEngine {
            engine: self.engine,
            cache: DashMap::new(),
        }
    }
}

/// Declared parameter count of the script function behind `fn_ptr`,
/// excluding any curried (captured) arguments. `None` for native
/// function pointers.
fn script_fn_arity(ast: &AST, fn_ptr: &FnPtr) -> Option<usize> {
    ast.iter_functions()
        .find(|info| info.name == fn_ptr.fn_name())
        .map(|info| info.params.len().saturating_sub(fn_ptr.curry().len()))
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                // Beyond i64 range; rhai integers are i64.
                Dynamic::from(f)
            } else {
                Dynamic::from(0_i64)
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let mut arr = Array::new();
            for item in items {
                arr.push(to_dynamic(item));
            }
            Dynamic::from_array(arr)
        }
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.as_str().into(), to_dynamic(value));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Some(u) = value.clone().try_cast::<u64>() {
        return Value::Number(Number::from(u));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        if let Some(num) = Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(arr) = value.clone().try_cast::<Array>() {
        return Value::Array(arr.into_iter().map(from_dynamic).collect());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (key, value) in map {
            json_map.insert(key.into(), from_dynamic(value));
        }
        return Value::Object(json_map);
    }
    Value::Null
}
