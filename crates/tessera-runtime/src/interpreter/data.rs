//! The built-in data interpreter.
//!
//! A module is a TOML document. Top-level keys are properties, except
//! for these reserved tables:
//!
//! | Table | Shape |
//! |-------|-------|
//! | `imports` | name → module URI, relative to this module |
//! | `resources` | name → resource URI |
//! | `output` | `text`, `value`, `files.<name> = { text } \| { value, format }` |
//! | `facts` | name → list of booleans |
//! | `examples` | name → `{ actual, expected? }` |
//! | `classes` | name → `{ extends?, doc?, properties = { name = "Type" } }` |
//! | `typealiases` | name → `"Type"` |
//!
//! # References
//!
//! A string containing `${...}` is evaluated lazily. A string that is one
//! reference keeps the referenced value's type; otherwise each reference
//! is rendered into the surrounding text.
//!
//! | Form | Meaning |
//! |------|---------|
//! | `${a.b}` | property path, then import name, then `resources.<name>` |
//! | `${env NAME}` | `env:NAME` resource |
//! | `${prop NAME}` | `prop:NAME` resource |
//! | `${read URI}` | any resource, as text |
//! | `${trace EXPR}` | evaluates `EXPR` and logs it |
//! | `${warn EXPR}` | same, at warning level |
//! | `${throw MESSAGE}` | fails the evaluation |

use super::{Interpreter, ModuleInstance};
use crate::error::{ResolveError, UserError, VmError};
use crate::evaluator::VmContext;
use crate::module::ResolvedModule;
use crate::schema::{ClassSchema, ModuleSchema, PropertySchema, TypeAlias};
use crate::stack::StackFrame;
use crate::test_results::{TestResult, TestResults};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tessera_types::Value;
use toml::Table;
use url::Url;

const RESERVED: &[&str] = &[
    "imports",
    "resources",
    "output",
    "facts",
    "examples",
    "classes",
    "typealiases",
];

/// Loads TOML modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataInterpreter;

impl Interpreter for DataInterpreter {
    fn load(
        &self,
        vm: &VmContext,
        module: &ResolvedModule,
    ) -> Result<Arc<dyn ModuleInstance>, VmError> {
        vm.check_interrupted()?;
        let text = module.text()?;
        let display = module.original_uri().to_string();
        let table = text.parse::<Table>().map_err(|e| {
            UserError::new(format!("cannot parse module: {}", e.message()))
                .at(StackFrame::new(display.as_str(), "<module>"))
        })?;
        let instance = DataModule::new(module.resolved_uri().clone(), display, table)?;
        tracing::debug!(
            uri = %instance.uri,
            properties = instance.members.len(),
            "module loaded"
        );
        Ok(Arc::new(instance))
    }
}

// ─── DataModule ─────────────────────────────────────────────────────

#[derive(Debug)]
struct DataModule {
    uri: Url,
    display: String,
    members: Table,
    imports: BTreeMap<String, String>,
    resources: BTreeMap<String, String>,
    output: Table,
    facts: Table,
    examples: Table,
    classes: Table,
    typealiases: Table,
    cache: Mutex<HashMap<String, Value>>,
    in_progress: Mutex<HashSet<String>>,
}

fn take_table(table: &mut Table, key: &str, display: &str) -> Result<Table, UserError> {
    match table.remove(key) {
        None => Ok(Table::new()),
        Some(toml::Value::Table(t)) => Ok(t),
        Some(other) => Err(UserError::new(format!(
            "`{key}` must be a table, got {}",
            other.type_str()
        ))
        .at(StackFrame::new(display, key))),
    }
}

fn take_strings(
    table: &mut Table,
    key: &str,
    display: &str,
) -> Result<BTreeMap<String, String>, UserError> {
    take_table(table, key, display)?
        .into_iter()
        .map(|(name, value)| match value {
            toml::Value::String(s) => Ok((name, s)),
            other => Err(UserError::new(format!(
                "`{key}.{name}` must be a string, got {}",
                other.type_str()
            ))
            .at(StackFrame::new(display, key))),
        })
        .collect()
}

/// Removes `name` from the in-progress set on drop, including on unwind.
struct InProgress<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InProgress<'a> {
    fn enter(set: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        if !set.lock().insert(name.to_string()) {
            return None;
        }
        Some(Self {
            set,
            name: name.to_string(),
        })
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}

fn split_path(expression: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = expression.split('.').collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    valid.then_some(segments)
}

fn infer_type(raw: &toml::Value) -> &'static str {
    match raw {
        toml::Value::String(s) if s.contains("${") => "Any",
        toml::Value::String(_) | toml::Value::Datetime(_) => "String",
        toml::Value::Integer(_) => "Int",
        toml::Value::Float(_) => "Float",
        toml::Value::Boolean(_) => "Boolean",
        toml::Value::Array(_) => "Listing",
        toml::Value::Table(_) => "Dynamic",
    }
}

fn optional_string(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(toml::Value::as_str).map(str::to_string)
}

/// Errors a test records instead of propagating.
fn test_error(err: VmError) -> Result<String, VmError> {
    match err {
        VmError::Cancelled | VmError::Bug(_) => Err(err),
        VmError::Eval(e) => Ok(e.message),
        VmError::Denied(e) => Ok(e.to_string()),
        VmError::Resolve(e) => Ok(e.to_string()),
    }
}

fn expect_text(member: &str, value: Value) -> Result<String, VmError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(VmError::user(format!(
            "`{member}` must be a String, got {}",
            other.type_name()
        ))),
    }
}

fn render(value: &Value, format: Option<&str>) -> Result<String, VmError> {
    match format.unwrap_or("json") {
        "json" => Ok(value.to_json_pretty()),
        "toml" => toml::to_string_pretty(value)
            .map_err(|e| VmError::user(format!("cannot render output as toml: {e}"))),
        other => Err(VmError::user(format!("unsupported output format `{other}`"))),
    }
}

impl DataModule {
    fn new(uri: Url, display: String, mut table: Table) -> Result<Self, UserError> {
        let imports = take_strings(&mut table, "imports", &display)?;
        let resources = take_strings(&mut table, "resources", &display)?;
        let output = take_table(&mut table, "output", &display)?;
        let facts = take_table(&mut table, "facts", &display)?;
        let examples = take_table(&mut table, "examples", &display)?;
        let classes = take_table(&mut table, "classes", &display)?;
        let typealiases = take_table(&mut table, "typealiases", &display)?;
        debug_assert!(RESERVED.iter().all(|k| !table.contains_key(*k)));
        Ok(Self {
            uri,
            display,
            members: table,
            imports,
            resources,
            output,
            facts,
            examples,
            classes,
            typealiases,
            cache: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
        })
    }

    fn frame(&self, member: &str) -> StackFrame {
        StackFrame::new(self.display.as_str(), member)
    }

    fn framed(&self, member: &str, err: VmError) -> VmError {
        match err {
            VmError::Eval(e) => VmError::Eval(e.at(self.frame(member))),
            other => other,
        }
    }

    fn member(&self, vm: &VmContext, name: &str) -> Result<Value, VmError> {
        vm.check_interrupted()?;
        if let Some(value) = self.cache.lock().get(name) {
            return Ok(value.clone());
        }
        let raw = self
            .members
            .get(name)
            .ok_or_else(|| VmError::user(format!("cannot find member `{name}`")))?;
        let _guard = InProgress::enter(&self.in_progress, name).ok_or_else(|| {
            self.framed(name, VmError::user(format!("cyclic reference to `{name}`")))
        })?;
        let value = self
            .resolve(vm, name, raw)
            .map_err(|e| self.framed(name, e))?;
        self.cache.lock().insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn resolve(&self, vm: &VmContext, member: &str, raw: &toml::Value) -> Result<Value, VmError> {
        Ok(match raw {
            toml::Value::String(s) => return self.interpolate(vm, member, s),
            toml::Value::Integer(i) => Value::Int(*i),
            toml::Value::Float(x) => Value::Float(*x),
            toml::Value::Boolean(b) => Value::Bool(*b),
            toml::Value::Datetime(d) => Value::String(d.to_string()),
            toml::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.resolve(vm, member, item))
                    .collect::<Result<_, _>>()?,
            ),
            toml::Value::Table(table) => Value::Object(
                table
                    .iter()
                    .map(|(k, v)| self.resolve(vm, member, v).map(|value| (k.clone(), value)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn interpolate(&self, vm: &VmContext, member: &str, text: &str) -> Result<Value, VmError> {
        if let Some(inner) = text
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .filter(|inner| !inner.contains('}'))
        {
            return self.expression(vm, member, inner.trim());
        }
        if !text.contains("${") {
            return Ok(Value::String(text.to_string()));
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| VmError::user(format!("unterminated reference in {text:?}")))?;
            match self.expression(vm, member, after[..end].trim())? {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }

    fn expression(&self, vm: &VmContext, member: &str, expression: &str) -> Result<Value, VmError> {
        let (head, rest) = expression
            .split_once(char::is_whitespace)
            .map_or((expression, ""), |(head, rest)| (head, rest.trim()));
        match head {
            "trace" => {
                let value = self.expression(vm, member, rest)?;
                vm.trace(&value.to_string(), &self.frame(member));
                Ok(value)
            }
            "warn" => {
                let value = self.expression(vm, member, rest)?;
                vm.warn(&value.to_string(), &self.frame(member));
                Ok(value)
            }
            "throw" => Err(VmError::user(rest)),
            "env" => self.read_text(vm, &format!("env:{rest}")),
            "prop" => self.read_text(vm, &format!("prop:{rest}")),
            "read" => self.read_text(vm, rest),
            _ if rest.is_empty() => match split_path(expression) {
                Some(path) => self.path(vm, &path),
                None => Err(VmError::user(format!("invalid member path `{expression}`"))),
            },
            _ => Err(VmError::user(format!("cannot evaluate `{expression}`"))),
        }
    }

    fn read_text(&self, vm: &VmContext, spec: &str) -> Result<Value, VmError> {
        let resource = vm.read_resource(&self.uri, spec)?;
        resource
            .as_text()
            .map(|text| Value::String(text.to_string()))
            .ok_or_else(|| VmError::user(format!("resource `{spec}` is not valid UTF-8")))
    }

    fn path(&self, vm: &VmContext, path: &[&str]) -> Result<Value, VmError> {
        let Some((first, rest)) = path.split_first() else {
            return self.export(vm);
        };
        let missing = || VmError::user(format!("cannot find member `{}`", path.join(".")));
        if self.members.contains_key(*first) {
            let value = self.member(vm, first)?;
            return value
                .get_path(rest.iter().copied())
                .cloned()
                .ok_or_else(missing);
        }
        if let Some(spec) = self.imports.get(*first) {
            let module = vm.import(&self.uri, spec)?;
            return module.read_member(vm, rest);
        }
        if *first == "resources" {
            if let [name] = rest {
                if let Some(spec) = self.resources.get(*name) {
                    return self.read_text(vm, spec);
                }
            }
        }
        Err(missing())
    }

    fn output_entry(&self, key: &str) -> Option<&toml::Value> {
        self.output.get(key)
    }

    fn files(&self) -> Result<Option<&Table>, VmError> {
        match self.output_entry("files") {
            None => Ok(None),
            Some(toml::Value::Table(files)) => Ok(Some(files)),
            Some(other) => Err(self.framed(
                "output.files",
                VmError::user(format!("`output.files` must be a table, got {}", other.type_str())),
            )),
        }
    }

    fn expected_file(&self) -> Option<PathBuf> {
        if self.uri.scheme() != "file" {
            return None;
        }
        let path = self.uri.to_file_path().ok()?;
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        Some(path.with_file_name(format!("{stem}-expected.json")))
    }

    fn run_fact(&self, vm: &VmContext, name: &str, raw: &toml::Value) -> Result<TestResult, VmError> {
        let label = format!("facts.{name}");
        let mut result = TestResult::new(name);
        let single = std::slice::from_ref(raw);
        let items = match raw {
            toml::Value::Array(items) => items.as_slice(),
            _ => single,
        };
        result.total_asserts = items.len();
        for (index, item) in items.iter().enumerate() {
            match self.resolve(vm, &label, item) {
                Ok(Value::Bool(true)) => {}
                Ok(Value::Bool(false)) => result
                    .failures
                    .push(format!("assertion #{} failed", index + 1)),
                Ok(other) => result.errors.push(format!(
                    "assertion #{} is a {}, expected Boolean",
                    index + 1,
                    other.type_name()
                )),
                Err(e) => result.errors.push(test_error(e)?),
            }
        }
        Ok(result)
    }

    fn run_example(
        &self,
        vm: &VmContext,
        name: &str,
        raw: &toml::Value,
        overwrite: bool,
        stored: &mut BTreeMap<String, Value>,
        writable: bool,
    ) -> Result<(TestResult, bool), VmError> {
        let label = format!("examples.{name}");
        let mut result = TestResult::new(name);
        result.total_asserts = 1;
        let Some(actual) = raw.get("actual") else {
            result.errors.push("example has no `actual` value".to_string());
            return Ok((result, false));
        };
        let actual = match self.resolve(vm, &label, actual) {
            Ok(value) => value,
            Err(e) => {
                result.errors.push(test_error(e)?);
                return Ok((result, false));
            }
        };
        let expected = match raw.get("expected") {
            Some(inline) => match self.resolve(vm, &label, inline) {
                Ok(value) => Some(value),
                Err(e) => {
                    result.errors.push(test_error(e)?);
                    return Ok((result, false));
                }
            },
            None if overwrite => None,
            None => stored.get(name).cloned(),
        };
        match expected {
            Some(expected) if expected != actual => result
                .failures
                .push(format!("expected {expected} but got {actual}")),
            Some(_) => {}
            None if writable => {
                stored.insert(name.to_string(), actual);
                result.is_example_written = true;
                return Ok((result, true));
            }
            None => result
                .errors
                .push("no expected value, and the module is not a file".to_string()),
        }
        Ok((result, false))
    }
}

fn load_expected(path: &std::path::Path) -> Result<BTreeMap<String, Value>, VmError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(ResolveError::io(path.display(), e).into()),
    };
    serde_json::from_str(&text).map_err(|e| {
        VmError::user(format!(
            "cannot parse expected output `{}`: {e}",
            path.display()
        ))
    })
}

fn store_expected(path: &std::path::Path, stored: &BTreeMap<String, Value>) -> Result<(), VmError> {
    let json = serde_json::to_string_pretty(stored)
        .map_err(|e| VmError::Bug(format!("cannot serialize expected output: {e}")))?;
    std::fs::write(path, json + "\n").map_err(|e| ResolveError::io(path.display(), e))?;
    tracing::info!(path = %path.display(), "expected example output written");
    Ok(())
}

impl ModuleInstance for DataModule {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn force(&self, vm: &VmContext) -> Result<(), VmError> {
        self.export(vm).map(drop)
    }

    fn export(&self, vm: &VmContext) -> Result<Value, VmError> {
        self.members
            .keys()
            .map(|name| self.member(vm, name).map(|value| (name.clone(), value)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Object)
    }

    fn read_member(&self, vm: &VmContext, path: &[&str]) -> Result<Value, VmError> {
        self.path(vm, path)
    }

    fn output_text(&self, vm: &VmContext) -> Result<String, VmError> {
        match self.output_entry("text") {
            Some(raw) => self
                .resolve(vm, "output.text", raw)
                .and_then(|value| expect_text("output.text", value))
                .map_err(|e| self.framed("output.text", e)),
            None => render(&self.output_value(vm)?, vm.output_format())
                .map_err(|e| self.framed("output.text", e)),
        }
    }

    fn output_value(&self, vm: &VmContext) -> Result<Value, VmError> {
        match self.output_entry("value") {
            Some(raw) => self
                .resolve(vm, "output.value", raw)
                .map_err(|e| self.framed("output.value", e)),
            None => self.export(vm),
        }
    }

    fn output_file_names(&self, vm: &VmContext) -> Result<Vec<String>, VmError> {
        vm.check_interrupted()?;
        Ok(self
            .files()?
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn output_file_text(&self, vm: &VmContext, name: &str) -> Result<String, VmError> {
        vm.check_interrupted()?;
        let label = format!("output.files.{name}");
        let entry = self
            .files()?
            .and_then(|files| files.get(name))
            .ok_or_else(|| {
                self.framed(&label, VmError::user(format!("no output file named `{name}`")))
            })?;
        let rendered = match entry {
            toml::Value::Table(entry) => match (entry.get("text"), entry.get("value")) {
                (Some(text), _) => self
                    .resolve(vm, &label, text)
                    .and_then(|value| expect_text(&label, value)),
                (None, Some(value)) => {
                    let format = entry
                        .get("format")
                        .and_then(toml::Value::as_str)
                        .or_else(|| vm.output_format());
                    self.resolve(vm, &label, value)
                        .and_then(|value| render(&value, format))
                }
                (None, None) => Err(VmError::user(format!(
                    "output file `{name}` has neither `text` nor `value`"
                ))),
            },
            other => self
                .resolve(vm, &label, other)
                .and_then(|value| expect_text(&label, value)),
        };
        rendered.map_err(|e| self.framed(&label, e))
    }

    fn evaluate_expression(&self, vm: &VmContext, expression: &str) -> Result<Value, VmError> {
        let expression = expression.trim();
        if let Some(path) = split_path(expression) {
            return self.path(vm, &path);
        }
        let parsed = format!("value = {expression}")
            .parse::<Table>()
            .map_err(|_| VmError::user(format!("invalid expression `{expression}`")))?;
        let raw = parsed
            .get("value")
            .ok_or_else(|| VmError::user(format!("invalid expression `{expression}`")))?;
        self.resolve(vm, "<expression>", raw)
            .map_err(|e| self.framed("<expression>", e))
    }

    fn schema(&self, vm: &VmContext) -> Result<ModuleSchema, VmError> {
        vm.check_interrupted()?;
        let properties = self
            .members
            .iter()
            .map(|(name, raw)| (name.clone(), PropertySchema::new(name, infer_type(raw))))
            .collect();

        let mut classes = BTreeMap::new();
        for (name, raw) in &self.classes {
            let toml::Value::Table(class) = raw else {
                return Err(self.framed(
                    "classes",
                    VmError::user(format!("class `{name}` must be a table")),
                ));
            };
            let mut declared = BTreeMap::new();
            if let Some(toml::Value::Table(props)) = class.get("properties") {
                for (prop, ty) in props {
                    let ty = ty.as_str().ok_or_else(|| {
                        self.framed(
                            "classes",
                            VmError::user(format!("type of `{name}.{prop}` must be a string")),
                        )
                    })?;
                    declared.insert(prop.clone(), PropertySchema::new(prop, ty));
                }
            }
            classes.insert(
                name.clone(),
                ClassSchema {
                    name: name.clone(),
                    superclass: optional_string(class, "extends"),
                    doc: optional_string(class, "doc"),
                    properties: declared,
                },
            );
        }

        let mut type_aliases = BTreeMap::new();
        for (name, raw) in &self.typealiases {
            let aliased = raw.as_str().ok_or_else(|| {
                self.framed(
                    "typealiases",
                    VmError::user(format!("type alias `{name}` must be a string")),
                )
            })?;
            type_aliases.insert(
                name.clone(),
                TypeAlias {
                    name: name.clone(),
                    aliased_type: aliased.to_string(),
                },
            );
        }

        Ok(ModuleSchema {
            module_uri: self.display.clone(),
            module_name: ModuleSchema::name_from_uri(&self.display),
            properties,
            classes,
            type_aliases,
        })
    }

    fn run_tests(&self, vm: &VmContext, overwrite: bool) -> Result<TestResults, VmError> {
        let mut results = TestResults {
            module_name: ModuleSchema::name_from_uri(&self.display),
            display_uri: self.display.clone(),
            ..TestResults::default()
        };
        for (name, raw) in &self.facts {
            vm.check_interrupted()?;
            results.facts.results.push(self.run_fact(vm, name, raw)?);
        }

        let expected_file = self.expected_file();
        let mut stored = match &expected_file {
            Some(path) if !self.examples.is_empty() => load_expected(path)?,
            _ => BTreeMap::new(),
        };
        let mut dirty = false;
        for (name, raw) in &self.examples {
            vm.check_interrupted()?;
            let (result, written) = self.run_example(
                vm,
                name,
                raw,
                overwrite,
                &mut stored,
                expected_file.is_some(),
            )?;
            dirty |= written;
            results.examples.results.push(result);
        }
        if let (true, Some(path)) = (dirty, &expected_file) {
            store_expected(path, &stored)?;
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::module::{factories, ModuleResolver, ResolveContext};
    use crate::resource::{readers, ResourceManager};
    use crate::source::ModuleSource;
    use tessera_auth::PermissivePolicy;

    fn vm() -> VmContext {
        let resolve = ResolveContext::new(Arc::new(PermissivePolicy))
            .with_env(BTreeMap::from([("HOME".to_string(), "/home/tess".to_string())]));
        VmContext::new(
            ModuleResolver::new(vec![factories::standard_library(), factories::file()]),
            ResourceManager::new(&[
                readers::environment_variables(),
                readers::external_properties(),
                readers::file(),
            ]),
            resolve,
            Arc::new(DataInterpreter),
            Arc::new(NoopLogger),
        )
    }

    fn load(vm: &VmContext, text: &str) -> Arc<dyn ModuleInstance> {
        vm.load(&ModuleSource::text(text)).expect("should load")
    }

    #[test]
    fn references_keep_type_and_interpolate() {
        let vm = vm();
        let module = load(
            &vm,
            "port = 8080\ncopy = \"${port}\"\nurl = \"http://localhost:${port}/\"\n",
        );
        assert_eq!(module.read_member(&vm, &["copy"]).expect("ok"), Value::Int(8080));
        assert_eq!(
            module.read_member(&vm, &["url"]).expect("ok"),
            Value::from("http://localhost:8080/")
        );
    }

    #[test]
    fn nested_paths_and_missing_members() {
        let vm = vm();
        let module = load(&vm, "[server]\nhost = \"h\"\n");
        assert_eq!(
            module.read_member(&vm, &["server", "host"]).expect("ok"),
            Value::from("h")
        );
        let err = module
            .read_member(&vm, &["server", "port"])
            .expect_err("should be missing");
        assert!(err.to_string().contains("server.port"), "got: {err}");
    }

    #[test]
    fn cycles_are_reported_with_frames() {
        let vm = vm();
        let module = load(&vm, "a = \"${b}\"\nb = \"${a}\"\n");
        match module.read_member(&vm, &["a"]) {
            Err(VmError::Eval(e)) => {
                assert!(e.message.contains("cyclic"), "got: {}", e.message);
                assert!(e.frames.iter().any(|f| f.member == "b"));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn imports_stdlib_members() {
        let vm = vm();
        let module = load(&vm, "[imports]\nmath = \"pkl:math\"\n\n[consts]\npi = \"${math.pi}\"\n");
        assert_eq!(
            module.read_member(&vm, &["consts", "pi"]).expect("ok"),
            Value::Float(std::f64::consts::PI)
        );
    }

    #[test]
    fn env_reads_go_through_resources() {
        let vm = vm();
        let module = load(&vm, "home = \"${env HOME}\"\n");
        assert_eq!(module.read_member(&vm, &["home"]).expect("ok"), Value::from("/home/tess"));
    }

    #[test]
    fn throw_is_user_error_at_member() {
        let vm = vm();
        let module = load(&vm, "bad = \"${throw nope}\"\n");
        match module.force(&vm) {
            Err(VmError::Eval(e)) => {
                assert_eq!(e.message, "nope");
                assert_eq!(e.frames[0].member, "bad");
            }
            other => panic!("expected user error, got {other:?}"),
        }
    }

    #[test]
    fn default_output_renders_per_format() {
        let render_as = |format: Option<&str>| {
            let ctx = vm().with_output(format.map(str::to_string), false);
            let module = load(&ctx, "name = \"x\"\n");
            module.output_text(&ctx)
        };
        let json = render_as(None).expect("should render json");
        assert!(json.contains("\"name\": \"x\""), "got: {json}");
        let toml = render_as(Some("toml")).expect("should render toml");
        assert_eq!(toml.trim(), "name = \"x\"");
        assert!(render_as(Some("yaml")).is_err());
    }

    #[test]
    fn output_files_render_lazily() {
        let vm = vm();
        let module = load(
            &vm,
            "n = 1\n[output.files]\n\"a.txt\" = { text = \"n=${n}\" }\n\"b.json\" = { value = \"${n}\", format = \"json\" }\n\"c.txt\" = { text = \"${throw broken}\" }\n",
        );
        assert_eq!(
            module.output_file_names(&vm).expect("ok"),
            vec!["a.txt".to_string(), "b.json".to_string(), "c.txt".to_string()]
        );
        assert_eq!(module.output_file_text(&vm, "a.txt").expect("ok"), "n=1");
        assert_eq!(module.output_file_text(&vm, "b.json").expect("ok"), "1");
        assert!(module.output_file_text(&vm, "c.txt").is_err());
        assert!(module.output_file_text(&vm, "nope").is_err());
    }

    #[test]
    fn expressions_accept_paths_and_literals() {
        let vm = vm();
        let module = load(&vm, "a = 2\n");
        assert_eq!(module.evaluate_expression(&vm, "a").expect("ok"), Value::Int(2));
        assert_eq!(
            module.evaluate_expression(&vm, "\"a is ${a}\"").expect("ok"),
            Value::from("a is 2")
        );
        assert!(module.evaluate_expression(&vm, "a +").is_err());
    }

    #[test]
    fn schema_does_not_evaluate_bodies() {
        let vm = vm();
        let module = load(
            &vm,
            "name = \"x\"\nlazy = \"${throw never}\"\n[classes.Bird]\nextends = \"Animal\"\nproperties = { wings = \"Int\" }\n[typealiases]\nId = \"String\"\n",
        );
        let schema = module.schema(&vm).expect("should describe");
        assert_eq!(schema.properties["name"].type_name, "String");
        assert_eq!(schema.properties["lazy"].type_name, "Any");
        assert_eq!(schema.classes["Bird"].superclass.as_deref(), Some("Animal"));
        assert_eq!(schema.classes["Bird"].properties["wings"].type_name, "Int");
        assert_eq!(schema.type_aliases["Id"].aliased_type, "String");
        assert_eq!(schema.module_name, "text");
    }

    #[test]
    fn facts_count_failures_and_errors() {
        let vm = vm();
        let module = load(
            &vm,
            "x = 1\n[facts]\nok = [true, true]\nmixed = [true, false, \"${throw boom}\", 3]\n",
        );
        let results = module.run_tests(&vm, false).expect("should run");
        assert_eq!(results.total_tests(), 2);
        assert_eq!(results.total_failures(), 1);
        assert_eq!(results.total_errors(), 2);
        assert!(results.failed());
    }

    #[test]
    fn examples_write_expected_file_once() {
        let dir = tempfile::tempdir().expect("should create dir");
        let path = dir.path().join("birds.pkl");
        std::fs::write(&path, "[examples.count]\nactual = 3\n").expect("should write");
        let uri = Url::from_file_path(&path).expect("absolute path");

        let vm = vm();
        let module = vm.load(&ModuleSource::url(&uri)).expect("should load");
        let first = module.run_tests(&vm, false).expect("should run");
        assert!(first.is_example_written());
        assert!(!first.failed());
        assert!(dir.path().join("birds-expected.json").exists());

        let second = module.run_tests(&vm, false).expect("should run");
        assert!(!second.is_example_written());
        assert!(!second.failed());
    }

    #[test]
    fn inline_expectation_mismatch_fails() {
        let vm = vm();
        let module = load(&vm, "[examples.e]\nactual = 1\nexpected = 2\n");
        let results = module.run_tests(&vm, false).expect("should run");
        assert_eq!(results.total_failures(), 1);
        assert!(results.examples.results[0].failures[0].contains("expected 2 but got 1"));
    }

    #[test]
    fn malformed_reserved_table_is_user_error() {
        let vm = vm();
        let err = vm
            .load(&ModuleSource::text("imports = 3\n"))
            .expect_err("should reject");
        assert!(matches!(err, VmError::Eval(_)), "got: {err:?}");
    }
}
