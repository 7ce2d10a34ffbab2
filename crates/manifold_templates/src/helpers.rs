//! Custom Tera functions and filters available to every template.
//!
//! Functions that touch the filesystem resolve their paths against the
//! template they were registered for, through the run's [`PathResolver`].
//!
//! | name            | kind     | purpose                                          |
//! |-----------------|----------|--------------------------------------------------|
//! | `read`          | function | file contents as a string                        |
//! | `read_glob`     | function | `[{name, path, content}]` for every match        |
//! | `ls`            | function | matching paths (files, or directories)           |
//! | `hash`          | function | SHA-256 of a file, hex encoded                   |
//! | `exec`          | function | stdout of a shell command (opt-in)               |
//! | `validate`      | function | fails the render when an item breaks a schema    |
//! | `indent`        | filter   | indent every line but the first                  |
//! | `regex_replace` | filter   | regex substitution over a string                 |
//! | `clamp`         | filter   | bound a number                                   |
//! | `parse`         | filter   | YAML text to a tree                              |
//! | `escape`        | filter   | composite values to inline JSON                  |
//! | `pick_regex`    | filter   | keep object keys matching a pattern              |
//! | `omit_regex`    | filter   | drop object keys matching a pattern              |

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use sha2::{Digest, Sha256};
use tera::{Tera, Value};

use crate::paths::PathResolver;
use crate::schema::SchemaValidator;

/// Settings that shape the helper set.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelperOptions {
    pub resolver: PathResolver,
    pub dry_run: bool,
    pub enable_exec: bool,
}

/// Register every helper on `tera` for the template at `location`.
pub fn register_helpers(tera: &mut Tera, location: &Path, options: HelperOptions) {
    let location = location.to_path_buf();
    tera.register_function("read", create_read_function(options.resolver, location.clone()));
    tera.register_function(
        "read_glob",
        create_read_glob_function(options.resolver, location.clone()),
    );
    tera.register_function("ls", create_ls_function(options.resolver, location.clone()));
    tera.register_function(
        "hash",
        create_hash_function(options.resolver, location, options.dry_run),
    );
    tera.register_function("exec", create_exec_function(options.enable_exec));
    tera.register_function("validate", validate_function);

    tera.register_filter("indent", indent_filter);
    tera.register_filter("regex_replace", regex_replace_filter);
    tera.register_filter("clamp", clamp_filter);
    tera.register_filter("parse", parse_filter);
    tera.register_filter("escape", escape_filter);
    tera.register_filter("pick_regex", create_key_filter(true));
    tera.register_filter("omit_regex", create_key_filter(false));
}

fn str_arg<'a>(args: &'a HashMap<String, Value>, name: &str, helper: &str) -> tera::Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg(format!("{} requires a string `{}` argument", helper, name)))
}

fn bool_arg(args: &HashMap<String, Value>, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn path_string(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

pub fn create_read_function(resolver: PathResolver, location: PathBuf) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let file = str_arg(args, "path", "read")?;
        let resolved = resolver.resolve(file, &location);
        let content = fs::read_to_string(&resolved)
            .map_err(|e| tera::Error::msg(format!("read {}: {}", resolved.display(), e)))?;
        Ok(Value::String(content))
    }
}

pub fn create_read_glob_function(
    resolver: PathResolver,
    location: PathBuf,
) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let pattern = str_arg(args, "pattern", "read_glob")?;
        let parse = bool_arg(args, "parse");
        let files = resolver
            .glob_files(pattern, &location)
            .map_err(|e| tera::Error::msg(e.to_string()))?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let text = fs::read_to_string(&file)
                .map_err(|e| tera::Error::msg(format!("read_glob {}: {}", file.display(), e)))?;
            let content = if parse {
                serde_yaml::from_str(&text)
                    .map_err(|e| tera::Error::msg(format!("read_glob {}: {}", file.display(), e)))?
            } else {
                Value::String(text)
            };
            let name = file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(serde_json::json!({
                "name": name,
                "path": path_string(&file),
                "content": content,
            }));
        }
        Ok(Value::Array(entries))
    }
}

pub fn create_ls_function(resolver: PathResolver, location: PathBuf) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let pattern = str_arg(args, "pattern", "ls")?;
        let directories = bool_arg(args, "directories");
        let paths = resolver
            .glob(pattern, &location)
            .map_err(|e| tera::Error::msg(e.to_string()))?;
        Ok(Value::Array(
            paths
                .iter()
                .filter(|path| if directories { path.is_dir() } else { path.is_file() })
                .map(|path| path_string(path))
                .collect(),
        ))
    }
}

pub fn create_hash_function(
    resolver: PathResolver,
    location: PathBuf,
    dry_run: bool,
) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let file = str_arg(args, "path", "hash")?;
        if dry_run {
            return Ok(Value::String(format!("<dry-run-hash:{}>", file)));
        }
        let resolved = resolver.resolve(file, &location);
        let bytes = fs::read(&resolved)
            .map_err(|e| tera::Error::msg(format!("hash {}: {}", resolved.display(), e)))?;
        Ok(Value::String(hex::encode(Sha256::digest(&bytes))))
    }
}

pub fn create_exec_function(enabled: bool) -> impl tera::Function + 'static {
    move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        if !enabled {
            return Err(tera::Error::msg("Execution not enabled"));
        }
        let command = str_arg(args, "command", "exec")?;
        let output = shell(command)
            .output()
            .map_err(|e| tera::Error::msg(format!("exec `{}`: {}", command, e)))?;
        if !output.status.success() {
            return Err(tera::Error::msg(format!(
                "exec `{}` exited with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(Value::String(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }
}

/// A `Command` running `command` through the platform shell.
pub fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn validate_function(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let item = args
        .get("item")
        .ok_or_else(|| tera::Error::msg("validate requires an `item` argument"))?;
    let schema = args
        .get("schema")
        .ok_or_else(|| tera::Error::msg("validate requires a `schema` argument"))?;
    let validator = SchemaValidator::compile(schema).map_err(|e| tera::Error::msg(e.to_string()))?;
    match validator.check(item) {
        Ok(()) => Ok(Value::String(String::new())),
        Err(violations) => Err(tera::Error::msg(format!(
            "Validation failed for {}: {}",
            item.get("name").and_then(Value::as_str).unwrap_or("<unnamed>"),
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        ))),
    }
}

fn indent_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let content = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("indent filter requires a string"))?;
    let level = args.get("level").and_then(Value::as_u64).unwrap_or(2) as usize;
    let fill = args.get("char").and_then(Value::as_str).unwrap_or(" ");
    let prefix = fill.repeat(level);

    let indented = content
        .split('\n')
        .enumerate()
        .map(|(index, line)| {
            if index == 0 {
                line.to_string()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Value::String(indented))
}

fn regex_replace_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let content = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("regex_replace filter requires a string"))?;
    let pattern = str_arg(args, "pattern", "regex_replace")?;
    let replacement = args.get("with").and_then(Value::as_str).unwrap_or("");
    let regex = Regex::new(pattern).map_err(|e| tera::Error::msg(e.to_string()))?;
    Ok(Value::String(regex.replace_all(content, replacement).into_owned()))
}

fn clamp_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let number = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg("clamp filter requires a number"))?;
    let min = args.get("min").and_then(Value::as_f64).unwrap_or(f64::MIN);
    let max = args.get("max").and_then(Value::as_f64).unwrap_or(f64::MAX);
    let clamped = number.max(min).min(max);

    if value.is_i64() || value.is_u64() {
        if clamped.fract() == 0.0 {
            return Ok(Value::from(clamped as i64));
        }
    }
    Ok(Value::from(clamped))
}

fn parse_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("parse filter requires a string"))?;
    serde_yaml::from_str(text).map_err(|e| tera::Error::msg(format!("parse: {}", e)))
}

fn escape_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(Value::String(
            serde_json::to_string(value).map_err(|e| tera::Error::msg(e.to_string()))?,
        )),
        other => Ok(other.clone()),
    }
}

/// Keep (or drop, when `keep` is false) object keys matching `pattern`.
pub fn create_key_filter(keep: bool) -> impl tera::Filter + 'static {
    move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
        let object = value
            .as_object()
            .ok_or_else(|| tera::Error::msg("key filters require an object"))?;
        let pattern = str_arg(args, "pattern", "pick_regex")?;
        let regex = Regex::new(pattern).map_err(|e| tera::Error::msg(e.to_string()))?;
        Ok(Value::Object(
            object
                .iter()
                .filter(|(key, _)| regex.is_match(key) == keep)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ))
    }
}
