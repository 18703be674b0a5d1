//! Submit-file model for a single job.
//!
//! A [`JobDescriptor`] is an ordered `key = value` document. Field names are
//! case-insensitive. Most fields hold one scalar; a few hold lists whose
//! rendering is decided by a [`FieldRule`] (comma lists, AND-ed expressions,
//! quoted `;` lists). Arguments are kept separately so that one descriptor
//! can queue several argument sets.
//!
//! # Text format
//!
//! ```text
//! executable = /exec/0.sh
//! transfer_input_files = a.h5,b.h5
//! output = /exec/0.out
//! error = /exec/0.err
//! log = /exec/dag.submit.nodes.log
//! requirements = (CUDACapability >= 7) && (GPUMEM >= 8000)
//! universe = vanilla
//! priority = 20
//! arguments = "--fold 1"
//! queue
//! arguments = "--fold 2"
//! queue
//! ```

pub mod escape;
pub mod field;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use escape::{decode_argument, escape_argument};
pub use field::{FieldRule, FieldValue};

use crate::error::{DagError, Result};

/// Fields always emitted first, in this order.
const FIXED_ORDER: [&str; 7] = [
    "executable",
    "transfer_input_files",
    "output",
    "error",
    "log",
    "requirements",
    "universe",
];

/// Input accepted by [`JobDescriptor::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::One(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::One(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::One(value.clone())
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value::Many(values)
    }
}

impl From<&[&str]> for Value {
    fn from(values: &[&str]) -> Self {
        Value::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

impl Value {
    fn into_items(self) -> Vec<String> {
        match self {
            Value::One(value) => vec![value],
            Value::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobDescriptor {
    fields: BTreeMap<String, FieldValue>,
    /// Already escaped, one entry per `queue`.
    arguments: Vec<String>,
    frozen: bool,
    last_written: Option<PathBuf>,
}

impl PartialEq for JobDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields && self.arguments == other.arguments
    }
}

impl JobDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. Scalars are overwritten; list fields are cleared and
    /// refilled from `value`.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let key = self.writable_key(field)?;
        if key == "arguments" {
            self.arguments.clear();
            for raw in value.into().into_items() {
                self.arguments.push(escape_argument(&raw));
            }
            return Ok(());
        }

        let entry = self
            .fields
            .entry(key.clone())
            .or_insert_with(|| FieldValue::empty(FieldRule::for_field(&key)));
        entry.clear();
        for item in value.into().into_items() {
            entry.append(&item);
        }
        Ok(())
    }

    /// Append one element to a list field. On a scalar field this overwrites.
    pub fn append(&mut self, field: &str, item: &str) -> Result<()> {
        let key = self.writable_key(field)?;
        self.fields
            .entry(key.clone())
            .or_insert_with(|| FieldValue::empty(FieldRule::for_field(&key)))
            .append(item);
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> Result<Option<FieldValue>> {
        let key = self.writable_key(field)?;
        Ok(self.fields.remove(&key))
    }

    /// Rendered value of a field.
    pub fn get(&self, field: &str) -> Option<String> {
        self.fields
            .get(&field.to_ascii_lowercase())
            .map(FieldValue::format)
    }

    /// Raw elements of a field, before rendering.
    pub fn items(&self, field: &str) -> Option<Vec<&str>> {
        self.fields
            .get(&field.to_ascii_lowercase())
            .map(FieldValue::items)
    }

    /// Queue one more argument set.
    pub fn add_argument(&mut self, raw: &str) -> Result<()> {
        self.writable_key("arguments")?;
        self.arguments.push(escape_argument(raw));
        Ok(())
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Expand `pattern` and add every match to `transfer_input_files`.
    ///
    /// With `copy_to`, each match is first copied into that directory (unless an
    /// identical file is already there) and the copy is recorded instead.
    /// Returns the recorded paths; an empty result is logged as a warning.
    pub fn add_transfer_input(
        &mut self,
        pattern: &str,
        copy_to: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        self.writable_key("transfer_input_files")?;

        let matches: Vec<PathBuf> = glob::glob(pattern)?
            .filter_map(std::result::Result::ok)
            .collect();

        if matches.is_empty() {
            tracing::warn!(pattern, "Transfer input pattern matched no files");
            return Ok(Vec::new());
        }

        let mut recorded = Vec::with_capacity(matches.len());
        for source in matches {
            let path = match copy_to {
                Some(dir) => copy_if_changed(&source, dir)?,
                None => source,
            };
            self.append("transfer_input_files", &path.to_string_lossy())?;
            recorded.push(path);
        }
        Ok(recorded)
    }

    /// Render the submit file.
    pub fn serialize(&self) -> Result<String> {
        match self.fields.get("executable") {
            Some(value) if !value.is_empty() => {}
            _ => return Err(DagError::MissingExecutable),
        }

        let mut lines = Vec::with_capacity(self.fields.len() + self.arguments.len() * 2 + 1);
        let ordered = FIXED_ORDER
            .iter()
            .filter_map(|key| self.fields.get_key_value(*key))
            .chain(
                self.fields
                    .iter()
                    .filter(|(key, _)| !FIXED_ORDER.contains(&key.as_str())),
            );
        for (key, value) in ordered {
            if !value.is_empty() {
                lines.push(format!("{} = {}", key, value.format()));
            }
        }

        if self.arguments.is_empty() {
            lines.push("queue".to_string());
        } else {
            for args in &self.arguments {
                lines.push(format!("arguments = {}", args));
                lines.push("queue".to_string());
            }
        }

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(text)
    }

    /// Parse text produced by [`serialize`](Self::serialize).
    pub fn parse(text: &str) -> Result<Self> {
        let mut descriptor = Self::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case("queue") || line.to_ascii_lowercase().starts_with("queue ") {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(DagError::Parse {
                    line: lineno + 1,
                    message: format!("expected `key = value`, got {:?}", line),
                });
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if key == "arguments" {
                descriptor.arguments.push(value.to_string());
                continue;
            }

            let rule = FieldRule::for_field(&key);
            let mut field = FieldValue::empty(rule);
            for item in rule.split(value) {
                field.append(&item);
            }
            descriptor.fields.insert(key, field);
        }

        Ok(descriptor)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Serialize to `path`. Returns false when nothing changed since the last
    /// write to the same path.
    pub fn write(&mut self, path: &Path) -> Result<bool> {
        if self.last_written.as_deref() == Some(path) && path.exists() {
            return Ok(false);
        }
        let text = self.serialize()?;
        fs::write(path, text)?;
        self.last_written = Some(path.to_path_buf());
        Ok(true)
    }

    /// Mark the descriptor as handed to the scheduler. Further mutation fails.
    pub fn freeze(&mut self) -> Result<()> {
        if self.frozen {
            return Err(DagError::AlreadySubmitted);
        }
        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn writable_key(&mut self, field: &str) -> Result<String> {
        let key = field.to_ascii_lowercase();
        if self.frozen {
            return Err(DagError::Frozen(key));
        }
        self.last_written = None;
        Ok(key)
    }
}

fn copy_if_changed(source: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| DagError::Internal(format!("no file name in {}", source.display())))?;
    let dest = dir.join(file_name);

    if dest.exists() && fs::read(&dest)? == fs::read(source)? {
        tracing::debug!(dest = %dest.display(), "Transfer input already present");
    } else {
        fs::copy(source, &dest)?;
    }
    Ok(dest)
}
