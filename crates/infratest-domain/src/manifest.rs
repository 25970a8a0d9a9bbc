use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use toml_edit::{DocumentMut, Item, Table, Value};
use tracing::warn;

use crate::output::{OutputExpectation, OutputValue};
use crate::source::ModuleSource;

pub const MANIFEST_FILE: &str = "infratest.toml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("scenario #{index} in {path}: {message}")]
    InvalidScenario {
        path: PathBuf,
        index: usize,
        message: String,
    },
    #[error("scenario name '{name}' is declared more than once in {path}")]
    DuplicateScenario { path: PathBuf, name: String },
    #[error("no {MANIFEST_FILE} found in {start} or any parent directory")]
    NotFound { start: PathBuf },
}

/// One module under test plus what its outputs should be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub source: ModuleSource,
    /// Passed to the tool as `-var-file`, relative to the workspace.
    pub var_files: Vec<PathBuf>,
    /// Copied from the module dir into the workspace root after the tree copy.
    pub overlays: Vec<PathBuf>,
    pub upgrade: bool,
    /// Disables the default module copy filter.
    pub copy_all: bool,
    pub expect: OutputExpectation,
}

#[derive(Clone, Debug)]
pub struct ScenarioManifest {
    pub path: PathBuf,
    pub scenarios: Vec<Scenario>,
}

impl ScenarioManifest {
    pub fn find(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.name == name)
    }
}

/// Walks upward from `start` looking for `infratest.toml`.
pub fn discover_manifest(start: &Path) -> Result<PathBuf, ManifestError> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(MANIFEST_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    Err(ManifestError::NotFound {
        start: start.to_path_buf(),
    })
}

pub fn load_manifest(path: &Path) -> Result<ScenarioManifest, ManifestError> {
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    parse_manifest(&contents, &path)
}

/// Parses manifest text. Relative `root` entries resolve against the
/// directory containing `path`.
pub fn parse_manifest(contents: &str, path: &Path) -> Result<ScenarioManifest, ManifestError> {
    let doc: DocumentMut = contents.parse().map_err(|err: toml_edit::TomlError| {
        ManifestError::Parse {
            path: path.to_path_buf(),
            message: err.message().to_string(),
        }
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let Some(item) = doc.get("scenario") else {
        return Ok(ScenarioManifest {
            path: path.to_path_buf(),
            scenarios: Vec::new(),
        });
    };
    let tables = item
        .as_array_of_tables()
        .ok_or_else(|| ManifestError::Parse {
            path: path.to_path_buf(),
            message: "`scenario` must be declared as [[scenario]] tables".to_string(),
        })?;

    let mut seen = HashSet::new();
    let mut scenarios = Vec::with_capacity(tables.len());
    for (index, table) in tables.iter().enumerate() {
        let scenario = parse_scenario(table, base).map_err(|message| {
            ManifestError::InvalidScenario {
                path: path.to_path_buf(),
                index: index + 1,
                message,
            }
        })?;
        if !seen.insert(scenario.name.clone()) {
            return Err(ManifestError::DuplicateScenario {
                path: path.to_path_buf(),
                name: scenario.name,
            });
        }
        if scenario.expect.is_empty() {
            warn!(scenario = %scenario.name, "scenario declares no expected outputs");
        }
        scenarios.push(scenario);
    }

    Ok(ScenarioManifest {
        path: path.to_path_buf(),
        scenarios,
    })
}

fn parse_scenario(table: &Table, base: &Path) -> Result<Scenario, String> {
    let name = required_str(table, "name")?;
    let module = required_str(table, "module")?;
    let root = match table.get("root") {
        Some(item) => item
            .as_str()
            .ok_or_else(|| "`root` must be a string".to_string())?,
        None => ".",
    };
    let root = base.join(root);

    let upgrade = optional_bool(table, "upgrade")?.unwrap_or(true);
    let copy_all = optional_bool(table, "copy_all")?.unwrap_or(false);
    let var_files = path_list(table, "var_files")?;
    let overlays = path_list(table, "overlays")?;
    for overlay in &overlays {
        if overlay.file_name().is_none() {
            return Err(format!("overlay '{}' does not name a file", overlay.display()));
        }
    }

    let mut expect = OutputExpectation::new();
    if let Some(item) = table.get("expect") {
        let entries = item
            .as_table_like()
            .ok_or_else(|| "`expect` must be a table".to_string())?;
        for (output, value) in entries.iter() {
            let value = expected_value(value)
                .ok_or_else(|| format!("`expect.{output}` must be a string or array of strings"))?;
            expect.expect(output, value);
        }
    }

    Ok(Scenario {
        name: name.to_string(),
        source: ModuleSource::new(root, module),
        var_files,
        overlays,
        upgrade,
        copy_all,
        expect,
    })
}

fn required_str<'a>(table: &'a Table, key: &str) -> Result<&'a str, String> {
    match table.get(key).and_then(Item::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(format!("`{key}` must not be empty")),
        None => Err(format!("missing string field `{key}`")),
    }
}

fn optional_bool(table: &Table, key: &str) -> Result<Option<bool>, String> {
    match table.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_bool()
            .map(Some)
            .ok_or_else(|| format!("`{key}` must be a boolean")),
    }
}

fn path_list(table: &Table, key: &str) -> Result<Vec<PathBuf>, String> {
    let Some(item) = table.get(key) else {
        return Ok(Vec::new());
    };
    let array = item
        .as_array()
        .ok_or_else(|| format!("`{key}` must be an array of strings"))?;
    array
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(PathBuf::from)
                .ok_or_else(|| format!("`{key}` entries must be strings"))
        })
        .collect()
}

fn expected_value(item: &Item) -> Option<OutputValue> {
    match item.as_value()? {
        Value::String(value) => Some(OutputValue::Scalar(value.value().clone())),
        Value::Array(array) => array
            .iter()
            .map(|value| value.as_str().map(ToOwned::to_owned))
            .collect::<Option<Vec<_>>>()
            .map(OutputValue::List),
        _ => None,
    }
}
