use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::chunk::Program;
use crate::compiler::{compile_source, CompileError};
use crate::functions::HostFunctions;

/// Why a script couldn't be added to the cache.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Couldn't read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Script '{name}' failed to compile:\n{source}")]
    Compile {
        name: String,
        #[source]
        source: CompileError,
    },
    #[error("A script named '{0}' is already loaded.")]
    Duplicate(String),
    #[error("Can't name a script after {0}.")]
    BadName(String),
}

/// Compiled programs by name. Scripts are compiled once, against one set of host
/// functions, and shared by every VM that runs them.
#[derive(Debug)]
pub struct ScriptCache {
    programs: HashMap<String, Rc<Program>>,
    functions: Rc<HostFunctions>,
}

impl ScriptCache {
    #[allow(missing_docs)]
    pub fn new(functions: Rc<HostFunctions>) -> ScriptCache {
        ScriptCache {
            programs: HashMap::new(),
            functions,
        }
    }

    /// Compile a script file and cache it under its file name without the extension,
    /// so `scripts/enemy.tks` becomes `enemy`.
    pub fn load_file<P>(&mut self, path: P) -> Result<Rc<Program>, LoadError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| LoadError::BadName(path.display().to_string()))?;
        if self.programs.contains_key(name) {
            return Err(LoadError::Duplicate(name.to_string()));
        }
        let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.insert_source(name, &source)
    }

    /// Compile script text and cache it under `name`.
    pub fn insert_source(&mut self, name: &str, source: &str) -> Result<Rc<Program>, LoadError> {
        if self.programs.contains_key(name) {
            return Err(LoadError::Duplicate(name.to_string()));
        }
        let program = compile_source(source, &self.functions).map_err(|source| {
            LoadError::Compile {
                name: name.to_string(),
                source,
            }
        })?;
        let program = Rc::new(program);
        self.programs.insert(name.to_string(), Rc::clone(&program));
        log::debug!("loaded script '{}'", name);
        Ok(program)
    }

    #[allow(missing_docs)]
    pub fn get(&self, name: &str) -> Option<Rc<Program>> {
        self.programs.get(name).cloned()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// The host functions scripts are compiled against.
    pub fn functions(&self) -> &Rc<HostFunctions> {
        &self.functions
    }
}
