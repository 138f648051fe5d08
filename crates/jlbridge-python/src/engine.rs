//! Embedded CPython engine.

use std::ffi::CString;

use pyo3::exceptions::{PyModuleNotFoundError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};

use jlbridge::ScopePath;
use jlbridge::worker::{Engine, ExecError, Execution};

use crate::helper::{Helper, Return};
use crate::value::PyValue;

/// Name the helper object is bound to while code runs.
const HELPER_NAME: &str = "jl";

/// Runs code with `exec` semantics inside module namespaces.
///
/// A global scope is the `__dict__` of module `name`, imported if it exists
/// and otherwise created and registered in `sys.modules` on first use.
/// Private scopes live under `jlbridge.scopes.<name>`.
#[derive(Debug, Default)]
pub struct PythonEngine;

fn exec_error(py: Python<'_>, err: PyErr) -> ExecError {
    let kind = err
        .get_type(py)
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    let message = err
        .value(py)
        .str()
        .map(|s| s.to_string())
        .unwrap_or_default();
    ExecError::new(kind, message)
}

fn module_namespace(py: Python<'_>, path: &ScopePath) -> PyResult<Py<PyDict>> {
    let name = path.path();
    let modules = py.import("sys")?.getattr("modules")?;
    let modules = modules.cast::<PyDict>()?;
    let module = match modules.get_item(name)? {
        Some(module) => module,
        None => match importable(py, path)? {
            Some(module) => module.into_any(),
            None => {
                tracing::debug!(module = name, "Registering scope module");
                let module = PyModule::new(py, name)?;
                modules.set_item(name, &module)?;
                module.into_any()
            }
        },
    };
    Ok(module.getattr("__dict__")?.cast_into::<PyDict>()?.unbind())
}

/// Imports a global scope that names a real module.
///
/// Only a missing module yields `None`; errors raised while importing one
/// that exists propagate.
fn importable<'py>(py: Python<'py>, path: &ScopePath) -> PyResult<Option<Bound<'py, PyModule>>> {
    let ScopePath::Global(name) = path else {
        return Ok(None);
    };
    match py.import(name.as_str()) {
        Ok(module) => Ok(Some(module)),
        Err(e) if e.is_instance_of::<PyModuleNotFoundError>(py) => Ok(None),
        Err(e) => Err(e),
    }
}

fn flush_stdio(py: Python<'_>) {
    let Ok(sys) = py.import("sys") else {
        return;
    };
    for stream in ["stdout", "stderr"] {
        if let Ok(stream) = sys.getattr(stream)
            && !stream.is_none()
            && let Err(e) = stream.call_method0("flush")
        {
            tracing::debug!(error = %e, "Failed to flush guest output");
        }
    }
}

fn run_code(
    py: Python<'_>,
    globals: &Bound<'_, PyDict>,
    code: &str,
    locals: Option<Vec<(String, PyValue)>>,
    helper: Helper,
) -> PyResult<()> {
    let code = CString::new(code)
        .map_err(|_| PyValueError::new_err("source code string cannot contain null bytes"))?;
    let helper = Bound::new(py, helper)?;

    match locals {
        Some(locals) => {
            let frame = PyDict::new(py);
            frame.set_item(HELPER_NAME, &helper)?;
            for (name, value) in locals {
                frame.set_item(name, value.into_inner())?;
            }
            py.run(&code, Some(globals), Some(&frame))
        }
        None => {
            // Bound for the duration of the run only; whatever the scope held
            // under the same name comes back afterwards.
            let previous = globals.get_item(HELPER_NAME)?;
            globals.set_item(HELPER_NAME, &helper)?;
            let result = py.run(&code, Some(globals), None);
            let restored = match previous {
                Some(previous) => globals.set_item(HELPER_NAME, previous),
                None if globals.contains(HELPER_NAME)? => globals.del_item(HELPER_NAME),
                None => Ok(()),
            };
            result.and(restored)
        }
    }
}

impl Engine for PythonEngine {
    type Value = PyValue;
    type Namespace = Py<PyDict>;

    fn create_namespace(&self, path: &ScopePath) -> Result<Py<PyDict>, ExecError> {
        Python::attach(|py| module_namespace(py, path).map_err(|e| exec_error(py, e)))
    }

    fn execute(&self, execution: Execution<'_, Self>) -> Result<(), ExecError> {
        let Execution {
            namespace,
            code,
            locals,
            encoder,
            slot,
        } = execution;

        Python::attach(|py| {
            let result = run_code(
                py,
                namespace.bind(py),
                code,
                locals,
                Helper::new(encoder, slot),
            );
            flush_stdio(py);
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.is_instance_of::<Return>(py) => Ok(()),
                Err(e) => Err(exec_error(py, e)),
            }
        })
    }
}
