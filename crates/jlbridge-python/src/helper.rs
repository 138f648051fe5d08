//! The `jl` object guest code sees: result return and formatter constructors.

use std::sync::Arc;

use pyo3::exceptions::{PyBaseException, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyString, PyTuple, PyType};

use jlbridge::format::{
    ArrayFormat, BoolFormat, BufferFormat, BytesFormat, DictFormat, FloatFormat, FormatSpec,
    Guard, Guarded, IntFormat, ListFormat, NoneFormat, RationalFormat, RefFormat, SetFormat,
    SpecError, StrFormat, TupleFormat, Union, media,
};
use jlbridge::value::HostError;
use jlbridge::{Encoder, FormatError, ReturnSlot, SharedFormat};

use crate::value::{PyValue, host_error};

pyo3::create_exception!(
    jlbridge,
    Return,
    PyBaseException,
    "Unwinds guest code once jl.ret has stored the result."
);

/// A formatter handed to guest code.
#[pyclass(frozen, name = "Format", module = "jlbridge")]
pub struct PyFormat {
    name: String,
    inner: SharedFormat<PyValue>,
}

#[pymethods]
impl PyFormat {
    fn __repr__(&self) -> String {
        format!("jl.{}", self.name)
    }
}

/// `isinstance` check against a class (or tuple of classes) from guest code.
struct TypeGuard(Py<PyAny>);

impl Guard<PyValue> for TypeGuard {
    fn admits(&self, value: &PyValue) -> Result<bool, HostError> {
        Python::attach(|py| {
            value
                .bind(py)
                .is_instance(self.0.bind(py))
                .map_err(|e| host_error(py, e))
        })
    }

    fn describe(&self) -> String {
        Python::attach(|py| {
            let isa = self.0.bind(py);
            let name = |class: &Bound<'_, PyAny>| match class.cast::<PyType>() {
                Ok(t) => t.name().map(|n| n.to_string()).unwrap_or_default(),
                Err(_) => class.to_string(),
            };
            match isa.cast::<PyTuple>() {
                Ok(classes) => classes
                    .iter()
                    .map(|class| name(&class))
                    .collect::<Vec<_>>()
                    .join(" or "),
                Err(_) => name(isa),
            }
        })
    }
}

/// Python exception for a formatter failure.
///
/// Host errors re-raise the exception that caused them.
pub fn format_error(err: FormatError) -> PyErr {
    match err {
        FormatError::Mismatch(message) => PyTypeError::new_err(message),
        FormatError::Domain(message) => PyValueError::new_err(message),
        FormatError::Host(e) => e
            .into_payload::<PyErr>()
            .unwrap_or_else(|e| PyRuntimeError::new_err(e.to_string())),
    }
}

fn spec_error(err: SpecError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

#[pyclass(frozen, name = "Helper", module = "jlbridge")]
pub struct Helper {
    encoder: Encoder<PyValue>,
    slot: ReturnSlot,
}

impl Helper {
    pub fn new(encoder: Encoder<PyValue>, slot: ReturnSlot) -> Self {
        Self { encoder, slot }
    }

    /// Accept a `Format`, a registered name, or a JSON-like spec.
    fn resolve(&self, py: Python<'_>, fmt: &Bound<'_, PyAny>) -> PyResult<SharedFormat<PyValue>> {
        if let Ok(format) = fmt.cast::<PyFormat>() {
            return Ok(Arc::clone(&format.get().inner));
        }
        let registry = self.encoder.registry();
        if let Ok(name) = fmt.cast::<PyString>() {
            return registry.named(&name.to_cow()?).map_err(spec_error);
        }
        let json: String = py.import("json")?.call_method1("dumps", (fmt,))?.extract()?;
        let spec: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| PyValueError::new_err(format!("invalid format spec: {e}")))?;
        let spec = FormatSpec::parse(&spec).map_err(spec_error)?;
        registry.build(&spec).map_err(spec_error)
    }

    /// Like [`Helper::resolve`], but `None` stands for the null formatter.
    fn member(&self, py: Python<'_>, fmt: &Bound<'_, PyAny>) -> PyResult<SharedFormat<PyValue>> {
        if fmt.is_none() {
            return Ok(Arc::new(NoneFormat));
        }
        self.resolve(py, fmt)
    }

    fn element(
        &self,
        py: Python<'_>,
        fmt: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<Option<SharedFormat<PyValue>>> {
        fmt.filter(|f| !f.is_none())
            .map(|f| self.resolve(py, f))
            .transpose()
    }

    fn members(&self, py: Python<'_>, fmts: &Bound<'_, PyTuple>) -> PyResult<Vec<SharedFormat<PyValue>>> {
        fmts.iter().map(|f| self.member(py, &f)).collect()
    }

    fn finish(
        &self,
        name: &str,
        inner: SharedFormat<PyValue>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyFormat {
        let inner: SharedFormat<PyValue> = match isa.filter(|isa| !isa.is_none()) {
            Some(isa) => Arc::new(Guarded::new(
                Arc::new(TypeGuard(isa.clone().unbind())),
                inner,
            )),
            None => inner,
        };
        PyFormat {
            name: name.to_string(),
            inner,
        }
    }

    fn store(
        &self,
        py: Python<'_>,
        val: Option<&Bound<'_, PyAny>>,
        fmt: Option<SharedFormat<PyValue>>,
    ) -> PyResult<()> {
        let value = match val {
            Some(val) => PyValue::from_bound(val),
            None => PyValue::new(py.None()),
        };
        let node = self
            .encoder
            .encode(&value, fmt.as_ref())
            .map_err(format_error)?;
        self.slot.fill(node);
        Ok(())
    }
}

#[pymethods]
impl Helper {
    /// Encode `val` (with `fmt`, or the Any chain) and end the run.
    #[pyo3(signature = (val=None, fmt=None))]
    fn ret(
        &self,
        py: Python<'_>,
        val: Option<&Bound<'_, PyAny>>,
        fmt: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        let fmt = self.element(py, fmt)?;
        self.store(py, val, fmt)?;
        Err(Return::new_err(()))
    }

    /// Return `val` as an opaque reference.
    #[pyo3(signature = (val=None))]
    fn ret_ref(&self, py: Python<'_>, val: Option<&Bound<'_, PyAny>>) -> PyResult<()> {
        self.store(py, val, Some(Arc::new(RefFormat)))?;
        Err(Return::new_err(()))
    }

    #[pyo3(name = "Any", signature = (*, isa=None))]
    fn any(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        let any: SharedFormat<PyValue> = self.encoder.registry().any().clone();
        self.finish("Any", any, isa)
    }

    #[pyo3(name = "Bool", signature = (*, isa=None))]
    fn bool_(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Bool", Arc::new(BoolFormat), isa)
    }

    #[pyo3(name = "Str", signature = (*, isa=None))]
    fn str_(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Str", Arc::new(StrFormat), isa)
    }

    #[pyo3(name = "Int", signature = (*, isa=None))]
    fn int(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Int", Arc::new(IntFormat), isa)
    }

    #[pyo3(name = "Float", signature = (*, isa=None))]
    fn float(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Float", Arc::new(FloatFormat), isa)
    }

    #[pyo3(name = "Rational", signature = (*, isa=None))]
    fn rational(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Rational", Arc::new(RationalFormat), isa)
    }

    #[pyo3(name = "Bytes", signature = (*, isa=None))]
    fn bytes(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Bytes", Arc::new(BytesFormat), isa)
    }

    #[pyo3(name = "Buffer", signature = (*, isa=None))]
    fn buffer(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Buffer", Arc::new(BufferFormat), isa)
    }

    #[pyo3(name = "Array", signature = (*, isa=None))]
    fn array(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Array", Arc::new(ArrayFormat), isa)
    }

    #[pyo3(name = "Media", signature = (*, isa=None))]
    fn media(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Media", Arc::new(media::<PyValue>()), isa)
    }

    #[pyo3(name = "Ref", signature = (*, isa=None))]
    fn ref_(&self, isa: Option<&Bound<'_, PyAny>>) -> PyFormat {
        self.finish("Ref", Arc::new(RefFormat), isa)
    }

    /// First member that applies; `None` as a member means the null formatter.
    #[pyo3(name = "Union", signature = (*fmts, isa=None))]
    fn union(
        &self,
        py: Python<'_>,
        fmts: &Bound<'_, PyTuple>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let members = self.members(py, fmts)?;
        Ok(self.finish("Union", Arc::new(Union::new(members)), isa))
    }

    #[pyo3(name = "Optional", signature = (*fmts, isa=None))]
    fn optional(
        &self,
        py: Python<'_>,
        fmts: &Bound<'_, PyTuple>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let members = self.members(py, fmts)?;
        Ok(self.finish("Optional", Arc::new(Union::optional(members)), isa))
    }

    #[pyo3(name = "List", signature = (elfmt=None, *, isa=None))]
    fn list(
        &self,
        py: Python<'_>,
        elfmt: Option<&Bound<'_, PyAny>>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let element = self.element(py, elfmt)?;
        Ok(self.finish("List", Arc::new(ListFormat::new(element)), isa))
    }

    #[pyo3(name = "Set", signature = (elfmt=None, *, isa=None))]
    fn set(
        &self,
        py: Python<'_>,
        elfmt: Option<&Bound<'_, PyAny>>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let element = self.element(py, elfmt)?;
        Ok(self.finish("Set", Arc::new(SetFormat::new(element)), isa))
    }

    #[pyo3(name = "Dict", signature = (keyfmt=None, valfmt=None, *, isa=None))]
    fn dict(
        &self,
        py: Python<'_>,
        keyfmt: Option<&Bound<'_, PyAny>>,
        valfmt: Option<&Bound<'_, PyAny>>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let key = self.element(py, keyfmt)?;
        let val = self.element(py, valfmt)?;
        Ok(self.finish("Dict", Arc::new(DictFormat::new(key, val)), isa))
    }

    /// With no slots, every element goes through Any.
    #[pyo3(name = "Tuple", signature = (*slots, isa=None))]
    fn tuple(
        &self,
        py: Python<'_>,
        slots: &Bound<'_, PyTuple>,
        isa: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<PyFormat> {
        let format = if slots.is_empty() {
            TupleFormat::Uniform(None)
        } else {
            TupleFormat::Slots(self.members(py, slots)?)
        };
        Ok(self.finish("Tuple", Arc::new(format), isa))
    }
}
