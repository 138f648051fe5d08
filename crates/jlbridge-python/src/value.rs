//! Python objects as runtime values.
//!
//! Every check attaches to the interpreter for its own duration; nested
//! attaches while guest code holds the GIL are free.

use pyo3::exceptions::{PyAttributeError, PyBufferError, PyTypeError, PyValueError, PyZeroDivisionError};
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyByteArray, PyBytes, PyDict, PyFloat, PyInt, PyList, PyMemoryView, PyString, PyTuple,
};
use pyo3::IntoPyObjectExt;

use jlbridge::value::{
    ArrayCapabilities, BufferView, Class, Construct, HostError, HostErrorClass, HostValue, Integer,
    MimePayload,
};

/// `_repr_*_` hook for each MIME type the render formatter asks for.
const RENDER_HOOKS: &[(&str, &str)] = &[
    ("image/png", "_repr_png_"),
    ("image/jpeg", "_repr_jpeg_"),
    ("image/svg+xml", "_repr_svg_"),
    ("text/html", "_repr_html_"),
    ("text/markdown", "_repr_markdown_"),
    ("text/latex", "_repr_latex_"),
    ("application/json", "_repr_json_"),
];

/// Strong reference to a Python object.
#[derive(Debug)]
pub struct PyValue(Py<PyAny>);

impl PyValue {
    pub fn new(obj: Py<PyAny>) -> Self {
        Self(obj)
    }

    pub fn from_bound(obj: &Bound<'_, PyAny>) -> Self {
        Self(obj.clone().unbind())
    }

    pub fn bind<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.0.bind(py)
    }

    pub fn into_inner(self) -> Py<PyAny> {
        self.0
    }
}

/// Classify a Python exception for the formatter chain, keeping the
/// original exception so it can be re-raised unchanged.
///
/// `AttributeError` counts as a type mismatch: it is how a missing protocol
/// method (`items`, `numerator`) shows up.
pub fn host_error(py: Python<'_>, err: PyErr) -> HostError {
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
    let class = if err.is_instance_of::<PyTypeError>(py) || err.is_instance_of::<PyAttributeError>(py)
    {
        HostErrorClass::Type
    } else if err.is_instance_of::<PyZeroDivisionError>(py) {
        HostErrorClass::Domain
    } else {
        HostErrorClass::Other
    };
    HostError::new(class, kind, message).with_payload(err)
}

fn attach<T>(f: impl FnOnce(Python<'_>) -> PyResult<T>) -> Result<T, HostError> {
    Python::attach(|py| f(py).map_err(|e| host_error(py, e)))
}

fn abc<'py>(py: Python<'py>, module: &str, name: &str) -> PyResult<Bound<'py, PyAny>> {
    py.import(module)?.getattr(name)
}

fn to_integer(obj: &Bound<'_, PyAny>) -> PyResult<Integer> {
    let int = obj.py().get_type::<PyInt>().call1((obj,))?;
    if let Ok(n) = int.extract::<i64>() {
        return Ok(Integer::Small(n));
    }
    let text = int.str()?.to_string();
    Integer::parse(&text)
        .ok_or_else(|| PyValueError::new_err(format!("invalid integer literal '{text}'")))
}

/// Bytes of a rich-display payload. Anything other than `str`/`bytes`
/// (e.g. a dict under `application/json`) is serialized with `json.dumps`.
fn to_payload(obj: &Bound<'_, PyAny>) -> PyResult<MimePayload> {
    if let Ok(s) = obj.cast::<PyString>() {
        return Ok(MimePayload::Text(s.to_cow()?.into_owned()));
    }
    if let Ok(b) = obj.cast::<PyBytes>() {
        return Ok(MimePayload::Binary(b.as_bytes().to_vec()));
    }
    let text = obj.py().import("json")?.call_method1("dumps", (obj,))?;
    Ok(MimePayload::Text(text.str()?.to_string()))
}

/// Some hooks return `(data, metadata)`; only the data matters.
fn strip_metadata<'py>(obj: Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>> {
    if let Ok(t) = obj.cast::<PyTuple>()
        && !t.is_empty()
    {
        return t.get_item(0);
    }
    Ok(obj)
}

/// Export through the buffer protocol, in column-major order.
fn export_buffer(obj: &Bound<'_, PyAny>) -> PyResult<Option<BufferView>> {
    let py = obj.py();
    let view = match PyMemoryView::from(obj) {
        Ok(view) => view,
        Err(e) if e.is_instance_of::<PyTypeError>(py) => return Ok(None),
        Err(e) => return Err(e),
    };

    let kwargs = PyDict::new(py);
    kwargs.set_item("order", "F")?;
    let exported = (|| -> PyResult<BufferView> {
        Ok(BufferView {
            format: view.getattr("format")?.extract()?,
            itemsize: view.getattr("itemsize")?.extract()?,
            shape: view.getattr("shape")?.extract()?,
            data: view
                .call_method("tobytes", (), Some(&kwargs))?
                .cast::<PyBytes>()?
                .as_bytes()
                .to_vec(),
        })
    })();
    let _ = view.call_method0("release");

    match exported {
        Ok(buffer) => Ok(Some(buffer)),
        Err(e) if e.is_instance_of::<PyBufferError>(py) || e.is_instance_of::<PyValueError>(py) => {
            tracing::debug!(error = %e, "Buffer export failed");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn callable_attr<'py>(obj: &Bound<'py, PyAny>, name: &str) -> PyResult<Option<Bound<'py, PyAny>>> {
    if !obj.hasattr(name)? {
        return Ok(None);
    }
    let attr = obj.getattr(name)?;
    Ok(attr.is_callable().then_some(attr))
}

impl HostValue for PyValue {
    fn share(&self) -> Self {
        Python::attach(|py| Self(self.0.clone_ref(py)))
    }

    fn type_name(&self) -> String {
        Python::attach(|py| {
            self.bind(py)
                .get_type()
                .name()
                .map(|name| name.to_string())
                .unwrap_or_else(|_| "object".to_string())
        })
    }

    fn is_instance(&self, class: Class) -> Result<bool, HostError> {
        attach(|py| {
            let obj = self.bind(py);
            let is = match class {
                Class::None => obj.is_none(),
                Class::Bool => obj.is_instance_of::<PyBool>(),
                Class::Str => obj.is_instance_of::<PyString>(),
                Class::Float => obj.is_instance_of::<PyFloat>(),
                Class::Tuple => obj.is_instance_of::<PyTuple>(),
                Class::Bytes => obj.is_instance_of::<PyBytes>() || obj.is_instance_of::<PyByteArray>(),
                Class::Integral => obj.is_instance(&abc(py, "numbers", "Integral")?)?,
                Class::Rational => obj.is_instance(&abc(py, "numbers", "Rational")?)?,
                Class::Mapping => obj.is_instance(&abc(py, "collections.abc", "Mapping")?)?,
                Class::Sequence => obj.is_instance(&abc(py, "collections.abc", "Sequence")?)?,
                Class::Set => obj.is_instance(&abc(py, "collections.abc", "Set")?)?,
            };
            Ok(is)
        })
    }

    fn is_none(&self) -> bool {
        Python::attach(|py| self.bind(py).is_none())
    }

    fn to_bool(&self) -> Result<bool, HostError> {
        attach(|py| self.bind(py).is_truthy())
    }

    fn to_str(&self) -> Result<String, HostError> {
        attach(|py| Ok(self.bind(py).str()?.to_cow()?.into_owned()))
    }

    fn to_int(&self) -> Result<Integer, HostError> {
        attach(|py| to_integer(self.bind(py)))
    }

    fn to_float(&self) -> Result<f64, HostError> {
        attach(|py| {
            py.get_type::<PyFloat>()
                .call1((self.bind(py),))?
                .extract::<f64>()
        })
    }

    fn to_rational(&self) -> Result<(Integer, Integer), HostError> {
        attach(|py| {
            let obj = self.bind(py);
            let numerator = to_integer(&obj.getattr("numerator")?)?;
            let denominator = to_integer(&obj.getattr("denominator")?)?;
            Ok((numerator, denominator))
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, HostError> {
        attach(|py| {
            let bytes = py.get_type::<PyBytes>().call1((self.bind(py),))?;
            Ok(bytes.cast::<PyBytes>()?.as_bytes().to_vec())
        })
    }

    fn items(&self) -> Result<Vec<(Self, Self)>, HostError> {
        attach(|py| {
            let mut items = Vec::new();
            for item in self.bind(py).call_method0("items")?.try_iter()? {
                let (key, value): (Bound<'_, PyAny>, Bound<'_, PyAny>) = item?.extract()?;
                items.push((Self(key.unbind()), Self(value.unbind())));
            }
            Ok(items)
        })
    }

    fn elements(&self) -> Result<Vec<Self>, HostError> {
        attach(|py| {
            self.bind(py)
                .try_iter()?
                .map(|item| Ok(Self(item?.unbind())))
                .collect()
        })
    }

    fn buffer(&self) -> Result<Option<BufferView>, HostError> {
        attach(|py| export_buffer(self.bind(py)))
    }

    fn array_capabilities(&self) -> Result<ArrayCapabilities, HostError> {
        attach(|py| {
            let obj = self.bind(py);
            Ok(ArrayCapabilities {
                array: obj.hasattr("__array__")?,
                interface: obj.hasattr("__array_interface__")?,
                structure: obj.hasattr("__array_struct__")?,
            })
        })
    }

    fn export_array(&self) -> Result<Option<BufferView>, HostError> {
        attach(|py| {
            let numpy = match py.import("numpy") {
                Ok(numpy) => numpy,
                Err(e) => {
                    tracing::debug!(error = %e, "numpy unavailable, cannot convert array");
                    return Ok(None);
                }
            };
            let array = numpy.call_method1("asarray", (self.bind(py),))?;
            let dtype = array.getattr("dtype")?;
            if dtype.getattr("hasobject")?.is_truthy()? {
                // Object pointers are never exported; skip the copy.
                return Ok(Some(BufferView {
                    format: "O".to_string(),
                    itemsize: dtype.getattr("itemsize")?.extract()?,
                    shape: array.getattr("shape")?.extract()?,
                    data: Vec::new(),
                }));
            }
            export_buffer(&array)
        })
    }

    fn mime_bundle(&self) -> Result<Option<Vec<(String, MimePayload)>>, HostError> {
        attach(|py| {
            let Some(hook) = callable_attr(self.bind(py), "_repr_mimebundle_")? else {
                return Ok(None);
            };
            let bundle = strip_metadata(hook.call0()?)?;
            if bundle.is_none() {
                return Ok(None);
            }
            let bundle = bundle.cast::<PyDict>()?;
            let mut entries = Vec::with_capacity(bundle.len());
            for (mime, payload) in bundle.iter() {
                entries.push((mime.extract::<String>()?, to_payload(&payload)?));
            }
            Ok(Some(entries))
        })
    }

    fn render(&self, mime: &str) -> Result<Option<MimePayload>, HostError> {
        let Some((_, hook)) = RENDER_HOOKS.iter().find(|(m, _)| *m == mime) else {
            return Ok(None);
        };
        attach(|py| {
            let Some(hook) = callable_attr(self.bind(py), hook)? else {
                return Ok(None);
            };
            let data = strip_metadata(hook.call0()?)?;
            if data.is_none() {
                return Ok(None);
            }
            to_payload(&data).map(Some)
        })
    }

    fn render_figure(&self, format: &str) -> Result<Option<Vec<u8>>, HostError> {
        attach(|py| {
            let obj = self.bind(py);
            let Some(savefig) = callable_attr(obj, "savefig")? else {
                return Ok(None);
            };
            let buf = py.import("io")?.call_method0("BytesIO")?;
            let kwargs = PyDict::new(py);
            kwargs.set_item("format", format)?;
            savefig.call((&buf,), Some(&kwargs))?;
            let data = buf
                .call_method0("getvalue")?
                .cast::<PyBytes>()?
                .as_bytes()
                .to_vec();
            close_figure(obj)?;
            Ok(Some(data))
        })
    }
}

/// Close a pyplot-managed figure once it has been rendered. Only done when
/// pyplot is already loaded; rendering never imports it.
fn close_figure(obj: &Bound<'_, PyAny>) -> PyResult<()> {
    let py = obj.py();
    let modules = py.import("sys")?.getattr("modules")?;
    let modules = modules.cast::<PyDict>()?;
    let (Some(figure), Some(pyplot)) = (
        modules.get_item("matplotlib.figure")?,
        modules.get_item("matplotlib.pyplot")?,
    ) else {
        return Ok(());
    };
    if obj.is_instance(&figure.getattr("Figure")?)? {
        pyplot.call_method1("close", (obj,))?;
    }
    Ok(())
}

impl Construct for PyValue {
    fn none() -> Result<Self, HostError> {
        Ok(Python::attach(|py| Self(py.None())))
    }

    fn from_bool(value: bool) -> Result<Self, HostError> {
        attach(|py| Ok(Self(value.into_py_any(py)?)))
    }

    fn from_int(value: Integer) -> Result<Self, HostError> {
        attach(|py| {
            let obj = match value {
                Integer::Small(n) => n.into_py_any(py)?,
                Integer::Big(digits) => py.get_type::<PyInt>().call1((digits,))?.unbind(),
            };
            Ok(Self(obj))
        })
    }

    fn from_float(value: f64) -> Result<Self, HostError> {
        attach(|py| Ok(Self(value.into_py_any(py)?)))
    }

    fn from_str(value: &str) -> Result<Self, HostError> {
        attach(|py| Ok(Self(value.into_py_any(py)?)))
    }

    fn tuple(items: Vec<Self>) -> Result<Self, HostError> {
        attach(|py| {
            let tuple = PyTuple::new(py, items.into_iter().map(PyValue::into_inner))?;
            Ok(Self(tuple.into_any().unbind()))
        })
    }

    fn list(items: Vec<Self>) -> Result<Self, HostError> {
        attach(|py| {
            let list = PyList::new(py, items.into_iter().map(PyValue::into_inner))?;
            Ok(Self(list.into_any().unbind()))
        })
    }

    fn dict(entries: Vec<(Self, Self)>) -> Result<Self, HostError> {
        attach(|py| {
            let dict = PyDict::new(py);
            for (key, value) in entries {
                dict.set_item(key.into_inner(), value.into_inner())?;
            }
            Ok(Self(dict.into_any().unbind()))
        })
    }
}
