use std::path::{Path, PathBuf};

use ndarray::{Axis, Slice};
use tracing::{debug, info};

use vole_core::onnx::{OnnxModel, OnnxTensor};
use vole_core::{array_from_tensor, with_host_array, EngineTensor, Error, Result};

// File-argument resolution
//
// A descriptor is "<path>" or "<path>::<selector>". What the selector means
// depends on the resource:
//
//   weights.pb              the serialized TensorProto
//   weights.pb::2:5         rows 2..5 along the first axis
//   model.onnx::fc.weight   the initializer called "fc.weight"
//
// A descriptor that points at an existing resource but selects nothing
// (unknown extension, unknown initializer, malformed or out-of-range row
// selector) resolves to `None`. I/O and decode failures are errors.

/// Separator between the resource path and the selector.
pub const SELECTOR_SEPARATOR: &str = "::";

/// Split a descriptor into path and optional selector.
pub fn split_descriptor(descriptor: &str) -> (&str, Option<&str>) {
    match descriptor.split_once(SELECTOR_SEPARATOR) {
        Some((path, selector)) => (path, Some(selector)),
        None => (descriptor, None),
    }
}

/// Resolve a descriptor to a tensor.
pub fn resolve(descriptor: &str, persist: bool) -> Result<Option<EngineTensor>> {
    let (path, selector) = split_descriptor(descriptor);
    let path = Path::new(path);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let resolved = match extension.as_deref() {
        Some("pb") => {
            let tensor = OnnxTensor::load(path)?.to_engine_tensor()?;
            match selector {
                None => Some(tensor),
                Some(sel) => select_rows(&tensor, sel)?,
            }
        }
        Some("onnx") => match selector {
            Some(name) => {
                let model = OnnxModel::load(path)?;
                model
                    .graph
                    .initializer(name)
                    .map(OnnxTensor::to_engine_tensor)
                    .transpose()?
            }
            None => None,
        },
        _ => None,
    };

    let Some(tensor) = resolved else {
        debug!(descriptor, "file argument selected no data");
        return Ok(None);
    };
    if persist {
        let target = persisted_path(path, selector);
        OnnxTensor::from_engine_tensor(&tensor).save(&target)?;
        info!(descriptor, target = %target.display(), "saved resolved file argument");
    }
    Ok(Some(tensor))
}

/// Rows `start..end` of the first axis, for a selector `"start:end"`.
fn select_rows(tensor: &EngineTensor, selector: &str) -> Result<Option<EngineTensor>> {
    let Some((start, end)) = selector.split_once(':') else {
        return Ok(None);
    };
    let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) else {
        return Ok(None);
    };
    let Some(&rows) = tensor.dims().first() else {
        return Ok(None);
    };
    if start > end || end > rows {
        return Ok(None);
    }
    let host = array_from_tensor(tensor)?;
    let sliced = with_host_array!(&host, a => {
        let picked = a.slice_axis(Axis(0), Slice::from(start..end)).to_owned();
        EngineTensor::from_array(tensor.name(), &picked)?
    }, other => {
        return Err(Error::UnsupportedDType(other.dtype_name().to_string()));
    });
    Ok(Some(sliced))
}

/// `<dir>/<stem>[.<selector>].resolved.pb` next to the source resource.
fn persisted_path(path: &Path, selector: Option<&str>) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    let name = match selector {
        Some(sel) => {
            let sel: String = sel
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("{stem}.{sel}.resolved.pb")
        }
        None => format!("{stem}.resolved.pb"),
    };
    path.with_file_name(name)
}
