// ONNX model description: encode / decode
//
// The bridge needs to see inside a model for three things: finding a node
// definition by name, reading initializers, and synthesizing a one-node
// model for isolated execution. Engines may also use it to load graphs.
//
// ONNX files use Protocol Buffers encoding. We implement a minimal
// protobuf encoder/decoder (no external crate needed) that handles the
// subset of ONNX we touch:
//
//   ModelProto          ir_version, producer, domain, doc, graph, opset_import
//   GraphProto          node, name, initializer, input, output, value_info
//   NodeProto           input, output, name, op_type, attribute, domain
//   AttributeProto      FLOAT, INT, STRING, TENSOR, FLOATS, INTS, STRINGS
//   TensorProto         dims, data_type, typed data fields, raw_data
//   ValueInfoProto      name + tensor type (elem_type, shape)
//
// Tensor bytes are little-endian on the wire and are copied into engine
// buffers as-is, so hosts are assumed to be little-endian.
//
// REFERENCE:
//   https://onnx.ai/onnx/repo-docs/IR.html
//   https://protobuf.dev/programming-guides/encoding/

use std::fs;
use std::path::Path;

use crate::buffer::{element_count, EngineArray};
use crate::dtype::ElementType;
use crate::error::{Error, Result};
use crate::tensor::EngineTensor;

/// ONNX IR version written by `OnnxModel::new`.
pub const ONNX_IR_VERSION: i64 = 9;
/// Default opset version for the default domain.
pub const ONNX_OPSET_VERSION: i64 = 17;

// AttributeProto.AttributeType
const ATTR_FLOAT: u64 = 1;
const ATTR_INT: u64 = 2;
const ATTR_STRING: u64 = 3;
const ATTR_TENSOR: u64 = 4;
const ATTR_FLOATS: u64 = 6;
const ATTR_INTS: u64 = 7;
const ATTR_STRINGS: u64 = 8;

// Minimal protobuf encoder

/// A minimal protobuf wire-format encoder. Supports:
/// - Varint (wire type 0)
/// - Fixed64 / Fixed32 (wire types 1 and 5)
/// - Length-delimited (wire type 2: bytes, strings, nested messages)
struct PbEncoder {
    buf: Vec<u8>,
}

impl PbEncoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_varint(&mut self, mut val: u64) {
        loop {
            let byte = (val & 0x7F) as u8;
            val >>= 7;
            if val == 0 {
                self.buf.push(byte);
                break;
            } else {
                self.buf.push(byte | 0x80);
            }
        }
    }

    /// Write a field tag (field_number << 3 | wire_type).
    fn write_tag(&mut self, field: u32, wire_type: u32) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    fn write_varint_field(&mut self, field: u32, val: u64) {
        self.write_tag(field, 0);
        self.write_varint(val);
    }

    /// Write an int64 field (two's complement, not zigzag).
    fn write_int64_field(&mut self, field: u32, val: i64) {
        self.write_varint_field(field, val as u64);
    }

    fn write_fixed32_field(&mut self, field: u32, bits: u32) {
        self.write_tag(field, 5);
        self.buf.extend_from_slice(&bits.to_le_bytes());
    }

    fn write_bytes_field(&mut self, field: u32, data: &[u8]) {
        self.write_tag(field, 2);
        self.write_varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    fn write_string_field(&mut self, field: u32, val: &str) {
        self.write_bytes_field(field, val.as_bytes());
    }

    fn write_message_field(&mut self, field: u32, encoder: &PbEncoder) {
        self.write_bytes_field(field, &encoder.buf);
    }

    /// Packed repeated varints.
    fn write_packed_varints(&mut self, field: u32, values: impl Iterator<Item = u64>) {
        let mut packed = PbEncoder::new();
        for v in values {
            packed.write_varint(v);
        }
        if !packed.buf.is_empty() {
            self.write_message_field(field, &packed);
        }
    }
}

// Minimal protobuf decoder

/// A minimal protobuf wire-format decoder.
struct PbDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PbDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let Some(&byte) = self.data.get(self.pos) else {
                return Err(Error::decode("unexpected end of data"));
            };
            self.pos += 1;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(Error::decode("varint too long"));
            }
        }
        Ok(result)
    }

    fn read_tag(&mut self) -> Result<(u32, u32)> {
        let val = self.read_varint()?;
        Ok(((val >> 3) as u32, (val & 0x7) as u32))
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::decode("fixed-width field exceeds data"))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_fixed::<4>()?))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_fixed::<8>()?))
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::decode("bytes field exceeds data"))?;
        let result = &self.data[self.pos..end];
        self.pos = end;
        Ok(result)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::decode("invalid UTF-8 string"))
    }

    /// Read a repeated varint field, packed or not.
    fn read_varints(&mut self, wire_type: u32, out: &mut Vec<u64>) -> Result<()> {
        if wire_type == 2 {
            let mut sub = PbDecoder::new(self.read_bytes()?);
            while sub.remaining() > 0 {
                out.push(sub.read_varint()?);
            }
        } else {
            out.push(self.read_varint()?);
        }
        Ok(())
    }

    fn skip_field(&mut self, wire_type: u32) -> Result<()> {
        match wire_type {
            0 => {
                self.read_varint()?;
            }
            1 => {
                self.read_fixed::<8>()?;
            }
            2 => {
                self.read_bytes()?;
            }
            5 => {
                self.read_fixed::<4>()?;
            }
            _ => return Err(Error::decode(format!("unsupported wire type {wire_type}"))),
        }
        Ok(())
    }
}

// TensorProto

/// An ONNX TensorProto: a named tensor with dims and data.
///
/// Data lives either in `raw_data` (little-endian bytes) or in one of the
/// typed fields, depending on how the producer wrote it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnnxTensor {
    pub name: String,
    /// `TensorProto.DataType` code.
    pub data_type: i32,
    pub dims: Vec<i64>,
    pub float_data: Vec<f32>,
    /// Holds int32, and the narrow types (int8/16, uint8/16, bool, float16 bits).
    pub int32_data: Vec<i32>,
    pub int64_data: Vec<i64>,
    pub double_data: Vec<f64>,
    /// Holds uint32 and uint64.
    pub uint64_data: Vec<u64>,
    pub raw_data: Vec<u8>,
}

impl OnnxTensor {
    pub fn new(name: &str, elem_type: ElementType, dims: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            data_type: elem_type.code(),
            dims,
            ..Default::default()
        }
    }

    /// Build from an engine tensor; data goes to `raw_data`.
    pub fn from_engine_tensor(tensor: &EngineTensor) -> Self {
        let mut out = Self::new(
            tensor.name(),
            tensor.elem_type(),
            tensor.dims().iter().map(|&d| d as i64).collect(),
        );
        out.raw_data = tensor.buffer().pin().to_vec();
        out
    }

    pub fn elem_type(&self) -> Result<ElementType> {
        ElementType::from_code(self.data_type)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = PbEncoder::new();
        // field 1: dims (packed int64)
        enc.write_packed_varints(1, self.dims.iter().map(|&d| d as u64));
        // field 2: data_type
        enc.write_varint_field(2, self.data_type as u64);
        // field 4: float_data (packed)
        if !self.float_data.is_empty() {
            let bytes: Vec<u8> = self.float_data.iter().flat_map(|v| v.to_le_bytes()).collect();
            enc.write_bytes_field(4, &bytes);
        }
        // field 5: int32_data (packed)
        enc.write_packed_varints(5, self.int32_data.iter().map(|&v| v as i64 as u64));
        // field 7: int64_data (packed)
        enc.write_packed_varints(7, self.int64_data.iter().map(|&v| v as u64));
        // field 8: name
        if !self.name.is_empty() {
            enc.write_string_field(8, &self.name);
        }
        // field 9: raw_data
        if !self.raw_data.is_empty() {
            enc.write_bytes_field(9, &self.raw_data);
        }
        // field 10: double_data (packed)
        if !self.double_data.is_empty() {
            let bytes: Vec<u8> = self.double_data.iter().flat_map(|v| v.to_le_bytes()).collect();
            enc.write_bytes_field(10, &bytes);
        }
        // field 11: uint64_data (packed)
        enc.write_packed_varints(11, self.uint64_data.iter().copied());
        enc.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut dec = PbDecoder::new(data);
        let mut tensor = OnnxTensor::default();
        let mut scratch = Vec::new();
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 0 | 2) => {
                    scratch.clear();
                    dec.read_varints(wire_type, &mut scratch)?;
                    tensor.dims.extend(scratch.iter().map(|&v| v as i64));
                }
                (2, 0) => tensor.data_type = dec.read_varint()? as i32,
                (4, 2) => {
                    let bytes = dec.read_bytes()?;
                    for c in bytes.chunks_exact(4) {
                        tensor.float_data.push(f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
                    }
                }
                (4, 5) => tensor.float_data.push(dec.read_f32()?),
                (5, 0 | 2) => {
                    scratch.clear();
                    dec.read_varints(wire_type, &mut scratch)?;
                    tensor.int32_data.extend(scratch.iter().map(|&v| v as i32));
                }
                (7, 0 | 2) => {
                    scratch.clear();
                    dec.read_varints(wire_type, &mut scratch)?;
                    tensor.int64_data.extend(scratch.iter().map(|&v| v as i64));
                }
                (8, 2) => tensor.name = dec.read_string()?,
                (9, 2) => tensor.raw_data = dec.read_bytes()?.to_vec(),
                (10, 2) => {
                    let bytes = dec.read_bytes()?;
                    for c in bytes.chunks_exact(8) {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(c);
                        tensor.double_data.push(f64::from_le_bytes(b));
                    }
                }
                (10, 1) => tensor.double_data.push(dec.read_f64()?),
                (11, 0 | 2) => dec.read_varints(wire_type, &mut tensor.uint64_data)?,
                _ => dec.skip_field(wire_type)?,
            }
        }
        Ok(tensor)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&fs::read(path.as_ref())?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes())?;
        Ok(())
    }

    /// Element bytes in little-endian order, taken from `raw_data` if
    /// present, otherwise from the typed field that matches the data type.
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        if !self.raw_data.is_empty() {
            return Ok(self.raw_data.clone());
        }
        let elem = self.elem_type()?;
        let bytes = match elem {
            ElementType::Float | ElementType::Complex64 => {
                self.float_data.iter().flat_map(|v| v.to_le_bytes()).collect()
            }
            ElementType::Double | ElementType::Complex128 => {
                self.double_data.iter().flat_map(|v| v.to_le_bytes()).collect()
            }
            ElementType::Int64 => self.int64_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ElementType::UInt64 => self.uint64_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ElementType::UInt32 => self
                .uint64_data
                .iter()
                .flat_map(|&v| (v as u32).to_le_bytes())
                .collect(),
            ElementType::Int32 => self.int32_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ElementType::Int16 => self
                .int32_data
                .iter()
                .flat_map(|&v| (v as i16).to_le_bytes())
                .collect(),
            ElementType::UInt16 | ElementType::Float16 | ElementType::BFloat16 => self
                .int32_data
                .iter()
                .flat_map(|&v| (v as u16).to_le_bytes())
                .collect(),
            ElementType::Int8 | ElementType::UInt8 => {
                self.int32_data.iter().map(|&v| v as u8).collect()
            }
            ElementType::Bool => self.int32_data.iter().map(|&v| u8::from(v != 0)).collect(),
            ElementType::String | ElementType::Undefined => {
                return Err(Error::UnsupportedType(format!(
                    "tensor '{}' has element type {elem}",
                    self.name
                )))
            }
        };
        Ok(bytes)
    }

    /// Decode into an engine tensor.
    pub fn to_engine_tensor(&self) -> Result<EngineTensor> {
        let dims = self
            .dims
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| Error::decode(format!("tensor '{}' has dim {d}", self.name)))
            })
            .collect::<Result<Vec<usize>>>()?;
        let count = element_count(&dims).map_err(|_| {
            Error::decode(format!("tensor '{}' dims {dims:?} overflow usize", self.name))
        })?;
        let buffer = EngineArray::from_bytes(self.elem_type()?, vec![count], self.data_bytes()?)?;
        Ok(EngineTensor::new(self.name.as_str(), dims, buffer))
    }
}

// ValueInfoProto

/// One dimension of a declared tensor shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnnxDim {
    Value(i64),
    Param(String),
}

/// A graph input/output/intermediate declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxValueInfo {
    pub name: String,
    /// `TensorProto.DataType` code; 0 leaves the type undefined.
    pub elem_type: i32,
    /// `None` leaves the shape unknown.
    pub shape: Option<Vec<OnnxDim>>,
}

impl OnnxValueInfo {
    /// A tensor declaration; negative dims become symbolic.
    pub fn tensor(name: &str, elem_type: ElementType, dims: &[i64]) -> Self {
        let shape = dims
            .iter()
            .map(|&d| {
                if d >= 0 {
                    OnnxDim::Value(d)
                } else {
                    OnnxDim::Param("dynamic".to_string())
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            elem_type: elem_type.code(),
            shape: Some(shape),
        }
    }

    /// A declaration with no element type and no shape.
    pub fn untyped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elem_type: ElementType::Undefined.code(),
            shape: None,
        }
    }

    /// Concrete dims, if every dimension has a value.
    pub fn dims(&self) -> Option<Vec<i64>> {
        self.shape
            .as_ref()?
            .iter()
            .map(|d| match d {
                OnnxDim::Value(v) => Some(*v),
                OnnxDim::Param(_) => None,
            })
            .collect()
    }

    fn encode(&self) -> PbEncoder {
        let mut vi = PbEncoder::new();
        vi.write_string_field(1, &self.name);

        // field 2: type (TypeProto) -> field 1: tensor_type
        let mut tensor_type = PbEncoder::new();
        tensor_type.write_varint_field(1, self.elem_type as u64);
        if let Some(dims) = &self.shape {
            let mut shape = PbEncoder::new();
            for d in dims {
                let mut dim = PbEncoder::new();
                match d {
                    OnnxDim::Value(v) => dim.write_int64_field(1, *v),
                    OnnxDim::Param(p) => dim.write_string_field(2, p),
                }
                shape.write_message_field(1, &dim);
            }
            tensor_type.write_message_field(2, &shape);
        }
        let mut type_proto = PbEncoder::new();
        type_proto.write_message_field(1, &tensor_type);
        vi.write_message_field(2, &type_proto);
        vi
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut info = OnnxValueInfo::untyped("");
        let mut dec = PbDecoder::new(data);
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 2) => info.name = dec.read_string()?,
                (2, 2) => {
                    let mut type_dec = PbDecoder::new(dec.read_bytes()?);
                    while type_dec.remaining() > 0 {
                        let (f, wt) = type_dec.read_tag()?;
                        if (f, wt) == (1, 2) {
                            info.decode_tensor_type(type_dec.read_bytes()?)?;
                        } else {
                            type_dec.skip_field(wt)?;
                        }
                    }
                }
                _ => dec.skip_field(wire_type)?,
            }
        }
        Ok(info)
    }

    fn decode_tensor_type(&mut self, data: &[u8]) -> Result<()> {
        let mut dec = PbDecoder::new(data);
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 0) => self.elem_type = dec.read_varint()? as i32,
                (2, 2) => {
                    let mut dims = Vec::new();
                    let mut shape_dec = PbDecoder::new(dec.read_bytes()?);
                    while shape_dec.remaining() > 0 {
                        let (f, wt) = shape_dec.read_tag()?;
                        if (f, wt) == (1, 2) {
                            dims.push(decode_dim(shape_dec.read_bytes()?)?);
                        } else {
                            shape_dec.skip_field(wt)?;
                        }
                    }
                    self.shape = Some(dims);
                }
                _ => dec.skip_field(wire_type)?,
            }
        }
        Ok(())
    }
}

fn decode_dim(data: &[u8]) -> Result<OnnxDim> {
    let mut dec = PbDecoder::new(data);
    let mut dim = OnnxDim::Param(String::new());
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, 0) => dim = OnnxDim::Value(dec.read_varint()? as i64),
            (2, 2) => dim = OnnxDim::Param(dec.read_string()?),
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(dim)
}

// NodeProto

/// An ONNX graph node (operation).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnnxNode {
    /// Input tensor names; an empty name marks an omitted optional input.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Operation type (e.g., "Add", "Relu").
    pub op_type: String,
    pub name: String,
    pub domain: String,
    /// Attributes in declaration order.
    pub attributes: Vec<(String, OnnxAttribute)>,
}

/// An ONNX attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum OnnxAttribute {
    Int(i64),
    Float(f32),
    String(String),
    Tensor(OnnxTensor),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl OnnxNode {
    pub fn new(op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            op_type: op_type.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: OnnxAttribute) -> Self {
        self.attributes.push((key.to_string(), value));
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&OnnxAttribute> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Names of the inputs actually wired (omitted optional inputs skipped).
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(String::as_str).filter(|s| !s.is_empty())
    }

    /// Serialize as a standalone `NodeProto`.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::decode(data)
    }

    fn encode(&self) -> PbEncoder {
        let mut enc = PbEncoder::new();
        for input in &self.inputs {
            enc.write_string_field(1, input);
        }
        for output in &self.outputs {
            enc.write_string_field(2, output);
        }
        if !self.name.is_empty() {
            enc.write_string_field(3, &self.name);
        }
        enc.write_string_field(4, &self.op_type);
        for (key, val) in &self.attributes {
            enc.write_message_field(5, &encode_attribute(key, val));
        }
        if !self.domain.is_empty() {
            enc.write_string_field(7, &self.domain);
        }
        enc
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = PbDecoder::new(data);
        let mut node = OnnxNode::default();
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 2) => node.inputs.push(dec.read_string()?),
                (2, 2) => node.outputs.push(dec.read_string()?),
                (3, 2) => node.name = dec.read_string()?,
                (4, 2) => node.op_type = dec.read_string()?,
                (5, 2) => node.attributes.push(decode_attribute(dec.read_bytes()?)?),
                (7, 2) => node.domain = dec.read_string()?,
                _ => dec.skip_field(wire_type)?,
            }
        }
        Ok(node)
    }
}

fn encode_attribute(name: &str, val: &OnnxAttribute) -> PbEncoder {
    let mut enc = PbEncoder::new();
    enc.write_string_field(1, name);
    let attr_type = match val {
        OnnxAttribute::Float(f) => {
            enc.write_fixed32_field(2, f.to_bits());
            ATTR_FLOAT
        }
        OnnxAttribute::Int(i) => {
            enc.write_int64_field(3, *i);
            ATTR_INT
        }
        OnnxAttribute::String(s) => {
            enc.write_string_field(4, s);
            ATTR_STRING
        }
        OnnxAttribute::Tensor(t) => {
            enc.write_bytes_field(5, &t.to_bytes());
            ATTR_TENSOR
        }
        OnnxAttribute::Floats(floats) => {
            for f in floats {
                enc.write_fixed32_field(7, f.to_bits());
            }
            ATTR_FLOATS
        }
        OnnxAttribute::Ints(ints) => {
            enc.write_packed_varints(8, ints.iter().map(|&i| i as u64));
            ATTR_INTS
        }
        OnnxAttribute::Strings(strings) => {
            for s in strings {
                enc.write_string_field(9, s);
            }
            ATTR_STRINGS
        }
    };
    // field 20: type
    enc.write_varint_field(20, attr_type);
    enc
}

fn decode_attribute(data: &[u8]) -> Result<(String, OnnxAttribute)> {
    let mut dec = PbDecoder::new(data);
    let mut name = String::new();
    let mut attr_type: u64 = 0;
    let mut int_val: i64 = 0;
    let mut float_val: f32 = 0.0;
    let mut string_val = Vec::new();
    let mut tensor_val = None;
    let mut ints_val: Vec<u64> = Vec::new();
    let mut floats_val: Vec<f32> = Vec::new();
    let mut strings_val: Vec<String> = Vec::new();
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, 2) => name = dec.read_string()?,
            (2, 5) => float_val = dec.read_f32()?,
            (3, 0) => int_val = dec.read_varint()? as i64,
            (4, 2) => string_val = dec.read_bytes()?.to_vec(),
            (5, 2) => tensor_val = Some(OnnxTensor::from_bytes(dec.read_bytes()?)?),
            (7, 5) => floats_val.push(dec.read_f32()?),
            (7, 2) => {
                for c in dec.read_bytes()?.chunks_exact(4) {
                    floats_val.push(f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
                }
            }
            (8, 0 | 2) => dec.read_varints(wire_type, &mut ints_val)?,
            (9, 2) => strings_val.push(dec.read_string()?),
            (20, 0) => attr_type = dec.read_varint()?,
            _ => dec.skip_field(wire_type)?,
        }
    }
    let val = match attr_type {
        ATTR_FLOAT => OnnxAttribute::Float(float_val),
        ATTR_INT => OnnxAttribute::Int(int_val),
        ATTR_STRING => OnnxAttribute::String(
            String::from_utf8(string_val).map_err(|_| Error::decode("invalid UTF-8 attribute"))?,
        ),
        ATTR_TENSOR => OnnxAttribute::Tensor(tensor_val.unwrap_or_default()),
        ATTR_FLOATS => OnnxAttribute::Floats(floats_val),
        ATTR_INTS => OnnxAttribute::Ints(ints_val.into_iter().map(|v| v as i64).collect()),
        ATTR_STRINGS => OnnxAttribute::Strings(strings_val),
        other => {
            return Err(Error::decode(format!(
                "attribute '{name}' has unsupported type {other}"
            )))
        }
    };
    Ok((name, val))
}

// GraphProto

/// A computation graph: nodes + initializers + I/O declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnnxGraph {
    pub name: String,
    /// Nodes in topological order.
    pub nodes: Vec<OnnxNode>,
    pub initializers: Vec<OnnxTensor>,
    pub inputs: Vec<OnnxValueInfo>,
    pub outputs: Vec<OnnxValueInfo>,
    pub value_info: Vec<OnnxValueInfo>,
}

impl OnnxGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn node(&self, name: &str) -> Option<&OnnxNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn initializer(&self, name: &str) -> Option<&OnnxTensor> {
        self.initializers.iter().find(|t| t.name == name)
    }

    fn encode(&self) -> PbEncoder {
        let mut graph = PbEncoder::new();
        for node in &self.nodes {
            graph.write_message_field(1, &node.encode());
        }
        graph.write_string_field(2, &self.name);
        for init in &self.initializers {
            graph.write_bytes_field(5, &init.to_bytes());
        }
        for vi in &self.inputs {
            graph.write_message_field(11, &vi.encode());
        }
        for vi in &self.outputs {
            graph.write_message_field(12, &vi.encode());
        }
        for vi in &self.value_info {
            graph.write_message_field(13, &vi.encode());
        }
        graph
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = PbDecoder::new(data);
        let mut graph = OnnxGraph::default();
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 2) => graph.nodes.push(OnnxNode::decode(dec.read_bytes()?)?),
                (2, 2) => graph.name = dec.read_string()?,
                (5, 2) => graph
                    .initializers
                    .push(OnnxTensor::from_bytes(dec.read_bytes()?)?),
                (11, 2) => graph.inputs.push(OnnxValueInfo::decode(dec.read_bytes()?)?),
                (12, 2) => graph.outputs.push(OnnxValueInfo::decode(dec.read_bytes()?)?),
                (13, 2) => graph
                    .value_info
                    .push(OnnxValueInfo::decode(dec.read_bytes()?)?),
                _ => dec.skip_field(wire_type)?,
            }
        }
        Ok(graph)
    }
}

// ModelProto

/// An operator set the model depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnnxOpset {
    pub domain: String,
    pub version: i64,
}

/// An ONNX model: metadata, opset imports and the main graph.
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxModel {
    pub ir_version: i64,
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    pub model_version: i64,
    pub doc_string: String,
    pub opset_imports: Vec<OnnxOpset>,
    pub graph: OnnxGraph,
}

impl OnnxModel {
    /// A new empty model importing the default opset.
    pub fn new(graph_name: &str) -> Self {
        Self {
            ir_version: ONNX_IR_VERSION,
            producer_name: "vole".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            domain: String::new(),
            model_version: 0,
            doc_string: String::new(),
            opset_imports: vec![OnnxOpset {
                domain: String::new(),
                version: ONNX_OPSET_VERSION,
            }],
            graph: OnnxGraph::new(graph_name),
        }
    }

    /// Encode to ONNX protobuf binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut model = PbEncoder::new();
        model.write_int64_field(1, self.ir_version);
        model.write_string_field(2, &self.producer_name);
        model.write_string_field(3, &self.producer_version);
        if !self.domain.is_empty() {
            model.write_string_field(4, &self.domain);
        }
        if self.model_version != 0 {
            model.write_int64_field(5, self.model_version);
        }
        if !self.doc_string.is_empty() {
            model.write_string_field(6, &self.doc_string);
        }
        model.write_message_field(7, &self.graph.encode());
        for opset in &self.opset_imports {
            let mut enc = PbEncoder::new();
            enc.write_string_field(1, &opset.domain);
            enc.write_int64_field(2, opset.version);
            model.write_message_field(8, &enc);
        }
        model.into_bytes()
    }

    /// Decode ONNX protobuf bytes. A model without a graph is rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut dec = PbDecoder::new(data);
        let mut model = OnnxModel::new("");
        model.producer_name.clear();
        model.producer_version.clear();
        model.opset_imports.clear();
        let mut graph = None;
        while dec.remaining() > 0 {
            let (field, wire_type) = dec.read_tag()?;
            match (field, wire_type) {
                (1, 0) => model.ir_version = dec.read_varint()? as i64,
                (2, 2) => model.producer_name = dec.read_string()?,
                (3, 2) => model.producer_version = dec.read_string()?,
                (4, 2) => model.domain = dec.read_string()?,
                (5, 0) => model.model_version = dec.read_varint()? as i64,
                (6, 2) => model.doc_string = dec.read_string()?,
                (7, 2) => graph = Some(OnnxGraph::decode(dec.read_bytes()?)?),
                (8, 2) => model.opset_imports.push(decode_opset(dec.read_bytes()?)?),
                _ => dec.skip_field(wire_type)?,
            }
        }
        model.graph = graph.ok_or_else(|| Error::decode("model contains no graph"))?;
        Ok(model)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&fs::read(path.as_ref())?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes())?;
        Ok(())
    }

    /// Opset version imported for `domain` (`""` is the default domain).
    pub fn opset_version(&self, domain: &str) -> Option<i64> {
        self.opset_imports
            .iter()
            .find(|o| o.domain == domain || (domain.is_empty() && o.domain == "ai.onnx"))
            .map(|o| o.version)
    }
}

fn decode_opset(data: &[u8]) -> Result<OnnxOpset> {
    let mut dec = PbDecoder::new(data);
    let mut opset = OnnxOpset {
        domain: String::new(),
        version: 0,
    };
    while dec.remaining() > 0 {
        let (field, wire_type) = dec.read_tag()?;
        match (field, wire_type) {
            (1, 2) => opset.domain = dec.read_string()?,
            (2, 0) => opset.version = dec.read_varint()? as i64,
            _ => dec.skip_field(wire_type)?,
        }
    }
    Ok(opset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::array_from_tensor;
    use crate::HostArray;

    #[test]
    fn test_protobuf_varint_roundtrip() {
        let mut enc = PbEncoder::new();
        for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            enc.write_varint(v);
        }
        let mut dec = PbDecoder::new(&enc.buf);
        for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            assert_eq!(dec.read_varint().unwrap(), v);
        }
        assert!(dec.read_varint().is_err());
    }

    #[test]
    fn test_truncated_bytes_field() {
        let mut enc = PbEncoder::new();
        enc.write_tag(8, 2);
        enc.write_varint(10);
        enc.buf.extend_from_slice(b"abc");
        assert!(matches!(
            OnnxTensor::from_bytes(&enc.buf),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_tensor_raw_data_roundtrip() {
        let t = EngineTensor::from_vec("w", vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let proto = OnnxTensor::from_engine_tensor(&t);
        let decoded = OnnxTensor::from_bytes(&proto.to_bytes()).unwrap();
        assert_eq!(decoded, proto);
        assert_eq!(decoded.elem_type().unwrap(), ElementType::Float);

        let back = decoded.to_engine_tensor().unwrap();
        assert_eq!(back.name(), "w");
        assert_eq!(back.dims(), &[2, 3]);
        assert_eq!(back.to_array::<f32>().unwrap()[[1, 2]], 6.0);
    }

    #[test]
    fn test_tensor_typed_fields() {
        let mut t = OnnxTensor::new("mask", ElementType::Bool, vec![3]);
        t.int32_data = vec![1, 0, 1];
        let decoded = OnnxTensor::from_bytes(&t.to_bytes()).unwrap();
        let host = array_from_tensor(&decoded.to_engine_tensor().unwrap()).unwrap();
        assert_eq!(
            host,
            HostArray::from_shape_vec(&[3], vec![true, false, true]).unwrap()
        );

        let mut t = OnnxTensor::new("k", ElementType::Int8, vec![2]);
        t.int32_data = vec![-3, 7];
        let decoded = OnnxTensor::from_bytes(&t.to_bytes()).unwrap();
        assert_eq!(decoded.int32_data, vec![-3, 7]);
        let arr = decoded.to_engine_tensor().unwrap().to_array::<i8>().unwrap();
        assert_eq!(arr.as_slice().unwrap(), &[-3, 7]);

        let mut t = OnnxTensor::new("d", ElementType::Double, vec![2]);
        t.double_data = vec![0.25, -1.5];
        let e = OnnxTensor::from_bytes(&t.to_bytes())
            .unwrap()
            .to_engine_tensor()
            .unwrap();
        assert_eq!(e.to_array::<f64>().unwrap().as_slice().unwrap(), &[0.25, -1.5]);

        let mut t = OnnxTensor::new("u", ElementType::UInt32, vec![2]);
        t.uint64_data = vec![4_000_000_000, 1];
        let e = OnnxTensor::from_bytes(&t.to_bytes())
            .unwrap()
            .to_engine_tensor()
            .unwrap();
        assert_eq!(
            e.to_array::<u32>().unwrap().as_slice().unwrap(),
            &[4_000_000_000, 1]
        );
    }

    #[test]
    fn test_tensor_element_count_checked() {
        let mut t = OnnxTensor::new("bad", ElementType::Int64, vec![3]);
        t.int64_data = vec![1, 2];
        assert!(matches!(
            t.to_engine_tensor(),
            Err(Error::ShapeMismatch { .. })
        ));
        let t = OnnxTensor::new("neg", ElementType::Int64, vec![-1]);
        assert!(t.to_engine_tensor().is_err());
    }

    #[test]
    fn test_tensor_huge_dims_rejected() {
        let t = OnnxTensor::new("x", ElementType::Float, vec![1 << 32, 1 << 32, 1 << 32]);
        assert!(matches!(t.to_engine_tensor(), Err(Error::Decode(_))));
        let restored = OnnxTensor::from_bytes(&t.to_bytes()).unwrap();
        assert!(matches!(restored.to_engine_tensor(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_attribute_roundtrip() {
        let cases = vec![
            OnnxAttribute::Int(-42),
            OnnxAttribute::Float(0.5),
            OnnxAttribute::String("NOTSET".into()),
            OnnxAttribute::Ints(vec![1, -1, 3]),
            OnnxAttribute::Floats(vec![1.5, -2.0]),
            OnnxAttribute::Strings(vec!["a".into(), "b".into()]),
            OnnxAttribute::Tensor(OnnxTensor {
                int64_data: vec![5],
                ..OnnxTensor::new("value", ElementType::Int64, vec![1])
            }),
        ];
        for attr in cases {
            let encoded = encode_attribute("attr", &attr);
            let (name, decoded) = decode_attribute(&encoded.buf).unwrap();
            assert_eq!(name, "attr");
            assert_eq!(decoded, attr);
        }
    }

    #[test]
    fn test_node_bytes_roundtrip() {
        let node = OnnxNode::new("Add", "add_0", &["a", "", "b"], &["c"])
            .with_attribute("axis", OnnxAttribute::Int(1));
        let restored = OnnxNode::from_bytes(&node.to_bytes()).unwrap();
        assert_eq!(restored, node);
        assert_eq!(restored.present_inputs().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(OnnxNode::from_bytes(&[0x0a, 0x05, b'a']).is_err());
    }

    #[test]
    fn test_value_info_roundtrip() {
        let typed = OnnxValueInfo::tensor("x", ElementType::Float, &[4, -1]);
        let decoded = OnnxValueInfo::decode(&typed.encode().buf).unwrap();
        assert_eq!(decoded, typed);
        assert_eq!(decoded.dims(), None);

        let fixed = OnnxValueInfo::tensor("y", ElementType::Int32, &[2, 3]);
        assert_eq!(fixed.dims(), Some(vec![2, 3]));

        let placeholder = OnnxValueInfo::untyped("z");
        let decoded = OnnxValueInfo::decode(&placeholder.encode().buf).unwrap();
        assert_eq!(decoded.elem_type, 0);
        assert_eq!(decoded.shape, None);
    }

    fn add_model() -> OnnxModel {
        let mut model = OnnxModel::new("add_graph");
        model.doc_string = "adds two tensors".into();
        model
            .graph
            .inputs
            .push(OnnxValueInfo::tensor("A", ElementType::Int64, &[4, 5]));
        model
            .graph
            .inputs
            .push(OnnxValueInfo::tensor("B", ElementType::Int64, &[4, 5]));
        model
            .graph
            .outputs
            .push(OnnxValueInfo::tensor("C", ElementType::Int64, &[4, 5]));
        model
            .graph
            .nodes
            .push(OnnxNode::new("Add", "add_0", &["A", "B"], &["C"]));
        model
    }

    #[test]
    fn test_model_roundtrip() {
        let mut model = add_model();
        model.graph.initializers.push(OnnxTensor {
            float_data: vec![1.0, 2.0],
            ..OnnxTensor::new("bias", ElementType::Float, vec![2])
        });
        model.opset_imports.push(OnnxOpset {
            domain: "com.microsoft".into(),
            version: 1,
        });
        let decoded = OnnxModel::from_bytes(&model.to_bytes()).unwrap();
        assert_eq!(decoded, model);
        assert_eq!(decoded.opset_version(""), Some(ONNX_OPSET_VERSION));
        assert_eq!(decoded.opset_version("com.microsoft"), Some(1));
        assert_eq!(decoded.graph.node("add_0").unwrap().op_type, "Add");
        assert!(decoded.graph.node("missing").is_none());
        assert!(decoded.graph.initializer("bias").is_some());
    }

    #[test]
    fn test_model_without_graph_rejected() {
        let mut enc = PbEncoder::new();
        enc.write_int64_field(1, ONNX_IR_VERSION);
        assert!(OnnxModel::from_bytes(&enc.into_bytes()).is_err());
    }

    #[test]
    fn test_model_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("add.onnx");
        let model = add_model();
        model.save(&path).unwrap();
        assert_eq!(OnnxModel::load(&path).unwrap(), model);
        assert!(matches!(
            OnnxModel::load(dir.path().join("missing.onnx")),
            Err(Error::Io(_))
        ));
    }
}
