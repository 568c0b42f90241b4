//! Binary FBX reader
//!
//! Parses the node tree of a binary FBX file (32-bit record headers before
//! version 7500, 64-bit from 7500 on) and pulls triangle geometry out of
//! `Objects/Geometry`. Only what a static mesh needs is interpreted; every
//! other node is kept as a generic tree.

use crate::error::FbxError;
use crate::render::Mesh;
use flate2::read::ZlibDecoder;
use glam::Vec3;
use std::borrow::Cow;
use std::io::Read;

const MAGIC: &[u8] = b"Kaydara FBX Binary  \x00\x1a\x00";
const HEADER_LEN: usize = MAGIC.len() + 4;
/// Versions from here on use 64-bit record headers
const WIDE_HEADER_VERSION: u32 = 7500;
/// Deepest record nesting accepted; real exports stay well under 20
const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Raw(Vec<u8>),
    BoolArray(Vec<bool>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
}

impl Property {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric array (or scalar) widened to f64
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        Some(match self {
            Property::F64Array(v) => v.clone(),
            Property::F32Array(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Property::I32Array(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Property::I64Array(v) => v.iter().map(|&x| x as f64).collect(),
            Property::F64(x) => vec![*x],
            Property::F32(x) => vec![f64::from(*x)],
            _ => return None,
        })
    }

    /// Integer array (or scalar) widened to i64
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        Some(match self {
            Property::I32Array(v) => v.iter().map(|&x| i64::from(x)).collect(),
            Property::I64Array(v) => v.clone(),
            Property::I16(x) => vec![i64::from(*x)],
            Property::I32(x) => vec![i64::from(*x)],
            Property::I64(x) => vec![*x],
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FbxNode {
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<FbxNode>,
}

impl FbxNode {
    pub fn child(&self, name: &str) -> Option<&FbxNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FbxNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FbxDocument {
    pub version: u32,
    pub nodes: Vec<FbxNode>,
}

impl FbxDocument {
    pub fn node(&self, name: &str) -> Option<&FbxNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FbxError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(FbxError::UnexpectedEof(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FbxError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FbxError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, FbxError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, FbxError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

fn invalid(offset: usize, reason: impl Into<String>) -> FbxError {
    FbxError::InvalidRecord {
        offset,
        reason: reason.into(),
    }
}

/// Parse a binary FBX file into its node tree
pub fn parse(bytes: &[u8]) -> Result<FbxDocument, FbxError> {
    if !bytes.starts_with(MAGIC) {
        let text = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        let trimmed = text.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with(';') || trimmed.starts_with("FBXHeaderExtension") {
            return Err(FbxError::AsciiUnsupported);
        }
        return Err(FbxError::BadMagic);
    }

    if bytes.len() < HEADER_LEN {
        return Err(FbxError::UnexpectedEof(bytes.len()));
    }

    let mut reader = Reader {
        data: bytes,
        pos: MAGIC.len(),
    };
    let version = reader.u32()?;
    let wide = version >= WIDE_HEADER_VERSION;
    let record_header = if wide { 25 } else { 13 };

    let mut nodes = Vec::new();
    while reader.remaining() >= record_header {
        match parse_node(&mut reader, wide, 0)? {
            Some(node) => nodes.push(node),
            None => break,
        }
    }

    tracing::debug!(version, top_level = nodes.len(), "Parsed FBX");
    Ok(FbxDocument { version, nodes })
}

/// One record and its children; `None` for a null (terminator) record
fn parse_node(
    reader: &mut Reader<'_>,
    wide: bool,
    depth: usize,
) -> Result<Option<FbxNode>, FbxError> {
    let start = reader.pos;
    if depth > MAX_DEPTH {
        return Err(invalid(start, "nesting too deep"));
    }
    let (end, num_props, props_len) = if wide {
        (reader.u64()?, reader.u64()?, reader.u64()?)
    } else {
        (
            u64::from(reader.u32()?),
            u64::from(reader.u32()?),
            u64::from(reader.u32()?),
        )
    };
    let name_len = reader.u8()?;

    if end == 0 {
        if num_props != 0 || props_len != 0 || name_len != 0 {
            return Err(invalid(start, "malformed null record"));
        }
        return Ok(None);
    }

    let end = usize::try_from(end).map_err(|_| invalid(start, "end offset overflow"))?;
    let name = String::from_utf8_lossy(reader.take(usize::from(name_len))?).into_owned();
    if end > reader.data.len() || end < reader.pos {
        return Err(invalid(start, format!("end offset {end} out of range")));
    }

    let props_start = reader.pos;
    let mut properties = Vec::new();
    for _ in 0..num_props {
        properties.push(parse_property(reader)?);
    }
    if (reader.pos - props_start) as u64 != props_len {
        return Err(invalid(start, "property list length mismatch"));
    }

    let mut children = Vec::new();
    while reader.pos < end {
        match parse_node(reader, wide, depth + 1)? {
            Some(child) => children.push(child),
            None => break,
        }
    }
    if reader.pos > end {
        return Err(invalid(start, format!("record {name:?} overruns its end offset")));
    }
    reader.pos = end;

    Ok(Some(FbxNode {
        name,
        properties,
        children,
    }))
}

fn parse_property(reader: &mut Reader<'_>) -> Result<Property, FbxError> {
    let code = reader.u8()? as char;
    Ok(match code {
        'Y' => Property::I16(i16::from_le_bytes(reader.array()?)),
        'C' => Property::Bool(reader.u8()? != 0),
        'I' => Property::I32(i32::from_le_bytes(reader.array()?)),
        'F' => Property::F32(f32::from_le_bytes(reader.array()?)),
        'D' => Property::F64(f64::from_le_bytes(reader.array()?)),
        'L' => Property::I64(i64::from_le_bytes(reader.array()?)),
        'S' => {
            let len = reader.u32()? as usize;
            Property::String(String::from_utf8_lossy(reader.take(len)?).into_owned())
        }
        'R' => {
            let len = reader.u32()? as usize;
            Property::Raw(reader.take(len)?.to_vec())
        }
        'f' => Property::F32Array(
            read_array(reader, 4)?
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        'd' => Property::F64Array(
            read_array(reader, 8)?
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        'i' => Property::I32Array(
            read_array(reader, 4)?
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        'l' => Property::I64Array(
            read_array(reader, 8)?
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        'b' => Property::BoolArray(read_array(reader, 1)?.iter().map(|&b| b != 0).collect()),
        other => return Err(FbxError::UnknownProperty(other)),
    })
}

/// Array payload as raw little-endian bytes, decompressed if needed
fn read_array<'a>(reader: &mut Reader<'a>, elem_size: usize) -> Result<Cow<'a, [u8]>, FbxError> {
    let offset = reader.pos;
    let count = reader.u32()? as usize;
    let encoding = reader.u32()?;
    let stored_len = reader.u32()? as usize;
    let stored = reader.take(stored_len)?;

    let expected = count
        .checked_mul(elem_size)
        .ok_or_else(|| invalid(offset, "array length overflow"))?;

    let bytes = match encoding {
        0 => Cow::Borrowed(stored),
        1 => {
            // One byte past `expected` is enough to tell the array is too long
            let limit = u64::try_from(expected)
                .map_err(|_| invalid(offset, "array length overflow"))?
                .saturating_add(1);
            let mut out = Vec::with_capacity(expected.min(64 * 1024 * 1024));
            ZlibDecoder::new(stored).take(limit).read_to_end(&mut out)?;
            Cow::Owned(out)
        }
        other => return Err(FbxError::UnsupportedEncoding(other)),
    };

    if bytes.len() != expected {
        return Err(invalid(
            offset,
            format!("array holds {} bytes, expected {expected}", bytes.len()),
        ));
    }
    Ok(bytes)
}

/// Display name of a geometry node (`Name\0\x01Geometry` in binary files)
fn geometry_name(node: &FbxNode) -> String {
    node.properties
        .iter()
        .find_map(Property::as_str)
        .map(|s| s.split('\0').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| "Geometry".to_string())
}

/// Merge every mesh geometry in the document into one triangle mesh.
/// Polygons are fan-triangulated; a negative index closes a polygon.
pub fn extract_mesh(doc: &FbxDocument) -> Result<Mesh, FbxError> {
    let objects = doc.node("Objects").ok_or(FbxError::NoGeometry)?;
    let mut mesh = Mesh::default();
    let mut geometries = 0;

    for geometry in objects.children_named("Geometry") {
        let vertices = geometry
            .child("Vertices")
            .and_then(|n| n.properties.first())
            .and_then(Property::to_f64_vec);
        let polygon_index = geometry
            .child("PolygonVertexIndex")
            .and_then(|n| n.properties.first())
            .and_then(Property::to_i64_vec);

        // Curves and shapes carry no polygons
        let (Some(vertices), Some(polygon_index)) = (vertices, polygon_index) else {
            continue;
        };

        let name = geometry_name(geometry);
        let bad = |reason: String| FbxError::BadGeometry {
            geometry: name.clone(),
            reason,
        };

        if vertices.len() % 3 != 0 {
            return Err(bad(format!(
                "{} vertex components is not a multiple of 3",
                vertices.len()
            )));
        }
        let vertex_count = vertices.len() / 3;
        let base = mesh.positions.len();
        mesh.positions.extend(
            vertices
                .chunks_exact(3)
                .map(|v| Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32)),
        );

        let mut polygon: Vec<u32> = Vec::new();
        for (i, &raw) in polygon_index.iter().enumerate() {
            let closes = raw < 0;
            let index = if closes { !raw } else { raw };
            if index as usize >= vertex_count {
                return Err(bad(format!(
                    "index {index} at {i} exceeds {vertex_count} vertices"
                )));
            }
            let absolute = u32::try_from(base + index as usize)
                .map_err(|_| bad("too many vertices".to_string()))?;
            polygon.push(absolute);

            if closes {
                push_fan(&mut mesh.indices, &polygon);
                polygon.clear();
            }
        }
        // Tolerate a final polygon missing its closing marker
        push_fan(&mut mesh.indices, &polygon);

        geometries += 1;
    }

    if geometries == 0 || mesh.indices.is_empty() {
        return Err(FbxError::NoGeometry);
    }

    tracing::debug!(
        geometries,
        vertices = mesh.positions.len(),
        triangles = mesh.triangle_count(),
        "Extracted FBX mesh"
    );
    Ok(mesh)
}

fn push_fan(indices: &mut Vec<u32>, polygon: &[u32]) {
    for i in 1..polygon.len().saturating_sub(1) {
        indices.extend_from_slice(&[polygon[0], polygon[i], polygon[i + 1]]);
    }
}

/// Minimal binary FBX writer for building fixtures
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn array_bytes(buf: &mut Vec<u8>, code: u8, count: usize, payload: Vec<u8>, compress: bool) {
        buf.push(code);
        buf.extend_from_slice(&(count as u32).to_le_bytes());
        let stored = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload).unwrap();
            encoder.finish().unwrap()
        } else {
            payload
        };
        buf.extend_from_slice(&u32::from(compress).to_le_bytes());
        buf.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        buf.extend_from_slice(&stored);
    }

    /// Compressed array whose payload need not match `count`
    pub(crate) fn write_compressed_array(buf: &mut Vec<u8>, code: u8, count: usize, payload: Vec<u8>) {
        array_bytes(buf, code, count, payload, true)
    }

    fn write_property(buf: &mut Vec<u8>, prop: &Property, compress: bool) {
        match prop {
            Property::Bool(v) => buf.extend_from_slice(&[b'C', u8::from(*v)]),
            Property::I16(v) => {
                buf.push(b'Y');
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Property::I32(v) => {
                buf.push(b'I');
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Property::I64(v) => {
                buf.push(b'L');
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Property::F32(v) => {
                buf.push(b'F');
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Property::F64(v) => {
                buf.push(b'D');
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Property::String(s) => {
                buf.push(b'S');
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Property::Raw(r) => {
                buf.push(b'R');
                buf.extend_from_slice(&(r.len() as u32).to_le_bytes());
                buf.extend_from_slice(r);
            }
            Property::BoolArray(v) => {
                let payload = v.iter().map(|&b| u8::from(b)).collect();
                array_bytes(buf, b'b', v.len(), payload, compress)
            }
            Property::I32Array(v) => {
                let payload = v.iter().flat_map(|x| x.to_le_bytes()).collect();
                array_bytes(buf, b'i', v.len(), payload, compress)
            }
            Property::I64Array(v) => {
                let payload = v.iter().flat_map(|x| x.to_le_bytes()).collect();
                array_bytes(buf, b'l', v.len(), payload, compress)
            }
            Property::F32Array(v) => {
                let payload = v.iter().flat_map(|x| x.to_le_bytes()).collect();
                array_bytes(buf, b'f', v.len(), payload, compress)
            }
            Property::F64Array(v) => {
                let payload = v.iter().flat_map(|x| x.to_le_bytes()).collect();
                array_bytes(buf, b'd', v.len(), payload, compress)
            }
        }
    }

    fn write_offset(buf: &mut Vec<u8>, at: usize, value: u64, wide: bool) {
        if wide {
            buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
        } else {
            buf[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
    }

    fn write_node(buf: &mut Vec<u8>, node: &FbxNode, wide: bool, compress: bool) {
        let field = if wide { 8 } else { 4 };
        let start = buf.len();
        buf.resize(start + 3 * field, 0);
        buf.push(node.name.len() as u8);
        buf.extend_from_slice(node.name.as_bytes());

        let props_start = buf.len();
        for prop in &node.properties {
            write_property(buf, prop, compress);
        }
        let props_len = (buf.len() - props_start) as u64;

        if !node.children.is_empty() {
            for child in &node.children {
                write_node(buf, child, wide, compress);
            }
            buf.resize(buf.len() + 3 * field + 1, 0);
        }

        let end = buf.len() as u64;
        write_offset(buf, start, end, wide);
        write_offset(buf, start + field, node.properties.len() as u64, wide);
        write_offset(buf, start + 2 * field, props_len, wide);
    }

    pub(crate) fn write_document(version: u32, nodes: &[FbxNode], compress: bool) -> Vec<u8> {
        let wide = version >= WIDE_HEADER_VERSION;
        let mut buf = MAGIC.to_vec();
        buf.extend_from_slice(&version.to_le_bytes());
        for node in nodes {
            write_node(&mut buf, node, wide, compress);
        }
        buf.resize(buf.len() + if wide { 25 } else { 13 }, 0);
        // footer padding, ignored by the reader
        buf.extend_from_slice(&[0xfa; 16]);
        buf
    }

    pub(crate) fn node(name: &str, properties: Vec<Property>, children: Vec<FbxNode>) -> FbxNode {
        FbxNode {
            name: name.to_string(),
            properties,
            children,
        }
    }

    pub(crate) fn geometry(name: &str, vertices: Vec<f64>, polygon_index: Vec<i32>) -> FbxNode {
        node(
            "Geometry",
            vec![
                Property::I64(1000),
                Property::String(format!("{name}\0\x01Geometry")),
                Property::String("Mesh".into()),
            ],
            vec![
                node("Vertices", vec![Property::F64Array(vertices)], vec![]),
                node(
                    "PolygonVertexIndex",
                    vec![Property::I32Array(polygon_index)],
                    vec![],
                ),
            ],
        )
    }

    /// A unit quad as one polygon
    pub(crate) fn quad_fbx(version: u32, compress: bool) -> Vec<u8> {
        let quad = geometry(
            "Quad",
            vec![
                -1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0,
            ],
            vec![0, 1, 2, -4],
        );
        write_document(
            version,
            &[
                node("FBXHeaderExtension", vec![], vec![node("FBXVersion", vec![Property::I32(version as i32)], vec![])]),
                node("Objects", vec![], vec![quad]),
            ],
            compress,
        )
    }
}
